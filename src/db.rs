//! Module implement the database, one shard replica's storage engine.
//!
//! [Db] owns the series catalog, name trie and id map over shared series
//! handles, the shared buffer file, the open shard files and the metadata
//! store files. All mutating operations funnel through here so the fault
//! latch can be enforced, once a file error latches, mutations refuse to
//! run until the database is reopened.

use std::{collections::BTreeMap, convert::TryFrom, ffi, fs, path, rc::Rc};

use crate::{
    buffer::{Buffer, BufferFile},
    cexpr::{self, SeriesCond, SeriesView},
    files::{self, ShardFileName},
    imap::Imap,
    points::{Points, Tp, Value},
    pool::Pools,
    qpack,
    series::{Series, SeriesRef},
    shard::{self, Shard, ShardRef},
    trie::Trie,
    users::{User, Users},
    Error, Result,
};

pub const SERIES_FN: &str = "series.dat";
pub const DROPPED_FN: &str = ".dropped";
pub const MAX_SERIES_ID_FN: &str = ".max_series_id";
pub const REPLICATE_FN: &str = ".replicate";

const SERIES_SCHEMA: i16 = 1;

/// Default number of points a series buffers before flushing to shards.
pub const BUFFER_LEN: usize = 64;
/// Default time slice width for numeric shards, in seconds.
pub const DURATION_NUM: u64 = 604800;
/// Default time slice width for string shards, in seconds.
pub const DURATION_LOG: u64 = 86400;
/// Default number of shards a numeric time slice spreads over.
pub const SHARD_MASK_NUM: u16 = 16;
/// Default number of shards a string time slice spreads over.
pub const SHARD_MASK_LOG: u16 = 8;
/// Default ceiling on points per chunk.
pub const MAX_CHUNK_POINTS: usize = 800;

/// Configuration for a database replica. Numeric and string series keep
/// separate slice durations and shard masks, do not collapse them.
#[derive(Clone, Debug)]
pub struct Config {
    /// Location path of the database directory.
    pub dir: ffi::OsString,
    /// Points buffered per series before a flush, the buffer file slot
    /// fits one more.
    ///
    /// Default: [BUFFER_LEN]
    pub buffer_len: usize,
    /// Time slice width for integer/float series.
    ///
    /// Default: [DURATION_NUM]
    pub duration_num: u64,
    /// Time slice width for string series.
    ///
    /// Default: [DURATION_LOG]
    pub duration_log: u64,
    /// Shards per numeric time slice, the series mask modulus.
    ///
    /// Default: [SHARD_MASK_NUM]
    pub shard_mask_num: u16,
    /// Shards per string time slice.
    ///
    /// Default: [SHARD_MASK_LOG]
    pub shard_mask_log: u16,
    /// Ceiling on points per chunk, flush and optimize both honor it.
    ///
    /// Default: [MAX_CHUNK_POINTS]
    pub max_chunk_points: usize,
}

impl Config {
    pub fn new(dir: &ffi::OsStr) -> Config {
        Config {
            dir: dir.to_os_string(),
            buffer_len: BUFFER_LEN,
            duration_num: DURATION_NUM,
            duration_log: DURATION_LOG,
            shard_mask_num: SHARD_MASK_NUM,
            shard_mask_log: SHARD_MASK_LOG,
            max_chunk_points: MAX_CHUNK_POINTS,
        }
    }

    pub fn set_buffer_len(&mut self, buffer_len: usize) -> &mut Self {
        self.buffer_len = buffer_len;
        self
    }

    pub fn set_durations(&mut self, num: u64, log: u64) -> &mut Self {
        self.duration_num = num;
        self.duration_log = log;
        self
    }

    pub fn set_shard_masks(&mut self, num: u16, log: u16) -> &mut Self {
        self.shard_mask_num = num;
        self.shard_mask_log = log;
        self
    }

    pub fn set_max_chunk_points(&mut self, max_chunk_points: usize) -> &mut Self {
        self.max_chunk_points = max_chunk_points;
        self
    }

    fn to_location(&self, fname: &str) -> ffi::OsString {
        let loc: path::PathBuf =
            [self.dir.as_os_str(), AsRef::<ffi::OsStr>::as_ref(fname)]
                .iter()
                .collect();
        loc.into_os_string()
    }
}

pub struct Db {
    config: Config,
    // first fatal error, mutations refuse to run while latched.
    fault: Option<Error>,
    users: Users,
    pools: Option<Pools>,
    series: Trie<SeriesRef>,
    series_map: Imap<SeriesRef>,
    shards: BTreeMap<u64, ShardRef>,
    max_series_id: u32,
    store: Option<qpack::FilePacker>,
    dropped_fd: Option<fs::File>,
    buffer: BufferFile,
}

impl Db {
    /// Open, or create, the database under `config.dir` and load catalog,
    /// buffer slots and shard indexes.
    pub fn open(config: Config) -> Result<Db> {
        err_at!(IOError, fs::create_dir_all(path::Path::new(&config.dir)))?;

        let users = Users::load(&config.dir)?;
        let buffer = BufferFile::open(&config.dir, config.buffer_len)?;

        let mut db = Db {
            config,
            fault: None,
            users,
            pools: None,
            series: Trie::new(),
            series_map: Imap::new(),
            shards: BTreeMap::new(),
            max_series_id: 0,
            store: None,
            dropped_fd: None,
            buffer,
        };

        db.load_series()?;
        db.load_buffer()?;
        db.load_shards()?;

        for (_, sref) in db.series_map.iter() {
            sref.borrow_mut().update_props();
        }

        Ok(db)
    }

    /// The latched fault, if any. Once set, every mutating operation
    /// short-circuits until the database is reopened.
    pub fn to_fault(&self) -> Option<Error> {
        self.fault.clone()
    }

    pub fn to_max_series_id(&self) -> u32 {
        self.max_series_id
    }

    pub fn series_count(&self) -> usize {
        self.series_map.len()
    }

    pub fn get_series(&self, name: &str) -> Option<SeriesRef> {
        self.series.get(name.as_bytes()).map(Rc::clone)
    }

    pub fn get_series_by_id(&self, id: u32) -> Option<SeriesRef> {
        self.series_map.get(id).map(Rc::clone)
    }

    /// Series handles in lexicographic name order.
    pub fn iter_series(&self) -> impl Iterator<Item = (Vec<u8>, &SeriesRef)> + '_ {
        self.series.iter()
    }

    /// Evaluate ready-made where-clause conditions against every series,
    /// in lexicographic name order.
    pub fn filter_series(&self, conds: &[SeriesCond]) -> Vec<SeriesRef> {
        let mut hits = vec![];
        for (_, sref) in self.series.iter() {
            let series = sref.borrow();
            let pool = match &self.pools {
                Some(pools) => pools.pool_id(&series.name),
                None => 0,
            };
            let view = SeriesView {
                series: &series,
                pool,
            };
            if conds.iter().all(|cond| cexpr::series_cmp(&view, cond)) {
                hits.push(Rc::clone(sref));
            }
        }
        hits
    }

    pub fn set_pools(&mut self, pools: Pools) {
        self.pools = Some(pools);
    }

    pub fn as_pools(&mut self) -> Option<&mut Pools> {
        self.pools.as_mut()
    }

    /// Pool owning `name`, from the cluster lookup table.
    pub fn pool_id(&self, name: &str) -> Option<u16> {
        self.pools.as_ref().map(|pools| pools.pool_id(name))
    }

    pub fn get_user(&self, name: &str, password: Option<&str>) -> Option<&User> {
        self.users.get_user(name, password)
    }

    pub fn add_user(&mut self, user: User) -> Result<()> {
        self.ok_mutating()?;
        let res = self.users.add_user(user);
        self.latch(&res);
        res
    }

    pub fn drop_user(&mut self, name: &str) -> Result<()> {
        self.ok_mutating()?;
        let res = self.users.drop_user(name);
        self.latch(&res);
        res
    }

    /// Raw `users.dat` bytes for a joining replica.
    pub fn users_file(&self) -> Result<Vec<u8>> {
        self.users.get_file()
    }

    /// Create a new series and persist it to the series store. Not a
    /// string series, it also claims a buffer slot.
    pub fn series_new(&mut self, name: &str, tp: Tp) -> Result<SeriesRef> {
        self.ok_mutating()?;
        let res = self.do_series_new(name, tp);
        self.latch(&res);
        res
    }

    fn do_series_new(&mut self, name: &str, tp: Tp) -> Result<SeriesRef> {
        if name.is_empty() {
            err_at!(InvalidInput, msg: "series name cannot be empty")?;
        }
        if self.series.get(name.as_bytes()).is_some() {
            err_at!(InvalidInput, msg: "series {:?} already exists", name)?;
        }

        self.max_series_id += 1;
        let id = self.max_series_id;
        let mut series = Series::new(
            id,
            tp,
            name,
            self.config.shard_mask_num,
            self.config.shard_mask_log,
        );

        let store = match self.store.as_mut() {
            Some(store) => store,
            None => err_at!(Fatal, msg: "series store not open")?,
        };
        store.add_array(3)?;
        store.add_str_term(name)?;
        store.add_int32(id as i32)?;
        store.add_int8(u8::from(tp) as i8)?;
        store.flush()?;

        if !tp.is_log() {
            let offset = self.buffer.new_slot(id)?;
            series.buffer = Some(Buffer::new(offset, self.config.buffer_len, tp));
        }

        let sref = series.into_ref();
        self.series.set(name.as_bytes(), Rc::clone(&sref));
        self.series_map.set(id, Rc::clone(&sref));
        Ok(sref)
    }

    /// Drop a series from the catalog and record its id in the dropped
    /// file. Physical point removal is lazy, the next optimize pass of
    /// each holding shard drops the chunks.
    pub fn drop_series(&mut self, name: &str) -> Result<()> {
        self.ok_mutating()?;
        let res = self.do_drop_series(name);
        self.latch(&res);
        res
    }

    fn do_drop_series(&mut self, name: &str) -> Result<()> {
        let sref = match self.series.remove(name.as_bytes()) {
            Some(sref) => sref,
            None => err_at!(KeyNotFound, msg: "series {:?} does not exist", name)?,
        };
        let mut series = sref.borrow_mut();
        self.series_map.remove(series.id);

        let dropped_loc = self.config.to_location(DROPPED_FN);
        let fd = match self.dropped_fd.as_mut() {
            Some(fd) => fd,
            None => err_at!(Fatal, msg: "dropped file not open")?,
        };
        write_file!(fd, &series.id.to_le_bytes(), &dropped_loc, "dropped id")?;

        if let Some(buffer) = series.buffer.take() {
            self.buffer.free_slot(buffer.offset)?;
        }
        Ok(())
    }

    /// Ingest one point. Numeric series go through the buffer, which
    /// flushes to shards when full, string series write through.
    pub fn add_point(&mut self, sref: &SeriesRef, ts: u64, val: Value) -> Result<()> {
        self.ok_mutating()?;
        let res = self.do_add_point(sref, ts, val);
        self.latch(&res);
        res
    }

    fn do_add_point(&mut self, sref: &SeriesRef, ts: u64, val: Value) -> Result<()> {
        if ts > (u32::MAX as u64) {
            err_at!(InvalidInput, msg: "timestamp {} beyond 32-bit range", ts)?;
        }
        let mut series = sref.borrow_mut();
        if val.to_tp() != series.tp {
            err_at!(
                InvalidInput, msg: "value type mismatch for series {:?}", series.name
            )?;
        }

        series.length += 1;
        if ts < series.start {
            series.start = ts;
        }
        if ts > series.end {
            series.end = ts;
        }

        if series.buffer.is_some() {
            series.buffer.as_mut().unwrap().points.add_point(ts, val.clone());
            let (n, offset) = {
                let buffer = series.buffer.as_ref().unwrap();
                (buffer.points.len(), buffer.offset)
            };
            if n == self.config.buffer_len {
                self.flush_buffer(&mut series)
            } else {
                self.buffer.write_point(offset, n, ts, &val)
            }
        } else {
            self.write_log_point(&mut series, ts, val)
        }
    }

    // move the buffered points out, flush them to shards and reset the
    // slot. On failure the in-memory points are restored, the buffer must
    // not retry a half-applied flush.
    fn flush_buffer(&mut self, series: &mut Series) -> Result<()> {
        let (tp, offset) = (series.tp, series.buffer.as_ref().unwrap().offset);
        let capacity = self.config.buffer_len;
        let points = {
            let buffer = series.buffer.as_mut().unwrap();
            std::mem::replace(&mut buffer.points, Points::new(capacity + 1, tp))
        };

        match self.flush_points(series, &points) {
            Ok(()) => self.buffer.write_len(offset, 0),
            Err(err) => {
                series.buffer.as_mut().unwrap().points = points;
                Err(err)
            }
        }
    }

    // partition sorted points into owning shards, then into chunks.
    fn flush_points(&mut self, series: &mut Series, points: &Points) -> Result<()> {
        let duration = self.config.duration_num;
        let data = points.as_slice();

        let mut gstart = 0;
        while gstart < data.len() {
            let shard_id = series.shard_id(data[gstart].ts, duration);
            let mut gend = gstart + 1;
            while gend < data.len() && series.shard_id(data[gend].ts, duration) == shard_id {
                gend += 1;
            }

            let shard = self.to_shard(shard_id, series.tp)?;
            let mut pstart = gstart;
            while pstart < gend {
                let pend = (pstart + self.config.max_chunk_points).min(gend);
                let pos = shard.borrow_mut().write_points(series.id, points, pstart, pend)?;
                series.add_idx(
                    &shard,
                    data[pstart].ts as u32,
                    data[pend - 1].ts as u32,
                    pos,
                    (pend - pstart) as u16,
                )?;
                pstart = pend;
            }
            gstart = gend;
        }
        Ok(())
    }

    // string series write through, one point, one chunk.
    fn write_log_point(&mut self, series: &mut Series, ts: u64, val: Value) -> Result<()> {
        let shard_id = series.shard_id(ts, self.config.duration_log);
        let shard = self.to_shard(shard_id, series.tp)?;

        let mut points = Points::new(1, series.tp);
        points.add_point(ts, val);
        let pos = shard.borrow_mut().write_points(series.id, &points, 0, 1)?;
        series.add_idx(&shard, ts as u32, ts as u32, pos, 1)
    }

    fn to_shard(&mut self, id: u64, tp: Tp) -> Result<ShardRef> {
        if let Some(shard) = self.shards.get(&id) {
            return Ok(Rc::clone(shard));
        }
        let shard = Shard::create(&self.config.dir, id, tp)?;
        self.shards.insert(id, Rc::clone(&shard));
        Ok(shard)
    }

    fn duration_of(&self, tp: Tp) -> u64 {
        match tp.is_log() {
            true => self.config.duration_log,
            false => self.config.duration_num,
        }
    }

    /// Rewrite shard `id`, coalescing every series' chunks into evenly
    /// sized runs and shedding chunks of dropped series. The replacement
    /// is built under a temp name and renamed over the live file.
    pub fn optimize(&mut self, id: u64) -> Result<()> {
        self.ok_mutating()?;
        let res = self.do_optimize(id);
        self.latch(&res);
        res
    }

    fn do_optimize(&mut self, id: u64) -> Result<()> {
        let old = match self.shards.get(&id) {
            Some(shard) => Rc::clone(shard),
            None => err_at!(KeyNotFound, msg: "shard {} does not exist", id)?,
        };
        let (tp, mask) = {
            let sh = old.borrow();
            (sh.tp, (sh.id % self.duration_of(sh.tp)) as u16)
        };
        let duration = self.duration_of(tp);

        let new = Shard::create_replacing(&self.config.dir, &old)?;

        let members: Vec<SeriesRef> = self
            .series_map
            .iter()
            .filter(|(_, sref)| {
                let series = sref.borrow();
                series.tp.is_log() == tp.is_log() && series.mask == mask
            })
            .map(|(_, sref)| Rc::clone(sref))
            .collect();

        for sref in members.iter() {
            sref.borrow_mut().optimize_shard(
                &new,
                duration,
                self.config.max_chunk_points,
            )?;
        }
        // stragglers, chunks that failed to read, still refer to the old
        // shard and are dropped with it.
        for sref in members.iter() {
            sref.borrow_mut().remove_shard(&old, duration);
        }

        {
            let mut sh = new.borrow_mut();
            sh.flags &= !(shard::HAS_NEW_VALUES | shard::HAS_OVERLAP);
            sh.rename_live()?;
            sh.write_flags()?;
        }
        self.shards.insert(id, new);
        Ok(())
    }

    /// Drop shard `id` altogether, catalog entries first, file last. The
    /// retention path for expired time slices.
    pub fn drop_shard(&mut self, id: u64) -> Result<()> {
        self.ok_mutating()?;
        let res = self.do_drop_shard(id);
        self.latch(&res);
        res
    }

    fn do_drop_shard(&mut self, id: u64) -> Result<()> {
        let old = match self.shards.remove(&id) {
            Some(shard) => shard,
            None => err_at!(KeyNotFound, msg: "shard {} does not exist", id)?,
        };
        let duration = self.duration_of(old.borrow().tp);

        for (_, sref) in self.series_map.iter() {
            sref.borrow_mut().remove_shard(&old, duration);
        }

        match Rc::try_unwrap(old) {
            Ok(cell) => cell.into_inner().purge(),
            Err(old) => {
                // a reader still holds the shard, the file goes, the
                // handle dies with the last clone.
                let loc = old.borrow().to_location();
                err_at!(IOError, fs::remove_file(path::Path::new(&loc)))
            }
        }
    }

    /// Write every live series id to the replicate file, the bootstrap
    /// stream for a joining replica.
    pub fn replicate_file(&self) -> Result<()> {
        let loc = self.config.to_location(REPLICATE_FN);
        let mut fd = files::create_file_w(&loc)?;
        for (id, _) in self.series_map.iter() {
            write_file!(fd, &id.to_le_bytes(), &loc, "replicate id")?;
        }
        Ok(())
    }

    fn ok_mutating(&self) -> Result<()> {
        match &self.fault {
            Some(err) => err_at!(Fatal, msg: "engine fault latched: {}", err),
            None => Ok(()),
        }
    }

    // resource-class errors latch the engine, validation errors pass.
    fn latch<T>(&mut self, res: &Result<T>) {
        if let Err(err) = res {
            if !err.is_validation() && self.fault.is_none() {
                log::error!("latching engine fault: {}", err);
                self.fault = Some(err.clone());
            }
        }
    }

    fn load_series(&mut self) -> Result<()> {
        let mut dropped: Imap<()> = Imap::new();
        let dropped_loc = self.config.to_location(DROPPED_FN);
        if files::file_exists(&dropped_loc) {
            log::debug!("read dropped series");
            let data = files::load_file(&dropped_loc)?;
            for chunk in data.chunks_exact(4) {
                dropped.set(u32::from_le_bytes(<[u8; 4]>::try_from(chunk).unwrap()), ());
            }
        }

        let store_loc = self.config.to_location(SERIES_FN);
        if files::file_exists(&store_loc) {
            let data = files::load_file(&store_loc)?;
            let mut up = qpack::Unpacker::new(&data);
            qpack::check_schema(&mut up, SERIES_SCHEMA, "series.dat")?;

            loop {
                match up.next()? {
                    qpack::Obj::Array(3) => (),
                    qpack::Obj::End => break,
                    obj => err_at!(DecodeFail, msg: "series.dat bad record {:?}", obj)?,
                }
                let name = {
                    let raw = up.next()?.as_raw()?;
                    // names are stored with a trailing NUL.
                    let raw = if raw.ends_with(&[0]) {
                        &raw[..raw.len() - 1]
                    } else {
                        raw
                    };
                    err_at!(FailConvert, std::str::from_utf8(raw))?.to_string()
                };
                let id = err_at!(FailConvert, u32::try_from(up.next()?.to_int()?))?;
                let tp = Tp::try_from(err_at!(
                    FailConvert,
                    u8::try_from(up.next()?.to_int()?)
                )?)?;

                // dropped ids still raise the high-water mark.
                if id > self.max_series_id {
                    self.max_series_id = id;
                }
                if dropped.get(id).is_none() {
                    let sref = Series::new(
                        id,
                        tp,
                        &name,
                        self.config.shard_mask_num,
                        self.config.shard_mask_log,
                    )
                    .into_ref();
                    self.series.set(name.as_bytes(), Rc::clone(&sref));
                    self.series_map.set(id, sref);
                }
            }
        }

        self.update_max_series_id()?;
        self.save_series()?;

        // fresh dropped file, the old ids are compacted away now.
        self.dropped_fd = Some(files::create_file_w(&dropped_loc)?);
        self.store = Some(qpack::FilePacker::open_append(&store_loc)?);
        Ok(())
    }

    // the dropped-then-reused trap: a dropped id vanishes from the store
    // at compaction while shards may still hold its points until the next
    // optimize. The high-water file keeps the id space monotone across
    // restarts regardless.
    fn update_max_series_id(&mut self) -> Result<()> {
        let loc = self.config.to_location(MAX_SERIES_ID_FN);

        let mut file_val = 0_u32;
        if files::file_exists(&loc) {
            let data = files::load_file(&loc)?;
            if data.len() < 4 {
                err_at!(DecodeFail, msg: "max series id file of {} bytes", data.len())?;
            }
            file_val = u32::from_le_bytes(<[u8; 4]>::try_from(&data[..4]).unwrap());
            if file_val > self.max_series_id {
                self.max_series_id = file_val;
            }
        }

        if file_val < self.max_series_id {
            log::debug!("write max series id {}", self.max_series_id);
            let mut fd = files::create_file_w(&loc)?;
            write_file!(fd, &self.max_series_id.to_le_bytes(), &loc, "max series id")?;
        }
        Ok(())
    }

    // rewrite series.dat from the live catalog, compacting dropped
    // entries away.
    fn save_series(&mut self) -> Result<()> {
        log::debug!("cleanup series file");
        let loc = self.config.to_location(SERIES_FN);

        self.store = None; // close any append handle before truncating

        let mut fpacker = qpack::FilePacker::create(&loc)?;
        fpacker.open_array()?;
        fpacker.add_int16(SERIES_SCHEMA)?;
        for (_, sref) in self.series.iter() {
            let series = sref.borrow();
            fpacker.add_array(3)?;
            fpacker.add_str_term(&series.name)?;
            fpacker.add_int32(series.id as i32)?;
            fpacker.add_int8(u8::from(series.tp) as i8)?;
        }
        fpacker.close()
    }

    fn load_buffer(&mut self) -> Result<()> {
        let capacity = self.config.buffer_len;
        for slot in self.buffer.load_slots()? {
            match self.series_map.get(slot.series_id) {
                Some(sref) => {
                    let mut series = sref.borrow_mut();
                    let points = slot.to_points(series.tp, capacity)?;
                    series.length += points.len() as u64;
                    series.buffer = Some(Buffer {
                        offset: slot.offset,
                        points,
                    });
                }
                None => {
                    log::debug!("orphan buffer slot for series {}", slot.series_id);
                    self.buffer.free_slot(slot.offset)?;
                }
            }
        }

        // series created just before a crash may miss their slot.
        let mut missing = vec![];
        for (_, sref) in self.series_map.iter() {
            let series = sref.borrow();
            if !series.tp.is_log() && series.buffer.is_none() {
                missing.push(Rc::clone(sref));
            }
        }
        for sref in missing {
            let mut series = sref.borrow_mut();
            let offset = self.buffer.new_slot(series.id)?;
            series.buffer = Some(Buffer::new(offset, capacity, series.tp));
        }
        Ok(())
    }

    fn load_shards(&mut self) -> Result<()> {
        let entries = err_at!(IOError, fs::read_dir(path::Path::new(&self.config.dir)))?;

        let mut locs: Vec<(u64, ffi::OsString)> = vec![];
        for entry in entries {
            let entry = err_at!(IOError, entry)?;
            let loc = entry.path().into_os_string();
            let is_temp = entry
                .file_name()
                .to_str()
                .map_or(false, |name| name.ends_with("__tsdms.shard"));
            if is_temp {
                // leftover of a crashed optimize, the old shard is intact.
                log::warn!("removing stale optimize temp {:?}", loc);
                err_at!(IOError, fs::remove_file(entry.path()))?;
                continue;
            }
            if let Ok(id) = u64::try_from(ShardFileName(loc.clone())) {
                locs.push((id, loc));
            }
        }
        locs.sort();

        for (id, loc) in locs {
            let shard = match Shard::open(&loc) {
                Ok(shard) => shard,
                Err(err) => {
                    log::error!("skipping shard {:?}: {}", loc, err);
                    continue;
                }
            };
            shard.borrow_mut().flags |= shard::IS_LOADING;

            let chunks = match shard.borrow_mut().load_chunks() {
                Ok(chunks) => chunks,
                Err(err) => {
                    log::error!("skipping shard {:?}: {}", loc, err);
                    continue;
                }
            };
            for chunk in chunks {
                match self.series_map.get(chunk.series_id) {
                    Some(sref) => {
                        let mut series = sref.borrow_mut();
                        series.add_idx(
                            &shard,
                            chunk.start_ts,
                            chunk.end_ts,
                            chunk.pos,
                            chunk.len,
                        )?;
                        series.length += chunk.len as u64;
                    }
                    None => {
                        // dropped series, shed the chunk at next optimize.
                        shard.borrow_mut().flags |= shard::HAS_NEW_VALUES;
                    }
                }
            }

            shard.borrow_mut().flags &= !shard::IS_LOADING;
            self.shards.insert(id, shard);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "db_test.rs"]
mod db_test;
