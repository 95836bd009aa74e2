//! Module implement the shard file, the on-disk home of points for one
//! time slice.
//!
//! File layout:
//!
//! ```text
//! [marker][schema: u8][id: u64][tp: u8][flags: u8]     header
//! [chunk][chunk]...                                    append heap
//! ```
//!
//! and each chunk is
//!
//! ```text
//! [series_id: u32][len: u16][start_ts: u32][end_ts: u32][usz: u32][csz: u32]
//! [zstd compressed payload of `usz` bytes holding `len` points]
//! ```
//!
//! all integers little-endian. Numeric payload is `[ts: u32][val: 8B]` per
//! point, string payload is `[ts: u32][vlen: u32][bytes]`. The chunk start
//! offset within the file is the `pos` recorded by the series index.
//!
//! Only `HAS_NEW_VALUES` survives a restart, the remaining flag bits are
//! runtime state: overlap is re-derived while chunks are loaded and must
//! not be trusted before loading completes.

use fs2::FileExt;
use lazy_static::lazy_static;

use std::{
    cell::RefCell,
    convert::TryFrom,
    ffi, fs,
    io::{self, Read, Seek},
    path,
    rc::Rc,
};

use crate::{
    files::{self, ShardFileName},
    points::{Points, Tp, Value},
    Error, Result,
};

/// Shard has chunks appended after older chunks for the same series, a
/// candidate for optimization.
pub const HAS_NEW_VALUES: u8 = 0x01;
/// Shard is loading, index rebuild in progress, suppresses new-value
/// marking and overlap trust.
pub const IS_LOADING: u8 = 0x02;
/// At least one series has overlapping chunks in this shard.
pub const HAS_OVERLAP: u8 = 0x04;
/// Shard is the optimize replacement target for [Shard::replacing].
pub const REPLACING: u8 = 0x08;

// flag bits worth persisting, the rest is runtime state.
const PERSIST_FLAGS: u8 = HAS_NEW_VALUES;

const SHARD_SCHEMA: u8 = 1;
const CHUNK_HDR: usize = 22;

lazy_static! {
    static ref SHARD_MARKER: Vec<u8> = b"tsdms.shard".to_vec();
}

fn header_len() -> usize {
    SHARD_MARKER.len() + 1 + 8 + 1 + 1
}

fn flags_fpos() -> u64 {
    (header_len() - 1) as u64
}

/// Identity handle for a shard. Index entries compare shard handles with
/// [Rc::ptr_eq], never by id, an optimize replacement carries the same id
/// as the shard it replaces.
pub type ShardRef = Rc<RefCell<Shard>>;

pub struct Shard {
    pub id: u64,
    pub tp: Tp,
    pub flags: u8,
    /// While this shard is an optimize target, the shard it replaces.
    pub replacing: Option<ShardRef>,
    loc: ffi::OsString,
    fd: fs::File,
}

/// Chunk location within a shard file, the load-time view of one future
/// index entry.
#[derive(Clone, Debug)]
pub struct ChunkRef {
    pub series_id: u32,
    pub pos: u32,
    pub len: u16,
    pub start_ts: u32,
    pub end_ts: u32,
}

impl Shard {
    /// Create a fresh shard file under `dir` and hand out its ref.
    pub fn create(dir: &ffi::OsStr, id: u64, tp: Tp) -> Result<ShardRef> {
        let loc = to_location(dir, ShardFileName::from(id).into());
        let fd = files::open_file_rw(&loc)?;
        let mut shard = Shard {
            id,
            tp,
            flags: 0,
            replacing: None,
            loc,
            fd,
        };
        shard.write_header()?;
        Ok(Rc::new(RefCell::new(shard)))
    }

    /// Create the optimize replacement for `old`, named with the temp
    /// convention until [Shard::rename_live].
    pub fn create_replacing(dir: &ffi::OsStr, old: &ShardRef) -> Result<ShardRef> {
        let (id, tp) = {
            let old = old.borrow();
            (old.id, old.tp)
        };
        let loc = to_location(dir, ShardFileName::to_temp(id));
        fs::remove_file(path::Path::new(&loc)).ok(); // stale temp from a crash
        let fd = files::open_file_rw(&loc)?;
        let mut shard = Shard {
            id,
            tp,
            flags: REPLACING,
            replacing: Some(Rc::clone(old)),
            loc,
            fd,
        };
        shard.write_header()?;
        Ok(Rc::new(RefCell::new(shard)))
    }

    /// Open an existing shard file. The caller owns index rebuild, via
    /// [Shard::load_chunks], with [IS_LOADING] set for the duration.
    pub fn open(loc: &ffi::OsStr) -> Result<ShardRef> {
        let mut fd = files::open_file_rw(loc)?;
        let n = header_len();
        let hdr = read_file!(fd, io::SeekFrom::Start(0), n as u64, "shard header")?;

        if &hdr[..SHARD_MARKER.len()] != SHARD_MARKER.as_slice() {
            err_at!(InvalidFile, msg: "{:?} missing shard marker", loc)?;
        }
        let mut off = SHARD_MARKER.len();
        if hdr[off] != SHARD_SCHEMA {
            err_at!(InvalidFormat, msg: "shard schema {}, expected {}", hdr[off], SHARD_SCHEMA)?;
        }
        off += 1;
        let id = u64::from_le_bytes(<[u8; 8]>::try_from(&hdr[off..off + 8]).unwrap());
        off += 8;
        let tp = Tp::try_from(hdr[off])?;
        off += 1;
        let flags = hdr[off] & PERSIST_FLAGS;

        let shard = Shard {
            id,
            tp,
            flags,
            replacing: None,
            loc: loc.to_os_string(),
            fd,
        };
        Ok(Rc::new(RefCell::new(shard)))
    }

    fn write_header(&mut self) -> Result<()> {
        let mut buf = Vec::with_capacity(header_len());
        buf.extend_from_slice(&SHARD_MARKER);
        buf.push(SHARD_SCHEMA);
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.push(u8::from(self.tp));
        buf.push(self.flags & PERSIST_FLAGS);

        err_at!(IOError, self.fd.seek(io::SeekFrom::Start(0)))?;
        write_file!(self.fd, &buf, &self.loc, "shard header")?;
        Ok(())
    }

    /// Rewrite the flags byte in the header, transient bits masked out.
    pub fn write_flags(&mut self) -> Result<()> {
        err_at!(IOError, self.fd.seek(io::SeekFrom::Start(flags_fpos())))?;
        write_file!(self.fd, &[self.flags & PERSIST_FLAGS], &self.loc, "shard flags")?;
        Ok(())
    }

    pub fn is_set(&self, flag: u8) -> bool {
        (self.flags & flag) != 0
    }

    /// Append points `[pstart, pend)` as one compressed chunk, returns the
    /// chunk's start offset. Offsets are monotone per shard.
    pub fn write_points(
        &mut self,
        series_id: u32,
        points: &Points,
        pstart: usize,
        pend: usize,
    ) -> Result<u32> {
        let data = points.as_slice();
        debug_assert!(pstart < pend && pend <= data.len());

        let payload = encode_points(&data[pstart..pend])?;
        let comp = err_at!(IOError, zstd::encode_all(&payload[..], 0))?;

        let len = err_at!(FailConvert, u16::try_from(pend - pstart))?;
        let start_ts = err_at!(FailConvert, u32::try_from(data[pstart].ts))?;
        let end_ts = err_at!(FailConvert, u32::try_from(data[pend - 1].ts))?;
        let usz = err_at!(FailConvert, u32::try_from(payload.len()))?;
        let csz = err_at!(FailConvert, u32::try_from(comp.len()))?;

        let fpos = err_at!(IOError, self.fd.seek(io::SeekFrom::End(0)))?;
        let pos = err_at!(FailConvert, u32::try_from(fpos))?;

        let mut buf = Vec::with_capacity(CHUNK_HDR + comp.len());
        buf.extend_from_slice(&series_id.to_le_bytes());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&start_ts.to_le_bytes());
        buf.extend_from_slice(&end_ts.to_le_bytes());
        buf.extend_from_slice(&usz.to_le_bytes());
        buf.extend_from_slice(&csz.to_le_bytes());
        buf.extend_from_slice(&comp);
        write_file!(self.fd, &buf, &self.loc, "shard chunk")?;

        Ok(pos)
    }

    /// Read back one chunk into `points`, cropped to the half-open
    /// `[start, end)` request range. With `has_overlap` points go through
    /// insertion sort, otherwise they are fast appended.
    pub fn read_points(
        &mut self,
        points: &mut Points,
        pos: u32,
        len: u16,
        start: Option<u64>,
        end: Option<u64>,
        has_overlap: bool,
    ) -> Result<()> {
        let seek = io::SeekFrom::Start(pos as u64);
        let hdr = read_file!(self.fd, seek, CHUNK_HDR as u64, "chunk header")?;
        let got_len = u16::from_le_bytes(<[u8; 2]>::try_from(&hdr[4..6]).unwrap());
        let usz = u32::from_le_bytes(<[u8; 4]>::try_from(&hdr[14..18]).unwrap());
        let csz = u32::from_le_bytes(<[u8; 4]>::try_from(&hdr[18..22]).unwrap());

        if got_len != len {
            err_at!(DecodeFail, msg: "chunk at {} holds {} points, index says {}", pos, got_len, len)?;
        }

        let seek = io::SeekFrom::Current(0);
        let comp = read_file!(self.fd, seek, csz as u64, "chunk payload")?;
        let payload = err_at!(IOError, zstd::decode_all(&comp[..]))?;
        if payload.len() != (usz as usize) {
            err_at!(DecodeFail, msg: "chunk at {} decompressed {}/{}", pos, payload.len(), usz)?;
        }

        decode_points(self.tp, len, &payload, |ts, val| {
            let keep = start.map_or(true, |s| ts >= s) && end.map_or(true, |e| ts < e);
            if keep {
                match has_overlap {
                    true => points.add_point(ts, val),
                    false => points.append(ts, val),
                }
            }
        })
    }

    /// Scan the append heap and return every chunk's location, used to
    /// rebuild series indexes at startup. A truncated tail, crash during
    /// append, is cut off and logged.
    pub fn load_chunks(&mut self) -> Result<Vec<ChunkRef>> {
        let eof = err_at!(IOError, self.fd.metadata())?.len();
        let mut fpos = header_len() as u64;
        let mut chunks = vec![];

        while fpos < eof {
            if fpos + (CHUNK_HDR as u64) > eof {
                break;
            }
            let seek = io::SeekFrom::Start(fpos);
            let hdr = read_file!(self.fd, seek, CHUNK_HDR as u64, "chunk header")?;
            let csz =
                u32::from_le_bytes(<[u8; 4]>::try_from(&hdr[18..22]).unwrap()) as u64;
            if fpos + (CHUNK_HDR as u64) + csz > eof {
                break;
            }
            chunks.push(ChunkRef {
                series_id: u32::from_le_bytes(<[u8; 4]>::try_from(&hdr[0..4]).unwrap()),
                pos: err_at!(FailConvert, u32::try_from(fpos))?,
                len: u16::from_le_bytes(<[u8; 2]>::try_from(&hdr[4..6]).unwrap()),
                start_ts: u32::from_le_bytes(<[u8; 4]>::try_from(&hdr[6..10]).unwrap()),
                end_ts: u32::from_le_bytes(<[u8; 4]>::try_from(&hdr[10..14]).unwrap()),
            });
            fpos += (CHUNK_HDR as u64) + csz;
        }

        if fpos < eof {
            log::warn!("shard {:?} truncated tail at {}, cutting {} bytes", self.loc, fpos, eof - fpos);
            err_at!(IOError, self.fd.set_len(fpos))?;
        }

        Ok(chunks)
    }

    /// Rename the optimize replacement over the live name. The open fd
    /// stays valid across the rename.
    pub fn rename_live(&mut self) -> Result<()> {
        let live = {
            let dir = match path::Path::new(&self.loc).parent() {
                Some(dir) => dir.as_os_str(),
                None => err_at!(InvalidFile, msg: "{:?}", self.loc)?,
            };
            to_location(dir, ShardFileName::from(self.id).into())
        };
        err_at!(IOError, fs::rename(path::Path::new(&self.loc), path::Path::new(&live)))?;
        self.loc = live;
        self.flags &= !REPLACING;
        self.replacing = None;
        Ok(())
    }

    /// Remove the shard file from disk, consuming the shard.
    pub fn purge(self) -> Result<()> {
        match self.fd.try_lock_exclusive() {
            Ok(_) => {
                err_at!(IOError, fs::remove_file(path::Path::new(&self.loc)), "remove {:?}", self.loc)?;
                err_at!(IOError, self.fd.unlock(), "unlock {:?}", self.loc)
            }
            Err(_) => err_at!(InvalidFile, msg: "shard file {:?} locked", self.loc),
        }
    }

    pub fn to_location(&self) -> ffi::OsString {
        self.loc.clone()
    }
}

// chunk payload, uncompressed.
fn encode_points(data: &[crate::points::Point]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(data.len() * 12);
    for p in data {
        let ts = err_at!(FailConvert, u32::try_from(p.ts))?;
        buf.extend_from_slice(&ts.to_le_bytes());
        match &p.val {
            Value::Int(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::Float(v) => buf.extend_from_slice(&v.to_bits().to_le_bytes()),
            Value::Str(v) => {
                let n = err_at!(FailConvert, u32::try_from(v.len()))?;
                buf.extend_from_slice(&n.to_le_bytes());
                buf.extend_from_slice(v);
            }
        }
    }
    Ok(buf)
}

fn decode_points<F>(tp: Tp, len: u16, payload: &[u8], mut emit: F) -> Result<()>
where
    F: FnMut(u64, Value),
{
    let mut off = 0;
    for _ in 0..len {
        check_remaining!(&payload[off..], 4, "chunk ts")?;
        let ts = u32::from_le_bytes(<[u8; 4]>::try_from(&payload[off..off + 4]).unwrap());
        off += 4;

        let val = match tp {
            Tp::Int => {
                check_remaining!(&payload[off..], 8, "chunk int")?;
                let v =
                    i64::from_le_bytes(<[u8; 8]>::try_from(&payload[off..off + 8]).unwrap());
                off += 8;
                Value::Int(v)
            }
            Tp::Float => {
                check_remaining!(&payload[off..], 8, "chunk float")?;
                let bits =
                    u64::from_le_bytes(<[u8; 8]>::try_from(&payload[off..off + 8]).unwrap());
                off += 8;
                Value::Float(f64::from_bits(bits))
            }
            Tp::Str => {
                check_remaining!(&payload[off..], 4, "chunk vlen")?;
                let n = u32::from_le_bytes(
                    <[u8; 4]>::try_from(&payload[off..off + 4]).unwrap(),
                ) as usize;
                off += 4;
                check_remaining!(&payload[off..], n, "chunk str")?;
                let v = payload[off..off + n].to_vec();
                off += n;
                Value::Str(v)
            }
        };
        emit(ts as u64, val);
    }
    Ok(())
}

fn to_location(dir: &ffi::OsStr, file: ffi::OsString) -> ffi::OsString {
    let loc: path::PathBuf = [dir.to_os_string(), file].iter().collect();
    loc.into_os_string()
}

#[cfg(test)]
#[path = "shard_test.rs"]
mod shard_test;
