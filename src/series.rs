//! Module implement the logical time series, catalog entry, buffer head
//! and the chunk index stitching buffer and shards into one ordered view.

use std::{cell::RefCell, rc::Rc};

use crate::{
    buffer::Buffer,
    points::{Points, Tp},
    shard::{self, ShardRef},
    Result,
};

/// Shared ownership handle for a series. The catalog holds one clone in
/// the name trie and one in the id map, readers hold one for the duration
/// of a visit. Teardown happens when the last clone drops.
pub type SeriesRef = Rc<RefCell<Series>>;

/// One chunk of points inside a shard file. Entries within a series are
/// sorted by `start_ts`, 32-bit time variant.
#[derive(Clone)]
pub struct IdxEntry {
    pub start_ts: u32,
    pub end_ts: u32,
    pub shard: ShardRef,
    pub pos: u32,
    pub len: u16,
}

pub struct Series {
    pub id: u32,
    pub tp: Tp,
    pub name: String,
    pub length: u64,
    pub start: u64,
    pub end: u64,
    pub mask: u16,
    /// String series carry no buffer, they write through to shards.
    pub buffer: Option<Buffer>,
    pub idx: Vec<IdxEntry>,
    pub has_overlap: bool,
}

// sum of the name bytes, the sharding and pool routing ingredient.
fn name_sn(name: &str) -> u32 {
    name.bytes().map(|b| b as u32).sum()
}

impl Series {
    pub fn new(id: u32, tp: Tp, name: &str, mask_num: u16, mask_log: u16) -> Series {
        let mask = match tp.is_log() {
            true => ((name_sn(name) / 11) % (mask_log as u32)) as u16,
            false => ((name_sn(name) / 11) % (mask_num as u32)) as u16,
        };

        Series {
            id,
            tp,
            name: name.to_string(),
            length: 0,
            start: u64::MAX,
            end: 0,
            mask,
            buffer: None,
            idx: Vec::default(),
            has_overlap: false,
        }
    }

    /// Shard id owning this series' points for the slice holding `ts`.
    pub fn shard_id(&self, ts: u64, duration: u64) -> u64 {
        (ts - (ts % duration)) + (self.mask as u64)
    }

    pub fn into_ref(self) -> SeriesRef {
        Rc::new(RefCell::new(self))
    }

    /// Register one chunk with the index, keeping `start_ts` order with a
    /// suffix shift. Only called when new values are appended, the
    /// optimizer rewrites entries in place instead.
    ///
    /// Appending behind an existing chunk of the same shard marks the
    /// shard `HAS_NEW_VALUES`, there is something to optimize now, unless
    /// the shard is still loading. Overlap with either neighbor marks the
    /// shard and the series, overlap is never persisted, it is derived
    /// again while loading.
    pub fn add_idx(
        &mut self,
        shard: &ShardRef,
        start_ts: u32,
        end_ts: u32,
        pos: u32,
        len: u16,
    ) -> Result<()> {
        let mut i = self.idx.len();
        while i > 0 && start_ts < self.idx[i - 1].start_ts {
            i -= 1;
        }

        let neighbored = (i > 0 && Rc::ptr_eq(&self.idx[i - 1].shard, shard))
            || (i < self.idx.len() && Rc::ptr_eq(&self.idx[i].shard, shard));
        {
            let mut sh = shard.borrow_mut();
            if !sh.is_set(shard::HAS_NEW_VALUES | shard::IS_LOADING) && neighbored {
                sh.flags |= shard::HAS_NEW_VALUES;
                sh.write_flags()?;
            }
        }

        let entry = IdxEntry {
            start_ts,
            end_ts,
            shard: Rc::clone(shard),
            pos,
            len,
        };
        self.idx.insert(i, entry);

        let overlap = (i > 0 && self.idx[i - 1].end_ts > start_ts)
            || (i + 1 < self.idx.len() && end_ts > self.idx[i + 1].start_ts);
        if overlap {
            shard.borrow_mut().flags |= shard::HAS_OVERLAP;
            self.has_overlap = true;
        }

        Ok(())
    }

    /// Drop every index entry referring to `shard` in a single compacting
    /// pass, fixing up `length`, `start` and `end` when the removed range
    /// bracketed them.
    pub fn remove_shard(&mut self, shard: &ShardRef, duration: u64) {
        let mut removed = 0_u64;
        self.idx.retain(|e| match Rc::ptr_eq(&e.shard, shard) {
            true => {
                removed += e.len as u64;
                false
            }
            false => true,
        });

        if removed > 0 {
            self.length -= removed;

            let slice_start = shard.borrow().id - (self.mask as u64);
            let slice_end = slice_start + duration;
            if self.start >= slice_start && self.start < slice_end {
                self.update_start();
            }
            if self.end < slice_end && self.end > slice_start {
                self.update_end();
            }
        }
    }

    /// Recompute `start` and `end` from index plus buffer, the post-load
    /// fixup once every shard's chunks are registered.
    pub fn update_props(&mut self) {
        self.update_start();
        self.update_end();
    }

    fn update_start(&mut self) {
        self.start = match self.idx.first() {
            Some(e) => e.start_ts as u64,
            None => u64::MAX,
        };

        if let Some(buffer) = &self.buffer {
            if let Some(point) = buffer.points.first() {
                if point.ts < self.start {
                    self.start = point.ts;
                }
            }
        }
    }

    // entries are sorted by start_ts, not end_ts, a trailing overlap can
    // hide the maximum further left. Walk from the end while each entry
    // still reaches the running start.
    fn update_end(&mut self) {
        self.end = 0;
        let mut running = 0_u32;
        for e in self.idx.iter().rev() {
            if e.end_ts < running {
                break;
            }
            running = e.start_ts;
            if (e.end_ts as u64) > self.end {
                self.end = e.end_ts as u64;
            }
        }

        if let Some(buffer) = &self.buffer {
            if let Some(point) = buffer.points.last() {
                if point.ts > self.end {
                    self.end = point.ts;
                }
            }
        }
    }

    /// Collect every point within the half-open `[start, end)` range, both
    /// sides optional, merging shard chunks with the buffer suffix. Chunk
    /// read errors are logged and the chunk skipped, the remainder of the
    /// series is still served.
    pub fn get_points(&self, start: Option<u64>, end: Option<u64>) -> Points {
        let mut selected = vec![];
        let mut size = 0_usize;
        for (i, e) in self.idx.iter().enumerate() {
            let hit = start.map_or(true, |ts| (e.end_ts as u64) >= ts)
                && end.map_or(true, |ts| (e.start_ts as u64) < ts);
            if hit {
                selected.push(i);
                size += e.len as usize;
            }
        }

        let buffered = self.buffer.as_ref().map_or(0, |b| b.points.len());
        let mut points = Points::new(size + buffered, self.tp);

        for i in selected {
            let e = &self.idx[i];
            let mut shard = e.shard.borrow_mut();
            if let Err(err) =
                shard.read_points(&mut points, e.pos, e.len, start, end, self.has_overlap)
            {
                log::error!("series {:?} chunk at pos {}: {}", self.name, e.pos, err);
            }
        }

        if let Some(buffer) = &self.buffer {
            for point in buffer.points.get_range(start, end).iter() {
                points.add_point(point.ts, point.val.clone());
            }
        }

        points.shrink_to_fit();
        points
    }

    /// Rewrite this series' chunks from `shard.replacing` into `shard`,
    /// coalescing them into evenly sized chunks of at most
    /// `max_chunk_points`. Matching index entries are rewritten in place,
    /// the leftover range is collapsed by a left shift.
    pub fn optimize_shard(
        &mut self,
        shard: &ShardRef,
        duration: u64,
        max_chunk_points: usize,
    ) -> Result<()> {
        let (shard_id, replacing) = {
            let sh = shard.borrow();
            debug_assert!(sh.id % duration == self.mask as u64);
            match &sh.replacing {
                Some(old) => (sh.id, Rc::clone(old)),
                None => return Ok(()),
            }
        };

        let max_ts = ((shard_id + duration) - (self.mask as u64)) as u32;

        // locate the contiguous run of entries referring to the shard
        // being replaced, entries already rewritten to `shard` may sit in
        // between on a resumed optimize.
        let (mut start, mut end, mut size) = (0_usize, 0_usize, 0_usize);
        for (i, e) in self.idx.iter().enumerate() {
            if e.start_ts >= max_ts {
                break;
            }
            if Rc::ptr_eq(&e.shard, &replacing) {
                if end == 0 {
                    start = i;
                    end = i;
                }
                size += e.len as usize;
                end += 1;
            } else if Rc::ptr_eq(&e.shard, shard) && end > 0 {
                end += 1;
            }
        }
        if end == 0 {
            return Ok(()); // nothing of this series in the old shard
        }

        let mut points = Points::new(size, self.tp);
        for i in start..end {
            let e = &self.idx[i];
            if Rc::ptr_eq(&e.shard, &replacing) {
                let mut old = replacing.borrow_mut();
                if let Err(err) =
                    old.read_points(&mut points, e.pos, e.len, None, None, self.has_overlap)
                {
                    log::error!("optimize series {:?} pos {}: {}", self.name, e.pos, err);
                }
            }
        }

        let size = points.len();
        if size == 0 {
            self.idx.drain(start..end);
            return Ok(());
        }

        let num_chunks = (size - 1) / max_chunk_points + 1;
        let chunk_sz = size / num_chunks + ((size % num_chunks != 0) as usize);

        let mut pstart = 0;
        while pstart < size {
            let pend = (pstart + chunk_sz).min(size);
            let pos = shard.borrow_mut().write_points(self.id, &points, pstart, pend)?;

            let data = points.as_slice();
            self.idx[start] = IdxEntry {
                start_ts: data[pstart].ts as u32,
                end_ts: data[pend - 1].ts as u32,
                shard: Rc::clone(shard),
                pos,
                len: (pend - pstart) as u16,
            };
            start += 1;
            pstart = pend;
        }

        if start < end {
            self.idx.drain(start..end);
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "series_test.rs"]
mod series_test;
