//! Module implement the shared buffer file, the head region for every
//! numeric series.
//!
//! The file is divided into fixed size slots, one per series, laid out as
//! `[series_id: u32][len: u16][points...]` padded to the slot size, where a
//! point is `[ts: u64][val: 8B]`. A free slot carries `series_id == 0`,
//! series ids start at one. Points land in the slot in arrival order, the
//! sorted view lives in memory and is rebuilt from the slot at load.
//!
//! A slot fits one point more than the flush threshold, the flush decision
//! is made after a point is already in.

use fs2::FileExt;

use std::{
    convert::TryFrom,
    ffi, fs,
    io::{self, Read, Seek},
    path,
};

use crate::{
    files,
    points::{Points, Tp, Value},
    Error, Result,
};

pub const BUFFER_FN: &str = "buffer.dat";

const SLOT_HDR: usize = 6;
const POINT_SZ: usize = 16;

/// The in-memory side of a series' buffer slot.
pub struct Buffer {
    pub offset: u64,
    pub points: Points,
}

impl Buffer {
    pub fn new(offset: u64, capacity: usize, tp: Tp) -> Buffer {
        Buffer {
            offset,
            points: Points::new(capacity + 1, tp),
        }
    }
}

/// One slot as found on disk, value decoding needs the series type and
/// happens once the catalog is loaded.
pub struct RawSlot {
    pub offset: u64,
    pub series_id: u32,
    pub len: u16,
    pub payload: Vec<u8>,
}

impl RawSlot {
    /// Decode and insertion-sort the slot's points.
    pub fn to_points(&self, tp: Tp, capacity: usize) -> Result<Points> {
        let mut points = Points::new(capacity + 1, tp);
        for i in 0..(self.len as usize) {
            let off = i * POINT_SZ;
            check_remaining!(&self.payload[off..], POINT_SZ, "buffer slot point")?;
            let ts = u64::from_le_bytes(
                <[u8; 8]>::try_from(&self.payload[off..off + 8]).unwrap(),
            );
            let raw = <[u8; 8]>::try_from(&self.payload[off + 8..off + 16]).unwrap();
            let val = match tp {
                Tp::Int => Value::Int(i64::from_le_bytes(raw)),
                Tp::Float => Value::Float(f64::from_bits(u64::from_le_bytes(raw))),
                Tp::Str => err_at!(Fatal, msg: "string series carry no buffer slot")?,
            };
            points.add_point(ts, val);
        }
        Ok(points)
    }
}

/// Slot allocator and writer over the shared buffer file. The file is held
/// under an exclusive lock for the lifetime of the database.
pub struct BufferFile {
    loc: ffi::OsString,
    fd: fs::File,
    slot_sz: usize,
    n_slots: usize,
    free: Vec<u64>,
}

impl Drop for BufferFile {
    fn drop(&mut self) {
        self.fd.unlock().ok();
    }
}

impl BufferFile {
    /// Slot size for a flush threshold of `buffer_len` points.
    pub fn slot_size(buffer_len: usize) -> usize {
        SLOT_HDR + ((buffer_len + 1) * POINT_SZ)
    }

    pub fn open(dir: &ffi::OsStr, buffer_len: usize) -> Result<BufferFile> {
        let loc = {
            let loc: path::PathBuf =
                [dir, AsRef::<ffi::OsStr>::as_ref(BUFFER_FN)].iter().collect();
            loc.into_os_string()
        };
        let fd = files::open_file_rw(&loc)?;
        err_at!(IOError, fd.try_lock_exclusive(), "buffer file {:?} locked", loc)?;

        let slot_sz = Self::slot_size(buffer_len);
        let n = err_at!(IOError, fd.metadata())?.len();
        let n_slots = err_at!(FailConvert, usize::try_from(n))? / slot_sz;

        let val = BufferFile {
            loc,
            fd,
            slot_sz,
            n_slots,
            free: vec![],
        };
        Ok(val)
    }

    /// Scan every slot. Free slots land on the free list, owned slots are
    /// returned for the caller to re-attach to their series.
    pub fn load_slots(&mut self) -> Result<Vec<RawSlot>> {
        let mut slots = vec![];
        for i in 0..self.n_slots {
            let offset = (i * self.slot_sz) as u64;
            let seek = io::SeekFrom::Start(offset);
            let hdr = read_file!(self.fd, seek, SLOT_HDR as u64, "buffer slot header")?;
            let series_id = u32::from_le_bytes(<[u8; 4]>::try_from(&hdr[0..4]).unwrap());
            let len = u16::from_le_bytes(<[u8; 2]>::try_from(&hdr[4..6]).unwrap());

            if series_id == 0 {
                self.free.push(offset);
                continue;
            }

            let n = (len as usize) * POINT_SZ;
            if SLOT_HDR + n > self.slot_sz {
                err_at!(DecodeFail, msg: "buffer slot {} claims {} points", i, len)?;
            }
            let seek = io::SeekFrom::Start(offset + (SLOT_HDR as u64));
            let payload = read_file!(self.fd, seek, n as u64, "buffer slot payload")?;
            slots.push(RawSlot {
                offset,
                series_id,
                len,
                payload,
            });
        }
        Ok(slots)
    }

    /// Allocate a slot for a new series and stamp its owner id with zero
    /// length. Free slots are reused before the file grows.
    pub fn new_slot(&mut self, series_id: u32) -> Result<u64> {
        debug_assert!(series_id != 0);

        let offset = match self.free.pop() {
            Some(offset) => offset,
            None => {
                let offset = (self.n_slots * self.slot_sz) as u64;
                // pad the whole slot so the file length is slot aligned.
                err_at!(IOError, self.fd.seek(io::SeekFrom::Start(offset)))?;
                let zeros = vec![0; self.slot_sz];
                write_file!(self.fd, &zeros, &self.loc, "buffer slot grow")?;
                self.n_slots += 1;
                offset
            }
        };

        err_at!(IOError, self.fd.seek(io::SeekFrom::Start(offset)))?;
        let mut hdr = [0_u8; SLOT_HDR];
        hdr[0..4].copy_from_slice(&series_id.to_le_bytes());
        write_file!(self.fd, &hdr, &self.loc, "buffer slot claim")?;
        Ok(offset)
    }

    /// Append the point at disk position `n - 1` of the slot and rewrite
    /// the length header to `n`.
    pub fn write_point(&mut self, offset: u64, n: usize, ts: u64, val: &Value) -> Result<()> {
        debug_assert!(SLOT_HDR + (n * POINT_SZ) <= self.slot_sz);

        let mut buf = Vec::with_capacity(POINT_SZ);
        buf.extend_from_slice(&ts.to_le_bytes());
        match val {
            Value::Int(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::Float(v) => buf.extend_from_slice(&v.to_bits().to_le_bytes()),
            Value::Str(_) => err_at!(Fatal, msg: "string series carry no buffer slot")?,
        }

        let fpos = offset + (SLOT_HDR as u64) + (((n - 1) * POINT_SZ) as u64);
        err_at!(IOError, self.fd.seek(io::SeekFrom::Start(fpos)))?;
        write_file!(self.fd, &buf, &self.loc, "buffer point")?;

        self.write_len(offset, n)
    }

    /// Rewrite the slot's length header, also the flush reset path.
    pub fn write_len(&mut self, offset: u64, n: usize) -> Result<()> {
        let len = err_at!(FailConvert, u16::try_from(n))?;
        err_at!(IOError, self.fd.seek(io::SeekFrom::Start(offset + 4)))?;
        write_file!(self.fd, &len.to_le_bytes(), &self.loc, "buffer len")?;
        Ok(())
    }

    /// Return a dropped series' slot to the free list.
    pub fn free_slot(&mut self, offset: u64) -> Result<()> {
        err_at!(IOError, self.fd.seek(io::SeekFrom::Start(offset)))?;
        let hdr = [0_u8; SLOT_HDR];
        write_file!(self.fd, &hdr, &self.loc, "buffer slot free")?;
        self.free.push(offset);
        Ok(())
    }
}

#[cfg(test)]
#[path = "buffer_test.rs"]
mod buffer_test;
