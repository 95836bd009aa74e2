//! File open helpers and file-name types shared by the disk modules.

use std::{convert::TryFrom, ffi, fmt, fs, path, result};

use crate::{Error, Result};

// open file in append mode for writing, created when missing.
pub fn open_file_a(file: &ffi::OsStr) -> Result<fs::File> {
    let os_file = path::Path::new(file);
    let mut opts = fs::OpenOptions::new();
    Ok(err_at!(IOError, opts.create(true).append(true).open(os_file))?)
}

// open file for reading.
pub fn open_file_r(file: &ffi::OsStr) -> Result<fs::File> {
    let os_file = path::Path::new(file);
    Ok(err_at!(
        IOError,
        fs::OpenOptions::new().read(true).open(os_file)
    )?)
}

// open file for slot/offset addressed reads and writes, created when
// missing, never truncated.
pub fn open_file_rw(file: &ffi::OsStr) -> Result<fs::File> {
    let os_file = path::Path::new(file);
    let mut opts = fs::OpenOptions::new();
    Ok(err_at!(
        IOError,
        opts.read(true).write(true).create(true).open(os_file)
    )?)
}

// create file fresh for writing, truncating existing content.
pub fn create_file_w(file: &ffi::OsStr) -> Result<fs::File> {
    let os_file = path::Path::new(file);
    let mut opts = fs::OpenOptions::new();
    Ok(err_at!(
        IOError,
        opts.write(true).create(true).truncate(true).open(os_file)
    )?)
}

// slurp the whole file, metadata files are small.
pub fn load_file(file: &ffi::OsStr) -> Result<Vec<u8>> {
    err_at!(IOError, fs::read(path::Path::new(file)), "loading {:?}", file)
}

pub fn file_exists(file: &ffi::OsStr) -> bool {
    path::Path::new(file).exists()
}

/// A shard file is uniquely locatable by providing the `dir` and the shard
/// id. `format!("{}-tsdms.shard", id)`, while an optimize replacement is in
/// flight the file is named `format!("{}__tsdms.shard", id)` until rename.
#[derive(Clone)]
pub struct ShardFileName(pub ffi::OsString);

impl From<u64> for ShardFileName {
    fn from(id: u64) -> ShardFileName {
        let file_name = format!("{}-tsdms.shard", id);
        ShardFileName(AsRef::<ffi::OsStr>::as_ref(&file_name).to_os_string())
    }
}

impl TryFrom<ShardFileName> for u64 {
    type Error = Error;

    fn try_from(fname: ShardFileName) -> Result<u64> {
        let ffpp = path::Path::new(&fname.0);
        let id = || -> Option<u64> {
            let fname = ffpp.file_name()?.to_str()?;
            fname.strip_suffix("-tsdms.shard")?.parse().ok()
        }();

        match id {
            Some(id) => Ok(id),
            None => err_at!(InvalidFile, msg: "{:?}", ffpp),
        }
    }
}

impl From<ShardFileName> for ffi::OsString {
    fn from(name: ShardFileName) -> ffi::OsString {
        name.0
    }
}

impl ShardFileName {
    /// Name carried by the replacement shard while an optimize is running.
    pub fn to_temp(id: u64) -> ffi::OsString {
        let file_name = format!("{}__tsdms.shard", id);
        AsRef::<ffi::OsStr>::as_ref(&file_name).to_os_string()
    }
}

impl fmt::Display for ShardFileName {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        match self.0.to_str() {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "{:?}", self.0),
        }
    }
}

#[cfg(test)]
#[path = "files_test.rs"]
mod files_test;
