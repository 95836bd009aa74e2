//! Package implement the storage engine for one shard replica of a
//! distributed time-series database.
//!
//! Incoming points land in a per-series in-memory buffer backed by a shared
//! buffer file. When a series' buffer fills up, points are flushed into
//! time-sliced [shard] files as compressed chunks, and a per-series index,
//! sorted by chunk start-timestamp, stitches buffer and shards into one
//! ordered view. Which shard within a time-slice owns a series is decided
//! by the series `mask`, and which pool of replicated servers owns a series
//! is decided by the cluster [pool] lookup table.
//!
//! All metadata files, series catalog and credential store, are serialized
//! with the [qpack] codec. Shard files use their own binary layout, refer
//! to the [shard] module.
//!
//! The engine is single threaded. All critical sections, index mutation,
//! buffer flush, shard append, run to completion without yielding. File
//! errors latch a database level fault, refer to [Db::to_fault], after
//! which mutating operations refuse to run until restart.
//!
//! [Db::to_fault]: crate::db::Db::to_fault

use std::{error, fmt, result};

/// Type alias for Result return type, used by this package.
pub type Result<T> = result::Result<T, Error>;

/// Error variants that can be returned by this package's API.
///
/// Each variant carries a prefix, typically identifying the
/// error location.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    Fatal(String, String),
    IOError(String, String),
    InvalidFile(String, String),
    InvalidInput(String, String),
    InvalidFormat(String, String),
    DecodeFail(String, String),
    FailConvert(String, String),
    KeyNotFound(String, String),
    NotAvailable(String, String),
    Timeout(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        use Error::*;

        match self {
            Fatal(p, msg) => write!(f, "{} Fatal: {}", p, msg),
            IOError(p, msg) => write!(f, "{} IOError: {}", p, msg),
            InvalidFile(p, msg) => write!(f, "{} InvalidFile: {}", p, msg),
            InvalidInput(p, msg) => write!(f, "{} InvalidInput: {}", p, msg),
            InvalidFormat(p, msg) => write!(f, "{} InvalidFormat: {}", p, msg),
            DecodeFail(p, msg) => write!(f, "{} DecodeFail: {}", p, msg),
            FailConvert(p, msg) => write!(f, "{} FailConvert: {}", p, msg),
            KeyNotFound(p, msg) => write!(f, "{} KeyNotFound: {}", p, msg),
            NotAvailable(p, msg) => write!(f, "{} NotAvailable: {}", p, msg),
            Timeout(p, msg) => write!(f, "{} Timeout: {}", p, msg),
        }
    }
}

impl error::Error for Error {}

impl Error {
    /// Validation errors are local to the request that caused them, they
    /// are reported back to the caller and never latch the engine fault.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::InvalidInput(_, _) | Error::KeyNotFound(_, _))
    }
}

#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err(Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                Err(Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                let msg = format!($($arg),+);
                Err(Error::$v(prefix, format!("{} {}", err, msg)))
            }
        }
    }};
}

#[macro_export]
macro_rules! check_remaining {
    ($buf:expr, $want:expr, $msg:expr) => {
        if $buf.len() < $want {
            err_at!(
                DecodeFail, msg: "insufficient input {}/{} ({})", $buf.len(), $want, $msg
            )
        } else {
            Ok(())
        }
    };
}

#[macro_export]
macro_rules! read_file {
    ($fd:expr, $seek:expr, $n:expr, $msg:expr) => {{
        use std::convert::TryFrom;

        match $fd.seek($seek) {
            Ok(_) => {
                let mut buf = vec![0; usize::try_from($n).unwrap()];
                match $fd.read(&mut buf) {
                    Ok(n) if buf.len() == n => Ok(buf),
                    Ok(n) => {
                        let m = buf.len();
                        err_at!(Fatal, msg: concat!($msg, " {}/{} at {:?}"), m, n, $seek)
                    }
                    Err(err) => err_at!(IOError, Err(err)),
                }
            }
            Err(err) => err_at!(IOError, Err(err)),
        }
    }};
}

#[macro_export]
macro_rules! write_file {
    ($fd:expr, $buffer:expr, $file:expr, $msg:expr) => {{
        use std::io::Write;

        match err_at!(IOError, $fd.write($buffer))? {
            n if $buffer.len() == n => Ok(n),
            n => err_at!(
                Fatal, msg: "partial-wr {}, {:?}, {}/{}", $msg, $file, $buffer.len(), n
            ),
        }
    }};
}

pub mod buffer;
pub mod cexpr;
pub mod db;
mod files;
pub mod imap;
pub mod points;
pub mod pool;
pub mod qpack;
pub mod series;
pub mod shard;
pub mod trie;
pub mod users;

pub use db::{Config, Db};
pub use points::{Point, Points, Tp, Value};
pub use series::{Series, SeriesRef};
pub use shard::ShardRef;
