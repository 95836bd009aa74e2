//! Module implement the sorted in-memory container for time-series points.

use arbitrary::Arbitrary;

use std::convert::TryFrom;

use crate::{Error, Result};

/// Series type. A series is typed exactly once, at create time.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Arbitrary)]
pub enum Tp {
    Int,
    Float,
    Str,
}

impl From<Tp> for u8 {
    fn from(tp: Tp) -> u8 {
        match tp {
            Tp::Int => 0,
            Tp::Float => 1,
            Tp::Str => 2,
        }
    }
}

impl TryFrom<u8> for Tp {
    type Error = Error;

    fn try_from(val: u8) -> Result<Tp> {
        match val {
            0 => Ok(Tp::Int),
            1 => Ok(Tp::Float),
            2 => Ok(Tp::Str),
            val => err_at!(DecodeFail, msg: "bad series type {}", val),
        }
    }
}

impl Tp {
    /// String series live in log shards, everything else in numeric shards.
    pub fn is_log(&self) -> bool {
        matches!(self, Tp::Str)
    }
}

/// Point value, variant must match the owning series' [Tp].
#[derive(Clone, Debug, PartialEq, Arbitrary)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(Vec<u8>),
}

impl Value {
    pub fn to_tp(&self) -> Tp {
        match self {
            Value::Int(_) => Tp::Int,
            Value::Float(_) => Tp::Float,
            Value::Str(_) => Tp::Str,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Arbitrary)]
pub struct Point {
    pub ts: u64,
    pub val: Value,
}

/// Ordered sequence of points, sorted by `ts` ascending. Duplicate
/// timestamps are allowed and preserved in insertion order.
#[derive(Clone, Debug)]
pub struct Points {
    tp: Tp,
    data: Vec<Point>,
}

impl Points {
    pub fn new(capacity: usize, tp: Tp) -> Points {
        Points {
            tp,
            data: Vec::with_capacity(capacity),
        }
    }

    /// Insertion-sorted add, scanning from the tail. A point equal in
    /// timestamp to an existing one lands after it.
    pub fn add_point(&mut self, ts: u64, val: Value) {
        debug_assert!(val.to_tp() == self.tp);

        let mut i = self.data.len();
        while i > 0 && self.data[i - 1].ts > ts {
            i -= 1;
        }
        self.data.insert(i, Point { ts, val });
    }

    // fast-path append for chunk reads known to arrive in order.
    pub(crate) fn append(&mut self, ts: u64, val: Value) {
        debug_assert!(val.to_tp() == self.tp);
        debug_assert!(self.data.last().map_or(true, |p| p.ts <= ts));

        self.data.push(Point { ts, val });
    }

    /// Half-open selection `[start, end)`, either side optional.
    pub fn get_range(&self, start: Option<u64>, end: Option<u64>) -> Points {
        let from = match start {
            Some(start) => self.data.partition_point(|p| p.ts < start),
            None => 0,
        };
        let till = match end {
            Some(end) => self.data.partition_point(|p| p.ts < end),
            None => self.data.len(),
        };

        Points {
            tp: self.tp,
            data: self.data[from..till.max(from)].to_vec(),
        }
    }

    pub fn to_tp(&self) -> Tp {
        self.tp
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[Point] {
        &self.data
    }

    pub fn first(&self) -> Option<&Point> {
        self.data.first()
    }

    pub fn last(&self) -> Option<&Point> {
        self.data.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.data.iter()
    }

    pub(crate) fn clear(&mut self) {
        self.data.clear()
    }

    pub(crate) fn shrink_to_fit(&mut self) {
        self.data.shrink_to_fit()
    }
}

#[cfg(test)]
#[path = "points_test.rs"]
mod points_test;
