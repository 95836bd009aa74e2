//! Module implement the glue between catalog walkers and the external
//! where-clause layer. The engine never parses conditions, it only
//! evaluates ready-made property comparisons against series and pools.

use crate::series::Series;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

pub fn int_cmp(op: CmpOp, a: i64, b: i64) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
    }
}

pub fn str_cmp(op: CmpOp, a: &str, b: &str) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
    }
}

/// Series properties a where-clause can compare on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SeriesProp {
    Length,
    Start,
    End,
    Pool,
    Type,
}

/// One ready-made series condition, numeric properties compare as
/// integers, the name compares as a string.
#[derive(Clone, Debug)]
pub enum SeriesCond {
    Int { prop: SeriesProp, op: CmpOp, val: i64 },
    Name { op: CmpOp, val: String },
}

/// The per-visit view a series walker hands to condition evaluation, the
/// pool id comes from the cluster lookup, not the series itself.
pub struct SeriesView<'a> {
    pub series: &'a Series,
    pub pool: u16,
}

pub fn series_cmp(view: &SeriesView, cond: &SeriesCond) -> bool {
    match cond {
        SeriesCond::Int { prop, op, val } => {
            let prop_val = match prop {
                SeriesProp::Length => view.series.length as i64,
                SeriesProp::Start => view.series.start as i64,
                SeriesProp::End => view.series.end as i64,
                SeriesProp::Pool => view.pool as i64,
                SeriesProp::Type => u8::from(view.series.tp) as i64,
            };
            int_cmp(*op, prop_val, *val)
        }
        SeriesCond::Name { op, val } => str_cmp(*op, &view.series.name, val),
    }
}

/// Pool properties a where-clause can compare on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PoolProp {
    Pool,
    Servers,
    Series,
}

#[derive(Clone, Debug)]
pub struct PoolCond {
    pub prop: PoolProp,
    pub op: CmpOp,
    pub val: i64,
}

pub struct PoolView {
    pub pool_id: u16,
    pub servers: usize,
    pub series: usize,
}

pub fn pool_cmp(view: &PoolView, cond: &PoolCond) -> bool {
    let prop_val = match cond.prop {
        PoolProp::Pool => view.pool_id as i64,
        PoolProp::Servers => view.servers as i64,
        PoolProp::Series => view.series as i64,
    };
    int_cmp(cond.op, prop_val, cond.val)
}

#[cfg(test)]
#[path = "cexpr_test.rs"]
mod cexpr_test;
