use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use super::*;

fn test_config(name: &str) -> Config {
    let dir = std::env::temp_dir().join(name);
    std::fs::remove_dir_all(&dir).ok();

    let mut config = Config::new(dir.as_os_str());
    config
        .set_buffer_len(4)
        .set_durations(3600, 3600)
        .set_shard_masks(16, 8)
        .set_max_chunk_points(10);
    config
}

#[test]
fn test_buffer_flush() {
    let config = test_config("tsdms-db-flush");
    let mut db = Db::open(config).unwrap();

    let sref = db.series_new("cpu.load", Tp::Int).unwrap();
    for (ts, v) in [(10_u64, 1_i64), (20, 2), (15, 3)] {
        db.add_point(&sref, ts, Value::Int(v)).unwrap();
    }
    {
        let series = sref.borrow();
        assert_eq!(series.idx.len(), 0);
        assert_eq!(series.buffer.as_ref().unwrap().points.len(), 3);
    }

    // the fourth point fills the buffer and triggers the flush.
    db.add_point(&sref, 25, Value::Int(4)).unwrap();
    {
        let series = sref.borrow();
        assert_eq!(series.buffer.as_ref().unwrap().points.len(), 0);
        assert_eq!(series.idx.len(), 1);
        let e = &series.idx[0];
        assert_eq!((e.start_ts, e.end_ts, e.len), (10, 25, 4));
        assert_eq!(e.shard.borrow().id, series.mask as u64);
        assert_eq!(series.length, 4);
    }

    let points = sref.borrow().get_points(None, None);
    let tss: Vec<u64> = points.iter().map(|p| p.ts).collect();
    assert_eq!(tss, vec![10, 15, 20, 25]);
}

#[test]
fn test_out_of_order_read() {
    let config = test_config("tsdms-db-out-of-order");
    let mut db = Db::open(config).unwrap();

    let sref = db.series_new("s", Tp::Int).unwrap();
    for ts in [100_u64, 50, 75] {
        db.add_point(&sref, ts, Value::Int(ts as i64)).unwrap();
    }

    let points = sref.borrow().get_points(None, None);
    let tss: Vec<u64> = points.iter().map(|p| p.ts).collect();
    assert_eq!(tss, vec![50, 75, 100]);
}

#[test]
fn test_dropped_id_survives_restart() {
    let config = test_config("tsdms-db-dropped");
    {
        let mut db = Db::open(config.clone()).unwrap();
        assert_eq!(db.series_new("a", Tp::Int).unwrap().borrow().id, 1);
        assert_eq!(db.series_new("b", Tp::Int).unwrap().borrow().id, 2);
        assert_eq!(db.series_new("c", Tp::Int).unwrap().borrow().id, 3);
        db.drop_series("b").unwrap();
    }

    {
        let mut db = Db::open(config.clone()).unwrap();
        assert_eq!(db.to_max_series_id(), 3);
        assert_eq!(db.series_count(), 2);
        assert!(db.get_series("b").is_none());

        // the high-water file now pins the dropped id.
        let data = std::fs::read(
            std::path::Path::new(&config.dir).join(MAX_SERIES_ID_FN),
        )
        .unwrap();
        assert_eq!(u32::from_le_bytes(<[u8; 4]>::try_from(&data[..4]).unwrap()), 3);

        assert_eq!(db.series_new("d", Tp::Int).unwrap().borrow().id, 4);
    }

    // even though the store was compacted, the id space stays monotone.
    let db = Db::open(config).unwrap();
    assert_eq!(db.to_max_series_id(), 4);
    assert!(db.get_series("b").is_none());
    assert!(db.get_series("d").is_some());
}

#[test]
fn test_restart_roundtrip() {
    let seed: u64 = random();
    println!("test_restart_roundtrip seed:{}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let config = test_config("tsdms-db-roundtrip");
    let mut tss: Vec<u64> = (0..53).map(|_| rng.gen::<u64>() % 100_000).collect();

    {
        let mut db = Db::open(config.clone()).unwrap();
        let sref = db.series_new("metric", Tp::Int).unwrap();
        for ts in tss.iter() {
            db.add_point(&sref, *ts, Value::Int(*ts as i64)).unwrap();
        }

        // catalog invariant, index plus buffer accounts for every point.
        let series = sref.borrow();
        let indexed: u64 = series.idx.iter().map(|e| e.len as u64).sum();
        let buffered = series.buffer.as_ref().unwrap().points.len() as u64;
        assert_eq!(indexed + buffered, series.length);
        assert_eq!(series.length, 53);
    }

    let db = Db::open(config).unwrap();
    let sref = db.get_series("metric").unwrap();
    {
        let series = sref.borrow();
        assert_eq!(series.length, 53);
        let indexed: u64 = series.idx.iter().map(|e| e.len as u64).sum();
        let buffered = series.buffer.as_ref().unwrap().points.len() as u64;
        assert_eq!(indexed + buffered, series.length);

        tss.sort_unstable();
        assert_eq!(series.start, tss[0]);
        assert_eq!(series.end, tss[tss.len() - 1]);
    }

    let points = sref.borrow().get_points(None, None);
    let got: Vec<u64> = points.iter().map(|p| p.ts).collect();
    assert_eq!(got, tss);
}

#[test]
fn test_string_series_write_through() {
    let config = test_config("tsdms-db-string");
    {
        let mut db = Db::open(config.clone()).unwrap();
        let sref = db.series_new("events", Tp::Str).unwrap();
        assert!(sref.borrow().buffer.is_none());

        db.add_point(&sref, 10, Value::Str(b"boot".to_vec())).unwrap();
        db.add_point(&sref, 20, Value::Str(b"halt".to_vec())).unwrap();
        assert_eq!(sref.borrow().idx.len(), 2);
    }

    let db = Db::open(config).unwrap();
    let sref = db.get_series("events").unwrap();
    let points = sref.borrow().get_points(None, None);
    assert_eq!(points.len(), 2);
    assert_eq!(points.as_slice()[0].val, Value::Str(b"boot".to_vec()));
    assert_eq!(points.as_slice()[1].val, Value::Str(b"halt".to_vec()));
}

#[test]
fn test_optimize() {
    let mut config = test_config("tsdms-db-optimize");
    config.set_buffer_len(3);
    let mut db = Db::open(config).unwrap();

    let sref = db.series_new("metric", Tp::Int).unwrap();
    // six flushes of three points, six chunks in one shard.
    for i in 1..=18_u64 {
        db.add_point(&sref, i * 10, Value::Int(i as i64)).unwrap();
    }
    let shard_id = {
        let series = sref.borrow();
        assert_eq!(series.idx.len(), 6);
        let id = series.idx[0].shard.borrow().id;
        id
    };
    assert!(db.shards[&shard_id].borrow().is_set(shard::HAS_NEW_VALUES));

    db.optimize(shard_id).unwrap();

    {
        let series = sref.borrow();
        let lens: Vec<u16> = series.idx.iter().map(|e| e.len).collect();
        assert_eq!(lens, vec![9, 9]);
        assert_eq!(series.length, 18);
    }
    assert!(!db.shards[&shard_id].borrow().is_set(shard::HAS_NEW_VALUES));

    let points = sref.borrow().get_points(None, None);
    let tss: Vec<u64> = points.iter().map(|p| p.ts).collect();
    assert_eq!(tss, (1..=18).map(|i| i * 10).collect::<Vec<u64>>());
}

#[test]
fn test_optimize_sheds_dropped_series() {
    let mut config = test_config("tsdms-db-optimize-drop");
    config.set_buffer_len(2);
    let mut db = Db::open(config).unwrap();

    let sref = db.series_new("doomed", Tp::Int).unwrap();
    for ts in [10_u64, 20, 30, 40] {
        db.add_point(&sref, ts, Value::Int(0)).unwrap();
    }
    let shard_id = sref.borrow().idx[0].shard.borrow().id;
    drop(sref);

    db.drop_series("doomed").unwrap();
    db.optimize(shard_id).unwrap();

    // the rewritten shard carries no chunks anymore.
    let shard = Rc::clone(&db.shards[&shard_id]);
    let chunks = shard.borrow_mut().load_chunks().unwrap();
    assert!(chunks.is_empty());
}

#[test]
fn test_fault_latch() {
    let config = test_config("tsdms-db-fault");
    let mut db = Db::open(config).unwrap();
    let sref = db.series_new("s", Tp::Int).unwrap();

    // validation errors do not latch.
    match db.drop_series("missing") {
        Err(Error::KeyNotFound(_, _)) => (),
        res => panic!("unexpected {:?}", res.map(|_| ())),
    }
    assert!(db.to_fault().is_none());
    db.add_point(&sref, 1, Value::Int(1)).unwrap();

    // resource-class errors do.
    let err = Error::IOError("here".to_string(), "disk on fire".to_string());
    db.latch::<()>(&Err(err.clone()));
    assert_eq!(db.to_fault(), Some(err));

    match db.add_point(&sref, 2, Value::Int(2)) {
        Err(Error::Fatal(_, msg)) => assert!(msg.contains("latched")),
        res => panic!("unexpected {:?}", res.map(|_| ())),
    }
    match db.series_new("t", Tp::Int) {
        Err(Error::Fatal(_, _)) => (),
        res => panic!("unexpected {:?}", res.map(|_| ())),
    }
}

#[test]
fn test_type_and_range_validation() {
    let config = test_config("tsdms-db-validation");
    let mut db = Db::open(config).unwrap();
    let sref = db.series_new("s", Tp::Int).unwrap();

    match db.add_point(&sref, 1, Value::Float(0.5)) {
        Err(Error::InvalidInput(_, _)) => (),
        res => panic!("unexpected {:?}", res.map(|_| ())),
    }
    match db.add_point(&sref, (u32::MAX as u64) + 1, Value::Int(1)) {
        Err(Error::InvalidInput(_, _)) => (),
        res => panic!("unexpected {:?}", res.map(|_| ())),
    }
    // neither validation latched the engine.
    assert!(db.to_fault().is_none());
}

#[test]
fn test_replicate_file() {
    let config = test_config("tsdms-db-replicate");
    let mut db = Db::open(config.clone()).unwrap();
    db.series_new("a", Tp::Int).unwrap();
    db.series_new("b", Tp::Int).unwrap();
    db.series_new("c", Tp::Int).unwrap();
    db.drop_series("b").unwrap();

    db.replicate_file().unwrap();

    let data = std::fs::read(std::path::Path::new(&config.dir).join(REPLICATE_FN)).unwrap();
    let ids: Vec<u32> = data
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(<[u8; 4]>::try_from(c).unwrap()))
        .collect();
    assert_eq!(ids, vec![1, 3]);
}

#[test]
fn test_pool_routing() {
    use crate::pool::{Lookup, Pools, LOOKUP_SZ};

    let config = test_config("tsdms-db-pools");
    let mut db = Db::open(config).unwrap();

    let n: u32 = "cpu.load".bytes().map(|b| b as u32).sum();
    let mut table = vec![0_u16; LOOKUP_SZ];
    table[(n as usize) % LOOKUP_SZ] = 3;
    db.set_pools(Pools::new(Lookup::new(table).unwrap(), vec![]));

    assert_eq!(db.pool_id("cpu.load"), Some(3));
    assert_eq!(db.pool_id("mem.free"), Some(0));
}

#[test]
fn test_filter_series() {
    use crate::cexpr::{CmpOp, SeriesCond, SeriesProp};

    let config = test_config("tsdms-db-filter");
    let mut db = Db::open(config).unwrap();

    let a = db.series_new("a", Tp::Int).unwrap();
    let b = db.series_new("b", Tp::Float).unwrap();
    db.add_point(&a, 5, Value::Int(1)).unwrap();
    db.add_point(&b, 9, Value::Float(1.0)).unwrap();

    let conds = vec![SeriesCond::Int {
        prop: SeriesProp::Type,
        op: CmpOp::Eq,
        val: u8::from(Tp::Float) as i64,
    }];
    let hits = db.filter_series(&conds);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].borrow().name, "b");

    let conds = vec![SeriesCond::Int {
        prop: SeriesProp::Length,
        op: CmpOp::Ge,
        val: 1,
    }];
    assert_eq!(db.filter_series(&conds).len(), 2);

    let conds = vec![SeriesCond::Name {
        op: CmpOp::Gt,
        val: "a".to_string(),
    }];
    let hits = db.filter_series(&conds);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].borrow().name, "b");
}

#[test]
fn test_half_open_reads() {
    let config = test_config("tsdms-db-half-open");
    let mut db = Db::open(config).unwrap();

    let sref = db.series_new("s", Tp::Int).unwrap();
    for ts in [10_u64, 20, 30, 40, 50, 60] {
        db.add_point(&sref, ts, Value::Int(ts as i64)).unwrap();
    }

    // 4 flushed into a chunk, 2 still buffered.
    let points = sref.borrow().get_points(Some(20), Some(60));
    let tss: Vec<u64> = points.iter().map(|p| p.ts).collect();
    assert_eq!(tss, vec![20, 30, 40, 50]);
}
