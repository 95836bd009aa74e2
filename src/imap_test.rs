use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::collections::BTreeMap;

use super::*;

#[test]
fn test_set_get_remove() {
    let mut map: Imap<String> = Imap::new();
    assert!(map.is_empty());
    assert_eq!(map.get(1), None);

    assert_eq!(map.set(1, "a".to_string()), None);
    assert_eq!(map.set(70_000, "b".to_string()), None); // second grid
    assert_eq!(map.set(1, "c".to_string()), Some("a".to_string()));
    assert_eq!(map.len(), 2);

    assert_eq!(map.get(1), Some(&"c".to_string()));
    assert_eq!(map.get(70_000), Some(&"b".to_string()));
    assert_eq!(map.get(2), None);

    assert_eq!(map.remove(1), Some("c".to_string()));
    assert_eq!(map.remove(1), None);
    assert_eq!(map.len(), 1);
}

#[test]
fn test_grow_downward() {
    let mut map: Imap<u32> = Imap::new();
    map.set(1 << 20, 1);
    map.set(3, 2); // grows the grid window at the front
    map.set(1 << 22, 3);

    let ids: Vec<u32> = map.iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec![3, 1 << 20, 1 << 22]);
}

#[test]
fn test_walk_short_circuit() {
    let mut map: Imap<u32> = Imap::new();
    for id in [5_u32, 10, 15] {
        map.set(id, id);
    }

    let mut seen = vec![];
    let done = map
        .walk(&mut |id, _| {
            seen.push(id);
            Ok(id != 10)
        })
        .unwrap();

    assert!(!done);
    assert_eq!(seen, vec![5, 10]);
}

#[test]
fn test_against_btreemap() {
    let seed: u64 = random();
    println!("test_against_btreemap seed:{}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let mut map: Imap<u64> = Imap::new();
    let mut model: BTreeMap<u32, u64> = BTreeMap::new();

    for _ in 0..5000 {
        let id: u32 = rng.gen::<u32>() % 200_000;
        match rng.gen::<u8>() % 3 {
            0 | 1 => {
                let value: u64 = rng.gen();
                assert_eq!(map.set(id, value), model.insert(id, value), "set {}", id);
            }
            _ => {
                assert_eq!(map.remove(id), model.remove(&id), "rm {}", id);
            }
        }
    }

    assert_eq!(map.len(), model.len());
    let items: Vec<(u32, u64)> = map.iter().map(|(id, v)| (id, *v)).collect();
    let want: Vec<(u32, u64)> = model.into_iter().collect();
    assert_eq!(items, want);
}
