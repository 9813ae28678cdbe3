use std::cell::Cell;
use std::rc::Rc;

use hashbrown::HashMap;
use vitl_core::{
    FnvStrOps, KeyOps, RobinHoodMap, SlotState, StrMap, MAX_LOAD_PERCENT, MIN_CAPACITY,
};

/// Checks the structural rules every table must satisfy between operations.
fn check_table<K, V, O: KeyOps<K>>(map: &RobinHoodMap<K, V, O>) {
    let capacity = map.capacity();
    if capacity == 0 {
        assert_eq!(map.len(), 0);
        return;
    }
    assert!(capacity.is_power_of_two());
    assert!(capacity >= MIN_CAPACITY);
    assert!(map.used() * 100 <= capacity * MAX_LOAD_PERCENT);

    let layout = map.slot_layout();
    let mask = capacity - 1;
    let mut live = 0;
    for (idx, state) in layout.iter().enumerate() {
        if let SlotState::Occupied {
            ideal,
            displacement,
        } = *state
        {
            live += 1;
            assert_eq!((idx.wrapping_sub(ideal)) & mask, displacement);
            let next = layout[(idx + 1) & mask];
            if let SlotState::Occupied {
                displacement: next_displacement,
                ..
            } = next
            {
                assert!(
                    next_displacement <= displacement + 1,
                    "slot {} breaks Robin-Hood ordering",
                    (idx + 1) & mask
                );
            }
        }
    }
    assert_eq!(live, map.len());
    let tombstones = layout
        .iter()
        .filter(|s| matches!(s, SlotState::Tombstone))
        .count();
    assert_eq!(live + tombstones, map.used());
}

#[test]
fn test_round_trip_and_absent_keys() {
    let mut map = RobinHoodMap::new();
    for i in 0..500u64 {
        map.insert(i * 7, i).unwrap();
    }
    check_table(&map);
    for i in (0..500u64).rev() {
        assert_eq!(map.get(&(i * 7)), Some(&i));
    }
    for i in 0..500u64 {
        if i % 7 != 0 {
            assert_eq!(map.get(&i), None);
        }
    }
}

#[test]
fn test_update_keeps_length() {
    let mut map = RobinHoodMap::new();
    assert_eq!(map.insert("x", 1).unwrap(), None);
    assert_eq!(map.insert("x", 2).unwrap(), Some(1));
    assert_eq!(map.len(), 1);
    assert_eq!(map.get(&"x"), Some(&2));
}

#[test]
fn test_remove_is_idempotent() {
    let mut map = RobinHoodMap::new();
    map.insert(1u32, "one").unwrap();
    map.insert(2u32, "two").unwrap();
    assert_eq!(map.remove(&1), Some("one"));
    assert_eq!(map.remove(&1), None);
    assert_eq!(map.len(), 1);
    assert!(!map.contains_key(&1));
    check_table(&map);
}

#[test]
fn test_iteration_yields_each_entry_once() {
    let mut map = RobinHoodMap::new();
    for i in 0..200u32 {
        map.insert(i, i * 2).unwrap();
    }
    for i in (0..200u32).step_by(3) {
        map.remove(&i);
    }
    let mut seen: Vec<(u32, u32)> = map.iter().map(|(k, v)| (*k, *v)).collect();
    seen.sort_unstable();
    let expected: Vec<(u32, u32)> = (0..200u32)
        .filter(|i| i % 3 != 0)
        .map(|i| (i, i * 2))
        .collect();
    assert_eq!(seen, expected);
    assert_eq!(map.iter().len(), map.len());
}

#[test]
fn test_resize_keeps_every_entry() {
    let mut map = RobinHoodMap::new();
    let mut capacities = vec![];
    for i in 0..5_000u32 {
        map.insert(i, i).unwrap();
        if capacities.last() != Some(&map.capacity()) {
            capacities.push(map.capacity());
        }
    }
    assert!(capacities.len() > 1);
    assert!(capacities.windows(2).all(|w| w[1] == w[0] * 2));
    assert!((0..5_000u32).all(|i| map.get(&i) == Some(&i)));
    check_table(&map);
}

#[test]
fn test_matches_reference_model() {
    let mut rng = fastrand::Rng::with_seed(0x5EED);
    let mut map = RobinHoodMap::new();
    let mut model: HashMap<u16, u32> = HashMap::new();

    for step in 0..20_000u32 {
        let key = rng.u16(0..512);
        match rng.u8(0..10) {
            0..=5 => {
                assert_eq!(map.insert(key, step).unwrap(), model.insert(key, step));
            }
            6..=8 => {
                assert_eq!(map.remove(&key), model.remove(&key));
            }
            _ => {
                assert_eq!(map.get(&key), model.get(&key));
            }
        }
        assert_eq!(map.len(), model.len());
        if step % 97 == 0 {
            check_table(&map);
        }
    }

    check_table(&map);
    for (k, v) in &model {
        assert_eq!(map.get(k), Some(v));
    }
    assert_eq!(map.iter().count(), model.len());
}

#[test]
fn test_degenerate_hash_stays_correct() {
    // Every key lands in the same bucket; only equality tells them apart.
    let mut map = RobinHoodMap::with_fns(|_: &u32| 0u64, |a: &u32, b: &u32| a == b);
    for i in 0..12u32 {
        map.insert(i, i).unwrap();
    }
    for i in (0..12u32).step_by(2) {
        assert_eq!(map.remove(&i), Some(i));
    }
    for i in 100..106u32 {
        map.insert(i, i).unwrap();
        check_table(&map);
    }
    for i in (1..12u32).step_by(2).chain(100..106) {
        assert_eq!(map.get(&i), Some(&i));
    }
}

#[test]
fn test_string_map_basics() {
    let mut map = StrMap::new();
    map.insert_str("alpha", 1).unwrap();
    map.insert_str("beta", 2).unwrap();
    map.insert_str("gamma", 3).unwrap();
    assert_eq!(map.lookup_str("alpha"), Some(&1));
    assert_eq!(map.lookup_str("beta"), Some(&2));
    assert_eq!(map.lookup_str("gamma"), Some(&3));
    assert_eq!(map.len(), 3);

    assert_eq!(map.remove_str("beta"), Some(2));
    assert_eq!(map.len(), 2);
    assert_eq!(map.lookup_str("beta"), None);

    map.insert_str("beta", 20).unwrap();
    assert_eq!(map.lookup_str("beta"), Some(&20));
}

/// Owned string keys that count how many times the map lets one go.
#[derive(Default)]
struct CountingStrOps {
    released: Rc<Cell<usize>>,
}

impl KeyOps<Box<str>> for CountingStrOps {
    #[allow(clippy::borrowed_box)]
    fn hash(&self, key: &Box<str>) -> u64 {
        KeyOps::<Box<str>>::hash(&FnvStrOps, key)
    }

    #[allow(clippy::borrowed_box)]
    fn equals(&self, a: &Box<str>, b: &Box<str>) -> bool {
        a == b
    }

    fn release(&self, key: Box<str>) {
        self.released.set(self.released.get() + 1);
        drop(key);
    }
}

#[test]
fn test_update_releases_previous_key_once() {
    let released = Rc::new(Cell::new(0));
    let ops = CountingStrOps {
        released: Rc::clone(&released),
    };
    let a = Box::new(1u8);
    let b = Box::new(2u8);
    let (a_addr, b_addr) = (&*a as *const u8, &*b as *const u8);

    let mut map = RobinHoodMap::with_ops(ops);
    map.insert(Box::from("k"), a).unwrap();
    let previous = map.insert(Box::from("k"), b).unwrap();

    assert_eq!(map.len(), 1);
    let stored = map.get(&Box::from("k")).unwrap();
    assert_eq!(&**stored as *const u8, b_addr);
    assert_eq!(previous.as_deref().map(|p| p as *const u8), Some(a_addr));
    assert_eq!(released.get(), 1);

    drop(map);
    assert_eq!(released.get(), 2);
}

#[test]
fn test_growth_to_ten_thousand_keys() {
    let mut map = StrMap::new();
    for i in 0..10_000usize {
        map.insert_str(&format!("key_{i}"), i).unwrap();
    }
    assert_eq!(map.len(), 10_000);
    assert_eq!(map.lookup_str("key_4242"), Some(&4242));
    assert!(map.capacity().is_power_of_two());
    assert!(map.capacity() <= 32_768);
}

#[test]
fn test_tombstones_are_reused() {
    let keys: Vec<String> = (0..1_000).map(|i| format!("item-{i}")).collect();
    let mut map = StrMap::new();
    for (i, key) in keys.iter().enumerate() {
        map.insert_str(key, i).unwrap();
    }
    let peak = map.capacity();

    for key in &keys {
        assert!(map.remove_str(key).is_some());
    }
    assert!(map.is_empty());
    assert_eq!(map.stats().tombstones, 1_000);

    for (i, key) in keys.iter().enumerate() {
        map.insert_str(key, i).unwrap();
    }
    assert_eq!(map.len(), 1_000);
    assert!(map.capacity() <= peak * 2);
    assert!(keys
        .iter()
        .enumerate()
        .all(|(i, k)| map.lookup_str(k) == Some(&i)));
}

#[test]
fn test_repeated_churn_does_not_grow() {
    let keys: Vec<String> = (0..1_000).map(|i| format!("item-{i}")).collect();
    let mut map = StrMap::new();
    for (i, key) in keys.iter().enumerate() {
        map.insert_str(key, i).unwrap();
    }
    let peak = map.capacity();

    for round in 0..200 {
        for key in &keys {
            assert!(map.remove_str(key).is_some());
        }
        for (i, key) in keys.iter().enumerate() {
            map.insert_str(key, i + round).unwrap();
        }
        assert_eq!(map.len(), 1_000);
        assert!(
            map.capacity() <= peak * 2,
            "round {round}: capacity {} vs peak {peak}",
            map.capacity()
        );
    }
    assert!(keys
        .iter()
        .enumerate()
        .all(|(i, k)| map.lookup_str(k) == Some(&(i + 199))));
}

#[test]
fn test_failed_reserve_leaves_map_untouched() {
    let mut map = RobinHoodMap::new();
    for i in 0..50u32 {
        map.insert(i, i * 3).unwrap();
    }
    for i in (0..50u32).step_by(5) {
        map.remove(&i);
    }
    let before = map.stats();

    let err = map.reserve(1usize << 60).unwrap_err();
    assert!(err.is_out_of_memory());
    assert!(map.reserve(usize::MAX).unwrap_err().is_out_of_memory());

    assert_eq!(map.stats(), before);
    check_table(&map);
    for i in 0..50u32 {
        let expected = (i % 5 != 0).then_some(i * 3);
        assert_eq!(map.get(&i).copied(), expected);
    }
    // The map is still usable afterwards.
    map.insert(1_000, 1).unwrap();
    assert_eq!(map.len(), before.len + 1);
}

#[test]
fn test_oversized_table_is_rejected() {
    let result = RobinHoodMap::<u64, u64, _>::with_capacity_and_ops(
        1usize << 60,
        vitl_core::HashKeyOps,
    );
    assert!(matches!(result, Err(vitl_core::VitlError::OutOfMemory { .. })));
    assert!(StrMap::<u8>::with_capacity(1usize << 60)
        .unwrap_err()
        .is_out_of_memory());
}
