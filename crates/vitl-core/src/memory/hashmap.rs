//! Open-addressing hash map with Robin-Hood probing and tombstone deletion.
//!
//! Keys are hashed and compared through a [`KeyOps`] policy rather than
//! `Hash`/`Eq`, so the same table serves borrowed keys, heap-owned keys and
//! keys living in an [`Arena`](super::Arena). The policy also decides what
//! "releasing" a key means when the map lets go of it.
//!
//! Table rules:
//! - capacity is 0 until the first insertion, then a power of two >= 16;
//! - `used` (live + tombstones) never exceeds 85% of capacity after an insert;
//! - a full table is rebuilt at the same size when at most half of its
//!   load budget is live, and doubled otherwise; either way tombstones go;
//! - the table never shrinks.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem;
use std::ops::ControlFlow;

use rustc_hash::FxHasher;
use tracing::debug;

use super::debug::MapStats;
use crate::error::{Result, VitlError};

/// Smallest table ever allocated.
pub const MIN_CAPACITY: usize = 16;

/// Maximum `used / capacity`, as a percentage.
pub const MAX_LOAD_PERCENT: usize = 85;

/// Hashing, equality and release policy for keys of type `K`.
///
/// Any state the policy needs (a seed, a counter, a handle) lives in the
/// implementing value and is available to all three methods.
pub trait KeyOps<K> {
    fn hash(&self, key: &K) -> u64;

    fn equals(&self, a: &K, b: &K) -> bool;

    /// Called exactly once for every key the map gives up: on removal, on
    /// update (for the previously stored key), on `clear` and on drop.
    ///
    /// The default just drops the key, which frees owned keys and does
    /// nothing for borrowed or arena-backed ones.
    fn release(&self, key: K) {
        drop(key);
    }
}

/// Policy for any `Hash + Eq` key, hashed with `FxHasher`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashKeyOps;

impl<K: Hash + Eq> KeyOps<K> for HashKeyOps {
    #[inline]
    fn hash(&self, key: &K) -> u64 {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[inline]
    fn equals(&self, a: &K, b: &K) -> bool {
        a == b
    }
}

/// Policy built from a hash closure and an equality closure.
///
/// Whatever the closures capture plays the role of per-map user data.
#[derive(Clone, Copy)]
pub struct FnKeyOps<H, E> {
    hash: H,
    equals: E,
}

impl<H, E> FnKeyOps<H, E> {
    pub fn new(hash: H, equals: E) -> Self {
        Self { hash, equals }
    }
}

impl<K, H, E> KeyOps<K> for FnKeyOps<H, E>
where
    H: Fn(&K) -> u64,
    E: Fn(&K, &K) -> bool,
{
    #[inline]
    fn hash(&self, key: &K) -> u64 {
        (self.hash)(key)
    }

    #[inline]
    fn equals(&self, a: &K, b: &K) -> bool {
        (self.equals)(a, b)
    }
}

impl<H, E> fmt::Debug for FnKeyOps<H, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnKeyOps")
    }
}

struct Bucket<K, V> {
    hash: u64,
    /// Distance from the ideal bucket `hash & mask`.
    dist: usize,
    key: K,
    value: V,
}

enum Slot<K, V> {
    Empty,
    /// Keeps the displacement of the entry that was removed so probes that
    /// pass over it still see a valid Robin-Hood ordering.
    Tombstone {
        dist: usize,
    },
    Occupied(Bucket<K, V>),
}

/// Read-only view of one slot, for diagnostics and invariant checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Tombstone,
    Occupied { ideal: usize, displacement: usize },
}

enum Probe {
    Existing(usize),
    /// Index where the new entry goes, and its displacement there.
    Vacant(usize, usize),
}

/// Robin-Hood hash map over a [`KeyOps`] policy.
///
/// Not thread-safe; wrap it in a lock to share it.
pub struct RobinHoodMap<K, V, O: KeyOps<K> = HashKeyOps> {
    slots: Box<[Slot<K, V>]>,
    len: usize,
    used: usize,
    ops: O,
}

impl<K: Hash + Eq, V> RobinHoodMap<K, V, HashKeyOps> {
    pub fn new() -> Self {
        Self::with_ops(HashKeyOps)
    }
}

impl<K: Hash + Eq, V> Default for RobinHoodMap<K, V, HashKeyOps> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, H, E> RobinHoodMap<K, V, FnKeyOps<H, E>>
where
    H: Fn(&K) -> u64,
    E: Fn(&K, &K) -> bool,
{
    /// Map driven by a hash closure and an equality closure.
    pub fn with_fns(hash: H, equals: E) -> Self {
        Self::with_ops(FnKeyOps::new(hash, equals))
    }
}

#[inline]
fn max_used(capacity: usize) -> usize {
    capacity / 100 * MAX_LOAD_PERCENT + capacity % 100 * MAX_LOAD_PERCENT / 100
}

/// Smallest power-of-two capacity >= MIN_CAPACITY holding `n` entries.
fn capacity_for(n: usize) -> Option<usize> {
    let mut capacity = MIN_CAPACITY;
    while max_used(capacity) < n {
        capacity = capacity.checked_mul(2)?;
    }
    Some(capacity)
}

impl<K, V, O: KeyOps<K>> RobinHoodMap<K, V, O> {
    /// Empty map; no table is allocated until the first insertion.
    pub fn with_ops(ops: O) -> Self {
        Self {
            slots: Box::default(),
            len: 0,
            used: 0,
            ops,
        }
    }

    /// Empty map with a table already sized for `n` entries.
    pub fn with_capacity_and_ops(n: usize, ops: O) -> Result<Self> {
        let mut map = Self::with_ops(ops);
        map.reserve(n)?;
        Ok(map)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots; 0 before the first insertion.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Live entries plus tombstones.
    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn ops(&self) -> &O {
        &self.ops
    }

    /// Make room for `additional` more entries without further growth.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        if additional == 0 {
            return Ok(());
        }
        let needed = self
            .used
            .checked_add(additional)
            .ok_or_else(|| VitlError::oom(usize::MAX, 0))?;
        if self.capacity() > 0 && needed <= max_used(self.capacity()) {
            return Ok(());
        }
        let wanted = self.len + additional;
        let capacity = capacity_for(wanted)
            .ok_or_else(|| VitlError::oom(usize::MAX, 0))?
            .max(self.capacity());
        self.resize(capacity)
    }

    /// Insert `key -> value`, or update the value if an equal key exists.
    ///
    /// On update the previously stored key is released and replaced by
    /// `key`; the old value is returned. If the table cannot grow the map is
    /// left untouched, `key` is released and `OutOfMemory` is returned.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>> {
        if let Err(err) = self.grow_for_insert() {
            self.ops.release(key);
            return Err(err);
        }
        let hash = self.ops.hash(&key);
        Ok(self.insert_hashed(hash, key, value))
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let hash = self.ops.hash(key);
        self.get_with(hash, |stored| self.ops.equals(stored, key))
            .map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let hash = self.ops.hash(key);
        let idx = self.find(hash, |stored| self.ops.equals(stored, key))?;
        Some(&mut self.bucket_mut(idx).value)
    }

    pub fn get_key_value(&self, key: &K) -> Option<(&K, &V)> {
        let hash = self.ops.hash(key);
        self.get_with(hash, |stored| self.ops.equals(stored, key))
    }

    #[inline]
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Look up by a precomputed hash and a match predicate.
    ///
    /// Lets callers query with a borrowed form of `K` (say `&str` for
    /// `Box<str>` keys). `hash` must equal what the policy computes for the
    /// matching key.
    pub fn get_with<F>(&self, hash: u64, is_match: F) -> Option<(&K, &V)>
    where
        F: Fn(&K) -> bool,
    {
        let idx = self.find(hash, is_match)?;
        match &self.slots[idx] {
            Slot::Occupied(b) => Some((&b.key, &b.value)),
            _ => None,
        }
    }

    pub fn get_mut_with<F>(&mut self, hash: u64, is_match: F) -> Option<&mut V>
    where
        F: Fn(&K) -> bool,
    {
        let idx = self.find(hash, is_match)?;
        Some(&mut self.bucket_mut(idx).value)
    }

    /// Remove `key`, releasing the stored key and returning its value.
    ///
    /// The slot becomes a tombstone: `len` drops, `used` does not.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let hash = self.ops.hash(key);
        let idx = self.find(hash, |stored| self.ops.equals(stored, key))?;
        self.remove_at(idx)
    }

    pub fn remove_with<F>(&mut self, hash: u64, is_match: F) -> Option<V>
    where
        F: Fn(&K) -> bool,
    {
        let idx = self.find(hash, is_match)?;
        self.remove_at(idx)
    }

    /// Release every key and mark all slots empty. Capacity is kept.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            if let Slot::Occupied(bucket) = mem::replace(slot, Slot::Empty) {
                self.ops.release(bucket.key);
            }
        }
        self.len = 0;
        self.used = 0;
    }

    /// Lazy iterator over live `(key, value)` pairs in table order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            slots: self.slots.iter(),
            remaining: self.len,
        }
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            slots: self.slots.iter_mut(),
            remaining: self.len,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, v)| v)
    }

    /// Visit every live entry until `f` breaks.
    ///
    /// Returns the `Break` value if the walk stopped early.
    pub fn for_each_until<B, F>(&self, mut f: F) -> ControlFlow<B>
    where
        F: FnMut(&K, &V) -> ControlFlow<B>,
    {
        self.iter().try_for_each(|(k, v)| f(k, v))
    }

    pub fn stats(&self) -> MapStats {
        let mut stats = MapStats {
            len: self.len,
            used: self.used,
            capacity: self.capacity(),
            ..MapStats::default()
        };
        for slot in self.slots.iter() {
            match slot {
                Slot::Tombstone { .. } => stats.tombstones += 1,
                Slot::Occupied(b) => {
                    stats.max_displacement = stats.max_displacement.max(b.dist);
                    stats.total_displacement += b.dist;
                }
                Slot::Empty => {}
            }
        }
        if stats.capacity > 0 {
            stats.load_factor = stats.used as f64 / stats.capacity as f64;
        }
        stats
    }

    /// State of every slot in table order.
    pub fn slot_layout(&self) -> Vec<SlotState> {
        let mask = self.capacity().wrapping_sub(1);
        self.slots
            .iter()
            .map(|slot| match slot {
                Slot::Empty => SlotState::Empty,
                Slot::Tombstone { .. } => SlotState::Tombstone,
                Slot::Occupied(b) => SlotState::Occupied {
                    ideal: b.hash as usize & mask,
                    displacement: b.dist,
                },
            })
            .collect()
    }

    fn grow_for_insert(&mut self) -> Result<()> {
        let capacity = self.capacity();
        if capacity == 0 {
            return self.resize(MIN_CAPACITY);
        }
        if self.used < max_used(capacity) {
            return Ok(());
        }
        // Mostly tombstones: rebuilding in place reclaims them without growing.
        if self.len < max_used(capacity) / 2 {
            return self.resize(capacity);
        }
        let doubled = capacity
            .checked_mul(2)
            .ok_or_else(|| VitlError::oom(usize::MAX, 0))?;
        self.resize(doubled)
    }

    /// Rebuild into a fresh table of `capacity` slots, dropping tombstones.
    fn resize(&mut self, capacity: usize) -> Result<()> {
        debug_assert!(capacity.is_power_of_two() && capacity >= MIN_CAPACITY);

        let mut fresh: Vec<Slot<K, V>> = Vec::new();
        fresh.try_reserve_exact(capacity).map_err(|_| {
            VitlError::oom(capacity.saturating_mul(mem::size_of::<Slot<K, V>>()), 0)
        })?;
        fresh.resize_with(capacity, || Slot::Empty);

        let old = mem::replace(&mut self.slots, fresh.into_boxed_slice());
        debug!(
            from = old.len(),
            to = capacity,
            live = self.len,
            tombstones = self.used - self.len,
            "robin-hood map: resize"
        );
        self.used = self.len;

        for slot in old.into_vec() {
            if let Slot::Occupied(mut bucket) = slot {
                bucket.dist = 0;
                self.place_rehashed(bucket);
            }
        }
        Ok(())
    }

    /// Robin-Hood placement into a table with no tombstones and no
    /// duplicate of `bucket.key`.
    fn place_rehashed(&mut self, mut bucket: Bucket<K, V>) {
        let mask = self.capacity() - 1;
        let mut idx = bucket.hash as usize & mask;
        loop {
            let slot = &mut self.slots[idx];
            match *slot {
                Slot::Empty => {
                    *slot = Slot::Occupied(bucket);
                    return;
                }
                Slot::Occupied(ref mut resident) if resident.dist < bucket.dist => {
                    mem::swap(resident, &mut bucket);
                }
                _ => {}
            }
            idx = (idx + 1) & mask;
            bucket.dist += 1;
        }
    }

    /// Insert into a table that already has room for one more entry.
    fn insert_hashed(&mut self, hash: u64, key: K, value: V) -> Option<V> {
        match self.probe_insert(hash, &key) {
            Probe::Existing(idx) => {
                let bucket = self.bucket_mut(idx);
                let old_key = mem::replace(&mut bucket.key, key);
                let old_value = mem::replace(&mut bucket.value, value);
                self.ops.release(old_key);
                Some(old_value)
            }
            Probe::Vacant(idx, dist) => {
                let incoming = Bucket {
                    hash,
                    dist,
                    key,
                    value,
                };
                self.len += 1;
                match mem::replace(&mut self.slots[idx], Slot::Occupied(incoming)) {
                    Slot::Empty => self.used += 1,
                    Slot::Tombstone { .. } => {}
                    Slot::Occupied(evicted) => self.carry_forward(idx, evicted),
                }
                None
            }
        }
    }

    /// Find the key, or the first slot where Robin-Hood says it belongs.
    ///
    /// A slot qualifies when it is empty or when its (live or tombstoned)
    /// entry sits closer to home than the probe does. Past that point the key
    /// cannot exist, so stopping there also rules out duplicates.
    fn probe_insert(&self, hash: u64, key: &K) -> Probe {
        let mask = self.capacity() - 1;
        let mut idx = hash as usize & mask;
        let mut dist = 0;
        loop {
            match &self.slots[idx] {
                Slot::Empty => return Probe::Vacant(idx, dist),
                Slot::Tombstone { dist: resident } => {
                    if *resident < dist {
                        return Probe::Vacant(idx, dist);
                    }
                }
                Slot::Occupied(b) => {
                    if b.hash == hash && self.ops.equals(&b.key, key) {
                        return Probe::Existing(idx);
                    }
                    if b.dist < dist {
                        return Probe::Vacant(idx, dist);
                    }
                }
            }
            idx = (idx + 1) & mask;
            dist += 1;
            debug_assert!(dist <= self.capacity(), "probe wrapped a full table");
        }
    }

    /// Continue a Robin-Hood insertion with an entry evicted from `from`.
    fn carry_forward(&mut self, from: usize, mut carry: Bucket<K, V>) {
        let mask = self.capacity() - 1;
        let mut idx = (from + 1) & mask;
        carry.dist += 1;
        loop {
            let slot = &mut self.slots[idx];
            match *slot {
                Slot::Empty => {
                    *slot = Slot::Occupied(carry);
                    self.used += 1;
                    return;
                }
                Slot::Tombstone { dist } if dist < carry.dist => {
                    *slot = Slot::Occupied(carry);
                    return;
                }
                Slot::Occupied(ref mut resident) if resident.dist < carry.dist => {
                    mem::swap(resident, &mut carry);
                }
                _ => {}
            }
            idx = (idx + 1) & mask;
            carry.dist += 1;
        }
    }

    fn find<F>(&self, hash: u64, is_match: F) -> Option<usize>
    where
        F: Fn(&K) -> bool,
    {
        let capacity = self.capacity();
        if capacity == 0 {
            return None;
        }
        let mask = capacity - 1;
        let mut idx = hash as usize & mask;
        for dist in 0..capacity {
            match &self.slots[idx] {
                Slot::Empty => return None,
                Slot::Tombstone { .. } => {}
                Slot::Occupied(b) => {
                    if b.hash == hash && is_match(&b.key) {
                        return Some(idx);
                    }
                    if b.dist < dist {
                        return None;
                    }
                }
            }
            idx = (idx + 1) & mask;
        }
        None
    }

    fn bucket_mut(&mut self, idx: usize) -> &mut Bucket<K, V> {
        match &mut self.slots[idx] {
            Slot::Occupied(bucket) => bucket,
            _ => unreachable!("slot {idx} is not occupied"),
        }
    }

    fn remove_at(&mut self, idx: usize) -> Option<V> {
        let slot = &mut self.slots[idx];
        let dist = match slot {
            Slot::Occupied(b) => b.dist,
            _ => return None,
        };
        match mem::replace(slot, Slot::Tombstone { dist }) {
            Slot::Occupied(bucket) => {
                self.len -= 1;
                self.ops.release(bucket.key);
                Some(bucket.value)
            }
            _ => None,
        }
    }
}

impl<K, V, O: KeyOps<K>> Drop for RobinHoodMap<K, V, O> {
    fn drop(&mut self) {
        // If a release hook panics, the remaining keys are still freed when
        // the slot table itself is dropped during unwinding.
        for slot in self.slots.iter_mut() {
            if let Slot::Occupied(bucket) = mem::replace(slot, Slot::Empty) {
                self.ops.release(bucket.key);
            }
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug, O: KeyOps<K>> fmt::Debug for RobinHoodMap<K, V, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Iterator over `(&K, &V)`; see [`RobinHoodMap::iter`].
pub struct Iter<'a, K, V> {
    slots: std::slice::Iter<'a, Slot<K, V>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        for slot in self.slots.by_ref() {
            if let Slot::Occupied(b) = slot {
                self.remaining -= 1;
                return Some((&b.key, &b.value));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

/// Iterator over `(&K, &mut V)`; see [`RobinHoodMap::iter_mut`].
pub struct IterMut<'a, K, V> {
    slots: std::slice::IterMut<'a, Slot<K, V>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        for slot in self.slots.by_ref() {
            if let Slot::Occupied(b) = slot {
                self.remaining -= 1;
                return Some((&b.key, &mut b.value));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}

impl<'a, K, V, O: KeyOps<K>> IntoIterator for &'a RobinHoodMap<K, V, O> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
