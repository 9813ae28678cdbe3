use std::ops::ControlFlow;

use super::debug::MapStats;
use super::hashmap::{KeyOps, RobinHoodMap};
use crate::error::{Result, VitlError};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a, 64-bit.
#[inline]
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |h, &b| {
        (h ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}

/// FNV-1a hashing with byte-exact equality for string-like keys.
///
/// Implemented for owned (`Box<str>`, `String`) and borrowed (`&str`) keys;
/// the hash covers the string bytes only, never a terminator.
#[derive(Debug, Default, Clone, Copy)]
pub struct FnvStrOps;

#[allow(clippy::borrowed_box)]
impl KeyOps<Box<str>> for FnvStrOps {
    #[inline]
    fn hash(&self, key: &Box<str>) -> u64 {
        fnv1a64(key.as_bytes())
    }

    #[inline]
    fn equals(&self, a: &Box<str>, b: &Box<str>) -> bool {
        a.as_bytes() == b.as_bytes()
    }
}

impl KeyOps<String> for FnvStrOps {
    #[inline]
    fn hash(&self, key: &String) -> u64 {
        fnv1a64(key.as_bytes())
    }

    #[inline]
    fn equals(&self, a: &String, b: &String) -> bool {
        a.as_bytes() == b.as_bytes()
    }
}

impl<'a> KeyOps<&'a str> for FnvStrOps {
    #[inline]
    fn hash(&self, key: &&'a str) -> u64 {
        fnv1a64(key.as_bytes())
    }

    #[inline]
    fn equals(&self, a: &&'a str, b: &&'a str) -> bool {
        a.as_bytes() == b.as_bytes()
    }
}

/// Copy `s` onto the heap, reporting allocation failure instead of aborting.
fn duplicate(s: &str) -> Result<Box<str>> {
    let mut owned = String::new();
    owned
        .try_reserve_exact(s.len())
        .map_err(|_| VitlError::oom(s.len(), 0))?;
    owned.push_str(s);
    Ok(owned.into_boxed_str())
}

/// String-keyed map that owns a private copy of every key.
///
/// Callers keep ownership of the buffers they pass in; the map duplicates
/// on insert and frees its copy on removal, update or drop.
#[derive(Debug)]
pub struct StrMap<V> {
    inner: RobinHoodMap<Box<str>, V, FnvStrOps>,
}

impl<V> Default for StrMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> StrMap<V> {
    pub fn new() -> Self {
        Self {
            inner: RobinHoodMap::with_ops(FnvStrOps),
        }
    }

    pub fn with_capacity(n: usize) -> Result<Self> {
        Ok(Self {
            inner: RobinHoodMap::with_capacity_and_ops(n, FnvStrOps)?,
        })
    }

    /// Insert a copy of `key`, returning the previous value on update.
    ///
    /// If the map cannot grow, the copy is freed and the map is unchanged.
    pub fn insert_str(&mut self, key: &str, value: V) -> Result<Option<V>> {
        let owned = duplicate(key)?;
        self.inner.insert(owned, value)
    }

    pub fn lookup_str(&self, key: &str) -> Option<&V> {
        self.inner
            .get_with(fnv1a64(key.as_bytes()), |k| k.as_bytes() == key.as_bytes())
            .map(|(_, v)| v)
    }

    pub fn lookup_str_mut(&mut self, key: &str) -> Option<&mut V> {
        self.inner
            .get_mut_with(fnv1a64(key.as_bytes()), |k| k.as_bytes() == key.as_bytes())
    }

    #[inline]
    pub fn contains_str(&self, key: &str) -> bool {
        self.lookup_str(key).is_some()
    }

    /// Remove `key`, freeing the stored copy.
    pub fn remove_str(&mut self, key: &str) -> Option<V> {
        self.inner
            .remove_with(fnv1a64(key.as_bytes()), |k| k.as_bytes() == key.as_bytes())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> + '_ {
        self.inner.iter().map(|(k, v)| (&**k, v))
    }

    pub fn for_each_until<B, F>(&self, mut f: F) -> ControlFlow<B>
    where
        F: FnMut(&str, &V) -> ControlFlow<B>,
    {
        self.inner.for_each_until(|k, v| f(&**k, v))
    }

    pub fn stats(&self) -> MapStats {
        self.inner.stats()
    }
}
