use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::cell::Cell;
use std::ptr::{self, NonNull};
use std::slice;

use tracing::{debug, trace, warn};

use super::debug::ArenaStats;
use crate::config::ArenaConfig;
use crate::error::{Result, VitlError};

/// Fill byte written over reset regions (and fresh regions) when poisoning.
pub const POISON_BYTE: u8 = 0xA5;

/// Fill byte written over a region right before it is released.
pub const FREED_POISON_BYTE: u8 = 0xDD;

/// Alignment used when a caller passes 0 or a non-power-of-two.
///
/// Matches `max_align_t` on the 64-bit targets we build for.
pub const MAX_ALIGN: usize = 16;

/// Alignment of the backing region itself.
const REGION_ALIGN: usize = 64;

#[inline]
fn normalize_align(align: usize) -> usize {
    if align == 0 || !align.is_power_of_two() {
        MAX_ALIGN
    } else {
        align
    }
}

/// Fixed-capacity bump allocator over one contiguous byte region.
///
/// Allocation moves a cursor forward; nothing is freed individually.
/// [`reset`](Arena::reset) rewinds the cursor and [`destroy`](Arena::destroy)
/// (or dropping the arena) releases the region. Both take `&mut self`, so the
/// borrow checker guarantees no allocation outlives either.
///
/// Values placed in the arena never have their destructors run, which is why
/// the typed helpers require `T: Copy`.
#[derive(Debug)]
pub struct Arena {
    region: Option<NonNull<u8>>,
    layout: Layout,
    offset: Cell<usize>,
    stats: Cell<ArenaStats>,
    config: ArenaConfig,
}

// The arena exclusively owns its region; `Cell` already keeps it `!Sync`.
unsafe impl Send for Arena {}

impl Arena {
    /// Create an arena with default options.
    ///
    /// The region is `max(capacity, default_capacity)` bytes, so 0 selects
    /// [`ArenaConfig::default_capacity`].
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_config(capacity, ArenaConfig::default())
    }

    /// Create an arena of `max(capacity, config.default_capacity)` bytes.
    pub fn with_config(capacity: usize, config: ArenaConfig) -> Result<Self> {
        let capacity = capacity.max(config.default_capacity);
        if capacity == 0 {
            return Err(VitlError::InvalidArgument(
                "arena capacity resolved to zero".to_string(),
            ));
        }

        let layout = match Layout::from_size_align(capacity, REGION_ALIGN) {
            Ok(layout) => layout,
            Err(_) => {
                warn!(capacity, "arena: region size exceeds the address space");
                return Err(VitlError::oom(capacity, 0));
            }
        };

        // Zeroed so every byte handed out as `&mut [u8]` is initialised.
        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(region) = NonNull::new(raw) else {
            warn!(capacity, "arena: allocator refused the region");
            return Err(VitlError::oom(capacity, 0));
        };

        if config.poison_on_reset {
            // SAFETY: the region is `capacity` bytes and exclusively ours.
            unsafe { ptr::write_bytes(region.as_ptr(), POISON_BYTE, capacity) };
        }

        debug!(capacity, "arena: created");
        Ok(Self {
            region: Some(region),
            layout,
            offset: Cell::new(0),
            stats: Cell::new(ArenaStats::default()),
            config,
        })
    }

    /// Total region size in bytes; 0 once destroyed.
    #[inline]
    pub fn capacity(&self) -> usize {
        if self.region.is_some() {
            self.layout.size()
        } else {
            0
        }
    }

    /// Current cursor position.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset.get()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.offset()
    }

    /// False after [`destroy`](Arena::destroy).
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.region.is_some()
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// Counters, when the arena was built with `stats = true`.
    pub fn stats(&self) -> Option<ArenaStats> {
        self.config.stats.then(|| self.stats.get())
    }

    /// Reserve `size` bytes aligned to `align` and return their address.
    ///
    /// `size == 0` is treated as 1. `align` of 0 or a non-power-of-two is
    /// replaced by [`MAX_ALIGN`]. On failure the cursor does not move.
    ///
    /// Running out of room emits one `warn!` event. It only reaches stderr
    /// once the host has installed a subscriber, e.g. with
    /// [`init_tracing`](crate::logging::init_tracing).
    pub fn alloc_raw(&self, size: usize, align: usize) -> Result<NonNull<u8>> {
        let region = self.region.ok_or_else(|| {
            VitlError::InvalidArgument("allocation from a destroyed arena".to_string())
        })?;
        let size = size.max(1);
        let align = normalize_align(align);

        let capacity = self.layout.size();
        let offset = self.offset.get();
        let base = region.as_ptr() as usize;

        // Align the absolute address so alignments above REGION_ALIGN hold too.
        let start = base
            .checked_add(offset)
            .and_then(|addr| addr.checked_add(align - 1))
            .map(|addr| (addr & !(align - 1)) - base);
        let end = start.and_then(|start| start.checked_add(size).map(|end| (start, end)));

        let (start, end) = match end {
            Some((start, end)) if end <= capacity => (start, end),
            _ => {
                warn!(
                    requested = size,
                    align,
                    offset,
                    capacity,
                    "arena: out of memory"
                );
                return Err(VitlError::oom(size, capacity - offset));
            }
        };

        // SAFETY: start + size <= capacity, so the range lies inside the region.
        let ptr = unsafe { region.as_ptr().add(start) };
        if self.config.zero_on_alloc {
            // SAFETY: same range as above, not yet handed to anyone.
            unsafe { ptr::write_bytes(ptr, 0, size) };
        }

        self.offset.set(end);
        if self.config.stats {
            let mut stats = self.stats.get();
            stats.record_alloc(size, end);
            self.stats.set(stats);
        }

        // SAFETY: derived from a non-null region pointer.
        Ok(unsafe { NonNull::new_unchecked(ptr) })
    }

    /// Reserve `size` bytes aligned to `align` as a byte slice.
    ///
    /// The slice is `size.max(1)` bytes long. Its contents are unspecified
    /// unless `zero_on_alloc` is set.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_bytes(&self, size: usize, align: usize) -> Result<&mut [u8]> {
        let ptr = self.alloc_raw(size, align)?;
        // SAFETY: alloc_raw reserved size.max(1) bytes that no other
        // allocation overlaps until reset/destroy, both of which need &mut self.
        Ok(unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), size.max(1)) })
    }

    /// Copy `s` into the arena followed by a NUL byte.
    ///
    /// Consumes `s.len() + 1` bytes at alignment 1; the returned `&str`
    /// excludes the terminator.
    pub fn alloc_str(&self, s: &str) -> Result<&str> {
        let len = s.len();
        let total = len
            .checked_add(1)
            .ok_or_else(|| VitlError::oom(usize::MAX, self.remaining()))?;
        let buf = self.alloc_bytes(total, 1)?;
        buf[..len].copy_from_slice(s.as_bytes());
        buf[len] = 0;
        // SAFETY: the first `len` bytes are a copy of a valid &str.
        Ok(unsafe { std::str::from_utf8_unchecked(&buf[..len]) })
    }

    /// Move a `Copy` value into the arena.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_value<T: Copy>(&self, value: T) -> Result<&mut T> {
        let ptr = self
            .alloc_raw(std::mem::size_of::<T>(), std::mem::align_of::<T>())?
            .cast::<T>();
        // SAFETY: the reservation is large enough and aligned for T.
        unsafe {
            ptr.as_ptr().write(value);
            Ok(&mut *ptr.as_ptr())
        }
    }

    /// Copy a slice of `Copy` values into the arena.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_slice_copy<T: Copy>(&self, src: &[T]) -> Result<&mut [T]> {
        let ptr = self
            .alloc_raw(std::mem::size_of_val(src), std::mem::align_of::<T>())?
            .cast::<T>();
        // SAFETY: the reservation holds src.len() values of T, aligned for T,
        // and cannot overlap `src` which lives outside the cursor range.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), ptr.as_ptr(), src.len());
            Ok(slice::from_raw_parts_mut(ptr.as_ptr(), src.len()))
        }
    }

    /// Rewind the cursor to 0, keeping the region.
    pub fn reset(&mut self) {
        let Some(region) = self.region else {
            return;
        };
        let used = self.offset.get();
        if self.config.poison_on_reset && used > 0 {
            // SAFETY: used <= capacity and &mut self rules out live borrows.
            unsafe { ptr::write_bytes(region.as_ptr(), POISON_BYTE, used) };
        }
        self.offset.set(0);
        if self.config.stats {
            let mut stats = self.stats.get();
            stats.resets = stats.resets.saturating_add(1);
            self.stats.set(stats);
        }
        trace!(released = used, "arena: reset");
    }

    /// Release the region. Later allocations fail with `InvalidArgument`.
    ///
    /// Idempotent; also run by `Drop`.
    pub fn destroy(&mut self) {
        let Some(region) = self.region.take() else {
            return;
        };
        if self.config.poison_on_destroy {
            // SAFETY: the whole region is still ours until dealloc below.
            unsafe { ptr::write_bytes(region.as_ptr(), FREED_POISON_BYTE, self.layout.size()) };
        }
        // SAFETY: region was allocated with exactly this layout.
        unsafe { dealloc(region.as_ptr(), self.layout) };
        self.offset.set(0);
        debug!(capacity = self.layout.size(), "arena: destroyed");
    }

    /// Bytes of the used prefix, for inspecting poisoning in tests and dumps.
    pub fn used_bytes(&mut self) -> &[u8] {
        match self.region {
            // SAFETY: [0, offset) lies inside the region; &mut self keeps
            // every outstanding allocation borrow dead.
            Some(region) => unsafe { slice::from_raw_parts(region.as_ptr(), self.offset.get()) },
            None => &[],
        }
    }

    /// The whole region including the unused tail.
    pub fn region_bytes(&mut self) -> &[u8] {
        match self.region {
            // SAFETY: as in used_bytes; the region is initialised at creation.
            Some(region) => unsafe { slice::from_raw_parts(region.as_ptr(), self.layout.size()) },
            None => &[],
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sized(capacity: usize) -> Arena {
        Arena::with_config(0, ArenaConfig::default().with_default_capacity(capacity)).unwrap()
    }

    #[test]
    fn test_zero_capacity_uses_default() {
        let arena = Arena::new(0).unwrap();
        assert_eq!(arena.capacity(), 1024 * 1024);
        assert_eq!(arena.offset(), 0);
        assert!(arena.is_valid());
    }

    #[test]
    fn test_small_request_rounds_up_to_default() {
        assert_eq!(Arena::new(64).unwrap().capacity(), 1024 * 1024);
        assert_eq!(Arena::new(2 * 1024 * 1024).unwrap().capacity(), 2 * 1024 * 1024);
        assert_eq!(sized(48).capacity(), 48);
    }

    #[test]
    fn test_zero_size_promoted() {
        let arena = Arena::new(64).unwrap();
        let bytes = arena.alloc_bytes(0, 1).unwrap();
        assert_eq!(bytes.len(), 1);
        assert_eq!(arena.offset(), 1);
    }

    #[test]
    fn test_bad_alignment_promoted() {
        let arena = Arena::new(256).unwrap();
        arena.alloc_bytes(1, 1).unwrap();
        let p = arena.alloc_raw(4, 3).unwrap();
        assert_eq!(p.as_ptr() as usize % MAX_ALIGN, 0);
        let q = arena.alloc_raw(4, 0).unwrap();
        assert_eq!(q.as_ptr() as usize % MAX_ALIGN, 0);
    }

    #[test]
    fn test_exhaustion_keeps_cursor() {
        let arena = sized(32);
        arena.alloc_bytes(30, 1).unwrap();
        let err = arena.alloc_bytes(8, 1).unwrap_err();
        assert!(err.is_out_of_memory());
        assert_eq!(arena.offset(), 30);
        // Padding alone can push a request over the edge.
        assert!(arena.alloc_bytes(2, 16).is_err());
        assert_eq!(arena.offset(), 30);
        arena.alloc_bytes(2, 1).unwrap();
        assert_eq!(arena.offset(), 32);
    }

    #[test]
    fn test_huge_region_is_oom() {
        let err = Arena::new(usize::MAX).unwrap_err();
        assert!(err.is_out_of_memory());
    }

    #[test]
    fn test_alloc_str_writes_terminator() {
        let mut arena = Arena::new(64).unwrap();
        let s = arena.alloc_str("vitl").unwrap();
        assert_eq!(s, "vitl");
        assert_eq!(arena.offset(), 5);
        assert_eq!(arena.used_bytes(), b"vitl\0");
    }

    #[test]
    fn test_typed_allocations() {
        let arena = Arena::new(256).unwrap();
        arena.alloc_bytes(1, 1).unwrap();
        let v = arena.alloc_value(0xDEAD_BEEF_u64).unwrap();
        assert_eq!(*v, 0xDEAD_BEEF);
        assert_eq!(v as *mut u64 as usize % std::mem::align_of::<u64>(), 0);

        let s = arena.alloc_slice_copy(&[1u32, 2, 3]).unwrap();
        s[1] = 20;
        assert_eq!(s, &[1, 20, 3]);
    }

    #[test]
    fn test_zero_on_alloc() {
        let config = ArenaConfig {
            zero_on_alloc: true,
            poison_on_reset: true,
            ..ArenaConfig::default()
        };
        let mut arena = Arena::with_config(128, config).unwrap();
        arena.alloc_bytes(16, 1).unwrap().fill(0x7F);
        arena.reset();
        let again = arena.alloc_bytes(16, 1).unwrap();
        assert!(again.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_poison_on_reset() {
        let config = ArenaConfig {
            poison_on_reset: true,
            ..ArenaConfig::default()
        };
        let mut arena = Arena::with_config(64, config).unwrap();
        assert!(arena.region_bytes().iter().all(|&b| b == POISON_BYTE));

        arena.alloc_bytes(10, 1).unwrap().fill(1);
        arena.reset();
        assert!(arena.region_bytes()[..10].iter().all(|&b| b == POISON_BYTE));
    }

    #[test]
    fn test_stats() {
        let mut arena = Arena::with_config(1024, ArenaConfig::debug()).unwrap();
        arena.alloc_bytes(100, 1).unwrap();
        arena.alloc_bytes(8, 8).unwrap();
        arena.reset();
        arena.alloc_bytes(10, 1).unwrap();

        let stats = arena.stats().unwrap();
        assert_eq!(stats.allocations, 3);
        assert_eq!(stats.total_bytes, 118);
        assert_eq!(stats.peak, 112);
        assert_eq!(stats.resets, 1);

        assert!(Arena::new(64).unwrap().stats().is_none());
    }

    #[test]
    fn test_destroy_invalidates() {
        let mut arena = Arena::with_config(64, ArenaConfig::debug()).unwrap();
        arena.alloc_bytes(8, 1).unwrap();
        arena.destroy();
        assert!(!arena.is_valid());
        assert_eq!(arena.capacity(), 0);
        assert_eq!(arena.offset(), 0);
        assert!(matches!(
            arena.alloc_bytes(1, 1),
            Err(VitlError::InvalidArgument(_))
        ));
        arena.destroy();
        arena.reset();
    }
}
