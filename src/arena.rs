//! A single contiguous, word-aligned allocation that backs every atomic
//! structure the pool needs: the two bitmaps, the free-index stack's node
//! array, and the stack's two tagged top pointers.
//!
//! Mirrors the teacher's `syncpool::boxed::raw_box_zeroed` idiom (allocate
//! directly on the heap via `std::alloc`, skip the stack round-trip) but
//! generalized from "one value of type `T`" to "one zeroed byte region
//! addressed by caller-supplied offsets," since the pool's caller (not the
//! allocator) owns the layout of what lives where.

use crate::error::PoolError;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::atomic::AtomicU64;

/// Owns one zeroed, 8-byte-aligned allocation and hands out `&AtomicU64`
/// views into it at arbitrary 8-byte-aligned offsets.
///
/// The arena does not know what any given word *means* — that's the
/// bitmap/stack modules' job. It only guarantees the memory exists, is
/// zeroed, is aligned, and is released exactly once.
pub(crate) struct Arena {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: `Arena` has no interior mutability of its own beyond the atomics it
// exposes; every `word()` access is itself atomic, so sharing a `&Arena`
// across threads is sound.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Allocate a zeroed region of `bytes`, rounded up to 8-byte alignment.
    ///
    /// Returns [`PoolError::ArenaAllocationFailure`] if the allocator cannot
    /// satisfy the request; this is the only place that error is produced,
    /// matching spec's "fatal at construction" contract.
    pub(crate) fn new(bytes: usize) -> Result<Self, PoolError> {
        debug_assert!(bytes % 8 == 0, "arena size must be a multiple of 8 bytes");

        let layout = Layout::from_size_align(bytes, 8)
            .map_err(|_| PoolError::ArenaAllocationFailure { requested_bytes: bytes })?;

        // SAFETY: `layout` has non-zero size (callers never request a
        // zero-byte arena) and valid alignment, both checked by `Layout`.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw)
            .ok_or(PoolError::ArenaAllocationFailure { requested_bytes: bytes })?;

        Ok(Arena { ptr, layout })
    }

    /// Borrow the 8 bytes at `offset` as an atomic 64-bit lane.
    ///
    /// # Panics
    /// Panics (debug builds) if `offset` is not 8-byte aligned or would read
    /// past the end of the arena. Both are programmer errors in the caller's
    /// offset bookkeeping, never a function of pool usage.
    #[inline]
    pub(crate) fn word(&self, offset: usize) -> &AtomicU64 {
        debug_assert_eq!(offset % 8, 0, "word offset must be 8-byte aligned");
        debug_assert!(
            offset + 8 <= self.layout.size(),
            "word offset {offset} out of bounds for arena of {} bytes",
            self.layout.size()
        );

        // SAFETY: offset is in-bounds and 8-byte aligned (checked above in
        // debug builds; callers in this crate only ever pass offsets derived
        // from the same layout arithmetic used to size the arena). The
        // allocation is zeroed and never aliased by a non-atomic access.
        unsafe { &*(self.ptr.as_ptr().add(offset).cast::<AtomicU64>()) }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`layout` are exactly what `alloc_zeroed` returned and
        // accepted in `new`, and this is the only place that frees them.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn fresh_arena_is_zeroed() {
        let arena = Arena::new(64).unwrap();
        for offset in (0..64).step_by(8) {
            assert_eq!(arena.word(offset).load(Ordering::Relaxed), 0);
        }
    }

    #[test]
    fn words_are_independently_addressable() {
        let arena = Arena::new(32).unwrap();
        arena.word(0).store(0xAAAA, Ordering::Relaxed);
        arena.word(8).store(0xBBBB, Ordering::Relaxed);

        assert_eq!(arena.word(0).load(Ordering::Relaxed), 0xAAAA);
        assert_eq!(arena.word(8).load(Ordering::Relaxed), 0xBBBB);
    }

    #[test]
    fn rejects_degenerate_layout() {
        // size_align overflow: absurdly large request should fail cleanly
        // rather than panic.
        let result = Arena::new(usize::MAX - 7);
        assert!(result.is_err());
    }
}
