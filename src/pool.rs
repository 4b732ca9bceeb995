//! The acquire/release coordinator (spec 4.F), the slot array (spec 4.E),
//! and the statistics block (spec 4.G) — the three pieces that sit on top
//! of the arena, the two bitmaps, and the free-index stack.
//!
//! `Pool` itself stores no borrowed views: `Arena`, `Bitmap`, and
//! `FreeIndexStack` are all thin, cheaply-reconstructed wrappers around
//! arena offsets, so every method builds the views it needs from `&self.arena`
//! rather than holding them as fields — this sidesteps the self-referential
//! struct a naive `Bitmap<'a>` field would otherwise require.

use crate::arena::Arena;
use crate::bitmap::Bitmap;
use crate::error::PoolError;
use crate::stack::FreeIndexStack;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// A non-owning handle to an object checked out of a [`Pool`]. Must be
/// passed back to [`Pool::release`]; dropping it without releasing leaks the
/// slot for the lifetime of the pool (spec's contract, not enforced here —
/// see spec.md §5's "no destructor calls between reuses").
pub struct PoolObject<T> {
    ptr: NonNull<T>,
}

// SAFETY: a `PoolObject` is only ever live while its slot's availability bit
// is set, which is the same synchronization the pool itself relies on to
// hand out `&self`/`&mut self` access to the underlying `T`.
unsafe impl<T: Send> Send for PoolObject<T> {}

impl<T> PoolObject<T> {
    #[inline]
    fn identity(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    #[cfg(test)]
    pub(crate) fn duplicate_for_test(&self) -> PoolObject<T> {
        PoolObject { ptr: self.ptr }
    }
}

impl<T> Deref for PoolObject<T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: the slot bit is held busy for the lifetime of this handle.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for PoolObject<T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: same as `Deref`; no other handle can alias this slot while
        // its bit is set.
        unsafe { self.ptr.as_mut() }
    }
}

/// Relaxed atomic counters, read independently by [`Pool::stats`] — spec.md
/// §4.G accepts torn snapshots across fields, this is an observability
/// surface, not a transaction log.
#[derive(Default)]
struct Stats {
    total_gets: AtomicU64,
    total_returns: AtomicU64,
    bit_trick_hits: AtomicU64,
    stack_hits: AtomicU64,
    total_creates: AtomicU64,
    total_drops: AtomicU64,
}

/// A point-in-time read of every counter spec.md §6 names, plus the derived
/// `free_count`/`busy_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub capacity: usize,
    pub free_count: usize,
    pub busy_count: usize,
    pub total_gets: u64,
    pub total_returns: u64,
    pub bit_trick_hits: u64,
    pub stack_hits: u64,
    pub total_creates: u64,
    pub total_drops: u64,
}

/// Byte offsets into the arena, computed once at construction. `Pool` keeps
/// these instead of `Bitmap`/`FreeIndexStack` instances so that every method
/// rebuilds the view it needs on the fly — see the module doc comment.
struct Layout {
    word_count: usize,
    availability_offset: usize,
    staleness_offset: usize,
    scan_hint_offset: usize,
    stack_top_offset: usize,
    stack_free_top_offset: usize,
    stack_nodes_offset: usize,
}

impl Layout {
    fn for_capacity(logical: usize) -> Self {
        let word_count = (logical + 63) / 64;
        let availability_offset = 0;
        let staleness_offset = availability_offset + word_count * 8;
        let scan_hint_offset = staleness_offset + word_count * 8;
        let stack_top_offset = scan_hint_offset + 8;
        let stack_free_top_offset = stack_top_offset + 8;
        let stack_nodes_offset = stack_free_top_offset + 8;

        Layout {
            word_count,
            availability_offset,
            staleness_offset,
            scan_hint_offset,
            stack_top_offset,
            stack_free_top_offset,
            stack_nodes_offset,
        }
    }

    fn total_bytes(&self, logical: usize) -> usize {
        self.stack_nodes_offset + FreeIndexStack::bytes_for(logical)
    }
}

/// A bounded, lock-free pool of `T` built from a user-supplied factory.
///
/// Acquire tries the free-index stack first, then the availability bitmap's
/// scan, then overflows to the factory; release resolves the returned
/// object back to its origin slot via a reverse map, clears the bit, and
/// makes a best-effort push onto the stack. See spec.md §4.F for the full
/// state machine this implements verbatim.
pub struct Pool<T, F> {
    factory: F,
    arena: Arena,
    layout: Layout,
    capacity: usize,
    slots: Vec<NonNull<T>>,
    origins: Mutex<HashMap<usize, u32>>,
    stats: Stats,
}

// SAFETY: all mutable state behind `&self` is either atomic (arena words) or
// behind a `Mutex` (the origin map); `slots` is populated once at
// construction and never mutated afterward.
unsafe impl<T: Send, F: Send> Send for Pool<T, F> {}
unsafe impl<T: Send, F: Sync> Sync for Pool<T, F> {}

impl<T, F> Pool<T, F>
where
    F: Fn() -> Result<T, PoolError>,
{
    /// Build a pool of `capacity` eagerly-constructed objects. `capacity`
    /// must be positive; physical slot count rounds up to the next multiple
    /// of 64 and the padding slots are marked permanently busy so they can
    /// never be handed out.
    pub fn new(capacity: usize, factory: F) -> Result<Self, PoolError> {
        if capacity == 0 {
            return Err(PoolError::ZeroCapacity);
        }

        let layout = Layout::for_capacity(capacity);
        let arena = Arena::new(layout.total_bytes(capacity))?;

        let stack = FreeIndexStack::init(
            &arena,
            layout.stack_top_offset,
            layout.stack_free_top_offset,
            layout.stack_nodes_offset,
            capacity,
        );

        let availability = Bitmap::new(
            &arena,
            layout.availability_offset,
            layout.word_count,
            layout.scan_hint_offset,
        );

        let physical = layout.word_count * 64;
        for padding_bit in capacity..physical {
            availability.mark_busy(padding_bit);
        }

        let mut slots = Vec::with_capacity(capacity);
        let mut origins = HashMap::with_capacity(capacity);

        for slot in 0..capacity {
            let object = match factory() {
                Ok(object) => object,
                Err(err) => {
                    // Unwind what we've built so far so a mid-fill factory
                    // failure doesn't leak already-constructed objects.
                    for ptr in slots {
                        // SAFETY: each pointer came from `Box::into_raw` below
                        // and has not been handed out yet.
                        unsafe { drop(Box::from_raw(ptr.as_ptr())) };
                    }
                    return Err(err);
                }
            };

            let ptr = NonNull::new(Box::into_raw(Box::new(object)))
                .expect("Box::into_raw never returns null");
            origins.insert(ptr.as_ptr() as usize, slot as u32);
            slots.push(ptr);

            stack.push(slot as u32);
        }

        Ok(Pool {
            factory,
            arena,
            layout,
            capacity,
            slots,
            origins: Mutex::new(origins),
            stats: Stats::default(),
        })
    }

    #[inline]
    fn availability(&self) -> Bitmap<'_> {
        Bitmap::new(
            &self.arena,
            self.layout.availability_offset,
            self.layout.word_count,
            self.layout.scan_hint_offset,
        )
    }

    #[inline]
    fn staleness(&self) -> Bitmap<'_> {
        // Reuses the availability bitmap's hint word; staleness never calls
        // scan_free so the shared offset is never touched through this view.
        Bitmap::new(
            &self.arena,
            self.layout.staleness_offset,
            self.layout.word_count,
            self.layout.scan_hint_offset,
        )
    }

    #[inline]
    fn stack(&self) -> FreeIndexStack<'_> {
        FreeIndexStack::view(
            &self.arena,
            self.layout.stack_top_offset,
            self.layout.stack_free_top_offset,
            self.layout.stack_nodes_offset,
            self.capacity,
        )
    }

    /// Check out an object. Tries the free-index stack, then a bitmap scan,
    /// then the factory overflow path. Only the factory path can fail.
    pub fn acquire(&self) -> Result<PoolObject<T>, PoolError> {
        self.stats.total_gets.fetch_add(1, Ordering::Relaxed);

        if let Some(slot) = self.stack().pop() {
            let slot = slot as usize;
            if self.availability().try_claim(slot) {
                self.stats.stack_hits.fetch_add(1, Ordering::Relaxed);
                self.staleness().toggle(slot);
                return Ok(self.handle_for(slot));
            }
            // The stack handed us a slot that lost the claim race (another
            // acquirer or a racing release reused it); fall through to the
            // bitmap scan rather than trusting a stale hint.
        }

        if let Some(slot) = self.availability().scan_free(self.capacity) {
            self.stats.bit_trick_hits.fetch_add(1, Ordering::Relaxed);
            self.staleness().toggle(slot);
            return Ok(self.handle_for(slot));
        }

        let object = (self.factory)()?;
        self.stats.total_creates.fetch_add(1, Ordering::Relaxed);
        let ptr = NonNull::new(Box::into_raw(Box::new(object)))
            .expect("Box::into_raw never returns null");
        Ok(PoolObject { ptr })
    }

    #[inline]
    fn handle_for(&self, slot: usize) -> PoolObject<T> {
        PoolObject {
            ptr: self.slots[slot],
        }
    }

    /// Return `obj` to the pool. Returns `true` if this was a slot the pool
    /// recognizes and the release succeeded; `false` for an alien object
    /// (not ours) or a duplicate release (already free), both of which are
    /// absorbed as a counted no-op rather than a panic or an `Err`.
    pub fn release(&self, obj: PoolObject<T>) -> bool {
        self.stats.total_returns.fetch_add(1, Ordering::Relaxed);

        let slot = {
            let origins = self.origins.lock().unwrap();
            origins.get(&obj.identity()).copied()
        };

        let Some(slot) = slot else {
            log::debug!("alien release of foreign object");
            self.stats.total_drops.fetch_add(1, Ordering::Relaxed);
            // SAFETY: an address absent from the origin map was never handed
            // out from `slots`, so it must have come from the factory
            // overflow path in `acquire`, which allocated it with exactly
            // this `Box<T>` layout and has not freed it since.
            unsafe { drop(Box::from_raw(obj.ptr.as_ptr())) };
            return false;
        };

        if !self.availability().release(slot as usize) {
            log::debug!("duplicate release of slot {slot}");
            self.stats.total_drops.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        if !self.stack().push(slot) {
            log::trace!("free-index stack exhausted, falling back to bitmap scan");
        }

        true
    }

    /// Snapshot every counter in spec.md §6, plus the derived free/busy
    /// counts. Each field is read independently; concurrent activity can tear
    /// the result, which is accepted per spec.md §4.G.
    pub fn stats(&self) -> PoolSnapshot {
        let busy_count = self.availability().popcount_busy(self.capacity);

        PoolSnapshot {
            capacity: self.capacity,
            free_count: self.capacity - busy_count,
            busy_count,
            total_gets: self.stats.total_gets.load(Ordering::Relaxed),
            total_returns: self.stats.total_returns.load(Ordering::Relaxed),
            bit_trick_hits: self.stats.bit_trick_hits.load(Ordering::Relaxed),
            stack_hits: self.stats.stack_hits.load(Ordering::Relaxed),
            total_creates: self.stats.total_creates.load(Ordering::Relaxed),
            total_drops: self.stats.total_drops.load(Ordering::Relaxed),
        }
    }
}

impl<T, F> Drop for Pool<T, F> {
    fn drop(&mut self) {
        for ptr in self.slots.drain(..) {
            // SAFETY: the pool is being torn down; the contract (spec.md
            // §5/§6) requires no outstanding checkouts, so every slot
            // pointer is still the one `Box` this pool itself created.
            unsafe { drop(Box::from_raw(ptr.as_ptr())) };
        }
    }
}
