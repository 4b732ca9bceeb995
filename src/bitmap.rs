//! The availability bitmap (spec 4.B) and the staleness bitmap (spec 4.C)
//! share one word layout and one implementation — the only difference is
//! which operations the coordinator calls on which instance. Availability
//! uses `try_claim`/`release`/`scan_free`/`popcount_busy`; staleness uses
//! only `toggle`.
//!
//! Bit `k` of word `w` names slot `64*w + k`. Claim sets the bit, release
//! clears it; both use compare-and-swap with a [`crossbeam_utils::Backoff`]
//! between retries, the same shape as the teacher's `Bucket2::access`/
//! `leave`, generalized from one `AtomicU16` to however many `AtomicU64`
//! words the arena holds.

use crate::arena::Arena;
use crossbeam_utils::Backoff;
use std::sync::atomic::Ordering;

/// A thin, cheaply-rebuilt view over a region of `Arena` words. All state —
/// including the rotating scan hint — lives in the arena itself, not in this
/// struct, so a `Bitmap` can be constructed fresh on every call without
/// losing anything: it is a set of offsets, not a stateful object.
pub(crate) struct Bitmap<'a> {
    arena: &'a Arena,
    base_offset: usize,
    word_count: usize,
    hint_offset: usize,
}

impl<'a> Bitmap<'a> {
    /// `hint_offset` names an 8-byte arena lane used as the rotating
    /// scan-start counter; pass any valid in-bounds offset for bitmaps that
    /// never call `scan_free` (e.g. the staleness bitmap only ever calls
    /// `toggle`, which never touches it).
    pub(crate) fn new(
        arena: &'a Arena,
        base_offset: usize,
        word_count: usize,
        hint_offset: usize,
    ) -> Self {
        Bitmap {
            arena,
            base_offset,
            word_count,
            hint_offset,
        }
    }

    #[inline]
    fn word(&self, index: usize) -> &std::sync::atomic::AtomicU64 {
        self.arena.word(self.base_offset + index * 8)
    }

    /// Mask of the bits in word `index` that correspond to real (non-padding)
    /// slots, given `logical_bits` total logical slots.
    #[inline]
    fn live_mask(&self, index: usize, logical_bits: usize) -> u64 {
        if index + 1 < self.word_count {
            return u64::MAX;
        }
        let bits_in_last = logical_bits - index * 64;
        if bits_in_last >= 64 {
            u64::MAX
        } else {
            (1u64 << bits_in_last) - 1
        }
    }

    /// Unconditionally set `bit`. Used once at construction to permanently
    /// mark padding slots (`[N, M)`) busy; never called after that.
    pub(crate) fn mark_busy(&self, bit: usize) {
        let mask = 1u64 << (bit % 64);
        self.word(bit / 64).fetch_or(mask, Ordering::Relaxed);
    }

    /// Attempt to set `bit`. Returns `true` if this call transitioned the bit
    /// from free to busy, `false` if it was already busy.
    pub(crate) fn try_claim(&self, bit: usize) -> bool {
        let word = self.word(bit / 64);
        let mask = 1u64 << (bit % 64);
        let backoff = Backoff::new();

        loop {
            let current = word.load(Ordering::Acquire);
            if current & mask != 0 {
                return false;
            }
            match word.compare_exchange_weak(
                current,
                current | mask,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(_) => backoff.spin(),
            }
        }
    }

    /// Clear `bit`. Returns `true` if this call transitioned the bit from
    /// busy to free, `false` if it was already free (a duplicate release).
    pub(crate) fn release(&self, bit: usize) -> bool {
        let word = self.word(bit / 64);
        let mask = 1u64 << (bit % 64);
        let backoff = Backoff::new();

        loop {
            let current = word.load(Ordering::Acquire);
            if current & mask == 0 {
                return false;
            }
            match word.compare_exchange_weak(
                current,
                current & !mask,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(_) => backoff.spin(),
            }
        }
    }

    /// Scan for a free bit among the first `logical_bits` slots, starting at
    /// a rotating hint word so repeated scans fan out across the bitmap
    /// instead of hammering word 0. Claims the bit it finds before returning
    /// it, so callers never need a separate `try_claim` round-trip. Returns
    /// `None` once every word has been visited with nothing free.
    pub(crate) fn scan_free(&self, logical_bits: usize) -> Option<usize> {
        if self.word_count == 0 {
            return None;
        }

        let hint_word = self.arena.word(self.hint_offset);
        let start = hint_word.fetch_add(1, Ordering::Relaxed) as usize % self.word_count;
        let backoff = Backoff::new();

        for step in 0..self.word_count {
            let w = (start + step) % self.word_count;
            let word = self.word(w);
            let live = self.live_mask(w, logical_bits);

            loop {
                let current = word.load(Ordering::Acquire);
                let free = !current & live;
                if free == 0 {
                    break;
                }

                let bit_in_word = free.trailing_zeros();
                let mask = 1u64 << bit_in_word;
                match word.compare_exchange_weak(
                    current,
                    current | mask,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return Some(w * 64 + bit_in_word as usize),
                    Err(_) => backoff.spin(),
                }
            }
        }

        None
    }

    /// Count set bits among the first `logical_bits` slots.
    pub(crate) fn popcount_busy(&self, logical_bits: usize) -> usize {
        let mut total = 0u32;
        for w in 0..self.word_count {
            let current = self.word(w).load(Ordering::Relaxed);
            total += (current & self.live_mask(w, logical_bits)).count_ones();
        }
        total as usize
    }

    /// Flip `bit`. Diagnostic only — callers must not infer correctness from
    /// this bitmap's contents.
    pub(crate) fn toggle(&self, bit: usize) {
        let mask = 1u64 << (bit % 64);
        self.word(bit / 64).fetch_xor(mask, Ordering::Relaxed);
    }
}
