//! The free-index stack (spec 4.D): a Treiber stack of recently-released
//! slot indices, consulted before the bitmap scan so the common
//! just-returned-slot case costs one CAS instead of a bit-scan.
//!
//! Grounded on japaric's `lifo` crate, which documents this exact
//! Treiber-stack/ABA tradeoff for a fixed-capacity memory pool. There the
//! tagged quantity is a pointer; here the stacked values are small integers
//! (slot indices), so both the stack top and every node fit in one
//! `AtomicU64` arena lane, packed as `(tag: u32) << 32 | (payload: u32)`.
//! Nodes are drawn from a second, identically-tagged free-node list rather
//! than allocated, so `push` never allocates and can only fail by finding
//! the free-node list empty — at which point it no-ops and the coordinator
//! falls back to the bitmap.

use crate::arena::Arena;
use crossbeam_utils::Backoff;
use std::sync::atomic::{AtomicU64, Ordering};

const NIL: u32 = u32::MAX;

#[inline]
fn pack(tag: u32, payload: u32) -> u64 {
    ((tag as u64) << 32) | payload as u64
}

#[inline]
fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

/// A Treiber stack of slot indices backed by a fixed-size node arena.
///
/// Two tagged top pointers share the same node array: `top` is the stack of
/// live slot indices, `free_top` is the stack of node indices not currently
/// in use. Both are ABA-protected by a tag that increments on every
/// successful CAS.
pub(crate) struct FreeIndexStack<'a> {
    arena: &'a Arena,
    top_offset: usize,
    free_top_offset: usize,
    nodes_offset: usize,
    capacity: usize,
}

impl<'a> FreeIndexStack<'a> {
    /// Build a view over a stack already initialized by [`Self::init`]. This
    /// performs no arena writes — it's the same cheap, stateless-wrapper
    /// pattern `Bitmap::new` uses, so a `Pool` can rebuild this view on every
    /// `acquire`/`release` without disturbing what's actually stacked.
    pub(crate) fn view(
        arena: &'a Arena,
        top_offset: usize,
        free_top_offset: usize,
        nodes_offset: usize,
        capacity: usize,
    ) -> Self {
        FreeIndexStack {
            arena,
            top_offset,
            free_top_offset,
            nodes_offset,
            capacity,
        }
    }

    /// Initialize a stack over `capacity` preallocated nodes living at
    /// `nodes_offset`, with its two top pointers at `top_offset` and
    /// `free_top_offset`. Must be called exactly once, at pool construction
    /// — it wires every node into the free-node list and resets both tops,
    /// which would corrupt a live stack if called again.
    pub(crate) fn init(
        arena: &'a Arena,
        top_offset: usize,
        free_top_offset: usize,
        nodes_offset: usize,
        capacity: usize,
    ) -> Self {
        let stack = Self::view(arena, top_offset, free_top_offset, nodes_offset, capacity);

        stack.top().store(pack(0, NIL), Ordering::Relaxed);

        if capacity > 0 {
            for i in 0..capacity as u32 - 1 {
                stack.node(i).store(pack(0, i + 1), Ordering::Relaxed);
            }
            stack
                .node(capacity as u32 - 1)
                .store(pack(0, NIL), Ordering::Relaxed);
            stack.free_top().store(pack(0, 0), Ordering::Relaxed);
        } else {
            stack.free_top().store(pack(0, NIL), Ordering::Relaxed);
        }

        stack
    }

    #[inline]
    fn top(&self) -> &AtomicU64 {
        self.arena.word(self.top_offset)
    }

    #[inline]
    fn free_top(&self) -> &AtomicU64 {
        self.arena.word(self.free_top_offset)
    }

    #[inline]
    fn node(&self, index: u32) -> &AtomicU64 {
        self.arena.word(self.nodes_offset + index as usize * 8)
    }

    fn pop_free_node(&self) -> Option<u32> {
        let backoff = Backoff::new();
        loop {
            let current = self.free_top().load(Ordering::Acquire);
            let (tag, head) = unpack(current);
            if head == NIL {
                return None;
            }
            let next = unpack(self.node(head).load(Ordering::Acquire)).1;
            match self.free_top().compare_exchange_weak(
                current,
                pack(tag.wrapping_add(1), next),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(head),
                Err(_) => backoff.spin(),
            }
        }
    }

    fn push_free_node(&self, index: u32) {
        let backoff = Backoff::new();
        loop {
            let current = self.free_top().load(Ordering::Acquire);
            let (tag, head) = unpack(current);
            self.node(index).store(pack(0, head), Ordering::Release);
            match self.free_top().compare_exchange_weak(
                current,
                pack(tag.wrapping_add(1), index),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(_) => backoff.spin(),
            }
        }
    }

    /// Push `slot` onto the stack. Silently does nothing (the coordinator
    /// falls back to the bitmap scan) if the free-node list is exhausted —
    /// this is the one allowed lossy path in the whole design.
    pub(crate) fn push(&self, slot: u32) -> bool {
        let Some(node_index) = self.pop_free_node() else {
            return false;
        };

        let backoff = Backoff::new();
        loop {
            let current = self.top().load(Ordering::Acquire);
            let (tag, head) = unpack(current);
            self.node(node_index)
                .store(pack(slot, head), Ordering::Release);
            match self.top().compare_exchange_weak(
                current,
                pack(tag.wrapping_add(1), node_index),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(_) => backoff.spin(),
            }
        }
    }

    /// Pop the most recently pushed slot index, if any.
    pub(crate) fn pop(&self) -> Option<u32> {
        let backoff = Backoff::new();
        loop {
            let current = self.top().load(Ordering::Acquire);
            let (tag, head) = unpack(current);
            if head == NIL {
                return None;
            }

            let node_word = self.node(head).load(Ordering::Acquire);
            let (slot, next) = unpack(node_word);

            match self.top().compare_exchange_weak(
                current,
                pack(tag.wrapping_add(1), next),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.push_free_node(head);
                    return Some(slot);
                }
                Err(_) => backoff.spin(),
            }
        }
    }

    /// Bytes a caller must reserve for `capacity` nodes, used by the pool's
    /// layout arithmetic when sizing the arena.
    pub(crate) fn bytes_for(capacity: usize) -> usize {
        capacity * 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_stack(arena: &Arena, capacity: usize) -> FreeIndexStack<'_> {
        FreeIndexStack::init(arena, 0, 8, 16, capacity)
    }

    #[test]
    fn push_then_pop_is_lifo() {
        let arena = Arena::new(16 + FreeIndexStack::bytes_for(4)).unwrap();
        let stack = test_stack(&arena, 4);

        assert!(stack.push(1));
        assert!(stack.push(2));
        assert!(stack.push(3));

        assert_eq!(stack.pop(), Some(3));
        assert_eq!(stack.pop(), Some(2));
        assert_eq!(stack.pop(), Some(1));
        assert_eq!(stack.pop(), None);
    }

    #[test]
    fn exhausting_node_arena_fails_push_without_panicking() {
        let arena = Arena::new(16 + FreeIndexStack::bytes_for(2)).unwrap();
        let stack = test_stack(&arena, 2);

        assert!(stack.push(10));
        assert!(stack.push(20));
        assert!(!stack.push(30));

        assert_eq!(stack.pop(), Some(20));
        assert_eq!(stack.pop(), Some(10));
        assert_eq!(stack.pop(), None);
    }

    #[test]
    fn nodes_are_recycled_after_pop() {
        let arena = Arena::new(16 + FreeIndexStack::bytes_for(1)).unwrap();
        let stack = test_stack(&arena, 1);

        for round in 0..100u32 {
            assert!(stack.push(round));
            assert_eq!(stack.pop(), Some(round));
        }
    }

    #[test]
    fn zero_capacity_stack_always_falls_back() {
        let arena = Arena::new(16).unwrap();
        let stack = test_stack(&arena, 0);
        assert!(!stack.push(0));
        assert_eq!(stack.pop(), None);
    }
}
