// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Index bookkeeping for streaming through a driver-owned circular buffer.
//!
//! A UART receive path, an ADC sampler, or an audio DMA stream all look the
//! same from here: somebody owns an array of `capacity` elements, one or more
//! contexts write into it, and one or more contexts read out of it. A
//! [`CircularBuffer`] doesn't hold the array -- the driver does, often because
//! a DMA engine needs it at a fixed address -- it only hands out which slots
//! each side may touch.
//!
//! # Producing
//!
//! 1. [`allocate`](CircularBuffer::allocate) up to `n` slots. You get back a
//!    [`Claim`] with the starting counter and how many you actually got.
//! 2. Fill them. [`spans`](CircularBuffer::spans) turns the claim into at most
//!    two contiguous index ranges, because a claim may run off the end of the
//!    array and continue at the start.
//! 3. [`commit`](CircularBuffer::commit) the claim's `start`.
//!
//! # Consuming
//!
//! Same dance on the other side: [`reserve`](CircularBuffer::reserve), copy
//! out, [`release`](CircularBuffer::release).
//!
//! # Partial and exact requests
//!
//! Both `allocate` and `reserve` take an `exact` flag. Without it, a request
//! degrades to "as much as there is" -- the normal choice for byte streams,
//! where a short transfer is fine. With it, you get all `n` or nothing, which
//! is what you want for fixed-size records like audio frames.
//!
//! See the [`ring`][crate::ring] module for how concurrent producers (or
//! consumers) share one boundary, and why commits can come in any order.

use core::ops::Range;

use crate::ring::{Claim, Lane};

/// Lock-free allocation state for a circular buffer of `capacity` elements.
///
/// Counters are free-running; the slot for counter `c` is `c % capacity`. At
/// all times `tail <= tail_reserve <= head <= head_alloc` (modulo wrap) and
/// `head_alloc - tail <= capacity`.
///
/// If the buffer has to run long enough for the counters to wrap past 2^32,
/// use a power-of-two capacity so the slot mapping stays continuous.
#[derive(Debug)]
pub struct CircularBuffer {
    capacity: u32,
    /// head / head_alloc
    producer: Lane,
    /// tail / tail_reserve
    consumer: Lane,
}

impl CircularBuffer {
    /// Creates bookkeeping for an empty buffer of `capacity` elements.
    ///
    /// # Panics
    ///
    /// If `capacity` is zero.
    pub const fn new(capacity: u32) -> Self {
        crate::cheap_assert!(capacity > 0);
        Self {
            capacity,
            producer: Lane::new(),
            consumer: Lane::new(),
        }
    }

    /// Number of elements the buffer holds.
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Claims up to `n` slots for writing.
    ///
    /// With `exact`, this gets exactly `n` slots or nothing. Without it, it
    /// gets as many as are free, up to `n`. Returns `None` when nothing was
    /// allocated.
    pub fn allocate(&self, n: u32, exact: bool) -> Option<Claim> {
        self.producer.claim(n, exact, |head_alloc| {
            let used = head_alloc.wrapping_sub(self.consumer.committed());
            self.capacity.saturating_sub(used)
        })
    }

    /// Publishes the data written into an allocation that started at
    /// `start`.
    ///
    /// If this was the oldest outstanding allocation, `head` moves up to cover
    /// it and every later allocation, and this returns `true`. Otherwise the
    /// data stays invisible to consumers until the oldest allocation commits,
    /// and this returns `false`.
    pub fn commit(&self, start: u32) -> bool {
        self.producer.commit(start)
    }

    /// Claims up to `n` committed elements for reading. `exact` works as in
    /// [`allocate`](Self::allocate). Returns `None` when nothing was reserved.
    pub fn reserve(&self, n: u32, exact: bool) -> Option<Claim> {
        self.consumer.claim(n, exact, |tail_reserve| {
            self.producer.committed().wrapping_sub(tail_reserve)
        })
    }

    /// Returns the slots of a reservation that started at `start` to the
    /// producers. Same head-of-line rule as [`commit`](Self::commit); returns
    /// `true` if `tail` moved.
    pub fn release(&self, start: u32) -> bool {
        self.consumer.commit(start)
    }

    /// Maps a counter to its slot index, and the number of slots from there to
    /// the physical end of the buffer.
    pub fn index_of(&self, counter: u32) -> (usize, usize) {
        let index = counter % self.capacity;
        (index as usize, (self.capacity - index) as usize)
    }

    /// Splits a claim into the index ranges it covers: the part before the
    /// physical end of the buffer, and the part that wrapped to the front
    /// (empty if it didn't wrap).
    pub fn spans(&self, claim: Claim) -> (Range<usize>, Range<usize>) {
        let (first, run) = self.index_of(claim.start);
        let len = claim.len as usize;
        if len <= run {
            (first..first + len, 0..0)
        } else {
            (first..first + run, 0..len - run)
        }
    }

    /// Committed write boundary.
    pub fn head(&self) -> u32 {
        self.producer.committed()
    }

    /// Speculative write boundary, including allocations not yet committed.
    pub fn head_alloc(&self) -> u32 {
        self.producer.claimed()
    }

    /// Committed read boundary.
    pub fn tail(&self) -> u32 {
        self.consumer.committed()
    }

    /// Speculative read boundary, including reservations not yet released.
    pub fn tail_reserve(&self) -> u32 {
        self.consumer.claimed()
    }

    /// Number of committed elements not yet released, including any that are
    /// reserved and being read.
    pub fn len(&self) -> u32 {
        self.head().wrapping_sub(self.tail())
    }

    /// Checks whether there's nothing committed left to reserve.
    pub fn is_empty(&self) -> bool {
        self.head() == self.tail_reserve()
    }

    /// Number of slots that could be allocated right now.
    pub fn free(&self) -> u32 {
        self.capacity
            .saturating_sub(self.head_alloc().wrapping_sub(self.tail()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_invariants(b: &CircularBuffer) {
        let (tail, tail_reserve) = (b.tail(), b.tail_reserve());
        let (head, head_alloc) = (b.head(), b.head_alloc());
        assert!(tail <= head && head <= head_alloc);
        assert!(tail <= tail_reserve && tail_reserve <= head);
        assert!(head.wrapping_sub(tail) <= b.capacity());
    }

    #[test]
    fn two_exact_producers_fill_buffer() {
        let b = CircularBuffer::new(8);
        let first = b.allocate(4, true).unwrap();
        let second = b.allocate(4, true).unwrap();
        assert_eq!(first, Claim { start: 0, len: 4 });
        assert_eq!(second, Claim { start: 4, len: 4 });
        assert_eq!(b.allocate(1, true), None);
        check_invariants(&b);

        // Later allocation commits first; nothing becomes visible.
        assert!(!b.commit(second.start));
        assert_eq!(b.head(), 0);
        assert!(b.commit(first.start));
        assert_eq!(b.head(), 8);
        check_invariants(&b);
    }

    #[test]
    fn in_order_commits_reach_the_same_head() {
        let b = CircularBuffer::new(8);
        let first = b.allocate(4, true).unwrap();
        let second = b.allocate(4, true).unwrap();
        assert!(b.commit(first.start));
        assert_eq!(b.head(), 4);
        assert!(b.commit(second.start));
        assert_eq!(b.head(), 8);
    }

    #[test]
    fn partial_allocation_degrades() {
        let b = CircularBuffer::new(8);
        let a = b.allocate(6, false).unwrap();
        assert_eq!(a.len, 6);
        let c = b.allocate(6, false).unwrap();
        assert_eq!(c, Claim { start: 6, len: 2 });
        assert_eq!(b.allocate(6, false), None);
        assert_eq!(b.free(), 0);
    }

    #[test]
    fn consumer_side_mirrors_producer_side() {
        let b = CircularBuffer::new(8);
        let w = b.allocate(5, true).unwrap();
        assert_eq!(b.reserve(1, false), None, "nothing committed yet");
        b.commit(w.start);

        let r1 = b.reserve(3, true).unwrap();
        let r2 = b.reserve(3, true);
        assert_eq!(r2, None);
        let r2 = b.reserve(3, false).unwrap();
        assert_eq!(r2, Claim { start: 3, len: 2 });
        check_invariants(&b);

        assert!(!b.release(r2.start));
        assert_eq!(b.tail(), 0);
        assert_eq!(b.len(), 5);
        assert!(b.is_empty());
        assert!(b.release(r1.start));
        assert_eq!(b.tail(), 5);
        assert_eq!(b.len(), 0);
        assert_eq!(b.free(), 8);
        check_invariants(&b);
    }

    #[test]
    fn space_is_not_reused_until_released() {
        let b = CircularBuffer::new(4);
        let w = b.allocate(4, true).unwrap();
        b.commit(w.start);
        let r = b.reserve(2, true).unwrap();
        // Reserved but not released: still occupied.
        assert_eq!(b.allocate(1, false), None);
        b.release(r.start);
        assert_eq!(b.allocate(4, false), Some(Claim { start: 4, len: 2 }));
    }

    #[test]
    fn index_of_reports_run_to_end() {
        let b = CircularBuffer::new(8);
        assert_eq!(b.index_of(0), (0, 8));
        assert_eq!(b.index_of(6), (6, 2));
        assert_eq!(b.index_of(13), (5, 3));
    }

    #[test]
    fn spans_split_at_wrap() {
        let b = CircularBuffer::new(8);
        assert_eq!(b.spans(Claim { start: 2, len: 4 }), (2..6, 0..0));
        assert_eq!(b.spans(Claim { start: 6, len: 4 }), (6..8, 0..2));
        assert_eq!(b.spans(Claim { start: 16, len: 8 }), (0..8, 0..0));
    }
}
