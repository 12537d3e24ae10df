// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-capacity rings addressed by free-running counters.
//!
//! Every queue in this crate -- the stream buffers, the semaphore's wait list,
//! the invoke and await lists -- has the same shape: a fixed number of slots
//! and a handful of `u32` counters that only ever go up. The slot a counter
//! refers to is `counter % capacity`; the number of occupied slots is just
//! `head - tail`. Nobody has to special-case "full" versus "empty", and no slot
//! is sacrificed as a sentinel.
//!
//! The counters wrap after 2^32 operations. Distances between them are taken
//! with wrapping arithmetic, so the bookkeeping survives that; the slot
//! mapping `counter % capacity` only stays continuous across the wrap when the
//! capacity is a power of two.
//!
//! # Claim, then commit
//!
//! Each side of a ring -- producer and consumer -- is a [`Lane`] holding two
//! counters:
//!
//! - `claimed`, advanced by [`Lane::claim`], hands out disjoint ranges of
//!   slots. Any number of contexts can claim at once; the retry loop gives
//!   each a range nobody else has.
//! - `committed`, advanced by [`Lane::commit`], is the boundary the _other_
//!   side is allowed to see.
//!
//! Between the two, a producer fills its slots (or a consumer empties them)
//! without holding anything. When it's done it commits, and here's the trick:
//! only the context whose range starts exactly at `committed` -- the one at the
//! head of the line -- actually moves the boundary, and it moves it all the way
//! up to `claimed`, publishing everyone else's finished ranges along with its
//! own. A context further back in line just leaves its range for the head of
//! the line to publish.
//!
//! This is only correct because we're on one core. If a context claimed a
//! range _after_ the head-of-line context claimed its own, and before that
//! context commits, then it must have preempted the head-of-line context --
//! and a preempting handler runs to completion before the preempted code
//! resumes. So by the time the head of the line commits, everything claimed
//! after it is done.
//!
//! [`Ring`] puts storage behind a pair of lanes. The index-only flavor, for
//! streaming into storage that a driver (or a DMA engine) owns, is
//! [`CircularBuffer`][crate::buffer::CircularBuffer].

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::atomic::AtomicExt;

/// A run of counter values handed out by [`Lane::claim`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Claim {
    /// First counter value in the run. Pass this back to `commit`.
    pub start: u32,
    /// Number of slots in the run; never zero.
    pub len: u32,
}

impl Claim {
    /// Counter value one past the end of the run.
    pub fn end(&self) -> u32 {
        self.start.wrapping_add(self.len)
    }
}

/// One side of a ring: a committed boundary and a speculative one in front of
/// it. See the module docs for the protocol.
#[derive(Debug, Default)]
pub struct Lane {
    committed: AtomicU32,
    claimed: AtomicU32,
}

impl Lane {
    /// Creates a lane with both counters at zero.
    pub const fn new() -> Self {
        Self {
            committed: AtomicU32::new(0),
            claimed: AtomicU32::new(0),
        }
    }

    /// The boundary the other side of the ring may rely on.
    pub fn committed(&self) -> u32 {
        self.committed.load(Ordering::Acquire)
    }

    /// The boundary of everything handed out so far, committed or not.
    pub fn claimed(&self) -> u32 {
        self.claimed.load(Ordering::Acquire)
    }

    /// Claims up to `n` slots past the current `claimed` boundary.
    ///
    /// `available` is given the `claimed` value being attempted and returns
    /// how many slots the opposite side leaves room for beyond it. It may be
    /// called more than once if another context claims concurrently.
    ///
    /// If `exact` is set, this claims exactly `n` slots or nothing; otherwise
    /// it claims as many as are available, up to `n`. Returns `None` if nothing
    /// was claimed.
    pub fn claim(
        &self,
        n: u32,
        exact: bool,
        mut available: impl FnMut(u32) -> u32,
    ) -> Option<Claim> {
        let mut c = self.claimed.load(Ordering::Acquire);
        loop {
            let room = available(c);
            let len = if exact {
                if room >= n { n } else { 0 }
            } else {
                room.min(n)
            };

            if len == 0 {
                // Don't report "no room" based on a `c` that went stale while
                // `available` was looking at the other side.
                let now = self.claimed.load(Ordering::Acquire);
                if now == c {
                    return None;
                }
                c = now;
                continue;
            }

            match self.claimed.compare_exchange_polyfill(
                c,
                c.wrapping_add(len),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(Claim { start: c, len }),
                Err(actual) => c = actual,
            }
        }
    }

    /// Publishes a claimed range that started at `start`.
    ///
    /// If `start` is the committed boundary, moves the boundary up to the
    /// current `claimed` value, covering any later ranges whose owners
    /// committed before us. Otherwise does nothing: whoever is at the head of
    /// the line will publish our range when they commit.
    ///
    /// Returns `true` if this call moved the boundary.
    pub fn commit(&self, start: u32) -> bool {
        let mut from = start;
        let mut advanced = false;
        loop {
            let to = self.claimed.load(Ordering::Acquire);
            if to == from {
                return advanced;
            }
            // If a handler preempts us between the load and the exchange and
            // claims more, the exchange still succeeds with the stale `to`. The
            // handler's range is finished by the time we get here, so go around
            // again and publish it too.
            let r = self.committed.compare_exchange_polyfill(
                from,
                to,
                Ordering::Release,
                Ordering::Relaxed,
            );
            if r.is_err() {
                return advanced;
            }
            advanced = true;
            from = to;
        }
    }
}

/// A fixed-capacity multi-producer, multi-consumer ring of `Copy` values.
///
/// This is the storage-owning ring behind the semaphore wait list and the
/// invoke/await lists. It's `Sync`, so it can be shared by reference between
/// interrupt handlers and the foreground, and it can be created in a `static`.
pub struct Ring<T, const N: usize> {
    slots: [UnsafeCell<MaybeUninit<T>>; N],
    /// head / alloc
    producer: Lane,
    /// tail / reserve
    consumer: Lane,
}

// Safety: slots are only written between a successful producer claim and its
// commit, and only read between a successful consumer claim and its commit.
// Claims hand out disjoint slots, so there's never a shared-mutable access to a
// slot; the lanes' Release/Acquire pairs order the slot accesses.
unsafe impl<T: Send, const N: usize> Sync for Ring<T, N> {}

impl<T: Copy, const N: usize> Ring<T, N> {
    const EMPTY: UnsafeCell<MaybeUninit<T>> = UnsafeCell::new(MaybeUninit::uninit());

    /// Creates an empty ring.
    ///
    /// # Panics
    ///
    /// If `N` is zero or doesn't fit in a `u32`.
    pub const fn new() -> Self {
        crate::cheap_assert!(N > 0 && N <= u32::MAX as usize);
        Self {
            slots: [Self::EMPTY; N],
            producer: Lane::new(),
            consumer: Lane::new(),
        }
    }

    /// Number of slots.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of values pushed and not yet popped, as seen by a consumer.
    pub fn len(&self) -> usize {
        self.producer
            .committed()
            .wrapping_sub(self.consumer.committed()) as usize
    }

    /// Checks whether there's nothing to pop.
    pub fn is_empty(&self) -> bool {
        self.producer.committed() == self.consumer.claimed()
    }

    /// Appends `value`.
    ///
    /// Returns `Ok(true)` if this push moved the committed head (that is,
    /// `value` and anything queued behind it are now visible to consumers),
    /// `Ok(false)` if it's waiting on an earlier, preempted push to commit,
    /// and `Err(value)` if the ring is full.
    pub fn push(&self, value: T) -> Result<bool, T> {
        let claim = match self.producer.claim(1, true, |alloc| {
            (N as u32).saturating_sub(alloc.wrapping_sub(self.consumer.committed()))
        }) {
            Some(c) => c,
            None => return Err(value),
        };

        // Safety: this slot is ours alone until we commit it; see the Sync
        // impl above.
        unsafe {
            *self.slot(claim.start) = MaybeUninit::new(value);
        }

        Ok(self.producer.commit(claim.start))
    }

    /// Removes and returns the oldest committed value, or `None` if there
    /// isn't one.
    pub fn pop(&self) -> Option<T> {
        let claim = self.consumer.claim(1, true, |reserve| {
            self.producer.committed().wrapping_sub(reserve)
        })?;

        // Safety: the producer committed this slot, and our claim keeps any
        // other consumer off of it until we commit.
        let value = unsafe { (*self.slot(claim.start)).assume_init() };

        self.consumer.commit(claim.start);
        Some(value)
    }

    /// Pops and hands `f` every value that was committed when this was called,
    /// oldest first. Values pushed while draining (including by `f`) are left
    /// for next time. Returns the number of values handled.
    pub fn drain(&self, mut f: impl FnMut(T)) -> usize {
        let n = self.len();
        let mut done = 0;
        while done < n {
            match self.pop() {
                Some(v) => f(v),
                None => break,
            }
            done += 1;
        }
        done
    }

    fn slot(&self, counter: u32) -> *mut MaybeUninit<T> {
        self.slots[(counter % N as u32) as usize].get()
    }
}

impl<T: Copy, const N: usize> Default for Ring<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> core::fmt::Debug for Ring<T, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Ring")
            .field("capacity", &N)
            .field("producer", &self.producer)
            .field("consumer", &self.consumer)
            .finish()
    }
}
