// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A binary lock with a FIFO of callbacks waiting for it.
//!
//! See [`Semaphore`] for the details.

use core::sync::atomic::{AtomicBool, Ordering};

use scopeguard::defer;

use crate::atomic::AtomicExt;
use crate::log::{debug, fatal};
use crate::ring::Ring;
use crate::Callback;

/// A binary semaphore that can be acquired three ways.
///
/// - [`lock`](Self::lock) spins until the semaphore is free and takes it. Only
///   use it where busy-waiting is acceptable: the foreground loop, or a
///   handler that is sure the current owner runs at a higher priority.
/// - [`try_lock`](Self::try_lock) takes it if it's free right now and
///   otherwise reports that it's busy. Nothing gets queued.
/// - [`lock_then`](Self::lock_then) queues a callback. The callback runs once
///   the semaphore is handed to it -- immediately, inside `lock_then`, if the
///   semaphore is free and nobody is ahead in line; otherwise from inside
///   whichever [`release`](Self::release) call passes ownership along.
///
/// Whoever holds the semaphore, by any route, gives it up with `release`.
///
/// # Handoff
///
/// When waiters are queued, `release` doesn't mark the semaphore free. It
/// pops the oldest waiter and calls it, and that callback is now the owner.
/// There's no window where an interloper could `try_lock` its way in ahead of
/// the queue, so queued callbacks are served strictly in the order they were
/// queued.
///
/// A callback chain usually looks like this: the callback starts an
/// asynchronous peripheral operation and returns, and the completion
/// interrupt calls `release` when the operation finishes.
///
/// # Capacity
///
/// At most `N` callbacks can be waiting. Queueing one more is treated as a
/// sizing bug and panics.
#[derive(Debug)]
pub struct Semaphore<'a, const N: usize> {
    released: AtomicBool,
    waiters: Ring<Callback<'a>, N>,
}

impl<'a, const N: usize> Semaphore<'a, N> {
    /// Creates a semaphore that starts free if `released` is true, and held
    /// otherwise (in which case the creator owns it and must eventually
    /// release it).
    pub const fn new(released: bool) -> Self {
        Self {
            released: AtomicBool::new(released),
            waiters: Ring::new(),
        }
    }

    /// Checks whether the semaphore is free right now.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Number of callbacks waiting for the semaphore.
    pub fn pending(&self) -> usize {
        self.waiters.len()
    }

    /// Takes the semaphore if it's free. Returns `false` if somebody else has
    /// it; that's an ordinary outcome, not an error.
    pub fn try_lock(&self) -> bool {
        self.released
            .compare_exchange_polyfill(true, false, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Spins until the semaphore can be taken, and takes it.
    ///
    /// Queued callbacks are handed the semaphore directly on release, so a
    /// spinning caller waits until the callback queue has drained.
    pub fn lock(&self) {
        while !self.try_lock() {
            core::hint::spin_loop();
        }
    }

    /// Queues `cb` to run once it holds the semaphore.
    ///
    /// If the semaphore is free and nothing is queued ahead of `cb`, `cb` runs
    /// before this returns.
    ///
    /// # Panics
    ///
    /// If `N` callbacks are already waiting.
    pub fn lock_then(&self, cb: Callback<'a>) {
        if self.waiters.push(cb).is_err() {
            fatal!("semaphore wait list full");
        }
        self.dispatch();
    }

    /// Gives up the semaphore: hands it to the oldest queued callback and runs
    /// that callback, or marks the semaphore free if nobody is waiting.
    ///
    /// # Panics
    ///
    /// If the semaphore was already free.
    pub fn release(&self) {
        if let Some(next) = self.waiters.pop() {
            debug!("semaphore handoff");
            next(());
            return;
        }

        if self.released.swap_polyfill(true, Ordering::Release) {
            fatal!("semaphore released twice");
        }
        // A callback queued after our pop, but before we set `released`,
        // found the semaphore held and went to sleep. Wake it.
        self.dispatch();
    }

    /// Takes the semaphore (spinning if needed), runs `op`, and releases it,
    /// even if `op` panics.
    pub fn perform<R>(&self, op: impl FnOnce() -> R) -> R {
        self.lock();
        defer! { self.release(); }
        op()
    }

    /// Runs `op` with the semaphore held if it can be taken right now.
    /// Returns `None` without running `op` if it's busy.
    pub fn try_perform<R>(&self, op: impl FnOnce() -> R) -> Option<R> {
        if self.try_lock() {
            defer! { self.release(); }
            Some(op())
        } else {
            None
        }
    }

    /// Starts the queue head if the semaphore is free.
    ///
    /// Every path that can leave a callback queued behind a free semaphore
    /// ends by calling this.
    fn dispatch(&self) {
        loop {
            if self.waiters.is_empty() || !self.try_lock() {
                return;
            }
            match self.waiters.pop() {
                Some(next) => {
                    next(());
                    return;
                }
                None => {
                    // Someone else got the waiter between our check and our
                    // pop. Put the semaphore back and look again, since
                    // another callback may have arrived while we held it.
                    self.released.store(true, Ordering::Release);
                }
            }
        }
    }
}
