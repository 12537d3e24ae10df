// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Moving work from one interrupt priority to another.
//!
//! A high-priority handler (a DMA completion, say) often has a little work
//! that must happen _now_ and a lot of work that mustn't hold off other
//! interrupts. [`Invoke::call_elsewhere`] queues the second part and pends a
//! software-triggered interrupt set to a lower priority. When that interrupt
//! gets to run, its handler calls [`Invoke::service`], which runs everything
//! queued.
//!
//! Which interrupt gets pended is up to the [`Pend`] implementation; on
//! Cortex-M see [`SoftwareIrq`]. Wiring the interrupt's handler to `service`
//! is the application's job:
//!
//! ```ignore
//! static DEFERRED: Invoke<'static, u32, SoftwareIrq<Irq>, 8> =
//!     Invoke::new(SoftwareIrq::new(Irq::SWI0));
//!
//! #[interrupt]
//! fn SWI0() {
//!     DEFERRED.service();
//! }
//! ```
//!
//! [`SoftwareIrq`]: crate::port::SoftwareIrq

use crate::log::{fatal, trace};
use crate::ring::Ring;
use crate::{Callback, Full};

/// Something that can make a dispatch handler run soon.
pub trait Pend {
    /// Requests that the handler run. Pending an already-pending handler is
    /// fine; it runs once.
    fn pend(&self);
}

impl<P: Pend + ?Sized> Pend for &P {
    fn pend(&self) {
        P::pend(self)
    }
}

#[derive(Copy, Clone)]
struct Invokee<'a, A> {
    callback: Callback<'a, A>,
    arg: A,
}

/// A list of up to `N` callbacks waiting to run in the dispatch handler that
/// `P` pends.
///
/// Callbacks run in the order they were queued.
pub struct Invoke<'a, A, P, const N: usize> {
    pending: Ring<Invokee<'a, A>, N>,
    pend: P,
}

impl<'a, A: Copy, P: Pend, const N: usize> Invoke<'a, A, P, N> {
    /// Creates an empty list that uses `pend` to trigger its handler.
    pub const fn new(pend: P) -> Self {
        Self {
            pending: Ring::new(),
            pend,
        }
    }

    /// Queues `cb(arg)` to run from the dispatch handler.
    ///
    /// # Panics
    ///
    /// If `N` callbacks are already waiting.
    pub fn call_elsewhere(&self, cb: Callback<'a, A>, arg: A) {
        if self.try_call_elsewhere(cb, arg).is_err() {
            fatal!("invoke list full");
        }
    }

    /// Queues `cb(arg)` to run from the dispatch handler, or hands both back
    /// if the list is full.
    pub fn try_call_elsewhere(
        &self,
        cb: Callback<'a, A>,
        arg: A,
    ) -> Result<(), Full<(Callback<'a, A>, A)>> {
        let entry = Invokee { callback: cb, arg };
        match self.pending.push(entry) {
            Ok(true) => {
                trace!("invoke pend");
                self.pend.pend();
            }
            // We preempted an earlier caller between its push and its commit.
            // Its commit published our entry, and it pends when it does.
            Ok(false) => (),
            Err(e) => return Err(Full((e.callback, e.arg))),
        }
        Ok(())
    }

    /// Runs every callback that was queued when this was called, oldest
    /// first, and returns how many ran. Call this from the dispatch handler.
    ///
    /// Callbacks queued while this runs (including by the callbacks
    /// themselves) pend the handler again and run on its next pass.
    pub fn service(&self) -> usize {
        self.pending.drain(|e| (e.callback)(e.arg))
    }

    /// Number of callbacks waiting.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// The pend source this list triggers.
    pub fn pend_source(&self) -> &P {
        &self.pend
    }
}

impl<A, P, const N: usize> core::fmt::Debug for Invoke<'_, A, P, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Invoke")
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::vec::Vec;

    #[derive(Default)]
    struct CountingPend(AtomicU32);

    impl Pend for CountingPend {
        fn pend(&self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    impl CountingPend {
        fn count(&self) -> u32 {
            self.0.load(Ordering::Relaxed)
        }
    }

    #[test]
    fn queued_work_runs_in_service_not_before() {
        let seen = Mutex::new(Vec::new());
        let record = |n: u32| seen.lock().unwrap().push(n);
        let irq = CountingPend::default();
        let invoke: Invoke<'_, u32, _, 4> = Invoke::new(&irq);

        invoke.call_elsewhere(&record, 1);
        invoke.call_elsewhere(&record, 2);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(irq.count(), 2);
        assert_eq!(invoke.pending(), 2);

        assert_eq!(invoke.service(), 2);
        assert_eq!(*seen.lock().unwrap(), [1, 2]);
        assert_eq!(invoke.pending(), 0);
        assert_eq!(invoke.service(), 0);
    }

    #[test]
    fn work_queued_during_service_waits_for_next_pass() {
        let runs = AtomicU32::new(0);
        let noop = |_: u32| ();
        let irq = CountingPend::default();
        let invoke: Invoke<'_, u32, _, 4> = Invoke::new(&irq);
        let requeue = |n: u32| {
            runs.fetch_add(1, Ordering::Relaxed);
            if n > 0 {
                invoke.call_elsewhere(&noop, n - 1);
            }
        };

        invoke.call_elsewhere(&requeue, 1);
        assert_eq!(invoke.service(), 1);
        assert_eq!(runs.load(Ordering::Relaxed), 1);
        // The requeue pended the handler again.
        assert_eq!(irq.count(), 2);
        assert_eq!(invoke.pending(), 1);
        assert_eq!(invoke.service(), 1);
        assert_eq!(invoke.pending(), 0);
    }

    #[test]
    fn full_list_hands_entry_back() {
        let noop = |_: u32| ();
        let invoke: Invoke<'_, u32, _, 1> = Invoke::new(CountingPend::default());

        assert!(invoke.try_call_elsewhere(&noop, 1).is_ok());
        let rejected = invoke.try_call_elsewhere(&noop, 2).unwrap_err();
        assert_eq!(rejected.into_inner().1, 2);
        assert_eq!(invoke.pend_source().count(), 1);
    }

    #[test]
    #[should_panic]
    fn full_list_is_fatal() {
        let noop = |_: u32| ();
        let invoke: Invoke<'_, u32, _, 1> = Invoke::new(CountingPend::default());
        invoke.call_elsewhere(&noop, 1);
        invoke.call_elsewhere(&noop, 2);
    }
}
