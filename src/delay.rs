// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Running a callback after a delay.
//!
//! [`Await::call_later`] queues a callback with a delay in milliseconds. A
//! 1 kHz timer interrupt calls [`Await::tick`], which counts every queued
//! entry down and fires the ones that are due. The timer only runs while
//! something is queued: `call_later` starts it, and the tick that empties the
//! list stops it, so an idle system doesn't take a thousand pointless
//! interrupts a second.
//!
//! Each tick counts every entry down by one and fires the ones that reach
//! zero, so `call_later(n, ..)` fires on the `n`th tick after it was queued.
//! The first tick can come anywhere from zero to one millisecond after
//! queueing, so the real delay is between `n - 1` and `n` ms. A delay of 0 is
//! treated like 1: `call_later(0, ..)` never runs the callback on the spot; it
//! runs on the next tick.
//!
//! While entries are waiting, each tick also kicks a [`Watchdog`]. A long
//! settle delay then doesn't need its own watchdog bookkeeping, and a wedged
//! timer still gets caught.

use crate::log::{debug, fatal};
use crate::ring::Ring;
use crate::{Callback, Full};

/// A periodic 1 ms tick source that can be switched off.
pub trait Timer {
    /// Starts the tick if it isn't running. Must be idempotent.
    fn start(&self);
    /// Stops the tick.
    fn stop(&self);
}

impl<T: Timer + ?Sized> Timer for &T {
    fn start(&self) {
        T::start(self)
    }

    fn stop(&self) {
        T::stop(self)
    }
}

/// Something to kick while delayed callbacks are outstanding.
pub trait Watchdog {
    /// Tells the watchdog things are still moving.
    fn kick(&self);
}

/// No watchdog.
impl Watchdog for () {
    fn kick(&self) {}
}

impl<F: Fn()> Watchdog for F {
    fn kick(&self) {
        self()
    }
}

#[derive(Copy, Clone)]
struct Awaiter<'a, A> {
    remaining: u32,
    callback: Callback<'a, A>,
    arg: A,
}

/// A list of up to `N` delayed callbacks driven by the tick from `T`.
pub struct Await<'a, A, T, W, const N: usize> {
    pending: Ring<Awaiter<'a, A>, N>,
    timer: T,
    watchdog: W,
}

impl<'a, A: Copy, T: Timer, W: Watchdog, const N: usize> Await<'a, A, T, W, N> {
    /// Creates an empty list. `timer` should be stopped.
    pub const fn new(timer: T, watchdog: W) -> Self {
        Self {
            pending: Ring::new(),
            timer,
            watchdog,
        }
    }

    /// Queues `cb(arg)` to run from the timer tick at least `ms` milliseconds
    /// from now.
    ///
    /// # Panics
    ///
    /// If `N` callbacks are already waiting.
    pub fn call_later(&self, ms: u32, cb: Callback<'a, A>, arg: A) {
        if self.try_call_later(ms, cb, arg).is_err() {
            fatal!("await list full");
        }
    }

    /// Like [`call_later`](Self::call_later), but hands the delay, callback,
    /// and argument back if the list is full.
    pub fn try_call_later(
        &self,
        ms: u32,
        cb: Callback<'a, A>,
        arg: A,
    ) -> Result<(), Full<(u32, Callback<'a, A>, A)>> {
        let entry = Awaiter {
            remaining: ms,
            callback: cb,
            arg,
        };
        self.pending
            .push(entry)
            .map_err(|e| Full((e.remaining, e.callback, e.arg)))?;
        self.timer.start();
        Ok(())
    }

    /// Advances every queued entry by one millisecond and runs the ones that
    /// are due. Call this from the timer interrupt.
    ///
    /// Entries queued while this runs, including by the callbacks it fires,
    /// are first counted on the next tick.
    pub fn tick(&self) {
        self.pending.drain(|mut a| {
            if a.remaining <= 1 {
                (a.callback)(a.arg);
            } else {
                a.remaining -= 1;
                // We just popped an entry, so there's room unless a
                // preempting call_later took it.
                if self.pending.push(a).is_err() {
                    fatal!("await list full");
                }
            }
        });

        if self.pending.is_empty() {
            self.timer.stop();
            debug!("await timer stopped");
            // A call_later that preempted us between the check and the stop
            // started a timer we then stopped.
            if !self.pending.is_empty() {
                self.timer.start();
            }
        } else {
            self.watchdog.kick();
        }
    }

    /// Number of callbacks waiting.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// The tick source.
    pub fn timer(&self) -> &T {
        &self.timer
    }
}

impl<A, T, W, const N: usize> core::fmt::Debug for Await<'_, A, T, W, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Await")
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::vec::Vec;

    #[derive(Default)]
    struct MockTimer {
        running: AtomicBool,
        starts: AtomicU32,
    }

    impl Timer for MockTimer {
        fn start(&self) {
            self.running.store(true, Ordering::Relaxed);
            self.starts.fetch_add(1, Ordering::Relaxed);
        }

        fn stop(&self) {
            self.running.store(false, Ordering::Relaxed);
        }
    }

    impl MockTimer {
        fn running(&self) -> bool {
            self.running.load(Ordering::Relaxed)
        }
    }

    #[test]
    fn zero_delay_fires_on_next_tick() {
        let fired = AtomicBool::new(false);
        let cb = |_: ()| fired.store(true, Ordering::Relaxed);
        let list: Await<'_, (), _, (), 4> = Await::new(MockTimer::default(), ());

        assert!(!list.timer().running());
        list.call_later(0, &cb, ());
        assert!(!fired.load(Ordering::Relaxed));
        assert!(list.timer().running());

        list.tick();
        assert!(fired.load(Ordering::Relaxed));
        assert!(!list.timer().running());
        assert_eq!(list.pending(), 0);
    }

    #[test]
    fn one_ms_fires_on_first_tick() {
        let fired = AtomicBool::new(false);
        let cb = |_: ()| fired.store(true, Ordering::Relaxed);
        let list: Await<'_, (), _, (), 4> = Await::new(MockTimer::default(), ());

        list.call_later(1, &cb, ());
        assert!(!fired.load(Ordering::Relaxed));
        list.tick();
        assert!(fired.load(Ordering::Relaxed));
        assert!(!list.timer().running());
    }

    #[test]
    fn delay_of_n_fires_on_tick_n() {
        let fired_at = AtomicU32::new(0);
        let tick = AtomicU32::new(0);
        let cb = |_: ()| fired_at.store(tick.load(Ordering::Relaxed), Ordering::Relaxed);
        let list: Await<'_, (), _, (), 4> = Await::new(MockTimer::default(), ());

        list.call_later(3, &cb, ());
        for t in 1..=3 {
            tick.store(t, Ordering::Relaxed);
            assert!(list.timer().running());
            list.tick();
        }
        assert_eq!(fired_at.load(Ordering::Relaxed), 3);
        assert!(!list.timer().running());
        assert_eq!(list.pending(), 0);
    }

    #[test]
    fn entries_fire_by_deadline() {
        let order = Mutex::new(Vec::new());
        let record = |n: u32| order.lock().unwrap().push(n);
        let list: Await<'_, u32, _, (), 4> = Await::new(MockTimer::default(), ());

        list.call_later(3, &record, 30);
        list.call_later(0, &record, 0);
        list.call_later(2, &record, 20);
        list.call_later(1, &record, 10);
        list.tick();
        assert_eq!(*order.lock().unwrap(), [0, 10]);
        list.tick();
        list.tick();
        assert_eq!(*order.lock().unwrap(), [0, 10, 20, 30]);
        assert!(!list.timer().running());
    }

    #[test]
    fn timer_runs_exactly_while_entries_wait() {
        let noop = |_: ()| ();
        let list: Await<'_, (), _, (), 4> = Await::new(MockTimer::default(), ());

        list.call_later(2, &noop, ());
        list.call_later(2, &noop, ());
        assert!(list.timer().running());
        list.tick();
        assert!(list.timer().running());
        assert_eq!(list.pending(), 2);
        list.tick();
        assert!(!list.timer().running());

        // Re-arms.
        list.call_later(0, &noop, ());
        assert!(list.timer().running());
        list.tick();
        assert!(!list.timer().running());
    }

    #[test]
    fn watchdog_is_kicked_while_entries_remain() {
        let kicks = AtomicU32::new(0);
        let kick = || {
            kicks.fetch_add(1, Ordering::Relaxed);
        };
        let noop = |_: ()| ();
        let list: Await<'_, (), _, _, 4> = Await::new(MockTimer::default(), kick);

        list.call_later(3, &noop, ());
        list.tick();
        list.tick();
        list.tick();
        // Kicked after the first two ticks; the third emptied the list.
        assert_eq!(kicks.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn callback_can_queue_itself_again() {
        let runs = AtomicU32::new(0);
        let list: Await<'_, (), _, (), 2> = Await::new(MockTimer::default(), ());
        let slot: Mutex<Option<Callback<'_>>> = Mutex::new(None);
        let again = |_: ()| {
            if runs.fetch_add(1, Ordering::Relaxed) < 2 {
                if let Some(me) = *slot.lock().unwrap() {
                    list.call_later(0, me, ());
                }
            }
        };
        *slot.lock().unwrap() = Some(&again);

        list.call_later(0, &again, ());
        list.tick();
        assert_eq!(runs.load(Ordering::Relaxed), 1);
        assert!(list.timer().running(), "re-queued entry keeps it running");
        list.tick();
        list.tick();
        assert_eq!(runs.load(Ordering::Relaxed), 3);
        assert!(!list.timer().running());
    }

    /// Stands in for a `call_later` from a higher priority landing between
    /// the emptiness check in `tick` and the timer actually stopping.
    #[derive(Default)]
    struct PreemptedTimer<'a> {
        running: AtomicBool,
        on_stop: Mutex<Option<&'a (dyn Fn() + Sync)>>,
    }

    impl Timer for PreemptedTimer<'_> {
        fn start(&self) {
            self.running.store(true, Ordering::Relaxed);
        }

        fn stop(&self) {
            let preempt = self.on_stop.lock().unwrap().take();
            if let Some(preempt) = preempt {
                preempt();
            }
            // Lands after the preempting start(), undoing it.
            self.running.store(false, Ordering::Relaxed);
        }
    }

    #[test]
    fn call_later_racing_the_stop_rearms_timer() {
        let fired = AtomicU32::new(0);
        let cb = |_: ()| {
            fired.fetch_add(1, Ordering::Relaxed);
        };
        let noop = |_: ()| ();
        let timer = PreemptedTimer::default();
        let list: Await<'_, (), _, (), 4> = Await::new(&timer, ());
        let preempt = || list.call_later(0, &cb, ());
        *timer.on_stop.lock().unwrap() = Some(&preempt);

        list.call_later(0, &noop, ());
        list.tick();
        // The tick emptied the list and stopped the timer, but the entry
        // queued during the stop must keep it running.
        assert!(timer.running.load(Ordering::Relaxed));
        assert_eq!(list.pending(), 1);
        assert_eq!(fired.load(Ordering::Relaxed), 0);

        list.tick();
        assert_eq!(fired.load(Ordering::Relaxed), 1);
        assert!(!timer.running.load(Ordering::Relaxed));
        assert_eq!(list.pending(), 0);
    }

    #[test]
    fn full_list_hands_entry_back() {
        let noop = |_: u32| ();
        let list: Await<'_, u32, _, (), 1> = Await::new(MockTimer::default(), ());

        list.call_later(5, &noop, 1);
        let Full((ms, _, arg)) = list.try_call_later(7, &noop, 2).unwrap_err();
        assert_eq!((ms, arg), (7, 2));
        assert_eq!(list.pending(), 1);
    }
}
