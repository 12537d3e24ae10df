// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Multicast notification: one source, a fixed table of subscribers.
//!
//! An [`Event`] is how a driver says "data ready" or "bus reset" to whoever
//! cares, without knowing who that is. Subscribers register a [`Subscriber`]
//! once, and every [`Event::notify`] calls each of them in turn.
//!
//! An `Event` is not a queue. `notify` calls every subscriber right there, on
//! the notifier's stack at the notifier's priority, and doesn't return until
//! they've all returned. So subscribers have to be quick; the usual move is to
//! set a flag or hand the real work to an [`Invoke`] list.
//!
//! ```
//! use irqflow::event::{Event, Subscriber};
//! use core::sync::atomic::{AtomicU32, Ordering};
//!
//! static LAST_SAMPLE: AtomicU32 = AtomicU32::new(0);
//! static DATA_READY: Event<'static, u32, 4> = Event::new();
//! static LOGGER: Subscriber<'static, u32> =
//!     Subscriber::new(&|n: u32| LAST_SAMPLE.store(n, Ordering::Relaxed));
//!
//! DATA_READY.register(&LOGGER).unwrap();
//! DATA_READY.notify(42);
//! assert_eq!(LAST_SAMPLE.load(Ordering::Relaxed), 42);
//! ```
//!
//! [`Invoke`]: crate::invoke::Invoke

use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::critical;
use crate::log::trace;
use crate::Callback;

/// A registrable callback.
///
/// The subscription is identified by this object's address, so a given
/// `Subscriber` can be registered with an `Event` at most once, while two
/// distinct `Subscriber`s wrapping the same function are two subscriptions.
pub struct Subscriber<'a, A> {
    callback: Callback<'a, A>,
}

impl<'a, A> Subscriber<'a, A> {
    /// Wraps `callback` for registration.
    pub const fn new(callback: Callback<'a, A>) -> Self {
        Self { callback }
    }

    /// Calls the wrapped callback directly.
    pub fn call(&self, arg: A) {
        (self.callback)(arg)
    }
}

impl<A> core::fmt::Debug for Subscriber<'_, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscriber").finish_non_exhaustive()
    }
}

/// Reasons [`Event::register`] can refuse a subscriber.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegisterError {
    /// This exact subscriber is already in the table.
    AlreadyRegistered,
    /// Every slot is taken.
    Full,
}

/// A fixed table of up to `N` subscribers that all get called, with an
/// argument of type `A`, when the event is notified.
///
/// Subscribers are called in slot order, which is _not_ necessarily the
/// order they were registered in: a subscriber registered after another
/// unregistered may land in the freed slot. Don't depend on it.
pub struct Event<'a, A, const N: usize> {
    slots: [AtomicPtr<Subscriber<'a, A>>; N],
    _subscribers: PhantomData<&'a Subscriber<'a, A>>,
}

impl<'a, A, const N: usize> Event<'a, A, N> {
    const EMPTY: AtomicPtr<Subscriber<'a, A>> = AtomicPtr::new(ptr::null_mut());

    /// Creates an event with no subscribers.
    pub const fn new() -> Self {
        Self {
            slots: [Self::EMPTY; N],
            _subscribers: PhantomData,
        }
    }

    /// Adds `sub` to the table.
    ///
    /// Fails if `sub` is already registered, or if there's no free slot.
    pub fn register(
        &self,
        sub: &'a Subscriber<'a, A>,
    ) -> Result<(), RegisterError> {
        let p = as_slot_ptr(sub);
        critical::with(|_| {
            if self.position(p).is_some() {
                return Err(RegisterError::AlreadyRegistered);
            }
            let free = self.position(ptr::null_mut()).ok_or(RegisterError::Full)?;
            self.slots[free].store(p, Ordering::Release);
            Ok(())
        })
    }

    /// Removes `sub` from the table. Returns `false` if it wasn't registered.
    ///
    /// A `notify` already in progress on a context this one preempted may
    /// still call `sub` one last time.
    pub fn unregister(&self, sub: &Subscriber<'a, A>) -> bool {
        let p = as_slot_ptr(sub);
        critical::with(|_| match self.position(p) {
            Some(i) => {
                self.slots[i].store(ptr::null_mut(), Ordering::Release);
                true
            }
            None => false,
        })
    }

    /// Checks whether `sub` is currently registered.
    pub fn is_registered(&self, sub: &Subscriber<'a, A>) -> bool {
        self.position(as_slot_ptr(sub)).is_some()
    }

    /// Number of registered subscribers.
    pub fn subscribers(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| !s.load(Ordering::Relaxed).is_null())
            .count()
    }

    /// Calls every registered subscriber with `arg`, in slot order, on the
    /// current context.
    pub fn notify(&self, arg: A)
    where
        A: Copy,
    {
        trace!("event notify");
        for slot in &self.slots {
            let p = slot.load(Ordering::Acquire);
            // Safety: the only non-null pointers ever stored come from
            // `&'a Subscriber` in `register`, and `'a` outlives `self`.
            if let Some(sub) = unsafe { p.as_ref() } {
                sub.call(arg);
            }
        }
    }

    fn position(&self, p: *mut Subscriber<'a, A>) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.load(Ordering::Relaxed) == p)
    }
}

impl<A, const N: usize> Default for Event<'_, A, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A, const N: usize> core::fmt::Debug for Event<'_, A, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Event")
            .field("capacity", &N)
            .field("subscribers", &self.subscribers())
            .finish()
    }
}

fn as_slot_ptr<'a, A>(sub: &Subscriber<'a, A>) -> *mut Subscriber<'a, A> {
    let p: *const Subscriber<'a, A> = sub;
    p.cast_mut()
}
