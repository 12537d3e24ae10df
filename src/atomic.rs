// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The exclusive load/store retry loop that everything else is built from.
//!
//! Every lock-free structure in this crate updates its shared words the same
//! way: read the current value, compute a new value from it, and try to store
//! the new value only if the word is still what was read. If anything touched
//! the word in between -- including an interrupt handler that preempted us and
//! ran the very same operation -- the store fails and we go around again with
//! the fresh value. The loop can't livelock on a single core: a failed attempt
//! means some other context's attempt _succeeded_.
//!
//! On ARMv7-M and later this is `LDREX`/`STREX`, which is what
//! `compare_exchange` and `fetch_update` compile to. ARMv6-M (Cortex-M0/M0+)
//! has no exclusive-access instructions, so there the compare step is done with
//! interrupts masked for a couple of instructions instead. That hurts interrupt
//! latency a little, but the M0 has no `BASEPRI` and poor latency to begin
//! with, so it's not a big loss.
//!
//! The traits are exposed so that drivers built on this crate can write their
//! own retry loops without caring which kind of core they're on.

use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicUsize, Ordering};

/// Read-modify-write operations that work on every Cortex-M profile.
pub trait AtomicExt {
    /// Primitive type corresponding to this atomic type.
    type Value;

    /// Atomically exchange our current contents for `val`, returning the
    /// original contents.
    fn swap_polyfill(&self, val: Self::Value, ordering: Ordering) -> Self::Value;

    /// If `self`'s value is equal to `current`, atomically replace it with
    /// `new`, otherwise leave it untouched.
    ///
    /// Returns `Ok(current)` on success, `Err(actual_value)` on failure.
    fn compare_exchange_polyfill(
        &self,
        current: Self::Value,
        new: Self::Value,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self::Value, Self::Value>;

    /// The retry loop. Loads the current value using `fetch_order` and hands
    /// it to `f`. If `f` produces `Some(new_value)`, attempts to swap the value
    /// that was read for `new_value`; if `f` produces `None`, stops without
    /// writing.
    ///
    /// If the swap loses a race, `f` is called again with the value that won.
    ///
    /// Returns `Ok(previous)` if a value was stored, `Err(last_seen)` if `f`
    /// gave up.
    fn fetch_update_polyfill(
        &self,
        set_order: Ordering,
        fetch_order: Ordering,
        f: impl FnMut(Self::Value) -> Option<Self::Value>,
    ) -> Result<Self::Value, Self::Value>;
}

macro_rules! impl_atomic_polyfills {
    ($t:ty, $v:ty $(, $param:ident)?) => {
        #[cfg(irqflow_has_native_rmw)]
        impl<$($param)?> AtomicExt for $t {
            type Value = $v;

            #[inline(always)]
            fn swap_polyfill(
                &self,
                val: Self::Value,
                ordering: Ordering,
            ) -> Self::Value {
                self.swap(val, ordering)
            }

            #[inline(always)]
            fn compare_exchange_polyfill(
                &self,
                current: Self::Value,
                new: Self::Value,
                success: Ordering,
                failure: Ordering,
            ) -> Result<Self::Value, Self::Value> {
                self.compare_exchange(current, new, success, failure)
            }

            #[inline]
            fn fetch_update_polyfill(
                &self,
                set_order: Ordering,
                fetch_order: Ordering,
                f: impl FnMut(Self::Value) -> Option<Self::Value>,
            ) -> Result<Self::Value, Self::Value> {
                self.fetch_update(set_order, fetch_order, f)
            }
        }

        #[cfg(not(irqflow_has_native_rmw))]
        impl<$($param)?> AtomicExt for $t {
            type Value = $v;

            #[inline(always)]
            fn swap_polyfill(
                &self,
                val: Self::Value,
                ordering: Ordering,
            ) -> Self::Value {
                let (lo, so) = rmw_ordering(ordering);
                cortex_m::interrupt::free(|_| {
                    let x = self.load(lo);
                    self.store(val, so);
                    x
                })
            }

            fn compare_exchange_polyfill(
                &self,
                current: Self::Value,
                new: Self::Value,
                success: Ordering,
                _failure: Ordering,
            ) -> Result<Self::Value, Self::Value> {
                let (lo, so) = rmw_ordering(success);
                cortex_m::interrupt::free(|_| {
                    let x = self.load(lo);
                    if x == current {
                        self.store(new, so);
                        Ok(x)
                    } else {
                        Err(x)
                    }
                })
            }

            fn fetch_update_polyfill(
                &self,
                set_order: Ordering,
                fetch_order: Ordering,
                mut f: impl FnMut(Self::Value) -> Option<Self::Value>,
            ) -> Result<Self::Value, Self::Value> {
                let mut prev = self.load(fetch_order);
                while let Some(next) = f(prev) {
                    match self.compare_exchange_polyfill(
                        prev,
                        next,
                        set_order,
                        fetch_order,
                    ) {
                        Ok(x) => return Ok(x),
                        Err(change) => prev = change,
                    }
                }
                Err(prev)
            }
        }
    };
}

impl_atomic_polyfills!(AtomicU32, u32);
impl_atomic_polyfills!(AtomicUsize, usize);
impl_atomic_polyfills!(AtomicBool, bool);
impl_atomic_polyfills!(AtomicPtr<T>, *mut T, T);

#[cfg(not(irqflow_has_native_rmw))]
#[inline(always)]
fn rmw_ordering(o: Ordering) -> (Ordering, Ordering) {
    match o {
        Ordering::AcqRel => (Ordering::Acquire, Ordering::Release),
        Ordering::Relaxed => (o, o),
        Ordering::SeqCst => (o, o),
        Ordering::Acquire => (Ordering::Acquire, Ordering::Relaxed),
        Ordering::Release => (Ordering::Relaxed, Ordering::Release),
        _ => panic!(),
    }
}
