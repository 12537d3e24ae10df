// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interrupt-safe concurrency and dataflow primitives for bare-metal Cortex-M.
//!
//! This is the layer that peripheral drivers in a single-core, interrupt-driven
//! firmware are built on. There's no scheduler and no heap: every "thread" is
//! an interrupt handler (or the foreground loop), preemption follows the static
//! NVIC priority assignment, and every queue has a fixed size chosen at build
//! time.
//!
//! # What's in the box
//!
//! - [`atomic`]: the exclusive load/store retry loop everything else uses.
//! - [`critical`]: nesting critical sections that raise `BASEPRI` rather than
//!   disabling interrupts outright.
//! - [`ring`]: a fixed-capacity ring addressed by free-running counters, with
//!   separate claim and commit steps so any number of contexts can produce and
//!   consume concurrently.
//! - [`buffer`]: the same index discipline without storage attached, for
//!   streaming DMA/UART/ADC data through a driver-owned array.
//! - [`semaphore`]: a binary lock that can be taken by spinning, by a single
//!   attempt, or by queueing a callback that runs once the lock is handed over.
//! - [`event`]: multicast notification from one source to a fixed table of
//!   subscriber callbacks.
//! - [`invoke`]: move a callback from the current interrupt priority to a
//!   software-triggered one.
//! - [`delay`]: run a callback after at least some number of milliseconds,
//!   driven by a 1 ms timer that only runs while there's something to wait
//!   for.
//!
//! # Design principles
//!
//! 1. No locks in the data path. The rings, the semaphore wait list, and the
//!    dispatch lists are updated only with compare-exchange retry loops. The
//!    one critical section in the crate guards subscriber registration, which
//!    isn't a hot path.
//!
//! 2. The most urgent interrupt class is never held off by this crate.
//!
//! 3. No allocation. Everything can live in a `static`, and the `'a` lifetime
//!    parameter on each container ensures the callbacks it holds outlive it.
//!
//! 4. Misuse that can only be a bug -- releasing a semaphore nobody holds,
//!    overflowing a list that was sized to never fill -- panics. On a device
//!    with no supervisor the panic handler's reset is the only sensible
//!    recovery. Conditions a caller is expected to handle, like a busy lock or
//!    a full stream buffer, come back as values.
//!
//! # The concurrency model
//!
//! Everything here assumes a single core. That matters for one subtle point:
//! if context A is preempted by context B, B runs _to completion_ before A
//! resumes. The ring commit protocol leans on that (see [`ring::Lane`]), and
//! it's why none of these types claim to be safe across cores.
//!
//! # Cancellation
//!
//! There isn't any. Once a callback has been queued -- on a semaphore, or with
//! `invoke` or `delay` -- it will run.

#![no_std]

#![warn(
    elided_lifetimes_in_paths,
    explicit_outlives_requirements,
    missing_debug_implementations,
    missing_docs,
    semicolon_in_expressions_from_macros,
    single_use_lifetimes,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unsafe_op_in_unsafe_fn,
    unused_qualifications,
)]

#[cfg(test)]
extern crate std;

/// Internal assert macro that doesn't stringify its expression or generate any
/// fancy messages. This means failures must be diagnosed by file:line only, so,
/// don't use this more than once on the same line. In exchange, this makes
/// asserts significantly smaller in terms of text size.
macro_rules! cheap_assert {
    ($x:expr) => {
        if !$x { panic!(); };
    }
}
pub(crate) use cheap_assert;

mod log;

pub mod atomic;
pub mod critical;
pub mod ring;
pub mod buffer;

#[cfg(feature = "semaphore")]
pub mod semaphore;
#[cfg(feature = "event")]
pub mod event;
#[cfg(feature = "invoke")]
pub mod invoke;
#[cfg(feature = "delay")]
pub mod delay;

#[cfg(target_arch = "arm")]
pub mod port;

use core::marker::PhantomData;

/// A reference to a callback that can be run from any execution context.
///
/// The closure carries whatever state it needs by capture; `A` is the
/// per-invocation argument, if any.
pub type Callback<'a, A = ()> = &'a (dyn Fn(A) + Sync);

/// Returned by the `try_` flavors of the dispatch operations when the list is
/// full. Carries back the entry that didn't fit.
pub struct Full<T>(pub T);

impl<T> Full<T> {
    /// Gets the rejected entry back.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> core::fmt::Debug for Full<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Full(..)")
    }
}

/// Zero-sized marker type that can be included to ensure that a data structure
/// is not automatically made `Send` (i.e. safe for transfer across threads).
///
/// This also blocks `Sync`.
#[derive(Default, Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
struct NotSendMarker(PhantomData<*const ()>);
