// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Short critical sections that raise the preemption threshold instead of
//! switching interrupts off.
//!
//! Entering a [`CriticalSection`] writes `BASEPRI` so that only interrupts
//! with a priority strictly more important than the _ceiling_ can run. The
//! most urgent interrupt class (audio DMA, say) stays live the whole time, so
//! nothing here can add jitter to it. Sections nest; the threshold drops back
//! to "allow everything" only when the outermost section ends.
//!
//! None of the lock-free structures in this crate use this. It exists for the
//! things that genuinely have no other protection: the [`Event`] subscriber
//! table, and multi-register peripheral setup sequences in drivers.
//!
//! Code running _above_ the ceiling must not enter a critical section -- it
//! can't be held off by one, so the exclusion would be a lie.
//!
//! # Other targets
//!
//! ARMv6-M has no `BASEPRI`. There, sections fall back to masking with
//! `PRIMASK`, the same tradeoff [`atomic`][crate::atomic] makes on that core.
//!
//! Hosted builds (mostly the test suite) route through the `critical-section`
//! crate, so some crate in the final binary has to provide an implementation;
//! `critical-section`'s own `std` feature is fine.
//!
//! [`Event`]: crate::event::Event

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::NotSendMarker;

/// Ceiling used if the application never calls [`set_ceiling`].
///
/// With the usual four implemented priority bits this masks every priority
/// except 0.
pub const DEFAULT_CEILING: u8 = 0x10;

static CEILING: AtomicU8 = AtomicU8::new(DEFAULT_CEILING);

/// Number of sections currently entered. Only modified from inside a section.
static NESTING: AtomicU32 = AtomicU32::new(0);

/// Sets the priority that critical sections raise `BASEPRI` to. Interrupts at
/// this priority and numerically above it are held off; those numerically
/// below it keep running.
///
/// Call this during init, before anything can be inside a section. Passing 0
/// would disable the masking entirely and is not useful.
pub fn set_ceiling(priority: u8) {
    CEILING.store(priority, Ordering::Relaxed);
}

/// Returns the current ceiling priority.
pub fn ceiling() -> u8 {
    CEILING.load(Ordering::Relaxed)
}

/// Returns how deeply nested the current section is, or 0 outside of one.
///
/// This is only meaningful when called from inside a section, or from code that
/// no section can be interrupted by.
pub fn nesting() -> u32 {
    NESTING.load(Ordering::Relaxed)
}

/// Proof that the preemption threshold is raised. Dropping it ends the section.
///
/// Not `Send`: a section has to end in the same execution context it started
/// in.
#[must_use = "the critical section ends as soon as this is dropped"]
pub struct CriticalSection {
    restore: arch::Restore,
    _marker: NotSendMarker,
}

impl CriticalSection {
    /// Raises the preemption threshold to the ceiling and returns a guard that
    /// lowers it again when dropped (if this was the outermost section).
    #[inline]
    pub fn enter() -> Self {
        let restore = arch::raise(ceiling());
        // Nobody who could also touch NESTING can run now.
        NESTING.store(NESTING.load(Ordering::Relaxed) + 1, Ordering::Relaxed);
        Self {
            restore,
            _marker: NotSendMarker::default(),
        }
    }
}

impl Drop for CriticalSection {
    #[inline]
    fn drop(&mut self) {
        let depth = NESTING.load(Ordering::Relaxed) - 1;
        NESTING.store(depth, Ordering::Relaxed);
        arch::lower(self.restore, depth == 0);
    }
}

impl core::fmt::Debug for CriticalSection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CriticalSection")
            .field("nesting", &nesting())
            .finish()
    }
}

/// Runs `body` inside a critical section.
#[inline]
pub fn with<R>(body: impl FnOnce(&CriticalSection) -> R) -> R {
    let cs = CriticalSection::enter();
    body(&cs)
}

cfg_if::cfg_if! {
    if #[cfg(irqflow_has_basepri)] {
        mod arch {
            pub(super) type Restore = ();

            #[inline(always)]
            pub(super) fn raise(ceiling: u8) -> Restore {
                // basepri_max only ever raises the threshold, so nesting
                // inside a section entered at a higher ceiling is harmless.
                cortex_m::register::basepri_max::write(ceiling);
            }

            #[inline(always)]
            pub(super) fn lower(_: Restore, outermost: bool) {
                if outermost {
                    // Safety: we're ending the outermost section, so nothing
                    // is relying on the raised threshold anymore.
                    unsafe {
                        cortex_m::register::basepri::write(0);
                    }
                    // Make sure newly-unmasked handlers fire.
                    cortex_m::asm::isb();
                }
            }
        }
    } else if #[cfg(target_arch = "arm")] {
        mod arch {
            /// Whether interrupts were enabled on entry.
            pub(super) type Restore = bool;

            #[inline(always)]
            pub(super) fn raise(_ceiling: u8) -> Restore {
                let was_active = cortex_m::register::primask::read().is_active();
                cortex_m::interrupt::disable();
                was_active
            }

            #[inline(always)]
            pub(super) fn lower(was_active: Restore, _outermost: bool) {
                if was_active {
                    // Safety: interrupts were on when this section started,
                    // so turning them back on restores the previous state.
                    unsafe {
                        cortex_m::interrupt::enable();
                    }
                    cortex_m::asm::isb();
                }
            }
        }
    } else {
        mod arch {
            pub(super) type Restore = critical_section::RestoreState;

            #[inline(always)]
            pub(super) fn raise(_ceiling: u8) -> Restore {
                // Safety: the matching release happens in `lower`, called
                // from the guard's Drop, in LIFO order with other sections.
                unsafe { critical_section::acquire() }
            }

            #[inline(always)]
            pub(super) fn lower(restore: Restore, _outermost: bool) {
                // Safety: `restore` came from the matching acquire.
                unsafe { critical_section::release(restore) }
            }
        }
    }
}
