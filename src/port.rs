// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cortex-M implementations of the hardware hooks.
//!
//! - [`SoftwareIrq`] pends an NVIC interrupt, for driving an
//!   [`Invoke`][crate::invoke::Invoke] list.
//! - [`SysTickTimer`] switches the SysTick interrupt on and off, for driving an
//!   [`Await`][crate::delay::Await] list. Program the tick rate once with
//!   [`configure_sys_tick`].
//!
//! Binding the handlers is left to the application: call
//! [`Invoke::service`][crate::invoke::Invoke::service] from the pended
//! interrupt's handler and [`Await::tick`][crate::delay::Await::tick] from
//! `SysTick`.

use cortex_m::interrupt::InterruptNumber;
use cortex_m::peripheral::{syst::SystClkSource, NVIC, SYST};

/// SysTick control and status bits.
const SYST_CSR_ENABLE: u32 = 1 << 0;
#[cfg(feature = "delay")]
const SYST_CSR_TICKINT: u32 = 1 << 1;
#[cfg(feature = "delay")]
const SYST_CSR_CLKSOURCE: u32 = 1 << 2;

/// An interrupt that is triggered by software: an otherwise unused vendor
/// interrupt, set to whatever priority the deferred work should run at.
#[derive(Copy, Clone, Debug)]
pub struct SoftwareIrq<I> {
    irq: I,
}

impl<I: InterruptNumber> SoftwareIrq<I> {
    /// Wraps `irq`. Its priority should be set, and it should be unmasked,
    /// before anything is queued.
    pub const fn new(irq: I) -> Self {
        Self { irq }
    }

    /// The wrapped interrupt.
    pub fn irq(&self) -> I {
        self.irq
    }
}

#[cfg(feature = "invoke")]
impl<I: InterruptNumber> crate::invoke::Pend for SoftwareIrq<I> {
    fn pend(&self) {
        NVIC::pend(self.irq);
    }
}

/// Sets up SysTick to interrupt at 1 kHz, assuming a CPU core clock of
/// `clock_hz`, but leaves it stopped. [`SysTickTimer`] starts and stops it.
///
/// # Panics
///
/// If `clock_hz` is below 1 kHz.
pub fn configure_sys_tick(syst: &mut SYST, clock_hz: u32) {
    crate::cheap_assert!(clock_hz >= 1000);
    let cycles_per_millisecond = clock_hz / 1000;
    syst.disable_counter();
    syst.disable_interrupt();
    syst.set_reload(cycles_per_millisecond - 1);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
}

/// The SysTick timer, as a tick source for delayed callbacks.
///
/// This reaches the SysTick registers directly rather than through an owned
/// `SYST`, so that it can live in a `static` next to the list it drives. It
/// only ever touches the enable bits; call [`configure_sys_tick`] first.
///
/// Starting and stopping are single register writes with no critical
/// section, so they're safe from any priority, including interrupts above
/// the [`critical`][crate::critical] ceiling.
#[derive(Copy, Clone, Debug, Default)]
pub struct SysTickTimer;

impl SysTickTimer {
    /// Creates a handle to the SysTick timer.
    pub const fn new() -> Self {
        Self
    }

    /// Checks whether the tick is running.
    pub fn is_running(&self) -> bool {
        // Safety: reading CSR has no effect beyond clearing COUNTFLAG, which
        // nothing here uses.
        let csr = unsafe { (*SYST::PTR).csr.read() };
        csr & SYST_CSR_ENABLE != 0
    }

    #[cfg(feature = "delay")]
    fn update(&self, set: bool) {
        // configure_sys_tick fixed the clock source to the core clock, so the
        // whole register is known and can be written outright.
        let csr = if set {
            SYST_CSR_CLKSOURCE | SYST_CSR_TICKINT | SYST_CSR_ENABLE
        } else {
            SYST_CSR_CLKSOURCE
        };
        // Safety: nothing else writes CSR after configuration, and a single
        // store can't interleave with another one.
        unsafe { (*SYST::PTR).csr.write(csr) }
    }
}

#[cfg(feature = "delay")]
impl crate::delay::Timer for SysTickTimer {
    fn start(&self) {
        self.update(true);
    }

    fn stop(&self) {
        self.update(false);
    }
}
