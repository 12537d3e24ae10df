// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Internal logging shims.
//!
//! With the `defmt` feature these forward to `defmt`'s macros. Without it they
//! expand to nothing, so the lock-free paths pay nothing for a log line they
//! aren't going to emit.

#[cfg(feature = "defmt")]
macro_rules! error {
    ($($arg:tt)*) => { defmt::error!($($arg)*) };
}

#[cfg(not(feature = "defmt"))]
macro_rules! error {
    ($($arg:tt)*) => {{}};
}

#[cfg(feature = "defmt")]
macro_rules! debug {
    ($($arg:tt)*) => { defmt::debug!($($arg)*) };
}

#[cfg(not(feature = "defmt"))]
macro_rules! debug {
    ($($arg:tt)*) => {{}};
}

#[cfg(feature = "defmt")]
macro_rules! trace {
    ($($arg:tt)*) => { defmt::trace!($($arg)*) };
}

#[cfg(not(feature = "defmt"))]
macro_rules! trace {
    ($($arg:tt)*) => {{}};
}

/// Logs at error level and then panics. The panic handler is expected to reset
/// the system; there is no recovering from the conditions this reports.
macro_rules! fatal {
    ($($arg:tt)*) => {{
        $crate::log::error!($($arg)*);
        panic!()
    }};
}

#[allow(unused_imports)]
pub(crate) use {debug, error, fatal, trace};
