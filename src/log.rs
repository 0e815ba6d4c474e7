//! Diagnostics switch of the bridge.
//!
//! Session and transport code log through the `bridge_*!` macros, which are no-ops while the
//! bridge is silenced: the binary does it for good with `--quiet`, tests hold a [`Silence`]
//! guard around scenarios that log errors on purpose.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Number of active silencers, diagnostics are written only when it is zero.
static SILENCERS: AtomicUsize = AtomicUsize::new(0);

#[inline(always)]
pub fn is_enabled() -> bool {
    SILENCERS.load(Ordering::SeqCst) == 0
}

/// Silence diagnostics for the rest of the process lifetime.
pub fn quiet() {
    std::mem::forget(silence());
}

/// Silence diagnostics until the returned guard is dropped.
pub fn silence() -> Silence {
    SILENCERS.fetch_add(1, Ordering::SeqCst);
    Silence(())
}

#[must_use = "diagnostics are back on as soon as the guard is dropped"]
pub struct Silence(());

impl Drop for Silence {
    fn drop(&mut self) {
        SILENCERS.fetch_sub(1, Ordering::SeqCst);
    }
}

#[macro_export]
macro_rules! bridge_log {
    ($level:ident, target: $target:expr, $($arg:tt)+) => {
        if $crate::log::is_enabled() {
            log::log!(target: $target, log::Level::$level, $($arg)+)
        }
    };
    ($level:ident, $($arg:tt)+) => {
        if $crate::log::is_enabled() {
            log::log!(log::Level::$level, $($arg)+)
        }
    };
}

#[macro_export]
macro_rules! bridge_info {
    ($($arg:tt)+) => { $crate::bridge_log!(Info, $($arg)+) };
}

#[macro_export]
macro_rules! bridge_warn {
    ($($arg:tt)+) => { $crate::bridge_log!(Warn, $($arg)+) };
}

#[macro_export]
macro_rules! bridge_error {
    ($($arg:tt)+) => { $crate::bridge_log!(Error, $($arg)+) };
}

#[macro_export]
macro_rules! bridge_debug {
    ($($arg:tt)+) => { $crate::bridge_log!(Debug, $($arg)+) };
}
