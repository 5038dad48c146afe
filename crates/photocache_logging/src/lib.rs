#![deny(missing_docs)]
//! Shared logging utilities for the photocache workspace.
//!
//! This crate provides the `cache_*` logging macros used across the codebase,
//! a process-wide tick counter that the macros stamp onto every message, and
//! a minimal test initializer for the global logger.

use std::sync::atomic::{AtomicU64, Ordering};

/// Number of the scheduler tick currently (or most recently) executing.
static CURRENT_TICK: AtomicU64 = AtomicU64::new(0);

/// Records the tick number that subsequent log lines belong to.
///
/// Ticks run on tokio worker threads, so the counter is process-wide rather
/// than thread-local.
pub fn set_tick(tick: u64) {
    CURRENT_TICK.store(tick, Ordering::Relaxed);
}

/// Returns the tick number last passed to [`set_tick`], or 0 before the
/// first tick.
pub fn current_tick() -> u64 {
    CURRENT_TICK.load(Ordering::Relaxed)
}

/// Logs a trace-level message tagged with the current tick.
#[macro_export]
macro_rules! cache_trace {
    ($($arg:tt)*) => {{
        log::trace!("[tick {}] {}", $crate::current_tick(), format_args!($($arg)*));
    }};
}

/// Logs a debug-level message tagged with the current tick.
#[macro_export]
macro_rules! cache_debug {
    ($($arg:tt)*) => {{
        log::debug!("[tick {}] {}", $crate::current_tick(), format_args!($($arg)*));
    }};
}

/// Logs an info-level message tagged with the current tick.
#[macro_export]
macro_rules! cache_info {
    ($($arg:tt)*) => {{
        log::info!("[tick {}] {}", $crate::current_tick(), format_args!($($arg)*));
    }};
}

/// Logs a warn-level message tagged with the current tick.
#[macro_export]
macro_rules! cache_warn {
    ($($arg:tt)*) => {{
        log::warn!("[tick {}] {}", $crate::current_tick(), format_args!($($arg)*));
    }};
}

/// Logs an error-level message tagged with the current tick.
#[macro_export]
macro_rules! cache_error {
    ($($arg:tt)*) => {{
        log::error!("[tick {}] {}", $crate::current_tick(), format_args!($($arg)*));
    }};
}

/// Initializes a simple terminal logger for use in tests.
///
/// This safely no-ops if another logger has already been initialized.
pub fn initialize_for_tests() {
    use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode};

    // Use debug level in debug builds, info in release builds.
    let level = if cfg!(debug_assertions) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    // Ignore the error if a logger was already set by another test.
    let _ = CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_counter_round_trips() {
        set_tick(41);
        assert_eq!(current_tick(), 41);
        set_tick(42);
        assert_eq!(current_tick(), 42);
    }

    #[test]
    fn macros_accept_format_arguments() {
        initialize_for_tests();
        cache_info!("entry {} moved to {:?}", "taxon-1", Some(3));
        cache_debug!("plain message");
    }
}
