//! Conditional, prefixed logging macros.
//!
//! Each module that logs through these macros defines two constants:
//! ```text
//! const ENABLE_LOGS: bool = true;
//! const LOG_PREFIX: &str = "preprocessor";
//! ```
//! and imports the macros from the crate root:
//! ```text
//! use crate::{log_debug, log_info, log_warn, log_error};
//! ```
//! Every line is emitted through the `log` facade as `[<prefix>] <message>`,
//! so `RUST_LOG` filtering still applies on top of `ENABLE_LOGS`.

/// Debug-level line, only when the calling module has `ENABLE_LOGS` set.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            ::log::debug!("[{}] {}", LOG_PREFIX, format_args!($($arg)*));
        }
    };
}

/// Info-level line, only when the calling module has `ENABLE_LOGS` set.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            ::log::info!("[{}] {}", LOG_PREFIX, format_args!($($arg)*));
        }
    };
}

/// Warn-level line. Used for known-loss events (dropped packets, retries).
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            ::log::warn!("[{}] {}", LOG_PREFIX, format_args!($($arg)*));
        }
    };
}

/// Error-level line.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            ::log::error!("[{}] {}", LOG_PREFIX, format_args!($($arg)*));
        }
    };
}
