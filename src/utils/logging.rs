//! `log` wrappers that respect a per-module `ENABLE_LOGS` switch.
//!
//! A module opts in by declaring the switch next to its imports:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use floorwatch_lib::log_warn;
//!
//! log_warn!("tick for {machine_id} skipped: {err}");
//! ```
//! Setting it to `false` silences that module without touching `RUST_LOG`.

/// `log::info!` when the calling module's `ENABLE_LOGS` is set.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// `log::warn!` when the calling module's `ENABLE_LOGS` is set.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// `log::error!` when the calling module's `ENABLE_LOGS` is set.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn disabled_modules_skip_formatting() {
        const ENABLE_LOGS: bool = false;
        let mut formatted = false;
        log_info!("{}", {
            formatted = true;
            "never"
        });
        assert!(!formatted);
    }
}
