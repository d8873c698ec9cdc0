mod machine;
mod signal_log;

pub use machine::Machine;
pub use signal_log::{SignalLog, SignalStatus, DOWNTIME_REASONS};
