mod machines;
mod signal_logs;

pub use signal_logs::{InsertOutcome, SpanUpdate};
