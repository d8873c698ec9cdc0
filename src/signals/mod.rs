pub mod duration;
mod error;
mod store;
mod subscription;

pub use error::StoreError;
pub use store::{LogOrder, ResetOutcome, SignalStore};
pub use subscription::LogSubscription;
