mod backfill;
mod controller;
mod engine;
pub mod probability;
pub mod random;
mod sampler;

pub use backfill::{backfill, BackfillReport};
pub use controller::{DrawFactory, SimulationController};
pub use engine::{Initialization, MachineSimulation, SimulationState, TickOutcome, RATE_LIMIT_SECS};
pub use sampler::{CoarseSampler, SampleReport, SkipReason};
