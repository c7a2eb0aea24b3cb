//! Infrastructure layer: stores, vendor and analysis clients, the signal
//! pipeline, the poll sweeper and configuration.

pub mod analysis;
pub mod config;
pub mod pipeline;
pub mod projections;
pub mod store;
pub mod sweeper;
pub mod tasks;
pub mod vendor;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::{Config, ConfigError};
pub use pipeline::{ApplyOutcome, Pipeline};
pub use sweeper::{PollSweeper, SweepConfig, SweepScheduler, SweepSchedulerHandle, SweepSummary};
