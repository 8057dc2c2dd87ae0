pub mod aggregate;
pub mod error;
pub mod partition;
pub mod profile;
pub mod result;
pub mod run_config;
pub mod strategy_kind;
mod sweep_id;

pub use aggregate::{AggregatedResult, MetricSummary, aggregate};
pub use error::{ErrorDescriptor, ErrorKind, StrategyError};
pub use partition::{ChunkFailure, Chunking, IdRange, IdWindowing, split_even};
pub use profile::{ProfileSample, ProfileStats, peak_rss};
pub use result::{StrategyResult, throughput};
pub use run_config::{
    ConfigError, FailurePolicy, RunConfig, RunConfigBuilder, StatementTimeout, StrategySelector,
};
pub use strategy_kind::StrategyKind;
pub use sweep_id::SweepId;
