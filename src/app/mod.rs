//! Measurement engine: profiling, partitioned reads, strategies and the
//! sweep orchestrator. Database and OS access goes through [`ports`].

pub use readbench_domain as domain;

pub mod orchestrator;
pub mod partition;
pub mod ports;
pub mod profiler;
pub mod registry;
pub mod strategies;
pub mod worker;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;
