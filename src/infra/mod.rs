//! Adapters behind the engine's ports: PostgreSQL drivers, worker
//! processes, resource probes, the JSON result sink, settings and logging.

pub use readbench_app as app;
pub use readbench_domain as domain;

pub mod adapters;
pub mod alloc;
pub mod classify;
pub mod config;
pub mod logging;
pub mod probe;
