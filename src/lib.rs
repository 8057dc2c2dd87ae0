pub use readbench_app as app;
pub use readbench_domain as domain;
pub use readbench_infra as infra;

pub mod error;
