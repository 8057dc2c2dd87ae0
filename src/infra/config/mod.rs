pub mod settings;

pub use settings::{BenchmarkSettings, DatabaseSettings, SettingsError, summary};
