//! Subscriber set-up for the binary. Logs always go to stderr: the worker
//! subcommand's stdout carries its reply.

use clap::{Args, ValueEnum};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
    /// One JSON object per event
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to parse log filter: {0}")]
    Parse(#[from] ParseError),
    #[error("failed to install subscriber: {0}")]
    Install(String),
}

#[derive(Debug, Clone, Args)]
#[group(id = "logging")]
pub struct LoggingOptions {
    /// Filter directives, e.g. `info` or `debug,tokio_postgres=warn`.
    /// `RUST_LOG` takes precedence when set.
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    #[arg(long, env = "LOG_FORMAT", default_value = "full", value_enum, global = true)]
    pub log_format: LogFormat,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Full,
        }
    }
}

impl LoggingOptions {
    pub fn directives(&self, rust_log: Option<&str>) -> String {
        match rust_log.map(str::trim) {
            Some(directives) if !directives.is_empty() => directives.to_string(),
            _ => self.log_level.trim().to_lowercase(),
        }
    }

    pub fn filter(&self, rust_log: Option<&str>) -> Result<EnvFilter, LoggingError> {
        Ok(EnvFilter::try_new(self.directives(rust_log))?)
    }

    pub fn init(&self) -> Result<(), LoggingError> {
        let rust_log = std::env::var("RUST_LOG").ok();
        let filter = self.filter(rust_log.as_deref())?;
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);

        let installed = match self.log_format {
            LogFormat::Full => builder.try_init(),
            LogFormat::Compact => builder.compact().try_init(),
            LogFormat::Json => builder.json().with_current_span(true).try_init(),
        };
        installed.map_err(|e| LoggingError::Install(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn options(level: &str) -> LoggingOptions {
        LoggingOptions {
            log_level: level.to_string(),
            ..LoggingOptions::default()
        }
    }

    #[rstest]
    #[case("info", None, "info")]
    #[case("INFO", None, "info")]
    #[case("warn", Some("debug,tokio_postgres=warn"), "debug,tokio_postgres=warn")]
    #[case("warn", Some("   "), "warn")]
    fn rust_log_overrides_level(
        #[case] level: &str,
        #[case] rust_log: Option<&str>,
        #[case] expected: &str,
    ) {
        assert_eq!(options(level).directives(rust_log), expected);
    }

    #[rstest]
    #[case("trace")]
    #[case("debug,readbench_app=trace")]
    #[case("error")]
    fn parses_valid_filters(#[case] level: &str) {
        assert!(options(level).filter(None).is_ok());
    }

    #[test]
    fn rejects_invalid_level() {
        let err = options("readbench=verbose").filter(None).unwrap_err();

        assert!(matches!(err, LoggingError::Parse(_)));
    }
}
