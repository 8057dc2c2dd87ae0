use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::strategy_kind::StrategyKind;

/// Governs the orchestrator's run loop when an execution fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Record the failure on the result and keep going.
    #[default]
    Tolerant,
    /// Abort the remaining runs and strategies on the first failure.
    Strict,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Tolerant => write!(f, "tolerant"),
            FailurePolicy::Strict => write!(f, "strict"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tolerant" => Ok(FailurePolicy::Tolerant),
            "strict" => Ok(FailurePolicy::Strict),
            _ => Err(format!("Unknown failure policy: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategySelector {
    #[default]
    All,
    Only(StrategyKind),
}

impl StrategySelector {
    pub fn kinds(&self) -> Vec<StrategyKind> {
        match self {
            StrategySelector::All => StrategyKind::available().to_vec(),
            StrategySelector::Only(kind) => vec![*kind],
        }
    }
}

impl fmt::Display for StrategySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategySelector::All => write!(f, "all"),
            StrategySelector::Only(kind) => write!(f, "{}", kind),
        }
    }
}

impl FromStr for StrategySelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(StrategySelector::All);
        }
        s.parse::<StrategyKind>().map(StrategySelector::Only)
    }
}

/// Per-transaction statement timeout; zero disables it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatementTimeout(u64);

impl StatementTimeout {
    pub fn disabled() -> Self {
        Self(0)
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn is_enabled(&self) -> bool {
        self.0 > 0
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn as_duration(&self) -> Option<Duration> {
        self.is_enabled().then(|| Duration::from_millis(self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("rows must be at least 1")]
    ZeroRows,
    #[error("runs must be at least 1")]
    ZeroRuns,
    #[error("concurrency must be at least 1 when set")]
    ZeroConcurrency,
}

/// Parameters of one invocation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    rows: u64,
    runs: u32,
    selector: StrategySelector,
    concurrency: Option<u32>,
    warmup: bool,
    failure_policy: FailurePolicy,
    statement_timeout: StatementTimeout,
}

impl RunConfig {
    pub fn builder(rows: u64) -> RunConfigBuilder {
        RunConfigBuilder {
            config: RunConfig {
                rows,
                runs: 1,
                selector: StrategySelector::All,
                concurrency: None,
                warmup: false,
                failure_policy: FailurePolicy::Tolerant,
                statement_timeout: StatementTimeout::disabled(),
            },
        }
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn runs(&self) -> u32 {
        self.runs
    }

    pub fn selector(&self) -> StrategySelector {
        self.selector
    }

    pub fn concurrency(&self) -> Option<u32> {
        self.concurrency
    }

    pub fn warmup(&self) -> bool {
        self.warmup
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn statement_timeout(&self) -> StatementTimeout {
        self.statement_timeout
    }

    pub fn strategies(&self) -> Vec<StrategyKind> {
        self.selector.kinds()
    }
}

pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    pub fn runs(mut self, runs: u32) -> Self {
        self.config.runs = runs;
        self
    }

    pub fn selector(mut self, selector: StrategySelector) -> Self {
        self.config.selector = selector;
        self
    }

    pub fn concurrency(mut self, concurrency: Option<u32>) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    pub fn warmup(mut self, warmup: bool) -> Self {
        self.config.warmup = warmup;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn statement_timeout(mut self, timeout: StatementTimeout) -> Self {
        self.config.statement_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<RunConfig, ConfigError> {
        if self.config.rows == 0 {
            return Err(ConfigError::ZeroRows);
        }
        if self.config.runs == 0 {
            return Err(ConfigError::ZeroRuns);
        }
        if self.config.concurrency == Some(0) {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    mod builder {
        use super::*;

        #[test]
        fn defaults_match_tolerant_single_run_sweep() {
            let config = RunConfig::builder(1_000).build().unwrap();

            assert_eq!(config.rows(), 1_000);
            assert_eq!(config.runs(), 1);
            assert_eq!(config.selector(), StrategySelector::All);
            assert_eq!(config.concurrency(), None);
            assert!(!config.warmup());
            assert_eq!(config.failure_policy(), FailurePolicy::Tolerant);
            assert!(!config.statement_timeout().is_enabled());
        }

        #[test]
        fn zero_rows_is_rejected() {
            assert_eq!(RunConfig::builder(0).build(), Err(ConfigError::ZeroRows));
        }

        #[test]
        fn zero_runs_is_rejected() {
            assert_eq!(
                RunConfig::builder(10).runs(0).build(),
                Err(ConfigError::ZeroRuns)
            );
        }

        #[test]
        fn zero_concurrency_is_rejected() {
            assert_eq!(
                RunConfig::builder(10).concurrency(Some(0)).build(),
                Err(ConfigError::ZeroConcurrency)
            );
        }
    }

    mod selector {
        use super::*;

        #[rstest]
        #[case("all", StrategySelector::All)]
        #[case("ALL", StrategySelector::All)]
        #[case("naive", StrategySelector::Only(StrategyKind::Naive))]
        #[case("async_stream", StrategySelector::Only(StrategyKind::AsyncStream))]
        fn parses(#[case] input: &str, #[case] expected: StrategySelector) {
            assert_eq!(input.parse::<StrategySelector>().unwrap(), expected);
        }

        #[test]
        fn all_expands_to_every_strategy() {
            assert_eq!(StrategySelector::All.kinds().len(), 5);
        }

        #[test]
        fn only_expands_to_single_strategy() {
            assert_eq!(
                StrategySelector::Only(StrategyKind::Naive).kinds(),
                vec![StrategyKind::Naive]
            );
        }
    }

    mod failure_policy {
        use super::*;

        #[rstest]
        #[case("tolerant", FailurePolicy::Tolerant)]
        #[case("Strict", FailurePolicy::Strict)]
        fn parses(#[case] input: &str, #[case] expected: FailurePolicy) {
            assert_eq!(input.parse::<FailurePolicy>().unwrap(), expected);
        }

        #[test]
        fn unknown_policy_is_error() {
            assert!("lenient".parse::<FailurePolicy>().is_err());
        }
    }

    mod statement_timeout {
        use super::*;

        #[test]
        fn zero_is_disabled() {
            let timeout = StatementTimeout::from_millis(0);
            assert!(!timeout.is_enabled());
            assert_eq!(timeout.as_duration(), None);
        }

        #[test]
        fn positive_converts_to_duration() {
            let timeout = StatementTimeout::from_millis(1_500);
            assert_eq!(timeout.as_duration(), Some(Duration::from_millis(1_500)));
        }
    }
}
