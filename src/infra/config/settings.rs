use std::path::PathBuf;

use clap::Args;

use crate::app::ports::PoolSize;
use crate::app::registry::{DEFAULT_BATCH_SIZE, DEFAULT_CHUNK_SIZE, Tuning};
use crate::domain::{
    ConfigError, FailurePolicy, RunConfig, StatementTimeout, StrategySelector,
};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("pool min ({min}) must not exceed pool max ({max})")]
    PoolBounds { min: usize, max: usize },
    #[error("{0} must be at least 1")]
    Zero(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
#[group(id = "database")]
pub struct DatabaseSettings {
    #[arg(long = "db-host", env = "DB_HOST", default_value = "localhost")]
    pub host: String,

    #[arg(long = "db-port", env = "DB_PORT", default_value_t = 5432)]
    pub port: u16,

    #[arg(long = "db-user", env = "DB_USER", default_value = "postgres")]
    pub user: String,

    #[arg(
        long = "db-password",
        env = "DB_PASSWORD",
        default_value = "postgres",
        hide_env_values = true
    )]
    pub password: String,

    #[arg(long = "db-name", env = "DB_NAME", default_value = "throughput_challenge")]
    pub name: String,
}

impl DatabaseSettings {
    pub fn dsn(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            urlencoding::encode(&self.user),
            urlencoding::encode(&self.password),
            self.host,
            self.port,
            self.name
        )
    }

    /// For logging - password replaced with ****
    pub fn masked_dsn(&self) -> String {
        format!(
            "postgresql://{}:****@{}:{}/{}",
            urlencoding::encode(&self.user),
            self.host,
            self.port,
            self.name
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
#[group(id = "benchmark")]
pub struct BenchmarkSettings {
    /// Strategy name, or `all`
    #[arg(
        long,
        visible_alias = "strategies",
        short = 's',
        env = "BENCHMARK_STRATEGY",
        default_value = "all"
    )]
    pub strategy: StrategySelector,

    /// Rows each strategy reads
    #[arg(long, short = 'r', env = "BENCHMARK_ROWS", default_value_t = 1_000_000)]
    pub rows: u64,

    /// Measured runs per strategy
    #[arg(long, env = "BENCHMARK_RUNS", default_value_t = 1)]
    pub runs: u32,

    #[arg(long, env = "BENCHMARK_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: u32,

    /// Fan-out width; unset lets each strategy pick its own
    #[arg(long, env = "BENCHMARK_CONCURRENCY")]
    pub concurrency: Option<u32>,

    /// One unmeasured execution per strategy before the measured runs
    #[arg(long, env = "BENCHMARK_WARMUP")]
    pub warmup: bool,

    #[arg(long, env = "BENCHMARK_FAILURE_POLICY", default_value = "tolerant")]
    pub failure_policy: FailurePolicy,

    /// Per-transaction statement timeout in milliseconds; 0 disables it
    #[arg(long, env = "DB_STATEMENT_TIMEOUT_MS", default_value_t = 0)]
    pub statement_timeout_ms: u64,

    /// Keys per worker process (multiprocessing)
    #[arg(long, env = "BENCHMARK_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    #[arg(long, env = "BENCHMARK_POOL_MIN", default_value_t = 1)]
    pub pool_min: usize,

    #[arg(long, env = "BENCHMARK_POOL_MAX", default_value_t = 10)]
    pub pool_max: usize,

    /// Also report peak heap growth from the counting allocator
    #[arg(long, env = "BENCHMARK_TRACE_ALLOCATIONS")]
    pub trace_allocations: bool,

    #[arg(long, env = "RESULTS_DIR", default_value = "results")]
    pub results_dir: PathBuf,
}

impl BenchmarkSettings {
    pub fn run_config(&self) -> Result<RunConfig, SettingsError> {
        Ok(RunConfig::builder(self.rows)
            .runs(self.runs)
            .selector(self.strategy)
            .concurrency(self.concurrency)
            .warmup(self.warmup)
            .failure_policy(self.failure_policy)
            .statement_timeout(StatementTimeout::from_millis(self.statement_timeout_ms))
            .build()?)
    }

    pub fn tuning(&self) -> Result<Tuning, SettingsError> {
        if self.batch_size == 0 {
            return Err(SettingsError::Zero("batch size"));
        }
        if self.chunk_size == 0 {
            return Err(SettingsError::Zero("chunk size"));
        }
        if self.pool_max == 0 {
            return Err(SettingsError::Zero("pool max"));
        }
        if self.pool_min > self.pool_max {
            return Err(SettingsError::PoolBounds {
                min: self.pool_min,
                max: self.pool_max,
            });
        }
        Ok(Tuning {
            batch_size: self.batch_size,
            pool_size: PoolSize {
                min: self.pool_min,
                max: self.pool_max,
            },
            chunk_size: self.chunk_size,
            ..Tuning::default()
        })
    }
}

/// One-line description of the effective settings, password masked.
pub fn summary(database: &DatabaseSettings, benchmark: &BenchmarkSettings) -> String {
    let concurrency = benchmark
        .concurrency
        .map_or_else(|| "auto".to_string(), |n| n.to_string());
    format!(
        "DB={} | strategy={} rows={} runs={} batch={} concurrency={} policy={} timeout_ms={} results={}",
        database.masked_dsn(),
        benchmark.strategy,
        benchmark.rows,
        benchmark.runs,
        benchmark.batch_size,
        concurrency,
        benchmark.failure_policy,
        benchmark.statement_timeout_ms,
        benchmark.results_dir.display()
    )
}
