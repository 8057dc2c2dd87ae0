use std::io::Write;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};

use readbench::app::orchestrator::Orchestrator;
use readbench::app::ports::{ResultSink, SyncConnector};
use readbench::app::profiler::{Profiler, ProfilerOptions};
use readbench::app::registry::{DefaultStrategyFactory, StrategyContext};
use readbench::domain::StrategyKind;
use readbench::error;
use readbench::infra::adapters::{
    JsonResultSink, PgAsyncConnector, PgSyncConnector, ProcessWorkerLauncher, serve_stdio,
};
use readbench::infra::alloc::PeakAllocator;
use readbench::infra::config::{BenchmarkSettings, DatabaseSettings, summary};
use readbench::infra::logging::LoggingOptions;
use readbench::infra::probe::SysinfoProbe;

#[global_allocator]
static ALLOCATOR: PeakAllocator = PeakAllocator::new();

/// Measures throughput, peak memory and CPU of PostgreSQL read strategies
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    logging: LoggingOptions,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a sweep, write the report and print it as JSON
    Run {
        #[command(flatten)]
        database: DatabaseSettings,
        #[command(flatten)]
        benchmark: BenchmarkSettings,
    },
    /// List available strategies
    List,
    /// Show effective settings
    Info {
        #[command(flatten)]
        database: DatabaseSettings,
        #[command(flatten)]
        benchmark: BenchmarkSettings,
    },
    /// Serve one chunk task from stdin (spawned by the multiprocessing strategy)
    #[command(hide = true)]
    Worker,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    error::install_hooks()?;

    let cli = Cli::parse();
    cli.logging.init()?;

    match cli.command {
        Command::Run {
            database,
            benchmark,
        } => run(&database, &benchmark),
        Command::List => list(),
        Command::Info {
            database,
            benchmark,
        } => info(&database, &benchmark),
        Command::Worker => worker(),
    }
}

fn run(database: &DatabaseSettings, benchmark: &BenchmarkSettings) -> Result<()> {
    let config = benchmark.run_config()?;
    let dsn = database.dsn();
    tracing::info!(dsn = %database.masked_dsn(), "target database");

    let context = StrategyContext::new(
        dsn.clone(),
        Arc::new(PgSyncConnector::new(&dsn)?),
        Arc::new(PgAsyncConnector::new(&dsn)?),
        Arc::new(
            ProcessWorkerLauncher::current_exe()
                .wrap_err("failed to locate the current executable for worker processes")?,
        ),
    )
    .with_tuning(benchmark.tuning()?)
    .configured_by(&config);

    let profiler = Profiler::new(Arc::new(SysinfoProbe::new()))
        .with_allocation_tracker(Arc::new(&ALLOCATOR))
        .with_options(ProfilerOptions {
            trace_allocations: benchmark.trace_allocations,
            ..ProfilerOptions::default()
        });
    let orchestrator = Orchestrator::new(Arc::new(DefaultStrategyFactory::new(context)), profiler);

    let report = orchestrator.run(&config)?;
    JsonResultSink::new(&benchmark.results_dir).publish(&report)?;

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &report)?;
    writeln!(stdout)?;
    Ok(())
}

fn list() -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    for kind in StrategyKind::available() {
        writeln!(stdout, "{:<18} {}", kind.as_str(), kind.description())?;
    }
    Ok(())
}

fn info(database: &DatabaseSettings, benchmark: &BenchmarkSettings) -> Result<()> {
    writeln!(std::io::stdout(), "{}", summary(database, benchmark))?;
    Ok(())
}

fn worker() -> Result<()> {
    let reply = serve_stdio(std::io::stdin().lock(), std::io::stdout().lock(), |dsn| {
        Ok(Box::new(PgSyncConnector::new(dsn)?) as Box<dyn SyncConnector>)
    })?;
    tracing::debug!(rows = reply.count, failed = reply.error.is_some(), "worker finished");
    Ok(())
}
