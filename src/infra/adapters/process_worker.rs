//! Worker processes for the multiprocessing strategy.
//!
//! The coordinator re-invokes the current executable with the hidden
//! `worker` subcommand, writes one [`ChunkTask`] as JSON to its stdin and
//! reads one [`ChunkReply`] as JSON from its stdout.

use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::app::ports::{ChunkReply, ChunkTask, SyncConnector, WorkerLauncher};
use crate::app::worker::serve_chunk;
use crate::classify::classify_message;
use crate::domain::StrategyError;

pub const WORKER_SUBCOMMAND: &str = "worker";

pub struct ProcessWorkerLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessWorkerLauncher {
    /// Launches `<current executable> worker`.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, [WORKER_SUBCOMMAND]))
    }

    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessWorkerLauncher {
    async fn run_chunk(&self, task: ChunkTask) -> Result<u64, StrategyError> {
        let payload = serde_json::to_vec(&task)
            .map_err(|e| StrategyError::protocol(format!("failed to encode chunk: {}", e)))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true) // cancelled fan-outs must not leave workers behind
            .spawn()
            .map_err(|e| {
                StrategyError::resource_exhaustion(format!("failed to spawn worker: {}", e))
            })?;

        let mut stdin = child.stdin.take();
        let mut stdout_handle = child.stdout.take();
        let mut stderr_handle = child.stderr.take();

        // Feed stdin while draining both pipes so neither side can block on a full buffer.
        let (written, stdout, stderr) = tokio::join!(
            async {
                if let Some(mut input) = stdin.take() {
                    input.write_all(&payload).await?;
                    input.shutdown().await?;
                }
                Ok::<_, std::io::Error>(())
            },
            async {
                let mut buf = Vec::new();
                if let Some(ref mut out) = stdout_handle {
                    out.read_to_end(&mut buf).await?;
                }
                Ok::<_, std::io::Error>(buf)
            },
            async {
                let mut buf = Vec::new();
                if let Some(ref mut err) = stderr_handle {
                    err.read_to_end(&mut buf).await?;
                }
                Ok::<_, std::io::Error>(String::from_utf8_lossy(&buf).into_owned())
            }
        );
        let status = child
            .wait()
            .await
            .map_err(|e| StrategyError::protocol(format!("failed to wait for worker: {}", e)))?;

        let stdout = stdout.map_err(|e| StrategyError::protocol(format!("worker stdout: {}", e)))?;
        let stderr = stderr.unwrap_or_default();

        match serde_json::from_slice::<ChunkReply>(&stdout) {
            Ok(reply) => reply.into_result(),
            Err(_) => {
                let detail = stderr
                    .lines()
                    .rev()
                    .find(|line| !line.trim().is_empty())
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                if let Err(e) = written {
                    tracing::debug!(error = %e, "worker closed stdin early");
                }
                let message = if detail.is_empty() {
                    format!("worker exited with {} without a reply", status)
                } else {
                    format!("worker exited with {}: {}", status, detail)
                };
                Err(StrategyError::new(classify_message(&detail), message))
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerIoError {
    #[error("failed to read chunk task: {0}")]
    Read(#[source] std::io::Error),
    #[error("malformed chunk task: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to write chunk reply: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to encode chunk reply: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Worker side: read one task from `input`, serve it and write the reply to
/// `output`. Database failures travel inside the reply; only I/O and
/// decoding problems are returned as errors.
pub fn serve_stdio<R, W, C>(mut input: R, mut output: W, connect: C) -> Result<ChunkReply, WorkerIoError>
where
    R: Read,
    W: Write,
    C: FnOnce(&str) -> Result<Box<dyn SyncConnector>, StrategyError>,
{
    let mut raw = Vec::new();
    input.read_to_end(&mut raw).map_err(WorkerIoError::Read)?;
    let task: ChunkTask = serde_json::from_slice(&raw).map_err(WorkerIoError::Decode)?;

    let reply = match connect(&task.dsn) {
        Ok(connector) => serve_chunk(connector.as_ref(), &task),
        Err(e) => ChunkReply::failed(&e),
    };

    serde_json::to_writer(&mut output, &reply).map_err(WorkerIoError::Encode)?;
    output.flush().map_err(WorkerIoError::Write)?;
    Ok(reply)
}
