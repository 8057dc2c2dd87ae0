use std::fs;
use std::path::{Path, PathBuf};

use crate::app::orchestrator::SweepReport;
use crate::app::ports::{ResultSink, SinkError};

pub const LATEST_FILE: &str = "latest.json";

/// Writes each report as pretty JSON to `latest.json` and to a
/// `run-<UTC timestamp>.json` archive in the same directory.
pub struct JsonResultSink {
    dir: PathBuf,
}

impl JsonResultSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn archive_name(report: &SweepReport) -> String {
        format!("run-{}.json", report.started_at.format("%Y%m%dT%H%M%SZ"))
    }

    fn write(path: &Path, contents: &[u8]) -> Result<(), SinkError> {
        fs::write(path, contents).map_err(|source| SinkError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl ResultSink for JsonResultSink {
    fn publish(&self, report: &SweepReport) -> Result<Vec<PathBuf>, SinkError> {
        fs::create_dir_all(&self.dir).map_err(|source| SinkError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut json =
            serde_json::to_vec_pretty(report).map_err(|e| SinkError::Serialize(e.to_string()))?;
        json.push(b'\n');

        let archive = self.dir.join(Self::archive_name(report));
        let latest = self.dir.join(LATEST_FILE);
        Self::write(&archive, &json)?;
        Self::write(&latest, &json)?;

        tracing::info!(
            latest = %latest.display(),
            archive = %archive.display(),
            runs = report.runs.len(),
            "results written"
        );
        Ok(vec![latest, archive])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FailurePolicy, StrategyKind, SweepId};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn report() -> SweepReport {
        SweepReport {
            sweep_id: SweepId::from_string("sweep-1"),
            started_at: Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap(),
            limit: 1_000,
            strategies: vec![StrategyKind::Naive],
            failure_policy: FailurePolicy::Tolerant,
            runs: Vec::new(),
            aggregates: Vec::new(),
        }
    }

    #[test]
    fn writes_latest_and_timestamped_archive() {
        let temp = TempDir::new().unwrap();
        let sink = JsonResultSink::new(temp.path().join("results"));

        let written = sink.publish(&report()).unwrap();

        let latest = temp.path().join("results/latest.json");
        let archive = temp.path().join("results/run-20260314T092653Z.json");
        assert_eq!(written, vec![latest.clone(), archive.clone()]);
        let latest = fs::read_to_string(latest).unwrap();
        assert_eq!(latest, fs::read_to_string(archive).unwrap());
        let parsed: SweepReport = serde_json::from_str(&latest).unwrap();
        assert_eq!(parsed, report());
    }

    #[test]
    fn later_sweep_replaces_latest_only() {
        let temp = TempDir::new().unwrap();
        let sink = JsonResultSink::new(temp.path());
        let first = report();
        let mut second = report();
        second.started_at = Utc.with_ymd_and_hms(2026, 3, 14, 10, 0, 0).unwrap();
        second.limit = 50;

        sink.publish(&first).unwrap();
        sink.publish(&second).unwrap();

        let latest: SweepReport =
            serde_json::from_slice(&fs::read(temp.path().join(LATEST_FILE)).unwrap()).unwrap();
        assert_eq!(latest.limit, 50);
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 3);
    }

    #[test]
    fn unwritable_directory_reports_path() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("file");
        fs::write(&blocker, b"").unwrap();
        let sink = JsonResultSink::new(blocker.join("results"));

        let err = sink.publish(&report()).unwrap_err();

        match err {
            SinkError::Io { path, .. } => assert_eq!(path, blocker.join("results")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
