//! Experiment reports and their persistence.

use crate::error::{Error, Result};
use crate::stats::PerformanceResult;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Per-stage results of the fixed-operation experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreOpsReport {
    pub iterations: usize,
    /// Present only when key retrieval was measured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_retrieval: Option<PerformanceResult>,
    pub minting: PerformanceResult,
    pub delegating: PerformanceResult,
    pub discharging: PerformanceResult,
    pub authorizing: PerformanceResult,
    pub revoking: PerformanceResult,
}

/// Per-depth results of the scalability experiment.
///
/// `authorization[d]` and `revocation[d]` describe chain depth `d`; both have
/// exactly `chain_length` entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalabilityReport {
    pub chain_length: usize,
    pub iterations: usize,
    pub authorization: Vec<PerformanceResult>,
    pub revocation: Vec<PerformanceResult>,
}

/// A report ready to be persisted.
#[derive(Debug, Clone, Copy)]
pub enum Report<'a> {
    /// Named per-stage results
    CoreOps(&'a CoreOpsReport),
    /// Results indexed by chain depth
    Depths(&'a [PerformanceResult]),
}

/// Persistence collaborator: stores one report at one destination.
pub trait ReportWriter {
    fn write(&self, report: Report<'_>, destination: &str) -> Result<()>;
}

/// Writes reports as pretty-printed JSON files below a base directory.
#[derive(Debug, Clone)]
pub struct JsonReportWriter {
    base_dir: PathBuf,
}

impl JsonReportWriter {
    pub const CORE_OPS: &'static str = "core-ops.json";
    pub const AUTHORIZATION: &'static str = "authorization.json";
    pub const REVOCATION: &'static str = "revocation.json";

    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Write a scalability report as one file per phase.
    ///
    /// Each file holds a plain array indexed by depth.
    pub fn write_scalability(&self, report: &ScalabilityReport) -> Result<()> {
        self.write(Report::Depths(&report.authorization), Self::AUTHORIZATION)?;
        self.write(Report::Depths(&report.revocation), Self::REVOCATION)
    }

    pub fn write_core_ops(&self, report: &CoreOpsReport) -> Result<()> {
        self.write(Report::CoreOps(report), Self::CORE_OPS)
    }
}

impl ReportWriter for JsonReportWriter {
    fn write(&self, report: Report<'_>, destination: &str) -> Result<()> {
        let path = self.base_dir.join(destination);
        let write_err = |source: std::io::Error| Error::ReportWrite {
            destination: path.display().to_string(),
            source,
        };

        let json = match report {
            Report::CoreOps(r) => serde_json::to_string_pretty(r)?,
            Report::Depths(r) => serde_json::to_string_pretty(r)?,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(&path, json).map_err(write_err)?;

        info!(path = %path.display(), "Performance results written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(ms: f64) -> PerformanceResult {
        PerformanceResult::from_samples(&[ms * 1000.0]).unwrap()
    }

    #[test]
    fn test_core_ops_omits_unmeasured_stage() {
        let report = CoreOpsReport {
            iterations: 1,
            key_retrieval: None,
            minting: result(1.0),
            delegating: result(2.0),
            discharging: result(3.0),
            authorizing: result(4.0),
            revoking: result(5.0),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("keyRetrieval").is_none());
        assert_eq!(json["authorizing"]["avg_time"], 4.0);
        assert_eq!(json["iterations"], 1);
    }

    #[test]
    fn test_writer_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let writer = JsonReportWriter::new(dir.path().join("results").join("run-1"));
        let report = ScalabilityReport {
            chain_length: 2,
            iterations: 1,
            authorization: vec![result(1.0), result(2.0)],
            revocation: vec![result(3.0), result(4.0)],
        };
        writer.write_scalability(&report).unwrap();

        let raw = fs::read_to_string(writer.base_dir().join(JsonReportWriter::REVOCATION)).unwrap();
        let parsed: Vec<PerformanceResult> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, report.revocation);
        assert!(writer
            .base_dir()
            .join(JsonReportWriter::AUTHORIZATION)
            .exists());
    }
}
