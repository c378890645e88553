//! JSON run reports for `resolve --report`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use llmerge_core::{ResolutionResult, ResolvedRegion};

/// Machine-readable record of one resolve run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub metadata: ReportMetadata,
    pub results: Vec<FileReport>,
}

#[derive(Debug, Serialize)]
pub struct ReportMetadata {
    pub run_id: String,
    pub provider: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_files: usize,
    pub total_regions: usize,
    pub resolved_regions: usize,
    pub failed_regions: usize,
}

#[derive(Debug, Serialize)]
pub struct FileReport {
    pub file: String,
    pub status: String,
    pub regions: Vec<RegionReport>,
}

#[derive(Debug, Serialize)]
pub struct RegionReport {
    pub index: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub fn build_report(
    provider: &str,
    model: &str,
    started_at: DateTime<Utc>,
    results: &[ResolutionResult],
) -> RunReport {
    let mut total_regions = 0;
    let mut resolved_regions = 0;
    let files = results
        .iter()
        .map(|result| {
            total_regions += result.units.len();
            resolved_regions += result.resolved_count();
            FileReport {
                file: result.file_path.clone(),
                status: result.status.to_string(),
                regions: result.units.iter().map(region_report).collect(),
            }
        })
        .collect();

    RunReport {
        metadata: ReportMetadata {
            run_id: Uuid::new_v4().to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            started_at,
            finished_at: Utc::now(),
            total_files: results.len(),
            total_regions,
            resolved_regions,
            failed_regions: total_regions - resolved_regions,
        },
        results: files,
    }
}

fn region_report(
    (unit, region): &(llmerge_core::ConflictUnit, ResolvedRegion),
) -> RegionReport {
    let (outcome, latency_ms, reason) = match region {
        ResolvedRegion::Resolved { latency_ms, .. } => ("resolved", Some(*latency_ms), None),
        ResolvedRegion::Failed { reason } => ("failed", None, Some(reason.clone())),
    };
    RegionReport {
        index: unit.index,
        start_line: unit.start_line,
        end_line: unit.end_line,
        outcome: outcome.to_string(),
        latency_ms,
        reason,
    }
}

pub fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let json =
        serde_json::to_string_pretty(report).context("failed to serialize run report")?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "run report written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmerge_core::{ConflictUnit, FileStatus};

    fn unit(index: usize) -> ConflictUnit {
        ConflictUnit {
            file_path: "a.txt".to_string(),
            index,
            span_start: 0,
            span_end: 10,
            start_line: 1 + index * 6,
            end_line: 5 + index * 6,
            ours_label: "HEAD".to_string(),
            theirs_label: "branch".to_string(),
            ours: "x\n".to_string(),
            theirs: "y\n".to_string(),
            base: None,
        }
    }

    fn sample_results() -> Vec<ResolutionResult> {
        vec![ResolutionResult {
            file_path: "a.txt".to_string(),
            original_text: String::new(),
            patched_text: String::new(),
            units: vec![
                (
                    unit(0),
                    ResolvedRegion::Resolved {
                        text: "z\n".to_string(),
                        latency_ms: 42,
                    },
                ),
                (
                    unit(1),
                    ResolvedRegion::Failed {
                        reason: "reply contains no replacement code".to_string(),
                    },
                ),
            ],
            status: FileStatus::PartiallyResolved {
                failed_units: vec![1],
            },
        }]
    }

    #[test]
    fn test_report_counts_regions() {
        let report = build_report("google", "gemini-2.0-flash", Utc::now(), &sample_results());
        assert_eq!(report.metadata.total_files, 1);
        assert_eq!(report.metadata.total_regions, 2);
        assert_eq!(report.metadata.resolved_regions, 1);
        assert_eq!(report.metadata.failed_regions, 1);
        assert_eq!(report.results[0].status, "partial (1 unresolved)");
    }

    #[test]
    fn test_report_serializes_to_json() {
        let report = build_report("groq", "llama-3.3-70b-versatile", Utc::now(), &sample_results());
        let json = serde_json::to_string_pretty(&report).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["metadata"]["provider"], "groq");
        let regions = &value["results"][0]["regions"];
        assert_eq!(regions[0]["outcome"], "resolved");
        assert_eq!(regions[0]["latency_ms"], 42);
        assert!(regions[0].get("reason").is_none());
        assert_eq!(regions[1]["outcome"], "failed");
        assert!(regions[1].get("latency_ms").is_none());
    }

    #[test]
    fn test_write_report_creates_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("run.json");
        let report = build_report("google", "gemini-2.0-flash", Utc::now(), &[]);
        write_report(&path, &report).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["metadata"]["total_files"], 0);
    }
}
