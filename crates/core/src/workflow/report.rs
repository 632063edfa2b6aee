//! # Final Report
//!
//! The artifact a finished run leaves behind: criteria, counters, approved
//! ids and the raw output of every phase.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use super::state::{Counters, SearchCriteria, StageFailure, StageKey, WorkflowState};
use crate::state::io;

pub const FINAL_REPORT_FILE: &str = "final_report.json";

/// Raw per-stage outputs; `null` for a phase that produced nothing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phases {
    pub research: Option<String>,
    pub filtered: Option<String>,
    pub location: Option<String>,
    pub design: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReport {
    pub run_id: String,
    pub search_criteria: SearchCriteria,
    pub design_style: String,
    pub summary: Counters,
    pub approved_property_ids: Vec<String>,
    pub phases: Phases,
    pub errors: Vec<StageFailure>,
    pub completed_at: String,
}

impl FinalReport {
    pub fn from_state(state: &WorkflowState) -> Self {
        let phase = |key: StageKey| state.output(key).map(str::to_string);
        Self {
            run_id: state.run_id.clone(),
            search_criteria: state.search_criteria.clone(),
            design_style: state.design_style.clone(),
            summary: state.counters.clone(),
            approved_property_ids: state
                .approved_ids
                .as_ref()
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default(),
            phases: Phases {
                research: phase(StageKey::Research),
                filtered: phase(StageKey::Filtered),
                location: phase(StageKey::Location),
                design: phase(StageKey::Design),
            },
            errors: state.errors.clone(),
            completed_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Where a finished report goes
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn deliver(&self, report: &FinalReport) -> Result<()>;
}

/// Writes the report as pretty JSON into the output directory
pub struct FileReportSink {
    output_dir: PathBuf,
}

impl FileReportSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.output_dir.join(FINAL_REPORT_FILE)
    }
}

#[async_trait]
impl ReportSink for FileReportSink {
    async fn deliver(&self, report: &FinalReport) -> Result<()> {
        let path = io::write_json_file(&self.output_dir, FINAL_REPORT_FILE, &report.to_json()?)
            .await?;
        tracing::info!(run_id = %report.run_id, "Final report written to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_report_shape_and_file_sink() {
        let mut state = WorkflowState::new(
            "run-report",
            SearchCriteria::new("Ojodu, Lagos, Nigeria"),
            "modern minimalist",
        );
        state
            .write_output(StageKey::Research, r#"{"properties": []}"#.to_string())
            .unwrap();
        state.approved_ids = Some(["p1".to_string()].into_iter().collect());
        state.record_failure("design", "image model unavailable");

        let report = FinalReport::from_state(&state);
        let value = report.to_json().unwrap();
        for key in ["search_criteria", "summary", "approved_property_ids", "phases"] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
        assert!(value["phases"]["location"].is_null());
        assert_eq!(value["approved_property_ids"], serde_json::json!(["p1"]));
        assert_eq!(value["errors"][0]["stage"], "design");

        let dir = ".homescout/test_report_output";
        let sink = FileReportSink::new(dir);
        sink.deliver(&report).await.unwrap();
        let written = std::fs::read_to_string(sink.path()).unwrap();
        assert!(written.contains("run-report"));

        let _ = std::fs::remove_dir_all(dir);
    }
}
