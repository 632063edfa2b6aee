//! # Crews
//!
//! A crew is a group of agents that runs a fixed sequence of tasks and
//! hands back one raw output. The workflow only ever sees the [`Crew`]
//! boundary: string inputs in, [`TaskResult::raw`] out.
//!
//! ```text
//! Workflow
//!   └── Crew::kickoff(TaskInputs) -> TaskResult { raw }
//!         └── tasks (run_llm_function! / run_llm_worker!, each under a guardrail)
//!               └── tools (#[tool] functions)
//! ```
//!
//! - [`ResearchCrew`] - search, extract, validate and compile listings
//! - [`LocationCrew`] - geocode and score amenities per property
//! - [`DesignCrew`] - identify rooms and generate redesigned images

pub mod design_crew;
pub mod images;
pub mod llm_helpers;
pub mod location_crew;
pub mod prompts;
pub mod research_crew;
pub mod tools;

pub use design_crew::DesignCrew;
pub use images::{GeminiImageGenerator, ImageGenerator};
pub use location_crew::LocationCrew;
pub use research_crew::ResearchCrew;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named string inputs for one kickoff
pub type TaskInputs = BTreeMap<String, String>;

/// Input keys shared between the workflow and the crews
pub mod keys {
    pub const SEARCH_QUERY: &str = "search_query";
    pub const LOCATION: &str = "location";
    pub const PROPERTY_TYPE: &str = "property_type";
    pub const BEDROOMS: &str = "bedrooms";
    pub const MAX_PRICE: &str = "max_price";
    pub const RENT_FREQUENCY: &str = "rent_frequency";
    /// Free-text feedback from the human reviewer on a search retry
    pub const REVIEWER_FEEDBACK: &str = "reviewer_feedback";
    /// Rejection reason from the previous attempt's guardrail
    pub const GUARDRAIL_FEEDBACK: &str = "guardrail_feedback";
    /// Filtered research report (JSON text)
    pub const PROPERTIES: &str = "properties";
    pub const DESIGN_STYLE: &str = "design_style";
}

/// What a crew hands back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub raw: String,
}

impl TaskResult {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }
}

#[async_trait]
pub trait Crew: Send + Sync {
    fn name(&self) -> &str;

    async fn kickoff(&self, inputs: &TaskInputs) -> anyhow::Result<TaskResult>;
}

/// Required input, or an error naming the missing key
pub fn required_input<'a>(inputs: &'a TaskInputs, key: &str) -> anyhow::Result<&'a str> {
    inputs
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("Missing crew input: {}", key))
}

/// Property records out of a research report, whichever list key it uses
pub fn property_records(report: &serde_json::Value) -> Vec<serde_json::Value> {
    report
        .get("properties")
        .or_else(|| report.get("listings"))
        .and_then(serde_json::Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Identifier of a property record: `id`, falling back to `property_id`
pub fn record_id(record: &serde_json::Value) -> Option<&str> {
    record
        .get("id")
        .or_else(|| record.get("property_id"))
        .and_then(serde_json::Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_required_input() {
        let mut inputs = TaskInputs::new();
        inputs.insert(keys::DESIGN_STYLE.to_string(), "  ".to_string());
        let err = required_input(&inputs, keys::DESIGN_STYLE).unwrap_err();
        assert!(err.to_string().contains("design_style"));

        inputs.insert(keys::DESIGN_STYLE.to_string(), "scandinavian".to_string());
        assert_eq!(
            required_input(&inputs, keys::DESIGN_STYLE).unwrap(),
            "scandinavian"
        );
    }

    #[test]
    fn test_property_records_and_ids() {
        let report = json!({"listings": [{"property_id": "p3"}, {"id": "p4"}, {}]});
        let records = property_records(&report);
        assert_eq!(records.len(), 3);
        assert_eq!(record_id(&records[0]), Some("p3"));
        assert_eq!(record_id(&records[1]), Some("p4"));
        assert_eq!(record_id(&records[2]), None);
    }
}
