//! # Workflow State
//!
//! Everything a run carries between stages. The whole struct is serialized
//! into the checkpoint store, so a suspended run resumes from exactly this.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use super::pipeline::WorkflowStage;
use crate::crews::property_records;
use crate::error::{StageError, StageResult};

pub const RENT_FREQUENCIES: [&str; 4] = ["daily", "weekly", "monthly", "yearly"];

/// What the user is looking for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub location: String,
    #[serde(default = "default_property_type")]
    pub property_type: String,
    #[serde(default)]
    pub bedrooms: Option<u32>,
    #[serde(default)]
    pub bathrooms: Option<u32>,
    #[serde(default)]
    pub max_price: Option<f64>,
    #[serde(default = "default_rent_frequency")]
    pub rent_frequency: String,
    #[serde(default)]
    pub additional_requirements: Option<String>,
}

fn default_property_type() -> String {
    "apartment".to_string()
}

fn default_rent_frequency() -> String {
    "monthly".to_string()
}

pub fn default_design_style() -> String {
    "modern minimalist".to_string()
}

impl SearchCriteria {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            property_type: default_property_type(),
            bedrooms: None,
            bathrooms: None,
            max_price: None,
            rent_frequency: default_rent_frequency(),
            additional_requirements: None,
        }
    }

    /// Checked once at `Init`; a run never starts on invalid criteria
    pub fn validate(&self) -> StageResult<()> {
        let mut problems = Vec::new();

        if self.location.trim().is_empty() {
            problems.push("location must not be empty".to_string());
        }
        if self.property_type.trim().is_empty() {
            problems.push("property_type must not be empty".to_string());
        }
        if let Some(price) = self.max_price {
            if !price.is_finite() || price < 0.0 {
                problems.push(format!("max_price must be a non-negative number, got {}", price));
            }
        }
        let frequency = self.rent_frequency.to_lowercase();
        if !RENT_FREQUENCIES.contains(&frequency.as_str()) {
            problems.push(format!(
                "rent_frequency must be one of {}, got '{}'",
                RENT_FREQUENCIES.join("/"),
                self.rent_frequency
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(StageError::InvalidCriteria(problems.join("; ")))
        }
    }

    /// Query text for the research crew,
    /// e.g. "2 bedroom apartment in Ojodu, Lagos under 3000000 (yearly rent)"
    pub fn to_query(&self) -> String {
        let bedrooms = self.bedrooms.map(|b| b.to_string()).unwrap_or_default();
        let mut query = format!(
            "{} bedroom {} in {}",
            bedrooms, self.property_type, self.location
        );

        if let Some(price) = self.max_price.filter(|p| *p > 0.0) {
            query.push_str(&format!(" under {}", price));
        }
        query.push_str(&format!(" ({} rent)", self.rent_frequency.to_lowercase()));

        if let Some(bathrooms) = self.bathrooms {
            query.push_str(&format!(", at least {} bathroom(s)", bathrooms));
        }
        if let Some(extra) = self
            .additional_requirements
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            query.push_str(&format!(", {}", extra));
        }

        query.trim().to_string()
    }
}

/// Output slots; each stage owns exactly one
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKey {
    Research,
    Filtered,
    Location,
    Design,
}

impl StageKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Filtered => "filtered",
            Self::Location => "location",
            Self::Design => "design",
        }
    }
}

/// Progress counters shown in the final summary; never used for control flow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub properties_found: usize,
    pub properties_approved: usize,
    pub properties_analyzed: usize,
    pub rooms_redesigned: usize,
}

/// A non-fatal failure recorded while the run kept going
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: String,
    pub message: String,
}

/// Shared state of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub run_id: String,
    pub search_criteria: SearchCriteria,
    #[serde(default = "default_design_style")]
    pub design_style: String,
    #[serde(default)]
    pub stage_outputs: BTreeMap<StageKey, String>,
    #[serde(default)]
    pub approved_ids: Option<BTreeSet<String>>,
    #[serde(default)]
    pub counters: Counters,
    #[serde(default)]
    pub search_attempt: u32,
    #[serde(default)]
    pub reviewer_feedback: Option<String>,
    pub stage: WorkflowStage,
    #[serde(default)]
    pub errors: Vec<StageFailure>,
}

impl WorkflowState {
    pub fn new(
        run_id: impl Into<String>,
        search_criteria: SearchCriteria,
        design_style: &str,
    ) -> Self {
        let design_style = if design_style.trim().is_empty() {
            default_design_style()
        } else {
            design_style.trim().to_string()
        };
        Self {
            run_id: run_id.into(),
            search_criteria,
            design_style,
            stage_outputs: BTreeMap::new(),
            approved_ids: None,
            counters: Counters::default(),
            search_attempt: 0,
            reviewer_feedback: None,
            stage: WorkflowStage::Init,
            errors: Vec::new(),
        }
    }

    pub fn output(&self, key: StageKey) -> Option<&str> {
        self.stage_outputs.get(&key).map(String::as_str)
    }

    /// Write a stage's output; a second write to the same key is refused
    pub fn write_output(&mut self, key: StageKey, raw: String) -> StageResult<()> {
        if self.stage_outputs.contains_key(&key) {
            return Err(StageError::DuplicateWrite(key.as_str().to_string()));
        }
        self.stage_outputs.insert(key, raw);
        Ok(())
    }

    /// Drop a previous attempt's output before the stage runs again
    pub fn clear_output(&mut self, key: StageKey) {
        self.stage_outputs.remove(&key);
    }

    pub fn record_failure(&mut self, stage: &str, message: impl Into<String>) {
        self.errors.push(StageFailure {
            stage: stage.to_string(),
            message: message.into(),
        });
    }

    /// Recompute counters from whatever outputs exist. Unparseable outputs
    /// fall back to a default instead of failing.
    pub fn refresh_counters(&mut self) {
        self.counters.properties_found = self
            .output(StageKey::Research)
            .and_then(count_records)
            .unwrap_or(0);

        self.counters.properties_approved = self
            .output(StageKey::Filtered)
            .and_then(count_records)
            .unwrap_or(self.counters.properties_found);

        self.counters.properties_analyzed = self
            .output(StageKey::Location)
            .and_then(count_records)
            .unwrap_or(self.counters.properties_approved);

        self.counters.rooms_redesigned = self
            .output(StageKey::Design)
            .and_then(rooms_redesigned)
            .unwrap_or(0);
    }
}

/// Record count from `properties`, falling back to `listings`
fn count_records(raw: &str) -> Option<usize> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let has_records = ["properties", "listings"]
        .iter()
        .any(|key| value.get(*key).map(Value::is_array).unwrap_or(false));
    has_records.then(|| property_records(&value).len())
}

fn rooms_redesigned(raw: &str) -> Option<usize> {
    let value: Value = serde_json::from_str(raw).ok()?;
    value
        .get("metadata")?
        .get("total_rooms_redesigned")?
        .as_u64()
        .map(|n| n as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ojodu() -> SearchCriteria {
        SearchCriteria {
            bedrooms: Some(2),
            max_price: Some(3_000_000.0),
            rent_frequency: "yearly".to_string(),
            ..SearchCriteria::new("Ojodu, Lagos, Nigeria")
        }
    }

    #[test]
    fn test_criteria_defaults_from_json() {
        let criteria: SearchCriteria =
            serde_json::from_value(json!({"location": "Ikeja, Lagos"})).unwrap();
        assert_eq!(criteria.property_type, "apartment");
        assert_eq!(criteria.rent_frequency, "monthly");
        assert!(criteria.validate().is_ok());
    }

    #[test]
    fn test_criteria_validation() {
        let mut criteria = ojodu();
        criteria.location = "  ".to_string();
        criteria.max_price = Some(-5.0);
        criteria.rent_frequency = "hourly".to_string();

        let Err(StageError::InvalidCriteria(message)) = criteria.validate() else {
            panic!("expected invalid criteria");
        };
        assert!(message.contains("location must not be empty"));
        assert!(message.contains("max_price"));
        assert!(message.contains("rent_frequency"));
    }

    #[test]
    fn test_query_text() {
        assert_eq!(
            ojodu().to_query(),
            "2 bedroom apartment in Ojodu, Lagos, Nigeria under 3000000 (yearly rent)"
        );

        let bare = SearchCriteria::new("Yaba");
        assert_eq!(bare.to_query(), "bedroom apartment in Yaba (monthly rent)");
    }

    #[test]
    fn test_duplicate_write_refused() {
        let mut state = WorkflowState::new("run-1", ojodu(), "");
        assert_eq!(state.design_style, "modern minimalist");

        state.write_output(StageKey::Research, "{}".to_string()).unwrap();
        let err = state
            .write_output(StageKey::Research, "{}".to_string())
            .unwrap_err();
        assert!(matches!(err, StageError::DuplicateWrite(key) if key == "research"));

        // A retry clears the slot first
        state.clear_output(StageKey::Research);
        assert!(state.write_output(StageKey::Research, "{}".to_string()).is_ok());
    }

    #[test]
    fn test_counters_degrade_to_defaults() {
        let mut state = WorkflowState::new("run-1", ojodu(), "modern minimalist");
        state
            .write_output(
                StageKey::Research,
                json!({"listings": [{"id": "p1"}, {"id": "p2"}]}).to_string(),
            )
            .unwrap();
        state
            .write_output(StageKey::Design, "not json at all".to_string())
            .unwrap();
        state.refresh_counters();

        assert_eq!(state.counters.properties_found, 2);
        assert_eq!(state.counters.properties_approved, 2);
        assert_eq!(state.counters.properties_analyzed, 2);
        assert_eq!(state.counters.rooms_redesigned, 0);
    }

    #[test]
    fn test_counters_from_reports() {
        let mut state = WorkflowState::new("run-1", ojodu(), "modern minimalist");
        let research = json!({"properties": [{"id": "p1"}, {"id": "p2"}, {"id": "p3"}]});
        let filtered = json!({"properties": [{"id": "p1"}]});
        let design = json!({"metadata": {"total_rooms_redesigned": 4}, "properties": []});
        state.write_output(StageKey::Research, research.to_string()).unwrap();
        state.write_output(StageKey::Filtered, filtered.to_string()).unwrap();
        state.write_output(StageKey::Design, design.to_string()).unwrap();
        state.refresh_counters();

        assert_eq!(state.counters.properties_found, 3);
        assert_eq!(state.counters.properties_approved, 1);
        assert_eq!(state.counters.properties_analyzed, 1);
        assert_eq!(state.counters.rooms_redesigned, 4);
    }

    #[test]
    fn test_prose_research_counts_zero() {
        let mut state = WorkflowState::new("run-1", ojodu(), "modern minimalist");
        state
            .write_output(StageKey::Research, "I found some nice flats!".to_string())
            .unwrap();
        state.refresh_counters();
        assert_eq!(state.counters.properties_found, 0);
    }
}
