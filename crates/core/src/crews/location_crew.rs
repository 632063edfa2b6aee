//! # Location Crew
//!
//! One analyst run per property (scatter), guarded by
//! [`PropertyLocationGuardrail`], then a deterministic report with a
//! cross-property comparison (gather), guarded by [`LocationReportGuardrail`]
//! and written to `<output_dir>/location_intelligence.json`.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinSet;

use super::tools::geo_tools;
use super::{
    keys, prompts, property_records, record_id, required_input, Crew, TaskInputs, TaskResult,
};
use crate::config::WorkflowConfig;
use crate::error::StageError;
use crate::geo::{AmenityCategory, AIRPORT_RADIUS_METERS, DEFAULT_RADIUS_METERS};
use crate::guardrail::{
    retry_instructions, run_guarded, Guardrail, LocationReportGuardrail,
    PropertyLocationGuardrail, RawStageOutput, Validation,
};
use crate::models::{AgentRole, ModelConfig};
use crate::run_llm_worker;
use crate::schema::location::{
    CategoryLeader, LocationComparison, LocationMetadata, LocationReport, PropertyLocation,
    RankedProperty, PROPERTY_LOCATION_SCHEMA,
};
use crate::state::io;

pub const REPORT_FILE: &str = "location_intelligence.json";

pub struct LocationCrew {
    config: WorkflowConfig,
}

/// What one spawned analysis needs
struct AnalysisJob {
    index: usize,
    property_id: String,
    address: String,
    region: Option<String>,
    model: Arc<ModelConfig>,
    retry_budget: u32,
}

impl LocationCrew {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    async fn analyze_property(job: AnalysisJob) -> anyhow::Result<PropertyLocation> {
        let guard = PropertyLocationGuardrail;
        let region = job.region.as_deref().unwrap_or("none");
        let base_prompt = format!(
            "Property id: {}\nAddress: {}\nRegion hint: {}\n\n{}",
            job.property_id,
            job.address,
            region,
            PROPERTY_LOCATION_SCHEMA.instructions()
        );

        let payload = run_guarded("analyze_property", &guard, job.retry_budget, |feedback| {
            let prompt = format!("{}{}", base_prompt, retry_instructions(feedback.as_deref()));
            let model = job.model.clone();
            async move {
                let output = run_llm_worker!(
                    model.as_ref(),
                    PropertyLocation,
                    prompts::LOCATION_ANALYZER,
                    prompt,
                    geo_tools::score_amenities,
                    geo_tools::geocode_address,
                    geo_tools::nearby_places,
                )?;
                RawStageOutput::from_typed(&output)
            }
        })
        .await?;

        let mut location: PropertyLocation = serde_json::from_value(payload)?;
        // The analyst must not renumber properties.
        location.property_id = job.property_id;
        Ok(location)
    }

    /// Analyze every property concurrently; failed analyses are dropped and logged
    async fn analyze_all(&self, properties: &[Value]) -> Vec<PropertyLocation> {
        let model = Arc::new(self.config.model_for(AgentRole::LocationAnalyzer));
        let mut join_set = JoinSet::new();
        let mut results: Vec<(usize, PropertyLocation)> = Vec::new();

        // SCATTER
        for (index, property) in properties.iter().take(self.config.max_properties).enumerate() {
            let Some(property_id) = record_id(property).map(str::to_string) else {
                tracing::warn!(crew = "location", index, "Skipping property without id");
                continue;
            };
            let address = property
                .get("address")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or("");

            if address.is_empty() {
                results.push((index, unlocated(&property_id, "Listing has no address")));
                continue;
            }

            let job = AnalysisJob {
                index,
                property_id,
                address: address.to_string(),
                region: self.config.country_hint.clone(),
                model: model.clone(),
                retry_budget: self.config.retry_budgets.property_location,
            };
            join_set.spawn(async move {
                let index = job.index;
                let property_id = job.property_id.clone();
                (index, property_id, Self::analyze_property(job).await)
            });
        }

        // GATHER
        let mut errors = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, _, Ok(location))) => results.push((index, location)),
                Ok((_, property_id, Err(e))) => errors.push(format!("{}: {}", property_id, e)),
                Err(e) => errors.push(format!("Task panicked: {}", e)),
            }
        }
        if !errors.is_empty() {
            tracing::warn!(
                crew = "location",
                "Location analysis had {} errors: {:?}",
                errors.len(),
                errors
            );
        }

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, location)| location).collect()
    }
}

fn unlocated(property_id: &str, reason: &str) -> PropertyLocation {
    PropertyLocation {
        property_id: property_id.to_string(),
        address: String::new(),
        geocoded: false,
        coordinates: None,
        formatted_address: None,
        amenities: Vec::new(),
        overall_score: None,
        advantages: Vec::new(),
        disadvantages: Vec::new(),
        notes: vec![reason.to_string()],
    }
}

/// Rank geocoded properties and pick the leader in each category
pub fn compare_locations(properties: &[PropertyLocation]) -> LocationComparison {
    let mut scored: Vec<(&str, f64)> = properties
        .iter()
        .filter(|p| p.geocoded)
        .filter_map(|p| p.overall_score.map(|s| (p.property_id.as_str(), s)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let ranking: Vec<RankedProperty> = scored
        .iter()
        .enumerate()
        .map(|(i, (id, score))| RankedProperty {
            rank: i + 1,
            property_id: id.to_string(),
            overall_score: *score,
        })
        .collect();

    let best_by_category: Vec<CategoryLeader> = AmenityCategory::ALL
        .iter()
        .filter_map(|category| {
            properties
                .iter()
                .filter(|p| p.geocoded)
                .filter_map(|p| {
                    p.amenities
                        .iter()
                        .find(|a| a.category == category.as_str())
                        .map(|a| (p.property_id.as_str(), a.score))
                })
                .filter(|(_, score)| *score > 0.0)
                .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(a.0)))
                .map(|(id, score)| CategoryLeader {
                    category: category.as_str().to_string(),
                    property_id: id.to_string(),
                    score,
                })
        })
        .collect();

    let best_overall = ranking.first().map(|r| r.property_id.clone());
    let summary = match ranking.first() {
        Some(best) => format!(
            "{} of {} properties scored; {} has the best overall amenity access ({:.1}/10).",
            ranking.len(),
            properties.len(),
            best.property_id,
            best.overall_score
        ),
        None => "No property could be geocoded, so none were scored.".to_string(),
    };

    LocationComparison {
        ranking,
        best_overall,
        best_by_category,
        summary,
    }
}

/// Assemble the report; the comparison is present whenever there is more than one property
pub fn compile_location_report(properties: Vec<PropertyLocation>) -> LocationReport {
    let comparison = (properties.len() > 1).then(|| compare_locations(&properties));
    LocationReport {
        metadata: LocationMetadata {
            total_properties: properties.len(),
            geocoded_properties: properties.iter().filter(|p| p.geocoded).count(),
            search_radius_km: DEFAULT_RADIUS_METERS / 1000.0,
            airport_radius_km: AIRPORT_RADIUS_METERS / 1000.0,
            generated_at: Utc::now().to_rfc3339(),
        },
        properties,
        comparison,
    }
}

#[async_trait]
impl Crew for LocationCrew {
    fn name(&self) -> &str {
        "location"
    }

    async fn kickoff(&self, inputs: &TaskInputs) -> anyhow::Result<TaskResult> {
        let report: Value = serde_json::from_str(required_input(inputs, keys::PROPERTIES)?)?;
        let properties = property_records(&report);
        if properties.is_empty() {
            anyhow::bail!("No properties to analyze");
        }

        tracing::info!(crew = "location", properties = properties.len(), "Analyzing locations");
        let analyzed = self.analyze_all(&properties).await;
        if analyzed.is_empty() {
            anyhow::bail!("Every property analysis failed");
        }

        let report = serde_json::to_value(compile_location_report(analyzed))?;
        let verdict = LocationReportGuardrail.validate(&RawStageOutput::Structured(report.clone()));
        if let Validation::Rejected { reason } = verdict {
            return Err(StageError::GuardrailExhausted {
                stage: "compile_location_report".to_string(),
                attempts: 1,
                reason,
            }
            .into());
        }

        let path = io::write_json_file(&self.config.output_dir, REPORT_FILE, &report).await?;
        tracing::info!(crew = "location", "Location report written to {:?}", path);

        Ok(TaskResult::new(serde_json::to_string_pretty(&report)?))
    }
}
