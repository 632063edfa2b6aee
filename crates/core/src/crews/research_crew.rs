//! # Research Crew
//!
//! Four sequential tasks, each gated by its own guardrail:
//!
//! 1. `search_listings` - listing page URLs via Tavily search
//! 2. `extract_listings` - structured listings via Tavily extract
//! 3. `validate_data` - dedupe, filter and score; truncated to the listing cap
//! 4. `compile_research_report` - deterministic, assigns ids `p1..pn`
//!
//! The compiled report is written to `<output_dir>/research_results.json`
//! and returned as the crew's raw output.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::BTreeSet;

use super::tools::search_tools;
use super::{keys, prompts, required_input, Crew, TaskInputs, TaskResult};
use crate::config::WorkflowConfig;
use crate::guardrail::{
    retry_instructions, run_guarded, ExtractedListingsGuardrail, RawStageOutput,
    SearchResultsGuardrail, ValidatedListingsGuardrail,
};
use crate::models::AgentRole;
use crate::run_llm_function;
use crate::run_llm_worker;
use crate::schema::listing::{
    ExtractListingsOutput, SearchListingsOutput, ValidateListingsOutput, EXTRACT_SCHEMA,
    SEARCH_SCHEMA, VALIDATE_SCHEMA,
};
use crate::state::io;

pub const REPORT_FILE: &str = "research_results.json";

pub struct ResearchCrew {
    config: WorkflowConfig,
}

impl ResearchCrew {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    async fn search_listings(&self, query: &str, extra_context: &str) -> anyhow::Result<Value> {
        let model = self.config.model_for(AgentRole::Scraper);
        let guard = SearchResultsGuardrail::new(&self.config.guardrails);
        let blocked = self.config.guardrails.blocked_platforms.join(", ");
        let base_prompt = format!(
            "Find individual rental listing pages for: {}\n\
             Return at least {} listing URLs.\n\
             Blocked platforms (never return these): {}\n{}\n\n{}",
            query,
            self.config.guardrails.min_urls,
            blocked,
            extra_context,
            SEARCH_SCHEMA.instructions()
        );

        let payload = run_guarded(
            "search_listings",
            &guard,
            self.config.retry_budgets.search,
            |feedback| {
                let prompt = format!("{}{}", base_prompt, retry_instructions(feedback.as_deref()));
                let model = model.clone();
                async move {
                    let output = run_llm_worker!(
                        &model,
                        SearchListingsOutput,
                        prompts::SCRAPER,
                        prompt,
                        search_tools::tavily_search,
                    )?;
                    RawStageOutput::from_typed(&output)
                }
            },
        )
        .await?;
        Ok(payload)
    }

    async fn extract_listings(&self, search: &Value) -> anyhow::Result<Value> {
        let model = self.config.model_for(AgentRole::Extractor);
        let guard = ExtractedListingsGuardrail::new(&self.config.guardrails);
        let urls = serde_json::to_string_pretty(&search["urls"])?;
        let base_prompt = format!(
            "Extract one listing record from each of these pages:\n{}\n\n\
             Each listing needs at least {} image URL(s) and, when the page has one,\n\
             a description of at least {} words.\n\n{}",
            urls,
            self.config.guardrails.min_images,
            self.config.guardrails.min_description_words,
            EXTRACT_SCHEMA.instructions()
        );

        let payload = run_guarded(
            "extract_listings",
            &guard,
            self.config.retry_budgets.extract,
            |feedback| {
                let prompt = format!("{}{}", base_prompt, retry_instructions(feedback.as_deref()));
                let model = model.clone();
                async move {
                    let output = run_llm_worker!(
                        &model,
                        ExtractListingsOutput,
                        prompts::EXTRACTOR,
                        prompt,
                        search_tools::tavily_extract,
                    )?;
                    RawStageOutput::from_typed(&output)
                }
            },
        )
        .await?;
        Ok(payload)
    }

    async fn validate_listings(&self, query: &str, extracted: &Value) -> anyhow::Result<Value> {
        let model = self.config.model_for(AgentRole::Validator);
        let guard = ValidatedListingsGuardrail::new(&self.config.guardrails);
        let listings = serde_json::to_string_pretty(&extracted["listings"])?;
        let base_prompt = format!(
            "Search: {}\n\nReview these extracted listings:\n{}\n\n\
             Return at most {} listings.\n\n{}",
            query,
            listings,
            self.config.guardrails.max_listings,
            VALIDATE_SCHEMA.instructions()
        );

        let payload = run_guarded(
            "validate_data",
            &guard,
            self.config.retry_budgets.validate,
            |feedback| {
                let prompt = format!("{}{}", base_prompt, retry_instructions(feedback.as_deref()));
                let model = model.clone();
                async move {
                    let output = run_llm_function!(
                        &model,
                        ValidateListingsOutput,
                        prompts::VALIDATOR,
                        prompt
                    )?;
                    RawStageOutput::from_typed(&output)
                }
            },
        )
        .await?;
        Ok(payload)
    }
}

#[async_trait]
impl Crew for ResearchCrew {
    fn name(&self) -> &str {
        "research"
    }

    async fn kickoff(&self, inputs: &TaskInputs) -> anyhow::Result<TaskResult> {
        let query = required_input(inputs, keys::SEARCH_QUERY)?;

        let mut extra_context = String::new();
        if let Some(feedback) = inputs.get(keys::REVIEWER_FEEDBACK) {
            extra_context.push_str(&format!(
                "\nReviewer feedback on the last search: {}\n",
                feedback
            ));
        }
        if let Some(feedback) = inputs.get(keys::GUARDRAIL_FEEDBACK) {
            extra_context.push_str(&format!(
                "\nThe last research report was rejected:\n{}\n",
                feedback
            ));
        }

        tracing::info!(crew = "research", query, "Searching listings");
        let search = self.search_listings(query, &extra_context).await?;

        tracing::info!(
            crew = "research",
            urls = search["urls"].as_array().map(Vec::len).unwrap_or(0),
            "Extracting listings"
        );
        let extracted = self.extract_listings(&search).await?;

        tracing::info!(crew = "research", "Validating listings");
        let validated = self.validate_listings(query, &extracted).await?;

        let report = compile_research_report(query, &validated);
        let path = io::write_json_file(&self.config.output_dir, REPORT_FILE, &report).await?;
        tracing::info!(
            crew = "research",
            properties = report["metadata"]["total_properties"].as_u64().unwrap_or(0),
            "Research report written to {:?}",
            path
        );

        Ok(TaskResult::new(serde_json::to_string_pretty(&report)?))
    }
}

/// Build the research report from validated listings.
///
/// Listings keep their order and get ids `p1..pn`; any id the validator
/// invented is replaced.
pub fn compile_research_report(search_query: &str, validated: &Value) -> Value {
    let listings = validated
        .get("listings")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut platforms = BTreeSet::new();
    let properties: Vec<Value> = listings
        .into_iter()
        .enumerate()
        .map(|(i, mut listing)| {
            if let Some(platform) = listing.get("platform").and_then(Value::as_str) {
                if !platform.trim().is_empty() {
                    platforms.insert(platform.trim().to_lowercase());
                }
            }
            if let Some(obj) = listing.as_object_mut() {
                obj.insert("id".to_string(), json!(format!("p{}", i + 1)));
            }
            listing
        })
        .collect();

    json!({
        "metadata": {
            "search_query": search_query,
            "total_properties": properties.len(),
            "platforms": platforms.into_iter().collect::<Vec<_>>(),
            "generated_at": Utc::now().to_rfc3339(),
        },
        "properties": properties,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guardrail::{Guardrail, ResearchReportGuardrail};

    fn validated() -> Value {
        json!({
            "listings": [
                {
                    "id": "abc",
                    "listing_url": "https://www.propertypro.ng/property/1",
                    "platform": "PropertyPro",
                    "address": "Ojodu Berger, Lagos",
                    "price": "₦2,500,000",
                    "images": ["https://images.propertypro.ng/1.jpg"],
                    "contact": {"phone": "+2348000000000"},
                    "quality_score": 80
                },
                {
                    "listing_url": "https://nigeriapropertycentre.com/for-rent/2",
                    "platform": "nigeriapropertycentre",
                    "address": "Omole Phase 1, Ojodu",
                    "price": "₦2,800,000",
                    "images": ["https://images.npc.com/2.jpg"],
                    "contact": {"agency": "Lekki Homes"},
                    "quality_score": 74
                }
            ],
            "summary": {"total_listings": 2}
        })
    }

    #[test]
    fn test_compile_assigns_sequential_ids() {
        let report = compile_research_report("2 bedroom apartment in Ojodu", &validated());
        let properties = report["properties"].as_array().unwrap();
        assert_eq!(properties[0]["id"], "p1");
        assert_eq!(properties[1]["id"], "p2");
        assert_eq!(report["metadata"]["total_properties"], 2);
        assert_eq!(
            report["metadata"]["platforms"],
            json!(["nigeriapropertycentre", "propertypro"])
        );
    }

    #[test]
    fn test_compiled_report_passes_guardrail() {
        let report = compile_research_report("2 bedroom apartment in Ojodu", &validated());
        let guard = ResearchReportGuardrail::new(&WorkflowConfig::default().guardrails);
        let verdict = guard.validate(&RawStageOutput::Structured(report));
        assert!(verdict.is_accepted(), "{:?}", verdict);
    }

    #[test]
    fn test_compile_without_listings() {
        let report = compile_research_report("q", &json!({"summary": {}}));
        assert_eq!(report["metadata"]["total_properties"], 0);
        assert!(report["properties"].as_array().unwrap().is_empty());
    }
}
