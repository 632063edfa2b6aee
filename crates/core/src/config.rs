//! # Workflow Configuration
//!
//! Everything a run needs to know up front: approval policy, retry
//! budgets, guardrail thresholds, output location and model selection.
//! Passed explicitly into the workflow and crews; persisted as
//! `.homescout/config.json`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::models::{AgentRole, LlmProvider, ModelConfig};
use crate::state::io;

/// Extra attempts allowed after a guardrail rejection, per task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryBudgets {
    pub search: u32,
    pub extract: u32,
    pub validate: u32,
    pub research_report: u32,
    pub property_location: u32,
    pub location_report: u32,
    pub room_analysis: u32,
    pub design_report: u32,
}

impl Default for RetryBudgets {
    fn default() -> Self {
        Self {
            search: 2,
            extract: 2,
            validate: 2,
            research_report: 2,
            property_location: 2,
            location_report: 2,
            room_analysis: 2,
            design_report: 2,
        }
    }
}

/// Thresholds used by the research guardrails
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    /// Minimum listing URLs a search must return
    pub min_urls: usize,
    /// Minimum images per extracted listing
    pub min_images: usize,
    /// Minimum words in a listing description, when one is present
    pub min_description_words: usize,
    /// Validated listings beyond this are truncated
    pub max_listings: usize,
    /// Platforms whose listings are never accepted (case-insensitive substring match)
    pub blocked_platforms: Vec<String>,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            min_urls: 3,
            min_images: 1,
            min_description_words: 10,
            max_listings: 6,
            blocked_platforms: vec!["zillow".to_string()],
        }
    }
}

/// Configuration for one workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Pause after search for a human to approve listings
    pub human_in_loop: bool,
    /// Bound on human-requested search retries
    pub max_search_retries: u32,
    /// Properties analyzed concurrently by the location crew
    pub max_properties: usize,
    /// Gate the compiled research report with its guardrail
    pub guard_research_report: bool,
    pub retry_budgets: RetryBudgets,
    pub guardrails: GuardrailConfig,
    /// Where crew reports and the final report are written
    pub output_dir: PathBuf,
    /// Region hint for geocoding, ISO 3166 alpha-2 (e.g. "NG")
    pub country_hint: Option<String>,
    /// Global LLM provider; role defaults apply when unset
    pub global_provider: Option<LlmProvider>,
    /// Global model to use for all agents
    pub global_model: Option<String>,
    /// Base URL override for LLM API (for OpenAI-compatible endpoints)
    pub base_url: Option<String>,
    /// Per-agent model overrides (agent_id -> model name)
    pub per_agent_models: HashMap<String, String>,
    /// Per-agent provider overrides (agent_id -> provider)
    pub per_agent_providers: HashMap<String, LlmProvider>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            human_in_loop: false,
            max_search_retries: 3,
            max_properties: 6,
            guard_research_report: true,
            retry_budgets: RetryBudgets::default(),
            guardrails: GuardrailConfig::default(),
            output_dir: PathBuf::from("output"),
            country_hint: None,
            global_provider: None,
            global_model: None,
            base_url: None,
            per_agent_models: HashMap::new(),
            per_agent_providers: HashMap::new(),
        }
    }
}

impl WorkflowConfig {
    /// Resolve the model for an agent: per-agent override -> global -> role default
    pub fn model_for(&self, role: AgentRole) -> ModelConfig {
        let role_default = ModelConfig::for_role(role);
        let agent_id = role.as_str();

        let provider = self
            .per_agent_providers
            .get(agent_id)
            .or(self.global_provider.as_ref())
            .cloned()
            .unwrap_or_else(|| role_default.provider.clone());

        let model = self
            .per_agent_models
            .get(agent_id)
            .or(self.global_model.as_ref())
            .cloned()
            .unwrap_or_else(|| {
                if provider == role_default.provider {
                    role_default.model.clone()
                } else {
                    provider.default_model().to_string()
                }
            });

        let base_url = if provider.supports_base_url() {
            self.base_url.clone()
        } else {
            None
        };

        ModelConfig {
            provider,
            model,
            base_url,
        }
    }

    /// Default location: `<runtime dir>/config.json`
    pub fn default_path() -> PathBuf {
        io::get_runtime_path().join("config.json")
    }

    /// Load from disk. A missing or unreadable file yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Ignoring malformed config {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Try to build a client for every agent role, reporting which ones lack credentials
    pub fn check_credentials(&self) -> Vec<(AgentRole, anyhow::Result<()>)> {
        [
            AgentRole::Scraper,
            AgentRole::Extractor,
            AgentRole::Validator,
            AgentRole::LocationAnalyzer,
            AgentRole::DesignCoordinator,
        ]
        .into_iter()
        .map(|role| (role, self.model_for(role).create_llm().map(|_| ())))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_config_default() {
        let config = WorkflowConfig::default();
        assert!(!config.human_in_loop);
        assert_eq!(config.max_search_retries, 3);
        assert_eq!(config.max_properties, 6);
        assert_eq!(config.retry_budgets.search, 2);
        assert_eq!(config.guardrails.min_urls, 3);
        assert_eq!(config.guardrails.blocked_platforms, vec!["zillow"]);
    }

    #[test]
    fn test_model_resolution_order() {
        let mut config = WorkflowConfig::default();
        assert_eq!(
            config.model_for(AgentRole::Validator).provider,
            LlmProvider::OpenRouter
        );

        config.global_provider = Some(LlmProvider::Anthropic);
        let scraper = config.model_for(AgentRole::Scraper);
        assert_eq!(scraper.provider, LlmProvider::Anthropic);
        assert_eq!(scraper.model, LlmProvider::Anthropic.default_model());

        config
            .per_agent_models
            .insert("scraper".to_string(), "claude-3-5-haiku-latest".to_string());
        assert_eq!(
            config.model_for(AgentRole::Scraper).model,
            "claude-3-5-haiku-latest"
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: WorkflowConfig =
            serde_json::from_str(r#"{"human_in_loop": true, "guardrails": {"min_urls": 5}}"#)
                .unwrap();
        assert!(config.human_in_loop);
        assert_eq!(config.guardrails.min_urls, 5);
        assert_eq!(config.guardrails.max_listings, 6);
        assert_eq!(config.retry_budgets.design_report, 2);
    }

    #[tokio::test]
    async fn test_load_missing_file_is_default() {
        let config = WorkflowConfig::load(".homescout/does_not_exist.json").await;
        assert_eq!(config.max_properties, 6);
    }

    #[test]
    fn test_save_then_load() {
        let path = ".homescout/test_config.json";
        let mut config = WorkflowConfig::default();
        config.human_in_loop = true;
        config.country_hint = Some("ng".to_string());

        tokio_test::block_on(config.save(path)).unwrap();
        let loaded = tokio_test::block_on(WorkflowConfig::load(path));
        assert!(loaded.human_in_loop);
        assert_eq!(loaded.country_hint.as_deref(), Some("ng"));

        let _ = std::fs::remove_file(path);
    }
}
