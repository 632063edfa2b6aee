//! # Models
//!
//! LLM provider and model selection for every agent in the three crews.
//! Each agent role has a built-in default (cheap flash models for URL
//! discovery, a stronger model for extraction, a low-cost validator);
//! [`crate::config::WorkflowConfig`] can override any of them.

use radkit::models::providers::{
    AnthropicLlm, DeepSeekLlm, GeminiLlm, GrokLlm, OpenAILlm, OpenRouterLlm,
};
use radkit::models::BaseLlm;
use serde::{Deserialize, Serialize};

/// Supported LLM providers
///
/// - Anthropic (Claude) - `ANTHROPIC_API_KEY`
/// - OpenAI (GPT) - `OPENAI_API_KEY`
/// - Gemini (Google) - `GEMINI_API_KEY`
/// - OpenRouter (Gateway) - `OPENROUTER_API_KEY`
/// - Grok (xAI) - `XAI_API_KEY`
/// - DeepSeek - `DEEPSEEK_API_KEY`
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAI,
    Gemini,
    OpenRouter,
    Grok,
    DeepSeek,
}

impl LlmProvider {
    /// Default model when nothing more specific is configured
    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "claude-sonnet-4-20250514",
            LlmProvider::OpenAI => "gpt-4o",
            LlmProvider::Gemini => "gemini-2.5-flash",
            LlmProvider::OpenRouter => "deepseek/deepseek-v3.2",
            LlmProvider::Grok => "grok-2",
            LlmProvider::DeepSeek => "deepseek-chat",
        }
    }

    /// Whether this provider supports custom base URL
    pub fn supports_base_url(&self) -> bool {
        matches!(self, LlmProvider::OpenAI)
    }
}

/// The agents that make LLM calls, keyed by `as_str()` in config overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    /// Finds listing URLs (research crew)
    Scraper,
    /// Pulls structured listings out of pages (research crew)
    Extractor,
    /// Scores and annotates extracted listings (research crew)
    Validator,
    /// Per-property amenity analysis (location crew)
    LocationAnalyzer,
    /// Room identification from listing photos (design crew)
    DesignCoordinator,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Scraper => "scraper",
            AgentRole::Extractor => "extractor",
            AgentRole::Validator => "validator",
            AgentRole::LocationAnalyzer => "location_analyzer",
            AgentRole::DesignCoordinator => "design_coordinator",
        }
    }
}

/// Provider + model for one agent.
///
/// ```rust,ignore
/// use homescout_core::models::{AgentRole, ModelConfig};
///
/// let config = ModelConfig::for_role(AgentRole::Extractor);
/// let llm = config.create_llm()?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// LLM provider to use
    #[serde(default)]
    pub provider: LlmProvider,
    /// Model name (e.g., "gemini-2.5-pro", "deepseek/deepseek-v3.2")
    pub model: String,
    /// Optional base URL override for OpenAI-compatible APIs
    pub base_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Anthropic,
            model: "claude-sonnet-4-20250514".to_string(),
            base_url: None,
        }
    }
}

impl ModelConfig {
    /// Built-in default for an agent role
    pub fn for_role(role: AgentRole) -> Self {
        match role {
            AgentRole::Scraper => Self::with_provider(LlmProvider::Gemini, "gemini-2.5-flash"),
            AgentRole::Extractor => Self::with_provider(LlmProvider::Gemini, "gemini-2.5-pro"),
            AgentRole::Validator => {
                Self::with_provider(LlmProvider::OpenRouter, "deepseek/deepseek-v3.2")
            }
            AgentRole::LocationAnalyzer | AgentRole::DesignCoordinator => Self::default(),
        }
    }

    /// Create config for a specific provider
    pub fn with_provider(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            base_url: None,
        }
    }

    /// Set base URL (for OpenAI-compatible endpoints)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Build the provider client. API keys come from the environment.
    pub fn create_llm(&self) -> anyhow::Result<Box<dyn BaseLlm + Send + Sync>> {
        match self.provider {
            LlmProvider::Anthropic => Ok(Box::new(AnthropicLlm::from_env(&self.model)?)),
            LlmProvider::OpenAI => {
                let llm = if let Some(base_url) = &self.base_url {
                    OpenAILlm::from_env(&self.model)?.with_base_url(base_url)
                } else {
                    OpenAILlm::from_env(&self.model)?
                };
                Ok(Box::new(llm))
            }
            LlmProvider::Gemini => Ok(Box::new(GeminiLlm::from_env(&self.model)?)),
            LlmProvider::OpenRouter => Ok(Box::new(OpenRouterLlm::from_env(&self.model)?)),
            LlmProvider::Grok => Ok(Box::new(GrokLlm::from_env(&self.model)?)),
            LlmProvider::DeepSeek => Ok(Box::new(DeepSeekLlm::from_env(&self.model)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ModelConfig::default();
        assert_eq!(config.provider, LlmProvider::Anthropic);
        assert!(config.model.contains("claude"));
    }

    #[test]
    fn test_role_defaults() {
        let validator = ModelConfig::for_role(AgentRole::Validator);
        assert_eq!(validator.provider, LlmProvider::OpenRouter);
        assert!(validator.model.starts_with("deepseek/"));

        let extractor = ModelConfig::for_role(AgentRole::Extractor);
        assert_eq!(extractor.provider, LlmProvider::Gemini);
        assert!(extractor.model.contains("pro"));
    }

    #[test]
    fn test_base_url_support() {
        assert!(LlmProvider::OpenAI.supports_base_url());
        assert!(!LlmProvider::Gemini.supports_base_url());
    }

    #[test]
    fn test_provider_serialization() {
        let config = ModelConfig::with_provider(LlmProvider::OpenRouter, "deepseek/deepseek-v3.2");
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"openrouter\""));
    }
}
