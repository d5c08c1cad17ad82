//! # Groundwork Models
//!
//! Centralized LLM configuration types. These sit below both the stage
//! agents and the flow orchestration so either side can pick a provider
//! without pulling in the other.

use radkit::models::providers::{AnthropicLlm, GeminiLlm, OpenAILlm};
use radkit::models::BaseLlm;
use serde::{Deserialize, Serialize};

/// Supported LLM providers
///
/// Each provider loads its API key from the environment:
/// - OpenAI (GPT) - `OPENAI_API_KEY`
/// - Gemini (Google) - `GEMINI_API_KEY`
/// - Anthropic (Claude) - `ANTHROPIC_API_KEY`
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    #[serde(rename = "openai")]
    OpenAI,
    Gemini,
    Anthropic,
}

impl LlmProvider {
    /// Get all available providers
    pub fn all() -> Vec<LlmProvider> {
        vec![
            LlmProvider::OpenAI,
            LlmProvider::Gemini,
            LlmProvider::Anthropic,
        ]
    }

    /// Display name for logs and UI
    pub fn display_name(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "OpenAI",
            LlmProvider::Gemini => "Gemini",
            LlmProvider::Anthropic => "Anthropic",
        }
    }

    /// Whether this provider supports a custom base URL
    pub fn supports_base_url(&self) -> bool {
        matches!(self, LlmProvider::OpenAI)
    }
}

/// Configuration for LLM model selection
///
/// Used by every agent in the system. Supports per-stage overrides via
/// [`ModelConfig::for_stage`] so a cheap model can run the intake stages
/// while a stronger one writes narrative sections.
///
/// ## Example
/// ```rust,ignore
/// use groundwork_core::models::{ModelConfig, LlmProvider};
///
/// // Default OpenAI gpt-4o-mini
/// let config = ModelConfig::default();
///
/// // Specific provider and model
/// let config = ModelConfig::with_provider(LlmProvider::Gemini, "gemini-2.0-flash");
///
/// // Create LLM client
/// let llm = config.create_llm()?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// LLM provider to use
    #[serde(default)]
    pub provider: LlmProvider,
    /// Model name (e.g., "gpt-4o-mini", "gemini-2.0-flash")
    pub model: String,
    /// Optional base URL override for OpenAI-compatible APIs
    pub base_url: Option<String>,
    /// Per-stage model overrides, keyed by stage key (e.g. "idea_evaluation")
    #[serde(default, skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub stage_models: std::collections::HashMap<String, String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            stage_models: Default::default(),
        }
    }
}

impl ModelConfig {
    /// Create a new model config with the default provider (OpenAI)
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            model: model.into(),
            base_url: None,
            stage_models: Default::default(),
        }
    }

    /// Create config for a specific provider
    pub fn with_provider(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            base_url: None,
            stage_models: Default::default(),
        }
    }

    /// Set base URL (for OpenAI-compatible endpoints)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Register a model override for one stage key
    pub fn with_stage_model(mut self, stage_key: impl Into<String>, model: impl Into<String>) -> Self {
        self.stage_models.insert(stage_key.into(), model.into());
        self
    }

    /// Resolve the effective config for one stage key, applying any override
    pub fn for_stage(&self, stage_key: &str) -> ModelConfig {
        let mut resolved = self.clone();
        if let Some(model) = self.stage_models.get(stage_key) {
            resolved.model = model.clone();
        }
        resolved.stage_models = Default::default();
        resolved
    }

    /// Create an LLM client based on the configured provider
    ///
    /// Each provider uses `from_env()` to load API keys from environment
    /// variables.
    pub fn create_llm(&self) -> anyhow::Result<Box<dyn BaseLlm + Send + Sync>> {
        match self.provider {
            LlmProvider::OpenAI => {
                let llm = if let Some(base_url) = &self.base_url {
                    OpenAILlm::from_env(&self.model)?.with_base_url(base_url)
                } else {
                    OpenAILlm::from_env(&self.model)?
                };
                Ok(Box::new(llm))
            }
            LlmProvider::Gemini => Ok(Box::new(GeminiLlm::from_env(&self.model)?)),
            LlmProvider::Anthropic => Ok(Box::new(AnthropicLlm::from_env(&self.model)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ModelConfig::default();
        assert_eq!(config.provider, LlmProvider::OpenAI);
        assert!(config.model.contains("gpt"));
    }

    #[test]
    fn test_provider_display_names() {
        assert_eq!(LlmProvider::OpenAI.display_name(), "OpenAI");
        assert_eq!(LlmProvider::Gemini.display_name(), "Gemini");
    }

    #[test]
    fn test_base_url_support() {
        assert!(LlmProvider::OpenAI.supports_base_url());
        assert!(!LlmProvider::Gemini.supports_base_url());
    }

    #[test]
    fn test_stage_override() {
        let config = ModelConfig::default().with_stage_model("narrative", "gpt-4o");
        assert_eq!(config.for_stage("narrative").model, "gpt-4o");
        assert_eq!(config.for_stage("idea_evaluation").model, "gpt-4o-mini");
        assert!(config.for_stage("narrative").stage_models.is_empty());
    }

    #[test]
    fn test_model_config_serialization() {
        let config = ModelConfig::with_provider(LlmProvider::Gemini, "gemini-2.0-flash");
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("gemini"));
        assert!(json.contains("gemini-2.0-flash"));
    }
}
