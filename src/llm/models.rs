//! Model definitions for the supported providers

use super::anthropic::AnthropicModel;
use super::gemini::GeminiModel;
use super::{AnthropicService, GeminiService, LlmService};
use std::sync::Arc;

/// LLM provider enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Gemini,
    Anthropic,
}

impl Provider {
    /// Get the display name for this provider
    pub fn display_name(self) -> &'static str {
        match self {
            Provider::Gemini => "Google",
            Provider::Anthropic => "Anthropic",
        }
    }

    /// Environment variable holding this provider's API key
    pub fn api_key_env_var(self) -> &'static str {
        match self {
            Provider::Gemini => "GOOGLE_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

/// Model definition with metadata
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// User-facing model ID (e.g., "gemini-2.5-flash")
    pub id: &'static str,
    pub provider: Provider,
    /// Human-readable description
    pub description: &'static str,
    /// Context window size in tokens
    pub context_window: usize,
    /// Factory function to create the service
    pub factory: fn(&str, Option<&str>) -> Result<Arc<dyn LlmService>, String>,
}

fn gemini(
    model: GeminiModel,
    api_key: &str,
    gateway: Option<&str>,
) -> Result<Arc<dyn LlmService>, String> {
    if api_key.is_empty() {
        return Err(format!(
            "{} requires {} or gateway",
            model.model_id(),
            Provider::Gemini.api_key_env_var()
        ));
    }
    Ok(Arc::new(GeminiService::new(api_key.to_string(), model, gateway)?))
}

fn anthropic(
    model: AnthropicModel,
    api_key: &str,
    gateway: Option<&str>,
) -> Result<Arc<dyn LlmService>, String> {
    if api_key.is_empty() {
        return Err(format!(
            "{} requires {} or gateway",
            model.model_id(),
            Provider::Anthropic.api_key_env_var()
        ));
    }
    Ok(Arc::new(AnthropicService::new(api_key.to_string(), model, gateway)?))
}

/// Get all available model definitions
pub fn all_models() -> &'static [ModelDef] {
    &[
        ModelDef {
            id: "gemini-2.5-flash",
            provider: Provider::Gemini,
            description: "Gemini 2.5 Flash (fast, default)",
            context_window: 1_048_576,
            factory: |api_key, gateway| gemini(GeminiModel::Flash25, api_key, gateway),
        },
        ModelDef {
            id: "gemini-2.5-pro",
            provider: Provider::Gemini,
            description: "Gemini 2.5 Pro (most capable Gemini)",
            context_window: 1_048_576,
            factory: |api_key, gateway| gemini(GeminiModel::Pro25, api_key, gateway),
        },
        ModelDef {
            id: "claude-4.5-sonnet",
            provider: Provider::Anthropic,
            description: "Claude Sonnet 4.5 (balanced performance)",
            context_window: 200_000,
            factory: |api_key, gateway| anthropic(AnthropicModel::Sonnet45, api_key, gateway),
        },
        ModelDef {
            id: "claude-4.5-haiku",
            provider: Provider::Anthropic,
            description: "Claude Haiku 4.5 (fast, efficient)",
            context_window: 200_000,
            factory: |api_key, gateway| anthropic(AnthropicModel::Haiku45, api_key, gateway),
        },
    ]
}

/// Model used when nothing else is configured
pub fn default_model() -> &'static ModelDef {
    &all_models()[0]
}
