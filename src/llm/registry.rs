//! Model registry for managing available LLM providers

use super::models::default_model;
use super::{all_models, LlmService, LoggingService, ModelDef, Provider};
use std::collections::HashMap;
use std::sync::Arc;

/// Configuration for LLM providers
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub google_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    /// LLM gateway base URL; the gateway holds the provider credentials
    pub gateway: Option<String>,
    /// Default model ID
    pub default_model: Option<String>,
}

/// Registry of available LLM models
pub struct ModelRegistry {
    services: HashMap<String, Arc<dyn LlmService>>,
    default_model: String,
}

impl ModelRegistry {
    /// Create an empty registry for testing purposes
    #[cfg(test)]
    pub fn new_empty() -> Self {
        Self {
            services: HashMap::new(),
            default_model: "test-model".to_string(),
        }
    }

    pub fn new(config: &LlmConfig) -> Self {
        let mut services: HashMap<String, Arc<dyn LlmService>> = HashMap::new();

        for model_def in all_models() {
            match Self::try_create_model(model_def, config) {
                Some(Ok(service)) => {
                    services.insert(model_def.id.to_string(), service);
                }
                Some(Err(e)) => {
                    tracing::warn!(model = model_def.id, error = %e, "Model unavailable");
                }
                None => {}
            }
        }

        let default_model = config
            .default_model
            .clone()
            .or_else(|| {
                let preferred = default_model().id;
                if services.contains_key(preferred) {
                    Some(preferred.to_string())
                } else {
                    // Fall back to the first available model in definition order
                    all_models()
                        .iter()
                        .find(|m| services.contains_key(m.id))
                        .map(|m| m.id.to_string())
                }
            })
            .unwrap_or_else(|| default_model().id.to_string());

        Self {
            services,
            default_model,
        }
    }

    /// `None` when the provider has no credentials configured
    fn try_create_model(
        model_def: &ModelDef,
        config: &LlmConfig,
    ) -> Option<Result<Arc<dyn LlmService>, String>> {
        // In gateway mode the gateway handles authentication
        let api_key = if config.gateway.is_some() {
            "implicit".to_string()
        } else {
            let key = match model_def.provider {
                Provider::Gemini => config.google_api_key.as_ref()?,
                Provider::Anthropic => config.anthropic_api_key.as_ref()?,
            };
            if key.is_empty() {
                return None;
            }
            key.clone()
        };

        Some(
            (model_def.factory)(&api_key, config.gateway.as_deref())
                .map(|service| Arc::new(LoggingService::new(service)) as Arc<dyn LlmService>),
        )
    }

    /// Register a service under an explicit ID
    #[cfg(test)]
    pub fn insert(&mut self, model_id: impl Into<String>, service: Arc<dyn LlmService>) {
        self.services.insert(model_id.into(), service);
    }

    /// Get a model by ID
    pub fn get(&self, model_id: &str) -> Option<Arc<dyn LlmService>> {
        self.services.get(model_id).cloned()
    }

    /// Get the default model
    pub fn default(&self) -> Option<Arc<dyn LlmService>> {
        self.get(&self.default_model)
    }

    /// Get the default model ID
    pub fn default_model_id(&self) -> &str {
        &self.default_model
    }

    /// List all available model IDs
    pub fn available_models(&self) -> Vec<String> {
        let mut models: Vec<_> = self.services.keys().cloned().collect();
        models.sort();
        models
    }

    /// Get detailed information about available models
    pub fn available_model_info(&self) -> Vec<crate::api::ModelInfo> {
        all_models()
            .iter()
            .filter(|model_def| self.services.contains_key(model_def.id))
            .map(|model_def| crate::api::ModelInfo {
                id: model_def.id.to_string(),
                provider: model_def.provider.display_name().to_string(),
                description: model_def.description.to_string(),
                context_window: model_def.context_window,
                default: model_def.id == self.default_model,
            })
            .collect()
    }

    /// Check if any models are available
    pub fn has_models(&self) -> bool {
        !self.services.is_empty()
    }
}
