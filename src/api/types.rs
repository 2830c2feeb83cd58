//! API request and response types

use crate::history::Turn;
use serde::{Deserialize, Serialize};

/// Request to answer one question
#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    /// Connection descriptor of the database to query
    pub db_uri: String,
    pub question: String,
    #[serde(default)]
    pub include_transcript: bool,
    /// Oracle model; the registry default when absent
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnswerResponse {
    pub answer: String,
    pub iterations: u32,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<Vec<Turn>>,
}

/// A transcript previously returned by `/api/answer`
#[derive(Debug, Deserialize)]
pub struct ReplayRequest {
    pub transcript: Vec<Turn>,
}

#[derive(Debug, Serialize)]
pub struct ReplayResponse {
    /// Answer the transcript leads to
    pub answer: String,
    pub turns: usize,
}

/// Model information with metadata
#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider: String,
    pub description: String,
    pub context_window: usize,
    pub default: bool,
}

/// Response for model list
#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
    pub default: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            stage: None,
        }
    }

    #[must_use]
    pub fn at(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }
}
