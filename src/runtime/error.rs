//! Failures surfaced to the caller of a question

use crate::history::Turn;
use crate::llm::LlmError;
use crate::oracle::Forcing;
use crate::state_machine::{StageName, TransitionError};
use thiserror::Error;

/// Shown when the graph stops without a final answer
pub const NO_ANSWER: &str = "The agent completed its work but did not produce a final answer.";

#[derive(Debug, Clone, Error)]
pub enum AgentErrorKind {
    #[error("question is empty")]
    EmptyQuestion,
    /// Store unreachable or misconfigured
    #[error("store connection failed: {0}")]
    Connection(String),
    #[error("oracle unavailable after {attempts} attempt(s): {error}")]
    OracleUnavailable { attempts: u32, error: LlmError },
    #[error("oracle broke the {forcing} contract: {detail}")]
    OracleProtocolViolation { forcing: Forcing, detail: String },
    #[error("{} ({})", NO_ANSWER, .0)]
    IncompleteRun(String),
    #[error("{} (no answer after {} query passes)", NO_ANSWER, .0)]
    IterationLimit(u32),
    #[error("question cancelled")]
    Cancelled,
}

/// A fatal outcome with enough context to diagnose it
#[derive(Debug, Clone, Error)]
#[error("{kind}")]
pub struct AgentError {
    pub kind: AgentErrorKind,
    /// Stage that was running when the question failed
    pub stage: Option<StageName>,
    /// The last few turns of the history
    pub recent: Vec<Turn>,
}

impl AgentError {
    pub fn new(kind: AgentErrorKind) -> Self {
        Self {
            kind,
            stage: None,
            recent: vec![],
        }
    }

    #[must_use]
    pub fn at(mut self, stage: StageName) -> Self {
        self.stage = Some(stage);
        self
    }

    #[must_use]
    pub fn with_recent(mut self, recent: Vec<Turn>) -> Self {
        self.recent = recent;
        self
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(AgentErrorKind::Connection(message.into()))
    }

    /// Lift a graph failure, falling back to `current` when the graph
    /// did not name a stage
    pub fn from_transition(error: TransitionError, current: StageName) -> Self {
        let stage = error.stage().unwrap_or(current);
        let kind = match error {
            TransitionError::ProtocolViolation {
                forcing, detail, ..
            } => AgentErrorKind::OracleProtocolViolation { forcing, detail },
            TransitionError::OracleUnavailable {
                attempts, error, ..
            } => AgentErrorKind::OracleUnavailable { attempts, error },
            TransitionError::IncompleteRun { reason, .. } => AgentErrorKind::IncompleteRun(reason),
            TransitionError::IterationLimit { limit } => AgentErrorKind::IterationLimit(limit),
            TransitionError::InvalidTransition(reason) => AgentErrorKind::IncompleteRun(reason),
        };
        Self::new(kind).at(stage)
    }
}
