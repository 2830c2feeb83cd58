//! Effects produced by stage transitions

use super::state::StageName;
use crate::actions::{ActionKind, ActionOutput};
use crate::history::{CallId, Invocation, Turn};
use crate::oracle::Forcing;
use std::time::Duration;

/// Which turns the oracle sees
#[derive(Debug, Clone, PartialEq)]
pub enum OracleContext {
    /// The full question history
    History,
    /// A fresh conversation holding only these turns
    Isolated(Vec<Turn>),
}

/// Everything needed to put one question to the oracle
#[derive(Debug, Clone, PartialEq)]
pub struct OracleRequest {
    pub stage: StageName,
    pub system: Option<String>,
    pub context: OracleContext,
    pub allowed: Vec<ActionKind>,
    pub forcing: Forcing,
}

/// Effects to be executed after a transition
#[derive(Debug, Clone)]
pub enum Effect {
    /// Run an action against the store
    InvokeAction { call: Invocation },

    /// Resolve a call without running it
    RefuseAction { call_id: CallId, output: ActionOutput },

    AskOracle { request: OracleRequest },

    /// Re-ask the oracle after a transient failure
    ScheduleRetry { delay: Duration, attempt: u32 },

    /// The graph halted with an answer
    Finish { answer: String },
}

impl Effect {
    pub fn invoke(call: Invocation) -> Self {
        Effect::InvokeAction { call }
    }

    pub fn ask(request: OracleRequest) -> Self {
        Effect::AskOracle { request }
    }
}
