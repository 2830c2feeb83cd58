//! Events that drive the graph

use crate::actions::ActionOutput;
use crate::history::{CallId, Turn};
use crate::oracle::OracleError;

/// Events that trigger stage transitions
#[derive(Debug, Clone)]
pub enum Event {
    /// The question that starts the graph
    Question { text: String },

    /// An action finished, or was refused before reaching the store
    ActionComplete { call_id: CallId, output: ActionOutput },

    OracleReply { turn: Turn },
    OracleFailed { error: OracleError },
    RetryTimeout { attempt: u32 },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Question { .. } => "question",
            Event::ActionComplete { .. } => "action_complete",
            Event::OracleReply { .. } => "oracle_reply",
            Event::OracleFailed { .. } => "oracle_failed",
            Event::RetryTimeout { .. } => "retry_timeout",
        }
    }
}
