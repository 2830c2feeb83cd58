//! Turn history for a single question
//!
//! The history is an append-only log. A turn is never edited once it has
//! been appended; the graph only ever adds the turns a stage produces.
//!
//! Call discipline: at most one invocation is outstanding at a time. An
//! oracle turn that carries the id of the outstanding call is a revision of
//! that call (the verified statement replacing the draft), not a new call.

use crate::actions::Action;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Number of trailing turns attached to fatal errors for diagnosis
pub const RECENT_TURNS: usize = 4;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Oracle,
    ActionResult,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Oracle => f.write_str("oracle"),
            Role::ActionResult => f.write_str("action_result"),
        }
    }
}

/// Correlation identifier linking an invocation to its result
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A requested action together with its correlation id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub id: CallId,
    pub action: Action,
}

impl Invocation {
    pub fn new(id: impl Into<String>, action: Action) -> Self {
        Self {
            id: CallId::new(id),
            action,
        }
    }

    /// The same action re-issued under another call's id
    #[must_use]
    pub fn with_id(mut self, id: CallId) -> Self {
        self.id = id;
        self
    }
}

/// One entry in the conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Action the oracle asks to run next (oracle turns only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation: Option<Invocation>,
    /// Call this result answers (action-result turns only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolves: Option<CallId>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            invocation: None,
            resolves: None,
            is_error: false,
        }
    }

    pub fn oracle_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Oracle,
            content: text.into(),
            invocation: None,
            resolves: None,
            is_error: false,
        }
    }

    pub fn oracle_call(text: impl Into<String>, invocation: Invocation) -> Self {
        Self {
            invocation: Some(invocation),
            ..Self::oracle_text(text)
        }
    }

    pub fn action_result(resolves: CallId, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            role: Role::ActionResult,
            content: content.into(),
            invocation: None,
            resolves: Some(resolves),
            is_error,
        }
    }

    pub fn has_invocation(&self) -> bool {
        self.invocation.is_some()
    }

    /// A turn the graph can stop on: oracle text with nothing pending
    pub fn is_final_answer(&self) -> bool {
        self.role == Role::Oracle && self.invocation.is_none() && !self.content.trim().is_empty()
    }
}

impl fmt::Display for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.role)?;
        if let Some(call) = &self.invocation {
            write!(f, " call {} {}", call.id, call.action.kind())?;
        }
        if let Some(id) = &self.resolves {
            write!(f, " result for {id}")?;
        }
        if !self.content.is_empty() {
            write!(f, " {}", self.content)?;
        }
        Ok(())
    }
}

/// Violations of the history discipline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("call {new} requested while call {outstanding} is still unresolved")]
    OutstandingCall { outstanding: CallId, new: CallId },
    #[error("result for {0} does not match the outstanding call")]
    UnknownCall(CallId),
    #[error("call id {0} was already used by an earlier call")]
    DuplicateCallId(CallId),
    #[error("{role} turn is malformed: {reason}")]
    Malformed { role: Role, reason: &'static str },
}

/// Append-only ordered log of turns
#[derive(Debug, Clone, Default)]
pub struct History {
    turns: Vec<Turn>,
    /// Index of the latest turn carrying the outstanding call
    pending: Option<usize>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn, enforcing the single-outstanding-call discipline
    pub fn append(&mut self, turn: Turn) -> Result<(), HistoryError> {
        match turn.role {
            Role::User => {
                if turn.invocation.is_some() || turn.resolves.is_some() {
                    return Err(HistoryError::Malformed {
                        role: Role::User,
                        reason: "user turns carry neither calls nor results",
                    });
                }
            }
            Role::Oracle => {
                if turn.resolves.is_some() {
                    return Err(HistoryError::Malformed {
                        role: Role::Oracle,
                        reason: "oracle turns cannot resolve calls",
                    });
                }
                if let Some(call) = &turn.invocation {
                    match self.pending_call() {
                        // Revision of the outstanding call
                        Some(outstanding) if outstanding.id == call.id => {}
                        Some(outstanding) => {
                            return Err(HistoryError::OutstandingCall {
                                outstanding: outstanding.id.clone(),
                                new: call.id.clone(),
                            });
                        }
                        None if self.was_issued(&call.id) => {
                            return Err(HistoryError::DuplicateCallId(call.id.clone()));
                        }
                        None => {}
                    }
                    self.pending = Some(self.turns.len());
                }
            }
            Role::ActionResult => {
                let Some(id) = &turn.resolves else {
                    return Err(HistoryError::Malformed {
                        role: Role::ActionResult,
                        reason: "action results must name the call they resolve",
                    });
                };
                if turn.invocation.is_some() {
                    return Err(HistoryError::Malformed {
                        role: Role::ActionResult,
                        reason: "action results cannot request calls",
                    });
                }
                match self.pending_call() {
                    Some(outstanding) if &outstanding.id == id => self.pending = None,
                    _ => return Err(HistoryError::UnknownCall(id.clone())),
                }
            }
        }

        self.turns.push(turn);
        Ok(())
    }

    /// Append several turns in order, stopping at the first violation
    pub fn extend(&mut self, turns: impl IntoIterator<Item = Turn>) -> Result<(), HistoryError> {
        for turn in turns {
            self.append(turn)?;
        }
        Ok(())
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// The unresolved invocation, in its latest revision
    pub fn pending_call(&self) -> Option<&Invocation> {
        self.pending
            .and_then(|index| self.turns.get(index))
            .and_then(|turn| turn.invocation.as_ref())
    }

    /// Number of unresolved invocations (zero or one)
    pub fn unresolved_count(&self) -> usize {
        usize::from(self.pending.is_some())
    }

    /// The last few turns, for error reports
    pub fn recent(&self) -> Vec<Turn> {
        let start = self.turns.len().saturating_sub(RECENT_TURNS);
        self.turns.iter().skip(start).cloned().collect()
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }

    fn was_issued(&self, id: &CallId) -> bool {
        self.turns
            .iter()
            .filter_map(|t| t.invocation.as_ref())
            .any(|call| &call.id == id)
    }
}
