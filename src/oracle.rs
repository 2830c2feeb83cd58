//! Reasoning oracle adapter
//!
//! Wraps a chat model behind a narrow contract: given turns, the actions it
//! may request and a forcing mode, return exactly one oracle turn. The turn
//! either carries one invocation or is plain text.

use crate::actions::{self, Action, ActionKind};
use crate::history::{CallId, Invocation, Role, Turn};
use crate::llm::{
    ContentBlock, LlmError, LlmMessage, LlmRequest, LlmResponse, LlmService, MessageRole,
    ToolChoice,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

const MAX_RESPONSE_TOKENS: u32 = 4096;

/// Whether the oracle may answer in text or must request an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Forcing {
    Free,
    MustCall,
}

impl fmt::Display for Forcing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Forcing::Free => f.write_str("free"),
            Forcing::MustCall => f.write_str("must-call"),
        }
    }
}

impl From<Forcing> for ToolChoice {
    fn from(forcing: Forcing) -> Self {
        match forcing {
            Forcing::Free => ToolChoice::Auto,
            Forcing::MustCall => ToolChoice::Any,
        }
    }
}

/// One question put to the oracle
#[derive(Debug, Clone, Copy)]
pub struct OracleQuery<'a> {
    pub system: Option<&'a str>,
    pub turns: &'a [Turn],
    pub allowed: &'a [ActionKind],
    pub forcing: Forcing,
}

#[derive(Debug, Clone, Error)]
pub enum OracleError {
    /// Reply did not honor the forcing mode or the allowed action set
    #[error("oracle broke the {forcing} contract: {detail}")]
    ProtocolViolation { forcing: Forcing, detail: String },
    #[error("oracle unavailable: {0}")]
    Unavailable(#[from] LlmError),
}

impl OracleError {
    pub fn is_retryable(&self) -> bool {
        match self {
            OracleError::ProtocolViolation { .. } => false,
            OracleError::Unavailable(e) => e.kind.is_retryable(),
        }
    }
}

#[async_trait]
pub trait Oracle: Send + Sync {
    /// Ask for the next turn. Violations are reported, never retried here.
    async fn ask(&self, query: OracleQuery<'_>) -> Result<Turn, OracleError>;

    fn model_id(&self) -> &str;
}

#[async_trait]
impl<T: Oracle + ?Sized> Oracle for Arc<T> {
    async fn ask(&self, query: OracleQuery<'_>) -> Result<Turn, OracleError> {
        (**self).ask(query).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

/// Oracle backed by a chat model with tool calling
pub struct LlmOracle {
    llm: Arc<dyn LlmService>,
}

impl LlmOracle {
    pub fn new(llm: Arc<dyn LlmService>) -> Self {
        Self { llm }
    }

    fn build_request(query: &OracleQuery<'_>) -> LlmRequest {
        LlmRequest {
            system: query.system.map(str::to_string),
            messages: to_messages(query.turns),
            tools: actions::definitions(query.allowed),
            tool_choice: query.forcing.into(),
            max_tokens: Some(MAX_RESPONSE_TOKENS),
        }
    }
}

#[async_trait]
impl Oracle for LlmOracle {
    async fn ask(&self, query: OracleQuery<'_>) -> Result<Turn, OracleError> {
        let request = Self::build_request(&query);
        let response = self.llm.complete(&request).await?;
        interpret(&response, query.allowed, query.forcing)
    }

    fn model_id(&self) -> &str {
        self.llm.model_id()
    }
}

/// Turn a model response into an oracle turn, enforcing the contract
fn interpret(
    response: &LlmResponse,
    allowed: &[ActionKind],
    forcing: Forcing,
) -> Result<Turn, OracleError> {
    let violation = |detail: String| OracleError::ProtocolViolation { forcing, detail };
    let text = response.text().trim().to_string();
    let tool_uses = response.tool_uses();

    let Some(&(id, name, input)) = tool_uses.first() else {
        if forcing == Forcing::MustCall {
            return Err(violation("replied with text instead of an action".to_string()));
        }
        return Ok(Turn::oracle_text(text));
    };

    if tool_uses.len() > 1 {
        tracing::warn!(
            kept = name,
            dropped = tool_uses.len() - 1,
            "Oracle requested several actions, keeping the first"
        );
    }

    let allowed_here = ActionKind::from_wire_name(name).is_some_and(|kind| allowed.contains(&kind));
    if !allowed_here {
        let offered: Vec<&str> = allowed.iter().map(|kind| kind.wire_name()).collect();
        return Err(violation(format!(
            "requested {name}, offered [{}]",
            offered.join(", ")
        )));
    }

    let action = Action::from_name_and_value(name, input.clone())
        .map_err(|e| violation(e.to_string()))?;
    Ok(Turn::oracle_call(text, Invocation::new(id, action)))
}

/// Render turns as alternating chat messages.
///
/// A revision of the pending call replaces the earlier draft so each call
/// id appears exactly once in the transcript sent to the model.
fn to_messages(turns: &[Turn]) -> Vec<LlmMessage> {
    let mut messages: Vec<LlmMessage> = Vec::new();
    let mut pending: Option<&CallId> = None;

    for turn in turns {
        let (role, blocks) = match turn.role {
            Role::User => (MessageRole::User, vec![ContentBlock::text(&turn.content)]),
            Role::Oracle => {
                let mut blocks = Vec::new();
                if !turn.content.trim().is_empty() {
                    blocks.push(ContentBlock::text(turn.content.trim_end()));
                }
                if let Some(call) = &turn.invocation {
                    if pending == Some(&call.id) && revise_call(&mut messages, call) {
                        if blocks.is_empty() {
                            continue;
                        }
                    } else {
                        blocks.push(ContentBlock::tool_use(
                            call.id.as_str(),
                            call.action.kind().wire_name(),
                            call.action.arguments(),
                        ));
                    }
                    pending = Some(&call.id);
                }
                (MessageRole::Assistant, blocks)
            }
            Role::ActionResult => {
                let Some(id) = &turn.resolves else { continue };
                if pending == Some(id) {
                    pending = None;
                }
                (
                    MessageRole::User,
                    vec![ContentBlock::tool_result(
                        id.as_str(),
                        &turn.content,
                        turn.is_error,
                    )],
                )
            }
        };

        if blocks.is_empty() {
            continue;
        }
        match messages.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => messages.push(LlmMessage { role, content: blocks }),
        }
    }

    messages
}

fn revise_call(messages: &mut [LlmMessage], call: &Invocation) -> bool {
    let id = call.id.as_str();
    messages
        .iter_mut()
        .rev()
        .flat_map(|m| m.content.iter_mut())
        .find_map(|block| match block {
            ContentBlock::ToolUse { id: existing, name, input } if *existing == id => {
                *name = call.action.kind().wire_name().to_string();
                *input = call.action.arguments();
                Some(())
            }
            _ => None,
        })
        .is_some()
}
