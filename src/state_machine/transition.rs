//! Pure stage transition function
//!
//! Given a stage, the question's configuration and an event, decide the
//! next stage, the turns to append and the effects to run. No I/O happens
//! here; the runtime executes effects and feeds their outcomes back as
//! events.

use super::effect::{OracleContext, OracleRequest};
use super::state::{GraphContext, Stage, StageName, LIST_TABLES_CALL_ID};
use super::{Effect, Event};
use crate::actions::{Action, ActionKind, ActionOutput};
use crate::history::{CallId, Invocation, Turn};
use crate::llm::LlmError;
use crate::oracle::{Forcing, OracleError};
use crate::system_prompt;
use std::time::Duration;
use thiserror::Error;

/// Oracle attempts per stage before a transient failure becomes fatal
pub const MAX_ORACLE_ATTEMPTS: u32 = 3;

/// Result of a stage transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: Stage,
    /// Turns to append to the history, in order
    pub turns: Vec<Turn>,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: Stage) -> Self {
        Self {
            new_state: state,
            turns: vec![],
            effects: vec![],
        }
    }

    #[must_use]
    pub fn with_turn(mut self, turn: Turn) -> Self {
        self.turns.push(turn);
        self
    }

    #[must_use]
    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    #[must_use]
    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Outcomes that end the question
#[derive(Debug, Clone, Error)]
pub enum TransitionError {
    #[error("{stage}: oracle broke the {forcing} contract: {detail}")]
    ProtocolViolation {
        stage: StageName,
        forcing: Forcing,
        detail: String,
    },
    #[error("{stage}: oracle unavailable after {attempts} attempt(s): {error}")]
    OracleUnavailable {
        stage: StageName,
        attempts: u32,
        error: LlmError,
    },
    #[error("{stage}: {reason}")]
    IncompleteRun { stage: StageName, reason: String },
    #[error("no answer after {limit} query passes")]
    IterationLimit { limit: u32 },
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

impl TransitionError {
    pub fn stage(&self) -> Option<StageName> {
        match self {
            TransitionError::ProtocolViolation { stage, .. }
            | TransitionError::OracleUnavailable { stage, .. }
            | TransitionError::IncompleteRun { stage, .. } => Some(*stage),
            TransitionError::IterationLimit { .. } => Some(StageName::ExecuteQuery),
            TransitionError::InvalidTransition(_) => None,
        }
    }
}

/// Pure transition function
pub fn transition(
    state: &Stage,
    context: &GraphContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // Entry: list tables without consulting the oracle
        // ============================================================
        (Stage::Ready, Event::Question { text }) => {
            if text.trim().is_empty() {
                return Err(TransitionError::InvalidTransition(
                    "question is empty".to_string(),
                ));
            }
            let call = Invocation::new(LIST_TABLES_CALL_ID, Action::ListTables);
            Ok(TransitionResult::new(Stage::ListTables {
                call: call.id.clone(),
            })
            .with_turn(Turn::user(text))
            .with_turn(Turn::oracle_call("", call.clone()))
            .with_effect(Effect::invoke(call)))
        }

        (Stage::ListTables { call }, Event::ActionComplete { call_id, output })
            if call_id == *call =>
        {
            let summary = system_prompt::tables_summary(&output.output);
            let next = Stage::DiscoverSchema { attempt: 1 };
            let request = oracle_request(&next, context);
            Ok(TransitionResult::new(next)
                .with_turn(result_turn(call_id, output))
                .with_turn(Turn::oracle_text(summary))
                .with_effects(request.map(Effect::ask)))
        }

        // ============================================================
        // Forced schema discovery
        // ============================================================
        (Stage::DiscoverSchema { .. }, Event::OracleReply { turn }) => {
            let call = expect_call(
                &turn,
                ActionKind::DescribeSchema,
                StageName::DiscoverSchema,
                Forcing::MustCall,
            )?;
            Ok(TransitionResult::new(Stage::FetchSchema {
                call: call.id.clone(),
            })
            .with_turn(turn)
            .with_effect(Effect::invoke(call)))
        }

        (Stage::FetchSchema { call }, Event::ActionComplete { call_id, output })
            if call_id == *call =>
        {
            let next = Stage::GenerateQuery {
                iteration: 1,
                attempt: 1,
            };
            let request = oracle_request(&next, context);
            Ok(TransitionResult::new(next)
                .with_turn(result_turn(call_id, output))
                .with_effects(request.map(Effect::ask)))
        }

        // ============================================================
        // Generate: a query to verify, or the final answer
        // ============================================================
        (Stage::GenerateQuery { iteration, .. }, Event::OracleReply { turn }) => {
            if turn.has_invocation() {
                let call = expect_call(
                    &turn,
                    ActionKind::RunQuery,
                    StageName::GenerateQuery,
                    Forcing::Free,
                )?;
                let next = Stage::VerifyQuery {
                    original: call,
                    iteration: *iteration,
                    attempt: 1,
                };
                let request = oracle_request(&next, context);
                Ok(TransitionResult::new(next)
                    .with_turn(turn)
                    .with_effects(request.map(Effect::ask)))
            } else if turn.is_final_answer() {
                let answer = turn.content.clone();
                Ok(TransitionResult::new(Stage::Terminal {
                    answer: answer.clone(),
                })
                .with_turn(turn)
                .with_effect(Effect::Finish { answer }))
            } else {
                Err(TransitionError::IncompleteRun {
                    stage: StageName::GenerateQuery,
                    reason: "oracle returned neither a query nor an answer".to_string(),
                })
            }
        }

        // ============================================================
        // Verify: the reviewed call supersedes the draft under its id
        // ============================================================
        (
            Stage::VerifyQuery {
                original,
                iteration,
                ..
            },
            Event::OracleReply { turn },
        ) => {
            let reviewed = expect_call(
                &turn,
                ActionKind::RunQuery,
                StageName::VerifyQuery,
                Forcing::MustCall,
            )?;
            let call = reviewed.with_id(original.id.clone());
            let verified = Turn::oracle_call(turn.content, call.clone());
            let next = Stage::ExecuteQuery {
                call: call.id.clone(),
                iteration: *iteration,
            };

            let statement = call.action.statement().unwrap_or_default();
            let effect = match context.guard.check(statement) {
                Ok(()) => Effect::invoke(call),
                Err(rejection) => Effect::RefuseAction {
                    call_id: call.id,
                    output: ActionOutput::error(system_prompt::denial_notice(
                        &rejection.to_string(),
                    )),
                },
            };
            Ok(TransitionResult::new(next)
                .with_turn(verified)
                .with_effect(effect))
        }

        // ============================================================
        // Execute: the result feeds the next generate pass
        // ============================================================
        (Stage::ExecuteQuery { call, iteration }, Event::ActionComplete { call_id, output })
            if call_id == *call =>
        {
            if *iteration >= context.max_iterations {
                return Err(TransitionError::IterationLimit {
                    limit: context.max_iterations,
                });
            }
            let next = Stage::GenerateQuery {
                iteration: iteration + 1,
                attempt: 1,
            };
            let request = oracle_request(&next, context);
            Ok(TransitionResult::new(next)
                .with_turn(result_turn(call_id, output))
                .with_effects(request.map(Effect::ask)))
        }

        // ============================================================
        // Oracle failures and retry
        // ============================================================
        (stage, Event::OracleFailed { error }) if stage.oracle_attempt().is_some() => {
            let attempt = stage.oracle_attempt().unwrap_or(1);
            match error {
                OracleError::ProtocolViolation { forcing, detail } => {
                    Err(TransitionError::ProtocolViolation {
                        stage: stage.name(),
                        forcing,
                        detail,
                    })
                }
                OracleError::Unavailable(e)
                    if e.kind.is_retryable() && attempt < MAX_ORACLE_ATTEMPTS =>
                {
                    let delay = e.retry_after.unwrap_or_else(|| retry_delay(attempt));
                    Ok(TransitionResult::new(stage.with_attempt(attempt + 1)).with_effect(
                        Effect::ScheduleRetry {
                            delay,
                            attempt: attempt + 1,
                        },
                    ))
                }
                OracleError::Unavailable(e) => Err(TransitionError::OracleUnavailable {
                    stage: stage.name(),
                    attempts: attempt,
                    error: e,
                }),
            }
        }

        (stage, Event::RetryTimeout { attempt }) if stage.oracle_attempt() == Some(attempt) => {
            let request = oracle_request(stage, context);
            Ok(TransitionResult::new(stage.clone()).with_effects(request.map(Effect::ask)))
        }

        // ============================================================
        // Everything else is a wiring error
        // ============================================================
        (Stage::Terminal { .. }, event) => Err(TransitionError::InvalidTransition(format!(
            "{} after the graph halted",
            event.name()
        ))),

        (stage, event) => Err(TransitionError::InvalidTransition(format!(
            "{} in {}",
            event.name(),
            stage.name()
        ))),
    }
}

/// The oracle request a stage issues on entry (and on retry)
pub fn oracle_request(stage: &Stage, context: &GraphContext) -> Option<OracleRequest> {
    match stage {
        Stage::DiscoverSchema { .. } => Some(OracleRequest {
            stage: StageName::DiscoverSchema,
            system: None,
            context: OracleContext::History,
            allowed: vec![ActionKind::DescribeSchema],
            forcing: Forcing::MustCall,
        }),
        Stage::GenerateQuery { .. } => Some(OracleRequest {
            stage: StageName::GenerateQuery,
            system: Some(system_prompt::generate_query_directive(
                &context.dialect,
                context.row_limit,
            )),
            context: OracleContext::History,
            allowed: vec![ActionKind::RunQuery],
            forcing: Forcing::Free,
        }),
        Stage::VerifyQuery { original, .. } => {
            let statement = original.action.statement().unwrap_or_default();
            Some(OracleRequest {
                stage: StageName::VerifyQuery,
                system: Some(system_prompt::verify_query_directive(&context.dialect)),
                context: OracleContext::Isolated(vec![Turn::user(
                    system_prompt::verify_request(statement),
                )]),
                allowed: vec![ActionKind::RunQuery],
                forcing: Forcing::MustCall,
            })
        }
        _ => None,
    }
}

/// The invocation carried by `turn`, which must be of `kind`
fn expect_call(
    turn: &Turn,
    kind: ActionKind,
    stage: StageName,
    forcing: Forcing,
) -> Result<Invocation, TransitionError> {
    match &turn.invocation {
        Some(call) if call.action.kind() == kind => Ok(call.clone()),
        Some(call) => Err(TransitionError::ProtocolViolation {
            stage,
            forcing,
            detail: format!("requested {} where only {kind} is offered", call.action.kind()),
        }),
        None => Err(TransitionError::ProtocolViolation {
            stage,
            forcing,
            detail: format!("expected a {kind} call, got text"),
        }),
    }
}

fn result_turn(call_id: CallId, output: ActionOutput) -> Turn {
    Turn::action_result(call_id, output.output, !output.success)
}

fn retry_delay(failed_attempt: u32) -> Duration {
    // Exponential backoff: 1s, 2s
    Duration::from_secs(1 << (failed_attempt.saturating_sub(1)).min(5))
}
