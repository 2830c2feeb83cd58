//! Re-drive a recorded history through the transition function
//!
//! Oracle replies and action results are read back from the recording
//! instead of being requested again, so a completed history reproduces its
//! terminal answer without touching the oracle or the store.

use super::state::{GraphContext, Stage, StageName};
use super::transition::{transition, TransitionError};
use super::{Effect, Event};
use crate::actions::ActionOutput;
use crate::history::{History, HistoryError, Role, Turn};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ReplayError {
    #[error("recording is empty or does not start with a question")]
    NoQuestion,
    #[error("turn {index} diverges: recorded {recorded}, graph produced {produced}")]
    Diverged {
        index: usize,
        recorded: String,
        produced: String,
    },
    #[error("recording ends in {stage} before the graph halted")]
    Truncated { stage: StageName },
    #[error("turn {index} expected a {expected} turn")]
    UnexpectedRole { index: usize, expected: Role },
    #[error("{0} turn(s) recorded after the graph halted")]
    TrailingTurns(usize),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    History(#[from] HistoryError),
}

impl ReplayError {
    /// Stage the recording stopped in, when it stopped early
    pub fn stage(&self) -> Option<StageName> {
        match self {
            ReplayError::Truncated { stage } => Some(*stage),
            _ => None,
        }
    }
}

/// Replay `turns` and return the terminal answer they lead to
pub fn replay(context: &GraphContext, turns: &[Turn]) -> Result<String, ReplayError> {
    let question = match turns.first() {
        Some(turn) if turn.role == Role::User => turn.content.clone(),
        _ => return Err(ReplayError::NoQuestion),
    };

    let mut stage = Stage::Ready;
    let mut history = History::new();
    let mut next = Some(Event::Question { text: question });

    while let Some(event) = next.take() {
        let result = transition(&stage, context, event)?;

        for produced in result.turns {
            let index = history.len();
            let recorded = turns.get(index).ok_or(ReplayError::Truncated {
                stage: result.new_state.name(),
            })?;
            if *recorded != produced {
                return Err(ReplayError::Diverged {
                    index,
                    recorded: recorded.to_string(),
                    produced: produced.to_string(),
                });
            }
            history.append(produced)?;
        }
        stage = result.new_state;

        for effect in result.effects {
            match effect {
                Effect::InvokeAction { call } => {
                    let index = history.len();
                    let recorded = recorded_turn(turns, index, Role::ActionResult, &stage)?;
                    next = Some(Event::ActionComplete {
                        call_id: call.id,
                        output: ActionOutput {
                            success: !recorded.is_error,
                            output: recorded.content.clone(),
                        },
                    });
                }
                Effect::RefuseAction { call_id, output } => {
                    next = Some(Event::ActionComplete { call_id, output });
                }
                Effect::AskOracle { .. } => {
                    let index = history.len();
                    let recorded = recorded_turn(turns, index, Role::Oracle, &stage)?;
                    next = Some(Event::OracleReply {
                        turn: recorded.clone(),
                    });
                }
                // Recordings only hold successful replies
                Effect::ScheduleRetry { attempt, .. } => {
                    next = Some(Event::RetryTimeout { attempt });
                }
                Effect::Finish { answer } => {
                    let trailing = turns.len() - history.len();
                    if trailing > 0 {
                        return Err(ReplayError::TrailingTurns(trailing));
                    }
                    return Ok(answer);
                }
            }
        }
    }

    Err(ReplayError::Truncated { stage: stage.name() })
}

fn recorded_turn<'a>(
    turns: &'a [Turn],
    index: usize,
    expected: Role,
    stage: &Stage,
) -> Result<&'a Turn, ReplayError> {
    match turns.get(index) {
        Some(turn) if turn.role == expected => Ok(turn),
        Some(_) => Err(ReplayError::UnexpectedRole { index, expected }),
        None => Err(ReplayError::Truncated {
            stage: stage.name(),
        }),
    }
}
