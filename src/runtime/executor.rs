//! Question runtime executor

use super::error::{AgentError, AgentErrorKind};
use super::Answer;
use crate::actions::ActionRegistry;
use crate::history::History;
use crate::oracle::{Oracle, OracleQuery};
use crate::state_machine::{transition, Effect, Event, GraphContext, OracleContext, Stage};
use crate::store::SqlStore;
use std::future::Future;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// What running one effect leads to
enum Step {
    Next(Event),
    Done(String),
}

/// Drives one question through the graph with any oracle and store
pub struct GraphRuntime<O, S>
where
    O: Oracle,
    S: SqlStore,
{
    context: GraphContext,
    stage: Stage,
    history: History,
    oracle: O,
    actions: ActionRegistry<S>,
    cancel: CancellationToken,
    /// Highest GenerateQuery pass reached
    iterations: u32,
}

impl<O, S> GraphRuntime<O, S>
where
    O: Oracle,
    S: SqlStore,
{
    pub fn new(context: GraphContext, oracle: O, store: S) -> Self {
        Self {
            context,
            stage: Stage::Ready,
            history: History::new(),
            oracle,
            actions: ActionRegistry::new(store),
            cancel: CancellationToken::new(),
            iterations: 0,
        }
    }

    /// Abandon the question when `token` is cancelled
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub async fn run(mut self, question: &str) -> Result<Answer, AgentError> {
        tracing::info!(model = %self.oracle.model_id(), "Answering question");

        // Each effect yields at most one event, so this stays a flat loop
        let mut pending = Some(Event::Question {
            text: question.to_string(),
        });

        while let Some(event) = pending.take() {
            let result = transition(&self.stage, &self.context, event)
                .map_err(|e| self.fail(AgentError::from_transition(e, self.stage.name())))?;

            let appended = result.turns.len();
            if let Err(e) = self.history.extend(result.turns) {
                return Err(self.fail(
                    AgentError::new(AgentErrorKind::IncompleteRun(e.to_string()))
                        .at(self.stage.name()),
                ));
            }

            tracing::debug!(
                from = %self.stage.name(),
                to = %result.new_state.name(),
                appended,
                pending_calls = self.history.unresolved_count(),
                "Stage transition"
            );
            self.stage = result.new_state;
            self.iterations = self.iterations.max(self.stage.iteration());

            for effect in result.effects {
                match self.execute_effect(effect).await? {
                    Step::Next(event) => pending = Some(event),
                    Step::Done(text) => {
                        tracing::info!(iterations = self.iterations, "Question answered");
                        return Ok(Answer {
                            text,
                            iterations: self.iterations,
                            transcript: self.history.into_turns(),
                        });
                    }
                }
            }
        }

        Err(self.fail(
            AgentError::new(AgentErrorKind::IncompleteRun(
                "graph stopped without a pending event".to_string(),
            ))
            .at(self.stage.name()),
        ))
    }

    async fn execute_effect(&self, effect: Effect) -> Result<Step, AgentError> {
        match effect {
            Effect::AskOracle { request } => {
                let turns = match &request.context {
                    OracleContext::History => self.history.turns(),
                    OracleContext::Isolated(turns) => turns.as_slice(),
                };
                let query = OracleQuery {
                    system: request.system.as_deref(),
                    turns,
                    allowed: &request.allowed,
                    forcing: request.forcing,
                };

                let started = Instant::now();
                let reply = self.until_cancelled(self.oracle.ask(query)).await?;
                let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

                match reply {
                    Ok(turn) => {
                        tracing::debug!(
                            stage = %request.stage,
                            forcing = %request.forcing,
                            duration_ms,
                            calls = turn.has_invocation(),
                            "Oracle replied"
                        );
                        Ok(Step::Next(Event::OracleReply { turn }))
                    }
                    Err(error) => {
                        tracing::warn!(
                            stage = %request.stage,
                            duration_ms,
                            retryable = error.is_retryable(),
                            error = %error,
                            "Oracle request failed"
                        );
                        Ok(Step::Next(Event::OracleFailed { error }))
                    }
                }
            }

            Effect::InvokeAction { call } => {
                let outcome = self
                    .until_cancelled(self.actions.execute(&call.action))
                    .await?;
                match outcome {
                    Ok(output) => {
                        tracing::debug!(
                            call_id = %call.id,
                            action = %call.action.kind(),
                            success = output.success,
                            "Action complete"
                        );
                        Ok(Step::Next(Event::ActionComplete {
                            call_id: call.id,
                            output,
                        }))
                    }
                    Err(e) => {
                        tracing::error!(call_id = %call.id, error = %e, "Store failed");
                        Err(self.fail(AgentError::connection(e.to_string()).at(self.stage.name())))
                    }
                }
            }

            Effect::RefuseAction { call_id, output } => {
                tracing::warn!(call_id = %call_id, reason = %output.output, "Statement refused");
                Ok(Step::Next(Event::ActionComplete { call_id, output }))
            }

            Effect::ScheduleRetry { delay, attempt } => {
                tracing::info!(
                    stage = %self.stage.name(),
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Retrying oracle request"
                );
                self.until_cancelled(tokio::time::sleep(delay)).await?;
                Ok(Step::Next(Event::RetryTimeout { attempt }))
            }

            Effect::Finish { answer } => Ok(Step::Done(answer)),
        }
    }

    /// Race `fut` against cancellation of the question
    async fn until_cancelled<T>(&self, fut: impl Future<Output = T>) -> Result<T, AgentError> {
        tokio::select! {
            biased;

            () = self.cancel.cancelled() => {
                tracing::info!(stage = %self.stage.name(), "Question cancelled");
                Err(self.fail(AgentError::new(AgentErrorKind::Cancelled).at(self.stage.name())))
            }

            value = fut => Ok(value),
        }
    }

    /// Attach the recent history to a fatal error
    fn fail(&self, error: AgentError) -> AgentError {
        if !matches!(error.kind, AgentErrorKind::Cancelled) {
            tracing::error!(stage = ?error.stage, error = %error, "Question failed");
        }
        error.with_recent(self.history.recent())
    }
}
