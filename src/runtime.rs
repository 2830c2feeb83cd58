//! Runtime for answering questions
//!
//! Each question gets its own store connection, history and graph
//! runtime; nothing is shared between concurrent questions.

mod error;
mod executor;

#[cfg(test)]
pub mod testing;

pub use error::{AgentError, AgentErrorKind};
pub use executor::GraphRuntime;

use crate::config::AgentConfig;
use crate::history::Turn;
use crate::oracle::Oracle;
use crate::state_machine::StageName;
use crate::store::{redact, ConnectionDescriptor, PgStore, SqlStore, SqliteStore, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// A completed question
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// GenerateQuery passes used
    pub iterations: u32,
    /// Every turn of the question, in order
    pub transcript: Vec<Turn>,
}

/// Answer `question` against the database named by `db_uri`.
///
/// `db_uri` names a PostgreSQL server or a SQLite file. Destructive
/// statements are refused by the guard; with a strict guard the connection
/// is opened read-only as well.
pub async fn answer_question<O: Oracle>(
    config: &AgentConfig,
    oracle: O,
    db_uri: &str,
    question: &str,
    cancel: CancellationToken,
) -> Result<Answer, AgentError> {
    let question_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("question", %question_id, db = %redact(db_uri));

    async move {
        if question.trim().is_empty() {
            return Err(AgentError::new(AgentErrorKind::EmptyQuestion).at(StageName::Ready));
        }

        let descriptor = ConnectionDescriptor::parse(db_uri).map_err(connection_error)?;
        let read_only = config.guard.is_strict();
        match descriptor {
            ConnectionDescriptor::Postgres(url) => {
                let store = tokio::select! {
                    biased;

                    () = cancel.cancelled() => {
                        return Err(AgentError::new(AgentErrorKind::Cancelled).at(StageName::Ready));
                    }
                    store = PgStore::connect(&url, read_only) => store.map_err(connection_error)?,
                };
                run_graph(config, oracle, store, question, cancel).await
            }
            local => {
                let store = SqliteStore::open(&local, read_only).map_err(connection_error)?;
                run_graph(config, oracle, store, question, cancel).await
            }
        }
    }
    .instrument(span)
    .await
}

async fn run_graph<O: Oracle, S: SqlStore>(
    config: &AgentConfig,
    oracle: O,
    store: S,
    question: &str,
    cancel: CancellationToken,
) -> Result<Answer, AgentError> {
    tracing::debug!(dialect = store.dialect(), "Store opened");
    let context = config.graph_context(store.dialect());
    GraphRuntime::new(context, oracle, store)
        .with_cancellation(cancel)
        .run(question)
        .await
}

fn connection_error(e: StoreError) -> AgentError {
    tracing::error!(error = %e, "Store connection failed");
    let message = match e {
        StoreError::Connection(message) => message,
        other => other.to_string(),
    };
    AgentError::connection(message).at(StageName::Ready)
}
