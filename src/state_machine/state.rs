//! Graph stages and per-question configuration

use crate::guard::GuardPolicy;
use crate::history::{CallId, Invocation};
use serde::Serialize;
use std::fmt;

pub const DEFAULT_ROW_LIMIT: u32 = 5;
pub const DEFAULT_MAX_ITERATIONS: u32 = 8;

/// Id of the deterministic list-tables call that opens every question
pub const LIST_TABLES_CALL_ID: &str = "list_tables";

/// Where the graph currently is.
///
/// Stages that wait on the oracle carry an `attempt` counter for transient
/// failure retries. Stages that wait on an action carry the call id the
/// next result must resolve.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    /// No question received yet
    Ready,

    ListTables {
        call: CallId,
    },

    /// Oracle must request describe-schema
    DiscoverSchema {
        attempt: u32,
    },

    FetchSchema {
        call: CallId,
    },

    /// Oracle writes a query or answers; `iteration` counts passes, from 1
    GenerateQuery {
        iteration: u32,
        attempt: u32,
    },

    /// Isolated review of the drafted call
    VerifyQuery {
        original: Invocation,
        iteration: u32,
        attempt: u32,
    },

    /// Waiting for the query result (or the guard's refusal)
    ExecuteQuery {
        call: CallId,
        iteration: u32,
    },

    Terminal {
        answer: String,
    },
}

impl Stage {
    pub fn name(&self) -> StageName {
        match self {
            Stage::Ready => StageName::Ready,
            Stage::ListTables { .. } => StageName::ListTables,
            Stage::DiscoverSchema { .. } => StageName::DiscoverSchema,
            Stage::FetchSchema { .. } => StageName::FetchSchema,
            Stage::GenerateQuery { .. } => StageName::GenerateQuery,
            Stage::VerifyQuery { .. } => StageName::VerifyQuery,
            Stage::ExecuteQuery { .. } => StageName::ExecuteQuery,
            Stage::Terminal { .. } => StageName::Terminal,
        }
    }

    /// Current oracle attempt, for stages waiting on the oracle
    pub fn oracle_attempt(&self) -> Option<u32> {
        match self {
            Stage::DiscoverSchema { attempt }
            | Stage::GenerateQuery { attempt, .. }
            | Stage::VerifyQuery { attempt, .. } => Some(*attempt),
            _ => None,
        }
    }

    /// Same stage with another oracle attempt number
    #[must_use]
    pub fn with_attempt(&self, attempt: u32) -> Self {
        match self.clone() {
            Stage::DiscoverSchema { .. } => Stage::DiscoverSchema { attempt },
            Stage::GenerateQuery { iteration, .. } => Stage::GenerateQuery { iteration, attempt },
            Stage::VerifyQuery {
                original,
                iteration,
                ..
            } => Stage::VerifyQuery {
                original,
                iteration,
                attempt,
            },
            other => other,
        }
    }

    /// Number of GenerateQuery passes started so far
    pub fn iteration(&self) -> u32 {
        match self {
            Stage::GenerateQuery { iteration, .. }
            | Stage::VerifyQuery { iteration, .. }
            | Stage::ExecuteQuery { iteration, .. } => *iteration,
            _ => 0,
        }
    }
}

/// Stage identity without data, for logs and error reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Ready,
    ListTables,
    DiscoverSchema,
    FetchSchema,
    GenerateQuery,
    VerifyQuery,
    ExecuteQuery,
    Terminal,
}

impl StageName {
    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Ready => "ready",
            StageName::ListTables => "list_tables",
            StageName::DiscoverSchema => "discover_schema",
            StageName::FetchSchema => "fetch_schema",
            StageName::GenerateQuery => "generate_query",
            StageName::VerifyQuery => "verify_query",
            StageName::ExecuteQuery => "execute_query",
            StageName::Terminal => "terminal",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-question configuration (immutable while the graph runs)
#[derive(Debug, Clone)]
pub struct GraphContext {
    /// SQL dialect named in the directives
    pub dialect: String,
    /// Default row limit in the generate directive
    pub row_limit: u32,
    /// GenerateQuery passes allowed before the question fails
    pub max_iterations: u32,
    pub guard: GuardPolicy,
}

impl GraphContext {
    pub fn new(dialect: impl Into<String>) -> Self {
        Self {
            dialect: dialect.into(),
            row_limit: DEFAULT_ROW_LIMIT,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            guard: GuardPolicy::strict(),
        }
    }

    #[must_use]
    pub fn with_row_limit(mut self, row_limit: u32) -> Self {
        self.row_limit = row_limit;
        self
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    #[must_use]
    pub fn with_guard(mut self, guard: GuardPolicy) -> Self {
        self.guard = guard;
        self
    }
}
