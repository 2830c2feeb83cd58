//! Store-facing actions available to the graph and the oracle
//!
//! The action set is closed: list tables, describe schema, run query. Each
//! maps to exactly one store primitive, and every non-fatal store failure
//! becomes a textual result the oracle can read.

use crate::llm::ToolDefinition;
use crate::store::{SqlStore, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

/// The three registered actions, by kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ListTables,
    DescribeSchema,
    RunQuery,
}

impl ActionKind {
    pub const ALL: [ActionKind; 3] = [
        ActionKind::ListTables,
        ActionKind::DescribeSchema,
        ActionKind::RunQuery,
    ];

    /// Name the oracle sees and calls
    pub fn wire_name(self) -> &'static str {
        match self {
            ActionKind::ListTables => "sql_db_list_tables",
            ActionKind::DescribeSchema => "sql_db_schema",
            ActionKind::RunQuery => "sql_db_query",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.wire_name() == name)
    }

    fn description(self) -> &'static str {
        match self {
            ActionKind::ListTables => {
                "List the tables in the database. Takes no input; returns a comma-separated list of table names."
            }
            ActionKind::DescribeSchema => {
                "Return the schema and a few sample rows for the given tables. Input is a comma-separated list of table names. Make sure the tables exist by listing tables first. Example input: colors, parts"
            }
            ActionKind::RunQuery => {
                "Execute a single read-only SQL query and return its rows. If the query is wrong an error message is returned instead; rewrite the query, check it, and try again. If a column is unknown, look at the table schema again."
            }
        }
    }

    fn input_schema(self) -> Value {
        match self {
            ActionKind::ListTables => json!({
                "type": "object",
                "properties": {}
            }),
            ActionKind::DescribeSchema => json!({
                "type": "object",
                "required": ["table_names"],
                "properties": {
                    "table_names": {
                        "type": "string",
                        "description": "Comma-separated list of table names"
                    }
                }
            }),
            ActionKind::RunQuery => json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "A detailed and syntactically correct SQL query"
                    }
                }
            }),
        }
    }

    /// Tool definition offered to the oracle
    pub fn definition(self) -> ToolDefinition {
        ToolDefinition {
            name: self.wire_name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Definitions for a restricted action set
pub fn definitions(kinds: &[ActionKind]) -> Vec<ToolDefinition> {
    kinds.iter().map(|kind| kind.definition()).collect()
}

/// A concrete action with its arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    ListTables,
    DescribeSchema { tables: Vec<String> },
    RunQuery { query: String },
}

/// Argument payload could not be interpreted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionParseError {
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    #[error("invalid arguments for {action}: {reason}")]
    InvalidArguments { action: ActionKind, reason: String },
}

#[derive(Deserialize)]
struct DescribeSchemaArgs {
    #[serde(alias = "tables")]
    table_names: TableNames,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TableNames {
    List(Vec<String>),
    Joined(String),
}

impl TableNames {
    fn into_vec(self) -> Vec<String> {
        let names = match self {
            TableNames::List(names) => names,
            TableNames::Joined(joined) => joined.split(',').map(str::to_string).collect(),
        };
        names
            .into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }
}

#[derive(Deserialize)]
struct RunQueryArgs {
    query: String,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::ListTables => ActionKind::ListTables,
            Action::DescribeSchema { .. } => ActionKind::DescribeSchema,
            Action::RunQuery { .. } => ActionKind::RunQuery,
        }
    }

    /// Parse an oracle-requested call from its wire name and arguments
    pub fn from_name_and_value(name: &str, value: Value) -> Result<Self, ActionParseError> {
        let kind = ActionKind::from_wire_name(name)
            .ok_or_else(|| ActionParseError::UnknownAction(name.to_string()))?;
        let invalid = |e: serde_json::Error| ActionParseError::InvalidArguments {
            action: kind,
            reason: e.to_string(),
        };

        match kind {
            ActionKind::ListTables => Ok(Action::ListTables),
            ActionKind::DescribeSchema => {
                let args: DescribeSchemaArgs = serde_json::from_value(value).map_err(invalid)?;
                let tables = args.table_names.into_vec();
                if tables.is_empty() {
                    return Err(ActionParseError::InvalidArguments {
                        action: kind,
                        reason: "no table names given".to_string(),
                    });
                }
                Ok(Action::DescribeSchema { tables })
            }
            ActionKind::RunQuery => {
                let args: RunQueryArgs = serde_json::from_value(value).map_err(invalid)?;
                if args.query.trim().is_empty() {
                    return Err(ActionParseError::InvalidArguments {
                        action: kind,
                        reason: "query is empty".to_string(),
                    });
                }
                Ok(Action::RunQuery { query: args.query })
            }
        }
    }

    /// Arguments in the shape the oracle sent them
    pub fn arguments(&self) -> Value {
        match self {
            Action::ListTables => json!({}),
            Action::DescribeSchema { tables } => json!({ "table_names": tables.join(", ") }),
            Action::RunQuery { query } => json!({ "query": query }),
        }
    }

    /// The SQL text, for run-query calls
    pub fn statement(&self) -> Option<&str> {
        match self {
            Action::RunQuery { query } => Some(query),
            _ => None,
        }
    }
}

/// Textual result of an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutput {
    pub success: bool,
    pub output: String,
}

impl ActionOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
        }
    }
}

/// Binds the action set to one store
pub struct ActionRegistry<S> {
    store: S,
}

impl<S: SqlStore> ActionRegistry<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Run an action against the store.
    ///
    /// Returns `Err` only for failures that end the question: the store is
    /// unreachable, or the table listing itself failed. Schema and query
    /// failures come back as error outputs.
    pub async fn execute(&self, action: &Action) -> Result<ActionOutput, StoreError> {
        match action {
            Action::ListTables => {
                let tables = self.store.list_tables().await?;
                Ok(ActionOutput::success(tables.join(", ")))
            }
            Action::DescribeSchema { tables } => {
                match self.store.describe_schema(tables).await {
                    Ok(schema) => Ok(ActionOutput::success(schema)),
                    Err(e) if e.is_fatal() => Err(e),
                    Err(e) => {
                        tracing::warn!(error = %e, "Schema lookup failed");
                        Ok(ActionOutput::error(format!("Error: {e}")))
                    }
                }
            }
            Action::RunQuery { query } => match self.store.run_query(query).await {
                Ok(rows) => Ok(ActionOutput::success(rows.to_string())),
                Err(e) if e.is_fatal() => Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "Query failed");
                    Ok(ActionOutput::error(format!("Error: {e}")))
                }
            },
        }
    }
}
