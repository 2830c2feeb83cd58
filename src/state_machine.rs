//! Question-answering graph as a state machine
//!
//! Implements the Elm Architecture pattern with pure stage transitions:
//! `ListTables → DiscoverSchema → FetchSchema → GenerateQuery →
//! {Terminal | VerifyQuery → ExecuteQuery → GenerateQuery}`.

mod effect;
pub mod event;
pub mod replay;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::{Effect, OracleContext};
pub use event::Event;
pub use replay::{replay, ReplayError};
pub use state::{GraphContext, Stage, StageName};
pub use transition::{transition, TransitionError};
