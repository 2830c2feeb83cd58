//! Property-based tests for the graph
//!
//! A scripted oracle and store drive the pure transition function through
//! arbitrary generate/verify/execute loops; the invariants below must hold
//! for every script.

use super::effect::{OracleContext, OracleRequest};
use super::state::{GraphContext, Stage, StageName, LIST_TABLES_CALL_ID};
use super::*;
use crate::actions::{Action, ActionKind, ActionOutput};
use crate::guard;
use crate::history::{CallId, History, Invocation, Role, Turn};
use crate::oracle::Forcing;
use proptest::prelude::*;

// ============================================================================
// Scripted collaborators
// ============================================================================

/// What the oracle does on one GenerateQuery pass
#[derive(Debug, Clone)]
enum Pass {
    Answer(String),
    Query {
        draft: String,
        verified: String,
        fails: bool,
    },
}

#[derive(Debug)]
struct Run {
    history: History,
    stages: Vec<StageName>,
    requests: Vec<OracleRequest>,
    first_effect: Option<Effect>,
    executed: Vec<String>,
    refused: Vec<CallId>,
    outcome: Result<String, TransitionError>,
}

fn draft_id(iteration: u32) -> String {
    format!("q{iteration}")
}

fn oracle_reply(stage: &Stage, passes: &[Pass]) -> Turn {
    match stage {
        Stage::DiscoverSchema { .. } => Turn::oracle_call(
            "",
            Invocation::new(
                "s1",
                Action::DescribeSchema {
                    tables: vec!["colors".to_string()],
                },
            ),
        ),
        Stage::GenerateQuery { iteration, .. } => {
            let pass = passes
                .get(*iteration as usize - 1)
                .cloned()
                .unwrap_or_else(|| Pass::Answer("Nothing more to check.".to_string()));
            match pass {
                Pass::Answer(text) => Turn::oracle_text(text),
                Pass::Query { draft, .. } => Turn::oracle_call(
                    "",
                    Invocation::new(draft_id(*iteration), Action::RunQuery { query: draft }),
                ),
            }
        }
        Stage::VerifyQuery { iteration, .. } => match &passes[*iteration as usize - 1] {
            Pass::Query { verified, .. } => Turn::oracle_call(
                "Checked.",
                Invocation::new(
                    format!("v{iteration}"),
                    Action::RunQuery {
                        query: verified.clone(),
                    },
                ),
            ),
            Pass::Answer(_) => unreachable!("verify only follows a query pass"),
        },
        other => unreachable!("no oracle call in {other:?}"),
    }
}

fn run_action(call: &Invocation, stage: &Stage, passes: &[Pass], run: &mut Run) -> ActionOutput {
    match &call.action {
        Action::ListTables => ActionOutput::success("colors, parts"),
        Action::DescribeSchema { .. } => {
            ActionOutput::success("CREATE TABLE colors (id INTEGER, name TEXT)")
        }
        Action::RunQuery { query } => {
            run.executed.push(query.clone());
            let fails = matches!(
                passes.get(stage.iteration() as usize - 1),
                Some(Pass::Query { fails: true, .. })
            );
            if fails {
                ActionOutput::error("Error: near \"SELEC\": syntax error")
            } else {
                ActionOutput::success("[(150,)]")
            }
        }
    }
}

fn drive(context: &GraphContext, passes: &[Pass]) -> Run {
    let mut run = Run {
        history: History::new(),
        stages: vec![],
        requests: vec![],
        first_effect: None,
        executed: vec![],
        refused: vec![],
        outcome: Err(TransitionError::InvalidTransition("not started".to_string())),
    };
    let mut stage = Stage::Ready;
    let mut next = Some(Event::Question {
        text: "how many rows in table colors".to_string(),
    });

    while let Some(event) = next.take() {
        let result = match transition(&stage, context, event) {
            Ok(result) => result,
            Err(e) => {
                run.outcome = Err(e);
                return run;
            }
        };
        for turn in result.turns {
            run.history.append(turn).expect("history discipline holds");
            assert!(run.history.unresolved_count() <= 1);
        }
        stage = result.new_state;
        run.stages.push(stage.name());

        for effect in result.effects {
            if run.first_effect.is_none() {
                run.first_effect = Some(effect.clone());
            }
            match effect {
                Effect::InvokeAction { call } => {
                    let output = run_action(&call, &stage, passes, &mut run);
                    next = Some(Event::ActionComplete {
                        call_id: call.id,
                        output,
                    });
                }
                Effect::RefuseAction { call_id, output } => {
                    run.refused.push(call_id.clone());
                    next = Some(Event::ActionComplete { call_id, output });
                }
                Effect::AskOracle { request } => {
                    run.requests.push(request);
                    next = Some(Event::OracleReply {
                        turn: oracle_reply(&stage, passes),
                    });
                }
                Effect::ScheduleRetry { .. } => unreachable!("scripted oracle never fails"),
                Effect::Finish { answer } => {
                    run.outcome = Ok(answer);
                    return run;
                }
            }
        }
    }
    run
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_read_only() -> impl Strategy<Value = String> {
    prop_oneof![
        (1u32..50).prop_map(|n| format!("SELECT name FROM colors LIMIT {n}")),
        Just("SELECT COUNT(*) FROM colors".to_string()),
        Just("SELECT c.name FROM colors c WHERE c.name = 'DROP TABLE'".to_string()),
        Just("SELECT \"delete\" FROM parts -- update later".to_string()),
    ]
}

fn arb_destructive() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("DELETE FROM colors".to_string()),
        Just("DROP TABLE parts".to_string()),
        Just("UPDATE colors SET name = 'x'".to_string()),
        Just("WITH gone AS (DELETE FROM colors RETURNING id) SELECT * FROM gone".to_string()),
    ]
}

fn arb_statement() -> impl Strategy<Value = String> {
    prop_oneof![3 => arb_read_only(), 1 => arb_destructive()]
}

fn arb_query_pass() -> impl Strategy<Value = Pass> {
    (arb_statement(), prop::option::of(arb_statement()), any::<bool>()).prop_map(
        |(draft, revised, fails)| Pass::Query {
            verified: revised.unwrap_or_else(|| draft.clone()),
            draft,
            fails,
        },
    )
}

fn arb_script() -> impl Strategy<Value = Vec<Pass>> {
    (
        prop::collection::vec(arb_query_pass(), 0..6),
        prop::option::of("[A-Z][a-z ]{3,30}\\."),
    )
        .prop_map(|(mut passes, answer)| {
            if let Some(answer) = answer {
                passes.push(Pass::Answer(answer));
            }
            passes
        })
}

fn context(max_iterations: u32) -> GraphContext {
    GraphContext::new("SQLite").with_max_iterations(max_iterations)
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_list_tables_always_first(script in arb_script(), max in 1u32..8) {
        let run = drive(&context(max), &script);
        prop_assert_eq!(run.stages.first(), Some(&StageName::ListTables));
        let lists_first = matches!(
            run.first_effect,
            Some(Effect::InvokeAction { ref call }) if call.action == Action::ListTables
                && call.id == CallId::new(LIST_TABLES_CALL_ID)
        );
        prop_assert!(lists_first);
    }

    #[test]
    fn prop_discovery_and_verification_are_forced(script in arb_script(), max in 1u32..8) {
        let run = drive(&context(max), &script);
        let discover: Vec<_> = run.requests.iter()
            .filter(|r| r.stage == StageName::DiscoverSchema)
            .collect();
        prop_assert_eq!(discover.len(), 1);
        prop_assert_eq!(discover[0].forcing, Forcing::MustCall);
        prop_assert_eq!(&discover[0].allowed, &vec![ActionKind::DescribeSchema]);

        for request in &run.requests {
            match request.stage {
                StageName::VerifyQuery => {
                    prop_assert_eq!(request.forcing, Forcing::MustCall);
                    prop_assert!(matches!(request.context, OracleContext::Isolated(ref turns) if turns.len() == 1));
                }
                StageName::GenerateQuery => {
                    prop_assert_eq!(request.forcing, Forcing::Free);
                    prop_assert_eq!(&request.context, &OracleContext::History);
                }
                _ => {}
            }
        }
    }

    #[test]
    fn prop_results_resolve_original_call(script in arb_script(), max in 1u32..8) {
        let run = drive(&context(max), &script);
        let turns = run.history.turns();
        for (index, turn) in turns.iter().enumerate() {
            if turn.role != Role::ActionResult {
                continue;
            }
            let resolves = turn.resolves.clone().unwrap();
            let id = resolves.as_str();
            if id == LIST_TABLES_CALL_ID || id == "s1" {
                continue;
            }
            // Every query result answers the generate-stage draft id
            prop_assert!(id.starts_with('q'), "result resolves {}", id);
            let issued = turns[..index].iter()
                .filter_map(|t| t.invocation.as_ref())
                .any(|call| call.id == resolves);
            prop_assert!(issued);
        }
    }

    #[test]
    fn prop_destructive_statements_never_execute(script in arb_script(), max in 1u32..8) {
        let run = drive(&context(max), &script);
        for statement in &run.executed {
            prop_assert!(guard::is_read_only(statement), "executed {}", statement);
        }
        for pass in script.iter().take(run.executed.len() + run.refused.len()) {
            if let Pass::Query { verified, .. } = pass {
                let executed = run.executed.contains(verified);
                prop_assert_eq!(executed, guard::is_read_only(verified));
            }
        }
    }

    #[test]
    fn prop_outcome_matches_script(script in arb_script(), max in 1u32..8) {
        let run = drive(&context(max), &script);
        let answer_pass = script.iter().position(|p| matches!(p, Pass::Answer(_)));
        match answer_pass {
            Some(i) if (i as u32) < max => {
                let Pass::Answer(expected) = &script[i] else { unreachable!() };
                prop_assert_eq!(run.outcome.as_ref().ok(), Some(expected));
                prop_assert!(run.history.turns().last().unwrap().is_final_answer());
                prop_assert_eq!(run.history.unresolved_count(), 0);
            }
            Some(_) => {
                let limited = matches!(run.outcome, Err(TransitionError::IterationLimit { .. }));
                prop_assert!(limited);
            }
            None if script.len() < max as usize => {
                prop_assert_eq!(run.outcome.as_deref().ok(), Some("Nothing more to check."));
            }
            None => {
                let limited = matches!(run.outcome, Err(TransitionError::IterationLimit { .. }));
                prop_assert!(limited);
            }
        }
    }

    #[test]
    fn prop_completed_history_replays(script in arb_script(), max in 1u32..8) {
        let ctx = context(max);
        let run = drive(&ctx, &script);
        if let Ok(answer) = &run.outcome {
            let replayed = replay(&ctx, run.history.turns()).unwrap();
            prop_assert_eq!(&replayed, answer);
        }
    }
}
