//! Directives sent to the oracle
//!
//! The generate directive frames the main conversation; the verify directive
//! frames an isolated single-statement review.

use std::fmt::Write;

/// Directive for the query-writing stage
pub fn generate_query_directive(dialect: &str, row_limit: u32) -> String {
    let mut prompt = format!(
        "You are a {dialect} expert agent designed to interact with a SQL database.
Given an input question, create a syntactically correct {dialect} query to run, \
then look at the results of the query and return the answer.
Unless the user specifies a specific number of examples they wish to obtain, \
always limit your query to at most {row_limit} results.
Never query for all the columns from a specific table, only ask for the relevant \
columns given the question.
"
    );
    prompt.push_str(
        "
DO NOT make any DML statements (INSERT, UPDATE, DELETE, DROP etc.) to the database.
You MUST double check your query before executing it.
If a query returns an error, rewrite the query and try again.
When the results answer the question, reply with the answer in plain text.",
    );
    prompt
}

/// Directive for the isolated verification stage
pub fn verify_query_directive(dialect: &str) -> String {
    const MISTAKES: &[&str] = &[
        "Using NOT IN with NULL values",
        "Using UNION when UNION ALL should have been used",
        "Using BETWEEN for exclusive ranges",
        "Data type mismatch in predicates",
        "Properly quoting identifiers",
        "Using the correct number of arguments for functions",
        "Casting to the correct data type",
        "Using the proper columns for joins",
    ];

    let mut prompt = format!(
        "You are a {dialect} expert with a strong attention to detail.
Double check the {dialect} query for common mistakes, including:
"
    );
    for mistake in MISTAKES {
        let _ = writeln!(prompt, "- {mistake}");
    }
    prompt.push_str(
        "
If there are any of the above mistakes, rewrite the query. If there are no mistakes, \
just reproduce the original query.
You will call the tool to execute the query after this check.",
    );
    prompt
}

/// Sole user content of the verification stage
pub fn verify_request(statement: &str) -> String {
    format!("Please check this query: {statement}")
}

/// Observational turn appended after the table listing
pub fn tables_summary(listing: &str) -> String {
    format!("The following tables are available: {listing}")
}

/// Result text when the guard refuses a statement
pub fn denial_notice(rejection: &str) -> String {
    format!("Error: {rejection}")
}
