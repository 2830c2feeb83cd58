//! Read-only statement guard
//!
//! Decides whether a generated statement may reach the store. The decision
//! depends only on the statement text after normalization: comments,
//! string literals and quoted identifiers are blanked out, then the remaining
//! keyword tokens are scanned for destructive verbs.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

static WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Z_][A-Z0-9_$]*").expect("word pattern is valid")
});

/// Statement verbs that modify data or schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Insert,
    Update,
    Delete,
    Drop,
    Alter,
    Truncate,
}

impl Verb {
    pub const ALL: [Verb; 6] = [
        Verb::Insert,
        Verb::Update,
        Verb::Delete,
        Verb::Drop,
        Verb::Alter,
        Verb::Truncate,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            Verb::Insert => "INSERT",
            Verb::Update => "UPDATE",
            Verb::Delete => "DELETE",
            Verb::Drop => "DROP",
            Verb::Alter => "ALTER",
            Verb::Truncate => "TRUNCATE",
        }
    }

    fn from_keyword(word: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|verb| verb.keyword() == word)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown statement verb '{0}'")]
pub struct UnknownVerb(String);

impl FromStr for Verb {
    type Err = UnknownVerb;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_keyword(&s.trim().to_ascii_uppercase()).ok_or_else(|| UnknownVerb(s.to_string()))
    }
}

/// Why a statement was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Statement rejected: {} statements are not permitted. Only read-only queries may be executed against this database.", join_verbs(.verbs))]
pub struct Rejection {
    pub verbs: Vec<Verb>,
}

fn join_verbs(verbs: &[Verb]) -> String {
    verbs
        .iter()
        .map(|v| v.keyword())
        .collect::<Vec<_>>()
        .join("/")
}

/// Which destructive verbs, if any, a deployment tolerates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardPolicy {
    allowed: BTreeSet<Verb>,
}

impl GuardPolicy {
    /// Nothing destructive is allowed
    pub fn strict() -> Self {
        Self::default()
    }

    pub fn allowing(verbs: impl IntoIterator<Item = Verb>) -> Self {
        Self {
            allowed: verbs.into_iter().collect(),
        }
    }

    pub fn allowed(&self) -> &BTreeSet<Verb> {
        &self.allowed
    }

    /// True when no destructive verb is tolerated at all
    pub fn is_strict(&self) -> bool {
        self.allowed.is_empty()
    }

    /// Accept the statement, or explain which verbs blocked it
    pub fn check(&self, statement: &str) -> Result<(), Rejection> {
        if is_read_only(statement) {
            return Ok(());
        }
        let verbs: Vec<Verb> = destructive_verbs(statement)
            .into_iter()
            .filter(|verb| !self.allowed.contains(verb))
            .collect();
        if verbs.is_empty() {
            Ok(())
        } else {
            Err(Rejection { verbs })
        }
    }
}

/// Whether the statement contains no destructive verb token
pub fn is_read_only(statement: &str) -> bool {
    destructive_verbs(statement).is_empty()
}

/// Destructive verbs present as keyword tokens, in first-seen order
pub fn destructive_verbs(statement: &str) -> Vec<Verb> {
    let normalized = normalize(statement);
    let mut found = Vec::new();
    for word in WORD.find_iter(&normalized) {
        if let Some(verb) = Verb::from_keyword(word.as_str()) {
            if !found.contains(&verb) {
                found.push(verb);
            }
        }
    }
    found
}

/// Canonical form of a statement.
///
/// Comments are dropped, string literals become `?`, quoted identifiers
/// become `_`, everything else is upper-cased and whitespace collapsed.
/// An opener with no matching closer is ordinary text, so nothing after an
/// unterminated quote or comment escapes the verb scan.
pub fn normalize(statement: &str) -> String {
    let chars: Vec<char> = statement.chars().collect();
    let mut out = String::with_capacity(statement.len());
    let mut i = 0;

    while let Some(&c) = chars.get(i) {
        let next = chars.get(i + 1).copied();
        let masked = match c {
            '-' if next == Some('-') => Some((
                find_after(&chars, i + 2, &['\n']).unwrap_or(chars.len()),
                Mask::Space,
            )),
            '/' if next == Some('*') => find_after(&chars, i + 2, &['*', '/']).map(|end| (end, Mask::Space)),
            '\'' => quoted_end(&chars, i, c).map(|end| (end, Mask::Literal)),
            '"' | '`' => quoted_end(&chars, i, c).map(|end| (end, Mask::Identifier)),
            '[' => find_after(&chars, i + 1, &[']']).map(|end| (end, Mask::Identifier)),
            '$' => dollar_quote_end(&chars, i).map(|end| (end, Mask::Literal)),
            _ => None,
        };

        match masked {
            Some((end, mask)) => {
                match mask {
                    Mask::Space => push_space(&mut out),
                    Mask::Literal => out.push('?'),
                    Mask::Identifier => out.push('_'),
                }
                i = end;
            }
            None => {
                if c.is_whitespace() {
                    push_space(&mut out);
                } else {
                    out.extend(c.to_uppercase());
                }
                i += 1;
            }
        }
    }

    out.trim_end().to_string()
}

/// What a closed comment, literal or quoted identifier is replaced with
#[derive(Clone, Copy)]
enum Mask {
    Space,
    Literal,
    Identifier,
}

fn push_space(out: &mut String) {
    if !out.is_empty() && !out.ends_with(' ') {
        out.push(' ');
    }
}

/// Index just past the first `closer` starting at or after `from`
fn find_after(chars: &[char], from: usize, closer: &[char]) -> Option<usize> {
    (from..chars.len())
        .find(|&j| chars[j..].starts_with(closer))
        .map(|j| j + closer.len())
}

/// Index just past the closing quote; a doubled quote is an escaped quote
fn quoted_end(chars: &[char], open: usize, quote: char) -> Option<usize> {
    let mut j = open + 1;
    while let Some(&c) = chars.get(j) {
        if c == quote {
            if chars.get(j + 1) == Some(&quote) {
                j += 2;
                continue;
            }
            return Some(j + 1);
        }
        j += 1;
    }
    None
}

/// Index just past a `$tag$ ... $tag$` body. `$1` style parameters are not
/// quotes.
fn dollar_quote_end(chars: &[char], open: usize) -> Option<usize> {
    let mut j = open + 1;
    if chars.get(j).is_some_and(char::is_ascii_digit) {
        return None;
    }
    loop {
        match chars.get(j) {
            Some('$') => break,
            Some(&c) if c.is_alphanumeric() || c == '_' => j += 1,
            _ => return None,
        }
    }
    let tag = chars.get(open..=j)?;
    find_after(chars, j + 1, tag)
}
