//! Label filter primitives
//!
//! The unit of expression for ACL rules: a single label constraint, plus the
//! helpers that decide whether a textual term is a regular expression, strip
//! redundant anchors, and convert a compiled rule into a `promql-parser`
//! matcher for injection into a selector.

use crate::error::RewriteError;
use promql_parser::label::{MatchOp, Matcher};
use regex::Regex;
use std::fmt;

/// Characters that flag an ACL term as a regular expression.
///
/// The detection is heuristic: any occurrence of one of these characters
/// marks the whole term as a regex. Escaping does not produce literal
/// matches.
pub const REGEXP_SIGNAL_SET: &str = r".+*?^$()[]{}|\";

/// The rule value that grants unrestricted visibility on a label.
pub const FULL_ACCESS_VALUE: &str = ".*";

/// Check whether a term contains any character from the regexp-signal set.
pub fn contains_regexp_signal(term: &str) -> bool {
    term.chars().any(|c| REGEXP_SIGNAL_SET.contains(c))
}

/// Strip redundant regex anchors from a term.
///
/// PromQL anchors label-matcher regexes implicitly, so user-supplied `^(`
/// and `)$` are noise that would defeat the rewriter's textual equality
/// tests. One pass, each side independently: leading `^` then `(`, trailing
/// `$` then `)`.
pub fn strip_anchors(term: &str) -> &str {
    let term = term.strip_prefix('^').unwrap_or(term);
    let term = term.strip_prefix('(').unwrap_or(term);
    let term = term.strip_suffix('$').unwrap_or(term);
    term.strip_suffix(')').unwrap_or(term)
}

/// Compile a regex the way PromQL evaluates label matchers: fully anchored.
pub fn compile_anchored(value: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{value})$"))
}

/// A single label constraint.
///
/// Semantics follow PromQL: a positive non-regex filter demands equality, a
/// positive regex filter demands an (anchored) match, negatives are the
/// complement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelFilter {
    /// Label name the filter applies to.
    pub label: String,
    /// Literal value or regex source, without anchors.
    pub value: String,
    /// Whether `value` is a regular expression.
    pub is_regexp: bool,
    /// Whether the filter is negated (`!=` / `!~`).
    pub is_negative: bool,
}

impl LabelFilter {
    /// A positive equality filter (`label="value"`).
    pub fn equality(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            is_regexp: false,
            is_negative: false,
        }
    }

    /// A positive regex filter (`label=~"value"`).
    pub fn regexp(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            is_regexp: true,
            is_negative: false,
        }
    }

    /// Convert to a `promql-parser` matcher.
    ///
    /// Regex filters embed the anchored automaton, matching what the parser
    /// produces for `=~` / `!~` matchers it reads from query text.
    pub fn to_matcher(&self) -> Result<Matcher, RewriteError> {
        let op = match (self.is_regexp, self.is_negative) {
            (false, false) => MatchOp::Equal,
            (false, true) => MatchOp::NotEqual,
            (true, negative) => regex_match_op(&self.label, &self.value, negative)?,
        };
        Ok(Matcher::new(op, &self.label, &self.value))
    }
}

impl fmt::Display for LabelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match (self.is_regexp, self.is_negative) {
            (false, false) => "=",
            (false, true) => "!=",
            (true, false) => "=~",
            (true, true) => "!~",
        };
        write!(f, "{}{}\"{}\"", self.label, op, self.value)
    }
}

/// Build a regex matcher with a freshly compiled anchored automaton.
pub(crate) fn regex_matcher(
    label: &str,
    value: &str,
    negative: bool,
) -> Result<Matcher, RewriteError> {
    let op = regex_match_op(label, value, negative)?;
    Ok(Matcher::new(op, label, value))
}

fn regex_match_op(label: &str, value: &str, negative: bool) -> Result<MatchOp, RewriteError> {
    let re = compile_anchored(value).map_err(|e| RewriteError::FilterRegex {
        label: label.to_string(),
        reason: e.to_string(),
    })?;
    Ok(if negative {
        MatchOp::NotRe(re)
    } else {
        MatchOp::Re(re)
    })
}

/// Whether a matcher is a regex matcher (`=~` / `!~`).
pub(crate) fn matcher_is_regexp(matcher: &Matcher) -> bool {
    matches!(matcher.op, MatchOp::Re(_) | MatchOp::NotRe(_))
}

/// Whether a matcher is negated (`!=` / `!~`).
pub(crate) fn matcher_is_negative(matcher: &Matcher) -> bool {
    matches!(matcher.op, MatchOp::NotEqual | MatchOp::NotRe(_))
}

/// A positive regex matcher whose value carries no regex metacharacter,
/// e.g. `namespace=~"kube-system"`. Behaves as literal equality, and the
/// rewriter treats it as such when testing containment.
pub(crate) fn is_fake_positive_regexp(matcher: &Matcher) -> bool {
    matches!(matcher.op, MatchOp::Re(_)) && !contains_regexp_signal(&matcher.value)
}
