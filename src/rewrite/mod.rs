//! Query rewriting
//!
//! Applies an effective ACL to PromQL/MetricsQL requests. Every metric
//! selector in a query gets the ACL's label filters injected or merged, so
//! the caller observes only the slice of the database their roles define,
//! without the backend knowing about the tenancy model.
//!
//! Injection semantics per rule:
//! - a non-regex rule replaces every user filter on its label (equality is
//!   absolute);
//! - a regex rule is appended, or merged into an existing regex filter of
//!   the same label and sign. Only negative regexps are union-merged: a
//!   wider exclusion further restricts what the caller sees, while a wider
//!   positive match would expose data.
//!
//! With deduplication enabled, a selector whose own filters are already at
//! least as restrictive as a positive regex rule is left untouched, so
//! `namespace="minio"` does not grow a redundant `namespace=~"minio|stolon"`
//! companion.

pub mod optimizer;

use crate::acl::compiler::Acl;
use crate::acl::filter::{
    LabelFilter, compile_anchored, is_fake_positive_regexp, matcher_is_negative,
    matcher_is_regexp, regex_matcher,
};
use crate::error::{AppError, RewriteError};
use promql_parser::label::Matcher;
use promql_parser::parser::{self, Expr, VectorSelector};
use regex::Regex;
use std::collections::BTreeMap;
use tracing::debug;
use url::form_urlencoded;

/// Parameter keys whose values carry expressions to rewrite.
const QUERY_PARAMS: &[&str] = &["query", "match[]"];

/// Rewrites PromQL/MetricsQL requests according to an ACL.
///
/// Immutable once built; construct one per request from the caller's
/// effective ACL.
#[derive(Debug)]
pub struct QueryModifier {
    acl: Acl,
    rules: Vec<AclRule>,
    enable_deduplication: bool,
    optimize_expressions: bool,
}

/// An ACL rule pre-converted for injection.
#[derive(Debug)]
struct AclRule {
    filter: LabelFilter,
    matcher: Matcher,
    /// Anchored form of a positive regex rule, for containment tests.
    anchored: Option<Regex>,
}

impl QueryModifier {
    /// Build a modifier from an effective ACL.
    ///
    /// Both switches start off; enable them with [`with_deduplication`]
    /// and [`with_optimization`].
    ///
    /// [`with_deduplication`]: QueryModifier::with_deduplication
    /// [`with_optimization`]: QueryModifier::with_optimization
    pub fn new(acl: Acl) -> Result<Self, RewriteError> {
        let mut rules = Vec::with_capacity(acl.len());
        for (label, rule) in acl.rules() {
            let matcher = rule.filter.to_matcher()?;
            let anchored = if rule.filter.is_regexp && !rule.filter.is_negative {
                let re = compile_anchored(&rule.filter.value).map_err(|e| {
                    RewriteError::FilterRegex {
                        label: label.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Some(re)
            } else {
                None
            };
            rules.push(AclRule {
                filter: rule.filter.clone(),
                matcher,
                anchored,
            });
        }

        Ok(Self {
            acl,
            rules,
            enable_deduplication: false,
            optimize_expressions: false,
        })
    }

    /// Build a modifier straight from a YAML ACL definition.
    pub fn from_yaml(source: &str) -> Result<Self, AppError> {
        let acl = Acl::from_yaml(source)?;
        Ok(Self::new(acl)?)
    }

    /// Leave selectors alone when their own filters are already at least
    /// as restrictive as the rule.
    pub fn with_deduplication(mut self, enable: bool) -> Self {
        self.enable_deduplication = enable;
        self
    }

    /// Push common label filters across binary operations after rewriting.
    pub fn with_optimization(mut self, enable: bool) -> Self {
        self.optimize_expressions = enable;
        self
    }

    /// The ACL this modifier enforces.
    pub fn acl(&self) -> &Acl {
        &self.acl
    }

    /// Rewrite the `query` / `match[]` values of a URL parameter multimap
    /// and re-encode it in canonical form: keys in lexicographic order
    /// (values for one key keep their input order), standard
    /// percent-encoding. All other parameters pass through unchanged.
    pub fn rewrite_params(
        &self,
        params: &[(String, String)],
    ) -> Result<String, RewriteError> {
        if self.acl.is_empty() {
            return Err(RewriteError::EmptyAcl);
        }

        let mut grouped: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for (key, value) in params {
            let value = if QUERY_PARAMS.contains(&key.as_str()) {
                self.rewrite_query(value)?
            } else {
                value.clone()
            };
            grouped.entry(key.as_str()).or_default().push(value);
        }

        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, values) in &grouped {
            for value in values {
                serializer.append_pair(key, value);
            }
        }
        Ok(serializer.finish())
    }

    /// Parse one expression, rewrite it and serialize it back.
    pub fn rewrite_query(&self, query: &str) -> Result<String, RewriteError> {
        if self.acl.is_empty() {
            return Err(RewriteError::EmptyAcl);
        }

        let expr = parser::parse(query).map_err(|e| RewriteError::ParseQuery {
            reason: e.to_string(),
        })?;
        let rewritten = self.rewrite_expr(&expr)?;

        let result = rewritten.to_string();
        debug!(original = query, rewritten = %result, "rewrote query");
        Ok(result)
    }

    /// Rewrite a parsed expression.
    ///
    /// The input is cloned before mutation; concurrent rewrites of the
    /// same parsed expression never share AST nodes.
    pub fn rewrite_expr(&self, expr: &Expr) -> Result<Expr, RewriteError> {
        let mut rewritten = expr.clone();
        walk_selectors(&mut rewritten, &mut |vs| self.apply_to_selector(vs))?;
        if self.optimize_expressions {
            optimizer::optimize(&mut rewritten);
        }
        Ok(rewritten)
    }

    /// Inject every ACL rule into one selector's matcher list.
    fn apply_to_selector(&self, vs: &mut VectorSelector) -> Result<(), RewriteError> {
        for rule in &self.rules {
            if rule.filter.is_regexp {
                if !self.enable_deduplication
                    || !self.should_not_be_modified(&vs.matchers.matchers, rule)
                {
                    append_or_merge(&mut vs.matchers.matchers, rule)?;
                }
            } else {
                replace_by_name(&mut vs.matchers.matchers, &rule.matcher);
            }
        }
        Ok(())
    }

    /// Whether a selector's own filters already confine it within a
    /// positive regex rule, making injection redundant.
    fn should_not_be_modified(&self, matchers: &[Matcher], rule: &AclRule) -> bool {
        if self.acl.has_full_access() {
            return true;
        }

        let rule_is_positive_regexp = rule.filter.is_regexp && !rule.filter.is_negative;

        let mut seen = 0;
        let mut seen_unmodified = 0;

        for matcher in matchers {
            if matcher.name != rule.filter.label
                || matcher_is_negative(matcher)
                || !rule_is_positive_regexp
            {
                continue;
            }
            seen += 1;

            // Literal values (equality filters and fake positive regexps)
            // count as unmodified when the rule's anchored regex contains
            // them.
            if !matcher_is_regexp(matcher) || is_fake_positive_regexp(matcher) {
                if let Some(anchored) = &rule.anchored
                    && anchored.is_match(&matcher.value)
                {
                    seen_unmodified += 1;
                    continue;
                }
            }

            // A regex filter spelled exactly like the rule.
            if matcher_is_regexp(matcher) && matcher.value == rule.filter.value {
                seen_unmodified += 1;
                continue;
            }
        }

        seen > 0 && seen == seen_unmodified
    }
}

/// Visit every vector selector in an expression, in pre-order, including
/// the one inside a matrix selector and those nested under aggregations,
/// unary/binary/paren expressions, subqueries and function calls.
fn walk_selectors<F>(expr: &mut Expr, visit: &mut F) -> Result<(), RewriteError>
where
    F: FnMut(&mut VectorSelector) -> Result<(), RewriteError>,
{
    match expr {
        Expr::VectorSelector(vs) => visit(vs),
        Expr::MatrixSelector(ms) => visit(&mut ms.vs),
        Expr::Aggregate(agg) => {
            walk_selectors(&mut agg.expr, visit)?;
            if let Some(param) = agg.param.as_deref_mut() {
                walk_selectors(param, visit)?;
            }
            Ok(())
        }
        Expr::Unary(u) => walk_selectors(&mut u.expr, visit),
        Expr::Binary(be) => {
            walk_selectors(&mut be.lhs, visit)?;
            walk_selectors(&mut be.rhs, visit)
        }
        Expr::Paren(p) => walk_selectors(&mut p.expr, visit),
        Expr::Subquery(sq) => walk_selectors(&mut sq.expr, visit),
        Expr::Call(call) => {
            for arg in call.args.args.iter_mut() {
                walk_selectors(arg.as_mut(), visit)?;
            }
            Ok(())
        }
        Expr::NumberLiteral(_) | Expr::StringLiteral(_) | Expr::Extension(_) => Ok(()),
    }
}

/// Append a regex rule, or merge it into existing regex filters with the
/// same label and sign. Negative values union into `existing|new`;
/// positive values are overwritten, never widened.
fn append_or_merge(matchers: &mut Vec<Matcher>, rule: &AclRule) -> Result<(), RewriteError> {
    let mut absorbed = false;

    for matcher in matchers.iter_mut() {
        if matcher.name != rule.filter.label {
            continue;
        }
        let negative = matcher_is_negative(matcher);
        if matcher_is_regexp(matcher) && negative == rule.filter.is_negative {
            absorbed = true;
            let value = if !matcher.value.is_empty() && negative {
                format!("{}|{}", matcher.value, rule.filter.value)
            } else {
                rule.filter.value.clone()
            };
            *matcher = regex_matcher(&rule.filter.label, &value, negative)?;
        }
    }

    if !absorbed {
        matchers.push(rule.matcher.clone());
    }
    Ok(())
}

/// Drop every filter carrying the rule's label, then append the rule.
fn replace_by_name(matchers: &mut Vec<Matcher>, rule: &Matcher) {
    matchers.retain(|m| m.name != rule.name);
    matchers.push(rule.clone());
}
