//! ACL compilation
//!
//! Turns a textual role definition of the form
//! `metrics: { <label>: '<comma-separated-terms>', … }` into a compiled set
//! of label filters with metadata. The compiler decides what counts as a
//! regular expression, collapses multi-value lists into alternations, and
//! degenerates a rule to full access when any term is the literal `.*`.

use crate::acl::filter::{
    FULL_ACCESS_VALUE, LabelFilter, contains_regexp_signal, strip_anchors,
};
use crate::error::AclError;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;

/// YAML schema of a single role definition.
#[derive(Debug, Deserialize)]
struct AclDef {
    #[serde(default)]
    metrics: BTreeMap<String, String>,
}

/// A compiled rule for one label.
///
/// Keeps the canonical source form of the rule alongside the filter; the
/// raw form is what role composition joins when several roles cover the
/// same label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledRule {
    /// The label filter the rewriter injects.
    pub filter: LabelFilter,
    /// True iff the compiled value is exactly `.*`.
    pub full_access: bool,
    /// Canonical comma-separated source form of this rule.
    pub raw_acl: String,
}

impl CompiledRule {
    /// Compile one label rule from its comma-separated definition.
    fn compile(label: &str, definition: &str) -> Result<Self, AclError> {
        let terms: Vec<&str> = definition.split(',').map(str::trim).collect();
        if terms.iter().any(|t| t.is_empty()) {
            return Err(AclError::EmptyTerm {
                label: label.to_string(),
            });
        }

        // Full access dominates: any `.*` term discards the others.
        if terms.iter().any(|t| *t == FULL_ACCESS_VALUE) {
            return Ok(Self {
                filter: LabelFilter::regexp(label, FULL_ACCESS_VALUE),
                full_access: true,
                raw_acl: FULL_ACCESS_VALUE.to_string(),
            });
        }

        let (value, is_regexp, raw_acl) = match terms.as_slice() {
            [term] => {
                if contains_regexp_signal(term) {
                    (strip_anchors(term).to_string(), true, term.to_string())
                } else {
                    (term.to_string(), false, term.to_string())
                }
            }
            _ => (terms.join("|"), true, terms.join(",")),
        };

        if is_regexp {
            // The injected matcher is anchored at evaluation time; validate
            // the bare source here so the error points at the rule.
            if let Err(e) = Regex::new(&value) {
                return Err(AclError::InvalidRegex {
                    label: label.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        Ok(Self {
            filter: LabelFilter {
                label: label.to_string(),
                value,
                is_regexp,
                is_negative: false,
            },
            full_access: false,
            raw_acl,
        })
    }
}

/// A compiled ACL: one rule per label.
///
/// Rules are kept in a `BTreeMap` so iteration order (and therefore filter
/// injection and raw-ACL composition) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acl {
    rules: BTreeMap<String, CompiledRule>,
}

impl Acl {
    /// Compile an ACL from a YAML role definition.
    pub fn from_yaml(source: &str) -> Result<Self, AclError> {
        let def: AclDef = serde_yaml::from_str(source)?;

        let mut rules = BTreeMap::new();
        for (label, definition) in &def.metrics {
            if label.is_empty() {
                return Err(AclError::EmptyLabel);
            }
            rules.insert(label.clone(), CompiledRule::compile(label, definition)?);
        }

        Ok(Self { rules })
    }

    /// Build an ACL from already-compiled rules (role composition).
    pub(crate) fn from_rules(rules: BTreeMap<String, CompiledRule>) -> Self {
        Self { rules }
    }

    /// Whether the ACL carries no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Look up the rule for a label.
    pub fn get(&self, label: &str) -> Option<&CompiledRule> {
        self.rules.get(label)
    }

    /// Iterate rules in label order.
    pub fn rules(&self) -> impl Iterator<Item = (&String, &CompiledRule)> {
        self.rules.iter()
    }

    /// Whether any rule grants unrestricted visibility on its label.
    pub fn has_full_access(&self) -> bool {
        self.rules.values().any(|rule| rule.full_access)
    }

    /// Flatten the ACL into its label filters, in label order.
    pub fn label_filters(&self) -> Vec<LabelFilter> {
        self.rules.values().map(|rule| rule.filter.clone()).collect()
    }
}
