//! Expression optimization
//!
//! Pushes common label filters across binary operations, so that
//! `foo{a="b"} + bar` becomes `foo{a="b"} + bar{a="b"}`. Vector matching
//! already requires the shared labels to agree, so pushed filters only
//! restate constraints the engine enforces; the backend can then prune
//! series much earlier.
//!
//! Propagation respects operator semantics: `or` keeps only the filters
//! shared by both sides, `unless` keeps the left side's, and grouping
//! metadata (`on` / `ignoring`, `by` / `without`) trims the propagated set
//! to the labels that survive the operation. An aggregation without a
//! modifier stops propagation entirely.

use promql_parser::label::{MatchOp, Matcher};
use promql_parser::parser::token;
use promql_parser::parser::{BinaryExpr, Call, Expr, LabelModifier, VectorSelector};

/// Functions whose argument must not be constrained from outside: their
/// result does not vector-match against the argument's series.
const OPAQUE_FUNCTIONS: &[&str] = &["absent", "absent_over_time", "scalar", "vector"];

/// Optimize an expression in place.
pub fn optimize(expr: &mut Expr) {
    match expr {
        Expr::Binary(be) => {
            optimize(&mut be.lhs);
            optimize(&mut be.rhs);

            let common = binary_common_filters(be);
            add_filters(&mut be.lhs, &common);
            add_filters(&mut be.rhs, &common);
        }
        Expr::Aggregate(agg) => optimize(&mut agg.expr),
        Expr::Unary(u) => optimize(&mut u.expr),
        Expr::Paren(p) => optimize(&mut p.expr),
        Expr::Subquery(sq) => optimize(&mut sq.expr),
        Expr::Call(call) => {
            for arg in call.args.args.iter_mut() {
                optimize(arg.as_mut());
            }
        }
        _ => {}
    }
}

/// Label filters guaranteed to hold on every output series of `expr`.
fn common_label_filters(expr: &Expr) -> Vec<Matcher> {
    match expr {
        Expr::VectorSelector(vs) => selector_filters(vs),
        Expr::MatrixSelector(ms) => selector_filters(&ms.vs),
        Expr::Paren(p) => common_label_filters(&p.expr),
        Expr::Unary(u) => common_label_filters(&u.expr),
        Expr::Subquery(sq) => common_label_filters(&sq.expr),
        Expr::Aggregate(agg) => {
            let inner = common_label_filters(&agg.expr);
            trim_by_label_modifier(&inner, agg.modifier.as_ref())
        }
        Expr::Binary(be) => binary_common_filters(be),
        Expr::Call(call) => match transparent_arg(call) {
            Some(arg) => common_label_filters(arg),
            None => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Filters that hold on a binary operation's output, trimmed to the labels
/// its matching rules let through.
fn binary_common_filters(be: &BinaryExpr) -> Vec<Matcher> {
    let lhs = common_label_filters(&be.lhs);
    let rhs = common_label_filters(&be.rhs);

    let mut filters = if is_op(be, token::T_LOR) {
        // `{f, f1} or {f, f2}` guarantees only `{f}`.
        intersect(&lhs, &rhs)
    } else if is_op(be, token::T_LUNLESS) {
        // `{f1} unless {f2}` keeps left-hand series only.
        lhs
    } else {
        // Vector matching requires shared labels to agree on both sides.
        union(lhs, rhs)
    };
    trim_by_group_modifier(&mut filters, be);
    filters
}

/// Add `filters` to every selector under `expr` that does not already
/// carry them, trimming on the way down exactly as the upward pass does.
fn add_filters(expr: &mut Expr, filters: &[Matcher]) {
    if filters.is_empty() {
        return;
    }
    match expr {
        Expr::VectorSelector(vs) => add_to_selector(vs, filters),
        Expr::MatrixSelector(ms) => add_to_selector(&mut ms.vs, filters),
        Expr::Paren(p) => add_filters(&mut p.expr, filters),
        Expr::Unary(u) => add_filters(&mut u.expr, filters),
        Expr::Subquery(sq) => add_filters(&mut sq.expr, filters),
        Expr::Aggregate(agg) => {
            let trimmed = trim_by_label_modifier(filters, agg.modifier.as_ref());
            add_filters(&mut agg.expr, &trimmed);
        }
        Expr::Binary(be) => {
            let mut trimmed = filters.to_vec();
            trim_by_group_modifier(&mut trimmed, be);
            add_filters(&mut be.lhs, &trimmed);
            add_filters(&mut be.rhs, &trimmed);
        }
        Expr::Call(call) => {
            if is_opaque(call) {
                return;
            }
            if call.args.args.len() == 1 {
                add_filters(call.args.args[0].as_mut(), filters);
            }
        }
        _ => {}
    }
}

fn is_opaque(call: &Call) -> bool {
    OPAQUE_FUNCTIONS.iter().any(|f| *f == call.func.name)
}

/// The single argument a function forwards its series through, if any.
fn transparent_arg(call: &Call) -> Option<&Expr> {
    if is_opaque(call) {
        return None;
    }
    match call.args.args.as_slice() {
        [arg] => Some(arg.as_ref()),
        _ => None,
    }
}

fn selector_filters(vs: &VectorSelector) -> Vec<Matcher> {
    vs.matchers
        .matchers
        .iter()
        .filter(|m| m.name != "__name__")
        .cloned()
        .collect()
}

fn add_to_selector(vs: &mut VectorSelector, filters: &[Matcher]) {
    for filter in filters {
        if !vs
            .matchers
            .matchers
            .iter()
            .any(|m| same_matcher(m, filter))
        {
            vs.matchers.matchers.push(filter.clone());
        }
    }
}

fn is_op(be: &BinaryExpr, id: token::TokenId) -> bool {
    be.op.id() == id
}

fn trim_by_group_modifier(filters: &mut Vec<Matcher>, be: &BinaryExpr) {
    if let Some(modifier) = &be.modifier
        && let Some(matching) = &modifier.matching
    {
        match matching {
            LabelModifier::Include(labels) => {
                filters.retain(|m| labels.labels.contains(&m.name));
            }
            LabelModifier::Exclude(labels) => {
                filters.retain(|m| !labels.labels.contains(&m.name));
            }
        }
    }
}

fn trim_by_label_modifier(
    filters: &[Matcher],
    modifier: Option<&LabelModifier>,
) -> Vec<Matcher> {
    match modifier {
        Some(LabelModifier::Include(labels)) => filters
            .iter()
            .filter(|m| labels.labels.contains(&m.name))
            .cloned()
            .collect(),
        Some(LabelModifier::Exclude(labels)) => filters
            .iter()
            .filter(|m| !labels.labels.contains(&m.name))
            .cloned()
            .collect(),
        // Without grouping metadata nothing is known to survive.
        None => Vec::new(),
    }
}

fn union(mut a: Vec<Matcher>, b: Vec<Matcher>) -> Vec<Matcher> {
    for filter in b {
        if !a.iter().any(|m| same_matcher(m, &filter)) {
            a.push(filter);
        }
    }
    a
}

fn intersect(a: &[Matcher], b: &[Matcher]) -> Vec<Matcher> {
    a.iter()
        .filter(|m| b.iter().any(|other| same_matcher(m, other)))
        .cloned()
        .collect()
}

/// Structural matcher equality: name, value and operator kind. The
/// compiled automaton inside regex ops is derived from the value and is
/// deliberately ignored.
fn same_matcher(a: &Matcher, b: &Matcher) -> bool {
    a.name == b.name && a.value == b.value && op_kind(&a.op) == op_kind(&b.op)
}

fn op_kind(op: &MatchOp) -> u8 {
    match op {
        MatchOp::Equal => 0,
        MatchOp::NotEqual => 1,
        MatchOp::Re(_) => 2,
        MatchOp::NotRe(_) => 3,
    }
}
