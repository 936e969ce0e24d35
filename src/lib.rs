//! promfence
//!
//! A query-rewriting authorization layer for Prometheus-compatible
//! time-series backends. The crate sits between callers and a metrics
//! query API and rewrites each incoming PromQL/MetricsQL expression so
//! that every metric selector carries the label constraints derived from
//! the caller's role membership. The caller observes a "virtual" slice of
//! the database defined by their roles; the backend never learns about
//! the tenancy model.
//!
//! ## Components
//!
//! - **ACL compiler** turns YAML role definitions into compiled label
//!   filters, deciding what counts as a regex, collapsing multi-value
//!   lists, and degenerating `.*` rules to full access.
//! - **Registry & composer** loads the role-to-ACL table once, then
//!   merges the roles of each request into one effective ACL, optionally
//!   treating unknown role names as inline ACL fragments ("assumed
//!   roles").
//! - **Query rewriter** parses an expression, injects or merges the
//!   ACL's filters into every metric selector, and serializes it back;
//!   optionally deduplicates already-restrictive user filters and pushes
//!   common filters across binary operations.
//!
//! ## Example
//!
//! ```no_run
//! use promfence::{AclRegistry, QueryModifier};
//!
//! # fn main() -> promfence::Result<()> {
//! let registry = AclRegistry::from_file("acl.yaml")?;
//! let acl = registry.compose(&["developer".to_string()], false)?;
//! let modifier = QueryModifier::new(acl)?.with_deduplication(true);
//!
//! let rewritten = modifier.rewrite_query(r#"up{job="node"}"#)?;
//! # let _ = rewritten;
//! # Ok(())
//! # }
//! ```

pub mod acl;
pub mod error;
pub mod rewrite;

// Re-export main types
pub use acl::{Acl, AclRegistry, CompiledRule, LabelFilter};
pub use error::{AclError, AppError, Result, RewriteError};
pub use rewrite::QueryModifier;
