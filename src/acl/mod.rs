//! ACL compilation and role composition
//!
//! An ACL defines a role's metric visibility as label constraints:
//!
//! ```yaml
//! developer:
//!   metrics:
//!     namespace: 'minio, stolon'
//! sre:
//!   metrics:
//!     namespace: 'min.*'
//!     environment: dev
//! admin:
//!   metrics:
//!     namespace: '.*'
//! ```
//!
//! Each rule value is a comma-separated term list. A single literal term
//! compiles to an equality filter; anything containing a regex
//! metacharacter, or any multi-term list, compiles to a regex filter; the
//! literal `.*` grants full access on its label and discards every other
//! term.
//!
//! At request time, [`AclRegistry::compose`] merges the roles presented by
//! the caller's identity claim into one effective ACL. Unknown role names
//! are normally skipped; with assumed roles enabled they are compiled
//! inline as rules on the assumed-role label (`namespace` by default).

pub mod compiler;
pub mod filter;
pub mod registry;

pub use compiler::{Acl, CompiledRule};
pub use filter::{FULL_ACCESS_VALUE, LabelFilter, REGEXP_SIGNAL_SET};
pub use registry::{AclRegistry, DEFAULT_ASSUMED_LABEL};
