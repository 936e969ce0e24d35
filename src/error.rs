//! Error types for promfence
//!
//! This module defines the error hierarchy used throughout the crate.
//! We use `thiserror` for library-style errors that are part of the API;
//! callers embedding the crate map them to transport responses at the
//! boundary (authorization failures to 403, query parse failures to 400).

use thiserror::Error;

/// Top-level application error
#[derive(Error, Debug)]
pub enum AppError {
    #[error("ACL error: {0}")]
    Acl(#[from] AclError),

    #[error("Rewrite error: {0}")]
    Rewrite(#[from] RewriteError),
}

/// Errors raised while compiling, loading or composing ACLs
#[derive(Error, Debug)]
pub enum AclError {
    #[error("failed to parse ACL definition: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to compile ACL for role '{role}': {source}")]
    Role {
        role: String,
        source: Box<AclError>,
    },

    #[error("invalid regex in rule for label '{label}': {reason}")]
    InvalidRegex { label: String, reason: String },

    #[error("empty term in rule for label '{label}'")]
    EmptyTerm { label: String },

    #[error("empty label name in ACL definition")]
    EmptyLabel,

    #[error("composed an empty raw ACL for label '{label}'")]
    EmptyRawAcl { label: String },

    #[error("no matching roles found")]
    NoMatchingRoles,
}

impl AclError {
    /// Wrap a compilation failure with the role it came from.
    pub fn for_role(role: impl Into<String>, source: AclError) -> Self {
        AclError::Role {
            role: role.into(),
            source: Box::new(source),
        }
    }
}

/// Errors raised while rewriting queries
#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("ACL cannot be empty")]
    EmptyAcl,

    #[error("failed to parse query: {reason}")]
    ParseQuery { reason: String },

    #[error("failed to compile filter regex for label '{label}': {reason}")]
    FilterRegex { label: String, reason: String },
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, AppError>;

/// Result type alias for ACL operations
pub type AclResult<T> = std::result::Result<T, AclError>;

/// Result type alias for rewrite operations
pub type RewriteResult<T> = std::result::Result<T, RewriteError>;
