//! promfence
//!
//! Offline query rewriting tool: load an ACL file, compose roles into an
//! effective ACL, and print each query argument rewritten under it. Useful
//! for validating ACL files and for inspecting what a caller with a given
//! set of roles would actually see.

use clap::Parser;
use promfence::{AclRegistry, QueryModifier};
use tracing::{debug, error};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// promfence - per-role metric visibility for PromQL queries
#[derive(Parser, Debug)]
#[command(name = "promfence")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the ACL definitions file (empty for assumed roles only)
    #[arg(short, long, env = "PROMFENCE_ACL", default_value = "")]
    acl: String,

    /// Role names to compose, comma-separated
    #[arg(short, long, env = "PROMFENCE_ROLES", value_delimiter = ',', required = true)]
    roles: Vec<String>,

    /// Treat unknown role names as inline ACL definitions
    #[arg(long, env = "PROMFENCE_ASSUMED_ROLES")]
    assumed_roles: bool,

    /// Leave user filters alone when they are already at least as restrictive
    #[arg(long, env = "PROMFENCE_DEDUPLICATE")]
    deduplicate: bool,

    /// Push common label filters across binary operations
    #[arg(long, env = "PROMFENCE_OPTIMIZE")]
    optimize: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "PROMFENCE_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Queries to rewrite
    #[arg(required = true)]
    queries: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load the role table
    let registry = AclRegistry::from_file(&args.acl)
        .inspect_err(|e| error!(error = %e, "Failed to load ACL definitions"))?;
    debug!(roles = registry.len(), "Loaded ACL definitions");

    // Compose the caller's effective ACL
    let acl = registry
        .compose(&args.roles, args.assumed_roles)
        .inspect_err(|e| error!(error = %e, "Failed to compose an effective ACL"))?;

    let modifier = QueryModifier::new(acl)
        .inspect_err(|e| error!(error = %e, "Failed to build a query modifier"))?
        .with_deduplication(args.deduplicate)
        .with_optimization(args.optimize);

    for query in &args.queries {
        let rewritten = modifier
            .rewrite_query(query)
            .inspect_err(|e| error!(query, error = %e, "Failed to rewrite query"))?;
        println!("{rewritten}");
    }

    Ok(())
}
