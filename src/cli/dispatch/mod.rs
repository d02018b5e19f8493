//! Maps validated CLI arguments to the action to run.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{auth, queue, ARG_DSN, ARG_PORT};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .filter(|v| !v.trim().is_empty());

    let auth_opts = auth::Options::parse(matches)?;
    let queue_opts = queue::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        jwt_key: auth_opts.jwt_key,
        token_ttl_seconds: auth_opts.token_ttl_seconds,
        verification_ttl_hours: auth_opts.verification_ttl_hours,
        reset_ttl_hours: auth_opts.reset_ttl_hours,
        hash_memory_kib: auth_opts.hash_memory_kib,
        hash_iterations: auth_opts.hash_iterations,
        hash_parallelism: auth_opts.hash_parallelism,
        queue_url: queue_opts.url,
        queue_tube: queue_opts.tube,
        dispatch_capacity: queue_opts.capacity,
        dispatch_max_attempts: queue_opts.max_attempts,
        dispatch_backoff_base_ms: queue_opts.backoff_base_ms,
        dispatch_backoff_max_ms: queue_opts.backoff_max_ms,
    }))
}
