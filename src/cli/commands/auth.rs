use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_JWT_KEY: &str = "jwt-key";
pub const ARG_TOKEN_TTL_SECONDS: &str = "token-ttl-seconds";
pub const ARG_VERIFICATION_TTL_HOURS: &str = "verification-ttl-hours";
pub const ARG_RESET_TTL_HOURS: &str = "reset-ttl-hours";
pub const ARG_HASH_MEMORY_KIB: &str = "hash-memory-kib";
pub const ARG_HASH_ITERATIONS: &str = "hash-iterations";
pub const ARG_HASH_PARALLELISM: &str = "hash-parallelism";

const MAX_TTL_SECONDS: i64 = crate::auth::config::MAX_TTL_SECONDS;
const MAX_TTL_HOURS: i64 = MAX_TTL_SECONDS / 3600;

#[derive(Debug, Clone)]
pub struct Options {
    pub jwt_key: SecretString,
    pub token_ttl_seconds: i64,
    pub verification_ttl_hours: i64,
    pub reset_ttl_hours: i64,
    pub hash_memory_kib: u32,
    pub hash_iterations: u32,
    pub hash_parallelism: u32,
}

impl Options {
    /// Parse signing and credential arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the signing key is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let jwt_key = match matches.get_one::<String>(ARG_JWT_KEY) {
            Some(value) if !value.trim().is_empty() => SecretString::from(value.clone()),
            _ => anyhow::bail!("missing required argument: --{ARG_JWT_KEY}"),
        };

        let get = |id: &str| {
            matches
                .get_one::<i64>(id)
                .copied()
                .with_context(|| format!("missing required argument: --{id}"))
        };
        let get_u32 = |id: &str| {
            matches
                .get_one::<u32>(id)
                .copied()
                .with_context(|| format!("missing required argument: --{id}"))
        };

        Ok(Self {
            jwt_key,
            token_ttl_seconds: get(ARG_TOKEN_TTL_SECONDS)?,
            verification_ttl_hours: get(ARG_VERIFICATION_TTL_HOURS)?,
            reset_ttl_hours: get(ARG_RESET_TTL_HOURS)?,
            hash_memory_kib: get_u32(ARG_HASH_MEMORY_KIB)?,
            hash_iterations: get_u32(ARG_HASH_ITERATIONS)?,
            hash_parallelism: get_u32(ARG_HASH_PARALLELISM)?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    with_hash_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_KEY)
                .long(ARG_JWT_KEY)
                .help("HMAC-SHA256 key used to sign access tokens (at least 32 bytes)")
                .env("WARDEN_JWT_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_TTL_SECONDS)
                .long(ARG_TOKEN_TTL_SECONDS)
                .help("Access token TTL in seconds")
                .env("WARDEN_TOKEN_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_TTL_SECONDS)),
        )
        .arg(
            Arg::new(ARG_VERIFICATION_TTL_HOURS)
                .long(ARG_VERIFICATION_TTL_HOURS)
                .help("Email verification code TTL in hours")
                .env("WARDEN_VERIFICATION_TTL_HOURS")
                .default_value("48")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_TTL_HOURS)),
        )
        .arg(
            Arg::new(ARG_RESET_TTL_HOURS)
                .long(ARG_RESET_TTL_HOURS)
                .help("Password reset token TTL in hours")
                .env("WARDEN_RESET_TTL_HOURS")
                .default_value("24")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_TTL_HOURS)),
        )
}

fn with_hash_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_HASH_MEMORY_KIB)
                .long(ARG_HASH_MEMORY_KIB)
                .help("Argon2id memory cost in KiB")
                .env("WARDEN_HASH_MEMORY_KIB")
                .default_value("65536")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_HASH_ITERATIONS)
                .long(ARG_HASH_ITERATIONS)
                .help("Argon2id time cost (passes)")
                .env("WARDEN_HASH_ITERATIONS")
                .default_value("3")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_HASH_PARALLELISM)
                .long(ARG_HASH_PARALLELISM)
                .help("Argon2id lanes")
                .env("WARDEN_HASH_PARALLELISM")
                .default_value("2")
                .value_parser(clap::value_parser!(u32)),
        )
}
