use anyhow::Context;
use clap::{Arg, ArgMatches, Command};

use crate::notify::jobs::DEFAULT_TUBE;

pub const ARG_QUEUE_URL: &str = "queue-url";
pub const ARG_QUEUE_TUBE: &str = "queue-tube";
pub const ARG_DISPATCH_CAPACITY: &str = "dispatch-capacity";
pub const ARG_DISPATCH_MAX_ATTEMPTS: &str = "dispatch-max-attempts";
pub const ARG_DISPATCH_BACKOFF_BASE_MS: &str = "dispatch-backoff-base-ms";
pub const ARG_DISPATCH_BACKOFF_MAX_MS: &str = "dispatch-backoff-max-ms";

#[derive(Debug, Clone)]
pub struct Options {
    pub url: Option<String>,
    pub tube: String,
    pub capacity: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Options {
    /// Parse notification queue arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a defaulted argument is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let missing = |id: &str| format!("missing required argument: --{id}");

        Ok(Self {
            url: matches
                .get_one::<String>(ARG_QUEUE_URL)
                .cloned()
                .filter(|v| !v.trim().is_empty()),
            tube: matches
                .get_one::<String>(ARG_QUEUE_TUBE)
                .cloned()
                .with_context(|| missing(ARG_QUEUE_TUBE))?,
            capacity: matches
                .get_one::<usize>(ARG_DISPATCH_CAPACITY)
                .copied()
                .with_context(|| missing(ARG_DISPATCH_CAPACITY))?,
            max_attempts: matches
                .get_one::<u32>(ARG_DISPATCH_MAX_ATTEMPTS)
                .copied()
                .with_context(|| missing(ARG_DISPATCH_MAX_ATTEMPTS))?,
            backoff_base_ms: matches
                .get_one::<u64>(ARG_DISPATCH_BACKOFF_BASE_MS)
                .copied()
                .with_context(|| missing(ARG_DISPATCH_BACKOFF_BASE_MS))?,
            backoff_max_ms: matches
                .get_one::<u64>(ARG_DISPATCH_BACKOFF_MAX_MS)
                .copied()
                .with_context(|| missing(ARG_DISPATCH_BACKOFF_MAX_MS))?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_QUEUE_URL)
                .long(ARG_QUEUE_URL)
                .help("beanstalkd URL for notification jobs, e.g. beanstalk://127.0.0.1:11300")
                .long_help(
                    "beanstalkd URL for notification jobs, e.g. beanstalk://127.0.0.1:11300.\n\nmemory:// keeps jobs in process and logs them as they are consumed. When unset, jobs are only logged.",
                )
                .env("WARDEN_QUEUE_URL"),
        )
        .arg(
            Arg::new(ARG_QUEUE_TUBE)
                .long(ARG_QUEUE_TUBE)
                .help("beanstalkd tube notification jobs are put on")
                .env("WARDEN_QUEUE_TUBE")
                .default_value(DEFAULT_TUBE),
        )
        .arg(
            Arg::new(ARG_DISPATCH_CAPACITY)
                .long(ARG_DISPATCH_CAPACITY)
                .help("Jobs buffered in memory before enqueue fails")
                .env("WARDEN_DISPATCH_CAPACITY")
                .default_value("256")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_DISPATCH_MAX_ATTEMPTS)
                .long(ARG_DISPATCH_MAX_ATTEMPTS)
                .help("Delivery attempts per job before it is dropped")
                .env("WARDEN_DISPATCH_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_DISPATCH_BACKOFF_BASE_MS)
                .long(ARG_DISPATCH_BACKOFF_BASE_MS)
                .help("Base delay for delivery retry backoff in milliseconds")
                .env("WARDEN_DISPATCH_BACKOFF_BASE_MS")
                .default_value("200")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_DISPATCH_BACKOFF_MAX_MS)
                .long(ARG_DISPATCH_BACKOFF_MAX_MS)
                .help("Max delay for delivery retry backoff in milliseconds")
                .env("WARDEN_DISPATCH_BACKOFF_MAX_MS")
                .default_value("30000")
                .value_parser(clap::value_parser!(u64)),
        )
}
