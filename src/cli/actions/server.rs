use crate::{
    api,
    auth::{AccountAuthority, AuthConfig, HashParams, TokenIssuer},
    cli::telemetry,
    notify::{
        spawn_dispatcher, spawn_log_consumer, BeanstalkQueue, DispatcherConfig, JobQueue,
        LogJobQueue, MemoryJobQueue,
    },
    store::{AccountStore, MemoryStore, PgStore},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::{signal, task::JoinHandle, time::timeout};
use tracing::{debug, error, info, warn};
use url::Url;

const SECONDS_PER_HOUR: i64 = 3600;
const DISPATCH_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub jwt_key: SecretString,
    pub token_ttl_seconds: i64,
    pub verification_ttl_hours: i64,
    pub reset_ttl_hours: i64,
    pub hash_memory_kib: u32,
    pub hash_iterations: u32,
    pub hash_parallelism: u32,
    pub queue_url: Option<String>,
    pub queue_tube: String,
    pub dispatch_capacity: usize,
    pub dispatch_max_attempts: u32,
    pub dispatch_backoff_base_ms: u64,
    pub dispatch_backoff_max_ms: u64,
}

impl Args {
    /// Argon2id parameters from the flags, with the default salt and key lengths.
    ///
    /// # Errors
    /// Returns an error if the parameters are below the accepted floor.
    pub fn hash_params(&self) -> Result<HashParams> {
        let defaults = HashParams::default();
        let params = HashParams::new(
            self.hash_memory_kib,
            self.hash_iterations,
            self.hash_parallelism,
            defaults.salt_length,
            defaults.key_length,
        );
        params
            .enforce_floor()
            .context("Invalid password hashing parameters")?;
        Ok(params)
    }

    #[must_use]
    pub fn auth_config(&self, hash_params: HashParams) -> AuthConfig {
        AuthConfig::new()
            .with_token_ttl_seconds(self.token_ttl_seconds)
            .with_verification_ttl_seconds(
                self.verification_ttl_hours.saturating_mul(SECONDS_PER_HOUR),
            )
            .with_reset_ttl_seconds(self.reset_ttl_hours.saturating_mul(SECONDS_PER_HOUR))
            .with_hash_params(hash_params)
    }

    #[must_use]
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig::new()
            .with_capacity(self.dispatch_capacity)
            .with_max_attempts(self.dispatch_max_attempts)
            .with_backoff_base_ms(self.dispatch_backoff_base_ms)
            .with_backoff_max_ms(self.dispatch_backoff_max_ms)
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid, the database or queue
/// cannot be reached, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let hash_params = args.hash_params()?;
    let auth_config = args.auth_config(hash_params);
    let dispatcher_config = args.dispatcher_config();
    debug!(?auth_config, ?dispatcher_config, "configuration loaded");

    let issuer = Arc::new(TokenIssuer::new(args.jwt_key).context("Invalid --jwt-key")?);

    let store: Arc<dyn AccountStore> = if let Some(dsn) = &args.dsn {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;
        Arc::new(PgStore::new(pool))
    } else {
        warn!("No --dsn given, accounts are kept in memory");
        Arc::new(MemoryStore::new())
    };

    let (queue, dev_consumer) = job_queue(args.queue_url.as_deref(), &args.queue_tube)?;

    let (dispatcher, mut failures, dispatch_worker) = spawn_dispatcher(queue, dispatcher_config);
    tokio::spawn(async move {
        while let Some(failure) = failures.recv().await {
            warn!(
                job_id = %failure.job_id,
                job_type = %failure.job_type,
                attempts = failure.attempts,
                "notification lost after retries"
            );
        }
    });

    let authority = Arc::new(
        AccountAuthority::new(store, issuer, dispatcher, auth_config)
            .context("Failed to initialize account authority")?,
    );

    api::serve(args.port, api::router(authority), shutdown_signal()).await?;

    // The router held the last dispatcher handle; wait for queued jobs to drain.
    match timeout(DISPATCH_DRAIN_TIMEOUT, dispatch_worker).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!("Notification dispatcher failed: {err}"),
        Err(_) => warn!("Notification dispatcher did not drain before shutdown"),
    }

    if let Some(consumer) = dev_consumer {
        consumer.abort();
    }

    telemetry::shutdown_tracer();

    Ok(())
}

/// Pick the notification queue from `--queue-url`.
///
/// `beanstalk://` puts jobs on beanstalkd, `memory://` keeps them in process
/// with a consumer that logs and deletes them, and no URL only logs them.
fn job_queue(
    url: Option<&str>,
    tube: &str,
) -> Result<(Arc<dyn JobQueue>, Option<JoinHandle<()>>)> {
    let Some(url) = url else {
        warn!("No --queue-url given, notification jobs are only logged");
        let queue: Arc<dyn JobQueue> = Arc::new(LogJobQueue::default());
        return Ok((queue, None));
    };
    let url = Url::parse(url).context("Invalid --queue-url")?;
    if url.scheme() == "memory" {
        warn!("Notification jobs are kept in memory and consumed by a logging worker");
        let queue = Arc::new(MemoryJobQueue::default());
        let consumer = spawn_log_consumer(Arc::clone(&queue));
        let queue: Arc<dyn JobQueue> = queue;
        return Ok((queue, Some(consumer)));
    }
    let queue = BeanstalkQueue::from_url(&url, tube.to_string())?;
    info!(addr = queue.addr(), tube = queue.tube(), "notification jobs go to beanstalkd");
    let queue: Arc<dyn JobQueue> = Arc::new(queue);
    Ok((queue, None))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!("Gracefully shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args {
            port: 8080,
            dsn: None,
            jwt_key: SecretString::from("0123456789abcdef0123456789abcdef".to_string()),
            token_ttl_seconds: 3600,
            verification_ttl_hours: 48,
            reset_ttl_hours: 24,
            hash_memory_kib: 65536,
            hash_iterations: 3,
            hash_parallelism: 2,
            queue_url: None,
            queue_tube: "email-notifications".to_string(),
            dispatch_capacity: 256,
            dispatch_max_attempts: 5,
            dispatch_backoff_base_ms: 200,
            dispatch_backoff_max_ms: 30_000,
        }
    }

    #[test]
    fn weak_hash_params_are_rejected() {
        let mut weak = args();
        weak.hash_memory_kib = 1024;
        assert!(weak.hash_params().is_err());

        let mut weak = args();
        weak.hash_iterations = 1;
        assert!(weak.hash_params().is_err());

        assert!(args().hash_params().is_ok());
    }

    #[test]
    fn ttls_are_converted_from_hours() -> Result<()> {
        let args = args();
        let config = args.auth_config(args.hash_params()?);
        assert_eq!(config.verification_ttl().num_hours(), 48);
        assert_eq!(config.reset_ttl().num_hours(), 24);
        assert_eq!(config.token_ttl().num_seconds(), 3600);
        Ok(())
    }

    #[test]
    fn dispatcher_config_from_flags() {
        let config = args().dispatcher_config();
        assert_eq!(config.capacity(), 256);
        assert_eq!(config.max_attempts(), 5);
        assert_eq!(config.backoff_base(), Duration::from_millis(200));
        assert_eq!(config.backoff_max(), Duration::from_millis(30_000));
    }

    #[tokio::test]
    async fn queue_url_selects_the_backend() -> Result<()> {
        let (_, consumer) = job_queue(None, "t")?;
        assert!(consumer.is_none());

        let (queue, consumer) = job_queue(Some("memory://"), "t")?;
        let consumer = consumer.context("memory queue spawns a consumer")?;
        assert!(queue.put(&crate::notify::Job::WelcomeEmail {
            username: "newplayer".to_string(),
            email: "newplayer@example.com".to_string(),
            verification_code: "code".to_string(),
        })
        .await
        .is_ok());
        consumer.abort();

        let (_, consumer) = job_queue(Some("beanstalk://127.0.0.1:11300"), "t")?;
        assert!(consumer.is_none());

        assert!(job_queue(Some("amqp://localhost"), "t").is_err());
        assert!(job_queue(Some("not a url"), "t").is_err());
        Ok(())
    }
}
