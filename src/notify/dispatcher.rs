//! Fire-and-forget hand-off of notification jobs.
//!
//! Request handlers call [`Dispatcher::enqueue`], which never waits on the
//! downstream queue: the job goes into a bounded channel and a background
//! worker delivers it with retries. Jobs that exhaust their attempts are
//! logged and published on the failure channel returned by [`spawn_dispatcher`].
//!
//! Hand-off is at-least-once: a put that times out may still have reached the
//! queue, so a retry can store the same job twice.

use super::jobs::{Job, JobType};
use super::queue::JobQueue;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn, Instrument};
use ulid::Ulid;

pub type JobId = Ulid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("notification backlog is full")]
    Full,
    #[error("notification dispatcher has shut down")]
    Closed,
}

/// A job that was never accepted by the downstream queue.
#[derive(Debug, Clone)]
pub struct DispatchFailure {
    pub job_id: JobId,
    pub job_type: JobType,
    pub attempts: u32,
    pub error: String,
}

#[derive(Clone, Copy, Debug)]
pub struct DispatcherConfig {
    capacity: usize,
    concurrency: usize,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    attempt_timeout: Duration,
}

impl DispatcherConfig {
    /// Default: 256 queued jobs, 8 concurrent deliveries, 5 attempts,
    /// 200ms->30s exponential backoff with jitter, 5s per attempt.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capacity: 256,
            concurrency: 8,
            max_attempts: 5,
            backoff_base: Duration::from_millis(200),
            backoff_max: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff_base_ms(mut self, millis: u64) -> Self {
        self.backoff_base = Duration::from_millis(millis);
        self
    }

    #[must_use]
    pub fn with_backoff_max_ms(mut self, millis: u64) -> Self {
        self.backoff_max = Duration::from_millis(millis);
        self
    }

    #[must_use]
    pub fn with_attempt_timeout_ms(mut self, millis: u64) -> Self {
        self.attempt_timeout = Duration::from_millis(millis);
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let backoff_base = if self.backoff_base.is_zero() {
            Duration::from_millis(1)
        } else {
            self.backoff_base
        };
        let attempt_timeout = if self.attempt_timeout.is_zero() {
            Duration::from_secs(1)
        } else {
            self.attempt_timeout
        };
        Self {
            capacity: self.capacity.max(1),
            concurrency: self.concurrency.max(1),
            max_attempts: self.max_attempts.max(1),
            backoff_base,
            backoff_max: self.backoff_max.max(backoff_base),
            attempt_timeout,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        self.backoff_max
    }

    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::new()
    }
}

struct Envelope {
    id: JobId,
    job: Job,
}

/// Cloneable handle used by request handlers.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    tx: mpsc::Sender<Envelope>,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("id", &self.id)
            .field("job", &self.job)
            .finish()
    }
}

impl Dispatcher {
    /// Hand `job` to the background worker without waiting for delivery.
    ///
    /// # Errors
    /// [`DispatchError::Full`] when the backlog is at capacity,
    /// [`DispatchError::Closed`] when the worker has stopped.
    pub fn enqueue(&self, job: Job) -> Result<JobId, DispatchError> {
        let id = Ulid::new();
        self.tx
            .try_send(Envelope { id, job })
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => DispatchError::Full,
                mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
            })?;
        Ok(id)
    }
}

/// Spawn the delivery worker.
///
/// The worker exits once every [`Dispatcher`] clone is dropped and in-flight
/// deliveries have finished.
pub fn spawn_dispatcher(
    queue: Arc<dyn JobQueue>,
    config: DispatcherConfig,
) -> (
    Dispatcher,
    mpsc::UnboundedReceiver<DispatchFailure>,
    JoinHandle<()>,
) {
    let config = config.normalize();
    let (tx, mut rx) = mpsc::channel::<Envelope>(config.capacity());
    let (failures_tx, failures_rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
        let permits = Arc::new(Semaphore::new(config.concurrency()));
        while let Some(envelope) = rx.recv().await {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let queue = Arc::clone(&queue);
            let failures_tx = failures_tx.clone();
            let span = tracing::info_span!(
                "notify.deliver",
                job_id = %envelope.id,
                job_type = %envelope.job.job_type()
            );
            tokio::spawn(
                async move {
                    if let Err(failure) = deliver(queue.as_ref(), envelope, &config).await {
                        error!(
                            attempts = failure.attempts,
                            "notification job dropped: {}", failure.error
                        );
                        // Nobody listening is fine; the failure is already logged.
                        let _ = failures_tx.send(failure);
                    }
                    drop(permit);
                }
                .instrument(span),
            );
        }

        // Wait for in-flight deliveries before reporting shutdown.
        let concurrency = u32::try_from(config.concurrency()).unwrap_or(u32::MAX);
        let _ = permits.acquire_many(concurrency).await;
        info!("notification dispatcher stopped");
    });

    (Dispatcher { tx }, failures_rx, handle)
}

async fn deliver(
    queue: &dyn JobQueue,
    envelope: Envelope,
    config: &DispatcherConfig,
) -> Result<u64, DispatchFailure> {
    let mut last_error = String::new();
    for attempt in 1..=config.max_attempts() {
        match timeout(config.attempt_timeout(), queue.put(&envelope.job)).await {
            Ok(Ok(queue_id)) => {
                info!(attempt, queue_job_id = queue_id, "notification job queued");
                return Ok(queue_id);
            }
            Ok(Err(err)) => last_error = err.to_string(),
            Err(_) => last_error = "queue put timed out".to_string(),
        }

        if attempt < config.max_attempts() {
            let delay = backoff_delay(attempt, config.backoff_base(), config.backoff_max());
            warn!(attempt, ?delay, "notification put failed, retrying: {last_error}");
            sleep(delay).await;
        }
    }

    Err(DispatchFailure {
        job_id: envelope.id,
        job_type: envelope.job.job_type(),
        attempts: config.max_attempts(),
        error: last_error,
    })
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << shift;
    let delay = base.checked_mul(factor).unwrap_or(max);
    let capped = if delay > max { max } else { delay };
    jitter_delay(capped)
}

fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::notify::memory::MemoryJobQueue;
    use crate::notify::queue::QueueError;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn welcome() -> Job {
        Job::WelcomeEmail {
            username: "newplayer".to_string(),
            email: "newplayer@example.com".to_string(),
            verification_code: "code".to_string(),
        }
    }

    fn fast_config() -> DispatcherConfig {
        DispatcherConfig::new()
            .with_max_attempts(3)
            .with_backoff_base_ms(1)
            .with_backoff_max_ms(4)
            .with_attempt_timeout_ms(200)
    }

    /// Fails the first `failures` puts, then succeeds.
    struct FlakyQueue {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobQueue for FlakyQueue {
        async fn put(&self, _job: &Job) -> Result<u64, QueueError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(QueueError::Draining);
            }
            Ok(u64::from(call))
        }
    }

    struct StuckQueue;

    #[async_trait]
    impl JobQueue for StuckQueue {
        async fn put(&self, _job: &Job) -> Result<u64, QueueError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn delivers_to_queue() -> Result<()> {
        let queue = Arc::new(MemoryJobQueue::default());
        let (dispatcher, _failures, handle) =
            spawn_dispatcher(Arc::clone(&queue) as Arc<dyn JobQueue>, fast_config());

        dispatcher.enqueue(welcome())?;
        drop(dispatcher);
        handle.await?;

        let reserved = queue.try_reserve().await.unwrap();
        assert_eq!(reserved.job, welcome());
        Ok(())
    }

    #[tokio::test]
    async fn retries_until_accepted() -> Result<()> {
        let queue = Arc::new(FlakyQueue {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let (dispatcher, mut failures, handle) =
            spawn_dispatcher(Arc::clone(&queue) as Arc<dyn JobQueue>, fast_config());

        dispatcher.enqueue(welcome())?;
        drop(dispatcher);
        handle.await?;

        assert_eq!(queue.calls.load(Ordering::SeqCst), 3);
        assert!(failures.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn reports_exhausted_jobs() -> Result<()> {
        let queue = Arc::new(FlakyQueue {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let (dispatcher, mut failures, handle) =
            spawn_dispatcher(Arc::clone(&queue) as Arc<dyn JobQueue>, fast_config());

        let job_id = dispatcher.enqueue(welcome())?;
        drop(dispatcher);
        handle.await?;

        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.job_id, job_id);
        assert_eq!(failure.job_type, JobType::WelcomeEmail);
        assert_eq!(failure.attempts, 3);
        assert_eq!(queue.calls.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn attempts_are_bounded_by_timeout() -> Result<()> {
        let config = fast_config()
            .with_max_attempts(2)
            .with_attempt_timeout_ms(10);
        let (dispatcher, mut failures, handle) = spawn_dispatcher(Arc::new(StuckQueue), config);

        dispatcher.enqueue(welcome())?;
        drop(dispatcher);
        handle.await?;

        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.error, "queue put timed out");
        Ok(())
    }

    #[tokio::test]
    async fn enqueue_never_waits_on_delivery() -> Result<()> {
        let config = fast_config().with_capacity(1).with_concurrency(1);
        let (dispatcher, _failures, handle) = spawn_dispatcher(Arc::new(StuckQueue), config);

        // One job in flight, one waiting for a permit, one buffered; the rest
        // are refused immediately.
        let mut results = Vec::new();
        for _ in 0..4 {
            results.push(dispatcher.enqueue(welcome()));
            tokio::task::yield_now().await;
        }
        assert!(results.contains(&Err(DispatchError::Full)));

        handle.abort();
        let _ = handle.await;
        assert_eq!(dispatcher.enqueue(welcome()), Err(DispatchError::Closed));
        Ok(())
    }

    #[test]
    fn normalize_clamps_zero_values() {
        let config = DispatcherConfig::new()
            .with_capacity(0)
            .with_concurrency(0)
            .with_max_attempts(0)
            .with_backoff_base_ms(0)
            .with_backoff_max_ms(0)
            .normalize();
        assert_eq!(config.capacity(), 1);
        assert_eq!(config.concurrency(), 1);
        assert_eq!(config.max_attempts(), 1);
        assert_eq!(config.backoff_base(), Duration::from_millis(1));
        assert_eq!(config.backoff_max(), Duration::from_millis(1));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(1_000);
        let first = backoff_delay(1, base, max);
        assert!(first >= Duration::from_millis(50) && first <= base);
        let capped = backoff_delay(20, base, max);
        assert!(capped >= Duration::from_millis(500) && capped <= max);
    }
}
