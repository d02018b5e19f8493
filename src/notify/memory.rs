//! In-process job queue with beanstalkd delivery semantics.
//!
//! A reserved job must be deleted before its time-to-run elapses; otherwise it
//! becomes ready again and is handed to the next reserver. A job is therefore
//! delivered at least once, possibly more than once.

use super::jobs::{Job, JOB_TTR};
use super::queue::{JobQueue, QueueError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

const RESERVE_POLL: Duration = Duration::from_millis(25);
const CONSUMER_IDLE: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Ready,
    Reserved { deadline: Instant },
    Buried,
}

struct Entry {
    job: Job,
    state: State,
    reserves: u32,
}

#[derive(Debug, Clone)]
pub struct ReservedJob {
    pub id: u64,
    pub job: Job,
    /// How many times this job has been reserved, including this one.
    pub reserves: u32,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    entries: BTreeMap<u64, Entry>,
}

impl Inner {
    fn requeue_expired(&mut self, now: Instant) {
        for entry in self.entries.values_mut() {
            if let State::Reserved { deadline } = entry.state {
                if deadline <= now {
                    entry.state = State::Ready;
                }
            }
        }
    }

    fn count(&self, wanted: fn(&State) -> bool) -> usize {
        self.entries
            .values()
            .filter(|entry| wanted(&entry.state))
            .count()
    }
}

pub struct MemoryJobQueue {
    ttr: Duration,
    inner: Mutex<Inner>,
    ready: Notify,
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new(JOB_TTR)
    }
}

impl MemoryJobQueue {
    #[must_use]
    pub fn new(ttr: Duration) -> Self {
        Self {
            ttr,
            inner: Mutex::new(Inner::default()),
            ready: Notify::new(),
        }
    }

    /// Reserve the oldest ready job, if any.
    pub async fn try_reserve(&self) -> Option<ReservedJob> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        inner.requeue_expired(now);
        let deadline = now + self.ttr;
        let (id, entry) = inner
            .entries
            .iter_mut()
            .find(|(_, entry)| entry.state == State::Ready)?;
        entry.state = State::Reserved { deadline };
        entry.reserves += 1;
        Some(ReservedJob {
            id: *id,
            job: entry.job.clone(),
            reserves: entry.reserves,
        })
    }

    /// Wait up to `timeout` for a job to become ready.
    pub async fn reserve_timeout(&self, timeout: Duration) -> Option<ReservedJob> {
        let give_up = Instant::now() + timeout;
        loop {
            let notified = self.ready.notified();
            if let Some(job) = self.try_reserve().await {
                return Some(job);
            }
            let now = Instant::now();
            if now >= give_up {
                return None;
            }
            // Expired reservations do not notify, so poll as well.
            let wait = (give_up - now).min(RESERVE_POLL);
            tokio::select! {
                () = notified => {}
                () = sleep(wait) => {}
            }
        }
    }

    /// Acknowledge a reserved job. Returns false if it is not reserved.
    pub async fn delete(&self, id: u64) -> bool {
        let mut inner = self.inner.lock().await;
        let reserved = inner
            .entries
            .get(&id)
            .is_some_and(|entry| matches!(entry.state, State::Reserved { .. }));
        if reserved {
            inner.entries.remove(&id);
        }
        reserved
    }

    /// Put a reserved job back in the ready queue.
    pub async fn release(&self, id: u64) -> bool {
        let released = self.transition(id, State::Ready).await;
        if released {
            self.ready.notify_one();
        }
        released
    }

    /// Park a reserved job until it is kicked.
    pub async fn bury(&self, id: u64) -> bool {
        self.transition(id, State::Buried).await
    }

    /// Move up to `bound` buried jobs back to ready.
    pub async fn kick(&self, bound: usize) -> usize {
        let mut inner = self.inner.lock().await;
        let mut kicked = 0;
        for entry in inner.entries.values_mut() {
            if kicked == bound {
                break;
            }
            if entry.state == State::Buried {
                entry.state = State::Ready;
                kicked += 1;
            }
        }
        drop(inner);
        if kicked > 0 {
            self.ready.notify_waiters();
        }
        kicked
    }

    pub async fn ready_count(&self) -> usize {
        let mut inner = self.inner.lock().await;
        inner.requeue_expired(Instant::now());
        inner.count(|state| *state == State::Ready)
    }

    pub async fn buried_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .count(|state| *state == State::Buried)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn transition(&self, id: u64, to: State) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.entries.get_mut(&id) {
            Some(entry) if matches!(entry.state, State::Reserved { .. }) => {
                entry.state = to;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn put(&self, job: &Job) -> Result<u64, QueueError> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.entries.insert(
            id,
            Entry {
                job: job.clone(),
                state: State::Ready,
                reserves: 0,
            },
        );
        drop(inner);
        self.ready.notify_one();
        Ok(id)
    }
}

/// Development consumer: logs each job, then deletes it. Runs until aborted.
pub fn spawn_log_consumer(queue: Arc<MemoryJobQueue>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let Some(reserved) = queue.reserve_timeout(CONSUMER_IDLE).await else {
                continue;
            };
            info!(
                id = reserved.id,
                job_type = %reserved.job.job_type(),
                reserves = reserved.reserves,
                job = ?reserved.job,
                "notification job consumed"
            );
            queue.delete(reserved.id).await;
            if tracing::enabled!(tracing::Level::DEBUG) {
                let ready = queue.ready_count().await;
                let buried = queue.buried_count().await;
                debug!(ready, buried, "memory queue depth");
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::Arc;

    fn welcome(username: &str) -> Job {
        Job::WelcomeEmail {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            verification_code: "code".to_string(),
        }
    }

    #[tokio::test]
    async fn fifo_reserve_and_delete() -> Result<()> {
        let queue = MemoryJobQueue::default();
        let first = queue.put(&welcome("first")).await?;
        let second = queue.put(&welcome("second")).await?;

        let reserved = queue.try_reserve().await.unwrap();
        assert_eq!(reserved.id, first);
        assert_eq!(reserved.job.username(), "first");
        assert!(queue.delete(first).await);
        assert!(!queue.delete(first).await);

        let reserved = queue.try_reserve().await.unwrap();
        assert_eq!(reserved.id, second);
        assert!(queue.try_reserve().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn unacknowledged_job_is_redelivered_after_ttr() -> Result<()> {
        let queue = MemoryJobQueue::new(Duration::from_millis(30));
        let id = queue.put(&welcome("newplayer")).await?;

        let first = queue.try_reserve().await.unwrap();
        assert_eq!(first.reserves, 1);
        assert!(queue.try_reserve().await.is_none());

        let again = queue
            .reserve_timeout(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(again.id, id);
        assert_eq!(again.reserves, 2);
        assert!(queue.delete(id).await);
        assert!(queue.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn release_bury_and_kick() -> Result<()> {
        let queue = MemoryJobQueue::default();
        let id = queue.put(&welcome("newplayer")).await?;

        // Only reserved jobs can be released or buried.
        assert!(!queue.release(id).await);
        assert!(!queue.bury(id).await);

        queue.try_reserve().await.unwrap();
        assert!(queue.release(id).await);
        assert_eq!(queue.ready_count().await, 1);

        queue.try_reserve().await.unwrap();
        assert!(queue.bury(id).await);
        assert_eq!(queue.buried_count().await, 1);
        assert!(queue.try_reserve().await.is_none());

        assert_eq!(queue.kick(10).await, 1);
        assert_eq!(queue.try_reserve().await.map(|job| job.id), Some(id));
        Ok(())
    }

    #[tokio::test]
    async fn reserve_wakes_on_put() -> Result<()> {
        let queue = Arc::new(MemoryJobQueue::default());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.reserve_timeout(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        queue.put(&welcome("newplayer")).await?;
        let reserved = waiter.await?.unwrap();
        assert_eq!(reserved.job.username(), "newplayer");
        Ok(())
    }

    #[tokio::test]
    async fn reserve_timeout_gives_up() {
        let queue = MemoryJobQueue::default();
        assert!(queue
            .reserve_timeout(Duration::from_millis(20))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn log_consumer_drains_the_queue() -> Result<()> {
        let queue = Arc::new(MemoryJobQueue::default());
        let consumer = spawn_log_consumer(Arc::clone(&queue));
        queue.put(&welcome("first")).await?;
        queue.put(&welcome("second")).await?;

        let drained = tokio::time::timeout(Duration::from_secs(2), async {
            while !queue.is_empty().await {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        consumer.abort();
        assert!(drained.is_ok());
        Ok(())
    }
}
