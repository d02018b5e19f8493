use super::jobs::Job;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue connection failed")]
    Io(#[from] std::io::Error),
    #[error("failed to encode job")]
    Encode(#[from] serde_json::Error),
    #[error("job {0} was buried by the queue")]
    Buried(u64),
    #[error("job payload exceeds the queue limit")]
    JobTooBig,
    #[error("queue is draining and refuses new jobs")]
    Draining,
    #[error("queue rejected the payload framing")]
    ExpectedCrlf,
    #[error("unexpected queue response: {0}")]
    Protocol(String),
    #[error("invalid queue url: {0}")]
    InvalidUrl(String),
}

/// Downstream job queue. Returns the queue's id for the stored job.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn put(&self, job: &Job) -> Result<u64, QueueError>;
}

/// Local dev queue that logs jobs instead of storing them.
#[derive(Debug, Default)]
pub struct LogJobQueue {
    next_id: AtomicU64,
}

#[async_trait]
impl JobQueue for LogJobQueue {
    async fn put(&self, job: &Job) -> Result<u64, QueueError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            queue_job_id = id,
            job_type = %job.job_type(),
            username = %job.username(),
            "notification queue put stub"
        );
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[tokio::test]
    async fn log_queue_assigns_increasing_ids() -> Result<()> {
        let queue = LogJobQueue::default();
        let job = Job::WelcomeEmail {
            username: "newplayer".to_string(),
            email: "newplayer@example.com".to_string(),
            verification_code: "code".to_string(),
        };
        assert_eq!(queue.put(&job).await?, 1);
        assert_eq!(queue.put(&job).await?, 2);
        Ok(())
    }
}
