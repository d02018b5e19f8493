//! Notification jobs and their hand-off to a downstream queue.
//!
//! The account flows only produce [`Job`] payloads. Rendering and sending
//! email is the consumer's business; this module gets jobs into the queue.

pub mod beanstalk;
pub mod dispatcher;
pub mod jobs;
pub mod memory;
pub mod queue;

pub use beanstalk::BeanstalkQueue;
pub use dispatcher::{
    spawn_dispatcher, DispatchError, DispatchFailure, Dispatcher, DispatcherConfig, JobId,
};
pub use jobs::{Job, JobType};
pub use memory::{spawn_log_consumer, MemoryJobQueue, ReservedJob};
pub use queue::{JobQueue, LogJobQueue, QueueError};
