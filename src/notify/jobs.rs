//! Notification job payloads as consumed by the email worker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_TUBE: &str = "email-notifications";
pub const JOB_PRIORITY: u32 = 1024 * 5;
pub const JOB_DELAY: Duration = Duration::ZERO;
/// Time a consumer may hold a reserved job before it is handed out again.
pub const JOB_TTR: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobType {
    WelcomeEmail,
    ResetPasswordEmail,
}

impl JobType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WelcomeEmail => "welcome_email",
            Self::ResetPasswordEmail => "reset_password_email",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire format is JSON tagged by `job_type`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job_type", rename_all = "snake_case")]
pub enum Job {
    WelcomeEmail {
        username: String,
        email: String,
        verification_code: String,
    },
    ResetPasswordEmail {
        username: String,
        email: String,
        reset_code: String,
    },
}

impl Job {
    #[must_use]
    pub fn job_type(&self) -> JobType {
        match self {
            Self::WelcomeEmail { .. } => JobType::WelcomeEmail,
            Self::ResetPasswordEmail { .. } => JobType::ResetPasswordEmail,
        }
    }

    #[must_use]
    pub fn username(&self) -> &str {
        match self {
            Self::WelcomeEmail { username, .. } | Self::ResetPasswordEmail { username, .. } => {
                username
            }
        }
    }

    /// # Errors
    /// Returns an error if the payload cannot be serialized.
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

// Codes are credentials; keep them out of logs.
impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("job_type", &self.job_type())
            .field("username", &self.username())
            .finish_non_exhaustive()
    }
}
