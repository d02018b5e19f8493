//! Input validation for account fields.

use regex::Regex;

/// Usernames starting with this prefix belong to test accounts.
pub const RESERVED_PREFIX: &str = "test_user";

// Local part and domain as commonly accepted by browsers; quoted local parts
// and IPv4 literals are allowed.
const EMAIL_PATTERN: &str = r#"^(([^<>()\[\]\\.,;:\s@"]+(\.[^<>()\[\]\\.,;:\s@"]+)*)|(".+"))@((\[[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\])|(([a-zA-Z\-0-9]+\.)+[a-zA-Z]{2,}))$"#;

/// Length limits for usernames and passwords, counted in characters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Validator {
    min_username_length: usize,
    max_username_length: usize,
    min_password_length: usize,
    max_password_length: usize,
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            min_username_length: 5,
            max_username_length: 30,
            min_password_length: 12,
            max_password_length: 128,
        }
    }
}

impl Validator {
    #[must_use]
    pub fn with_username_length(mut self, min: usize, max: usize) -> Self {
        self.min_username_length = min;
        self.max_username_length = max;
        self
    }

    #[must_use]
    pub fn with_password_length(mut self, min: usize, max: usize) -> Self {
        self.min_password_length = min;
        self.max_password_length = max;
        self
    }

    /// Length within limits and only `[a-z0-9_-]`.
    #[must_use]
    pub fn valid_username(&self, name: &str) -> bool {
        let count = name.chars().count();
        if count < self.min_username_length || count > self.max_username_length {
            return false;
        }
        name.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    }

    #[must_use]
    pub fn valid_password(&self, password: &str) -> bool {
        let count = password.chars().count();
        count >= self.min_password_length && count <= self.max_password_length
    }

    #[must_use]
    pub fn username_message(&self) -> String {
        format!(
            "Username has to be between {} and {} characters inclusive and can only contain [a-z][0-9], underscores and dashes",
            self.min_username_length, self.max_username_length
        )
    }

    #[must_use]
    pub fn password_message(&self) -> String {
        format!(
            "Password has to be between {} and {} characters inclusive",
            self.min_password_length, self.max_password_length
        )
    }
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(EMAIL_PATTERN).is_ok_and(|regex| regex.is_match(email_normalized))
}

#[must_use]
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

#[must_use]
pub fn normalize_username(name: &str) -> String {
    name.to_lowercase()
}

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
