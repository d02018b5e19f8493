//! # Warden (authentication and credential lifecycle)
//!
//! `warden` issues HS256 access tokens for username/password logins and runs
//! the account lifecycle around them: registration, email verification and
//! password reset.
//!
//! ## Credentials
//!
//! Passwords are stored as Argon2id hashes in the
//! `$argon2id$v=19$m=..,t=..,p=..$salt$hash` format and compared in constant
//! time. Logins for unknown usernames still verify against a dummy hash so
//! they cannot be told apart from a wrong password.
//!
//! ## Tokens
//!
//! API clients receive the token in the response body. Browser clients
//! (`X-Requested-With: XMLHttpRequest`) receive it split across two cookies:
//! `header.payload`, readable by page script, and `signature`, which is
//! `HttpOnly`.
//!
//! ## Notifications
//!
//! Welcome and reset emails are queued as jobs (beanstalkd in production) by a
//! background dispatcher. Request handlers never wait on delivery.

pub mod api;
pub mod auth;
pub mod cli;
pub mod notify;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
