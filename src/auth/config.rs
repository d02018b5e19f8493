use super::{password::HashParams, validation::Validator};
use chrono::Duration;

const DEFAULT_TOKEN_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_VERIFICATION_TTL_SECONDS: i64 = 48 * 60 * 60;
const DEFAULT_RESET_TTL_SECONDS: i64 = 24 * 60 * 60;

/// Longest TTL accepted for tokens and codes, one year. Larger values are clamped.
pub const MAX_TTL_SECONDS: i64 = 365 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    token_ttl_seconds: i64,
    verification_ttl_seconds: i64,
    reset_ttl_seconds: i64,
    hash_params: HashParams,
    validator: Validator,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            verification_ttl_seconds: DEFAULT_VERIFICATION_TTL_SECONDS,
            reset_ttl_seconds: DEFAULT_RESET_TTL_SECONDS,
            hash_params: HashParams::default(),
            validator: Validator::default(),
        }
    }

    #[must_use]
    pub fn with_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.token_ttl_seconds = clamp_ttl(seconds);
        self
    }

    #[must_use]
    pub fn with_verification_ttl_seconds(mut self, seconds: i64) -> Self {
        self.verification_ttl_seconds = clamp_ttl(seconds);
        self
    }

    #[must_use]
    pub fn with_reset_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_ttl_seconds = clamp_ttl(seconds);
        self
    }

    #[must_use]
    pub fn with_hash_params(mut self, params: HashParams) -> Self {
        self.hash_params = params;
        self
    }

    #[must_use]
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        Duration::seconds(self.token_ttl_seconds)
    }

    #[must_use]
    pub fn verification_ttl(&self) -> Duration {
        Duration::seconds(self.verification_ttl_seconds)
    }

    #[must_use]
    pub fn reset_ttl(&self) -> Duration {
        Duration::seconds(self.reset_ttl_seconds)
    }

    #[must_use]
    pub fn hash_params(&self) -> &HashParams {
        &self.hash_params
    }

    #[must_use]
    pub fn validator(&self) -> &Validator {
        &self.validator
    }
}

fn clamp_ttl(seconds: i64) -> i64 {
    seconds.clamp(-MAX_TTL_SECONDS, MAX_TTL_SECONDS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AuthConfig::new();
        assert_eq!(config.token_ttl(), Duration::hours(1));
        assert_eq!(config.verification_ttl(), Duration::hours(48));
        assert_eq!(config.reset_ttl(), Duration::hours(24));
        assert_eq!(config.hash_params(), &HashParams::default());
    }

    #[test]
    fn builder_overrides() {
        let params = HashParams::new(1024, 1, 1, 16, 32);
        let config = AuthConfig::new()
            .with_token_ttl_seconds(60)
            .with_verification_ttl_seconds(120)
            .with_reset_ttl_seconds(-1)
            .with_hash_params(params);
        assert_eq!(config.token_ttl(), Duration::seconds(60));
        assert_eq!(config.verification_ttl(), Duration::seconds(120));
        assert_eq!(config.reset_ttl(), Duration::seconds(-1));
        assert_eq!(config.hash_params(), &params);
    }

    #[test]
    fn out_of_range_ttls_are_clamped() {
        let config = AuthConfig::new()
            .with_token_ttl_seconds(i64::MAX)
            .with_verification_ttl_seconds(i64::MIN)
            .with_reset_ttl_seconds(MAX_TTL_SECONDS + 1);
        assert_eq!(config.token_ttl(), Duration::seconds(MAX_TTL_SECONDS));
        assert_eq!(config.verification_ttl(), Duration::seconds(-MAX_TTL_SECONDS));
        assert_eq!(config.reset_ttl(), Duration::seconds(MAX_TTL_SECONDS));
    }
}
