//! Client and coordinator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default request timeout for the HTTP transport.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default attempt bound for version-mismatch retries during create.
pub const DEFAULT_CREATE_MAX_ATTEMPTS: u32 = 3;

/// Default attempt bound for commit-only retries.
pub const DEFAULT_COMMIT_MAX_ATTEMPTS: u32 = 3;

/// Default delay between bounded retry attempts.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;

/// Default delay between whole-cycle restarts.
pub const DEFAULT_CYCLE_DELAY_MS: u64 = 2_000;

/// Default bound on whole-cycle restarts.
pub const DEFAULT_MAX_CYCLES: u32 = 10;

/// HTTP client configuration for the remote configuration service.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL the four endpoints are resolved against
    /// (e.g. `http://localhost:5555/v2/services/haproxy`).
    pub base_url: String,

    /// Optional basic-auth user.
    #[serde(default)]
    pub username: Option<String>,

    /// Optional basic-auth password.
    #[serde(default)]
    pub password: Option<String>,

    /// Per-request timeout enforced by the transport.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5555".to_string(),
            username: None,
            password: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    /// Creates a configuration targeting `base_url` with default settings.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Sets basic-auth credentials.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Loads configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DPTX_API_URL` (default: `http://localhost:5555`)
    /// - `DPTX_API_USERNAME`
    /// - `DPTX_API_PASSWORD`
    /// - `DPTX_REQUEST_TIMEOUT_SECS` (default: 30)
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed, or if
    /// the resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = env_string("DPTX_API_URL") {
            config.base_url = url;
        }
        config.username = env_string("DPTX_API_USERNAME");
        config.password = env_string("DPTX_API_PASSWORD");
        if let Some(secs) = env_u64("DPTX_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unusable URL, timeout or
    /// credential pair.
    pub fn validate(&self) -> Result<()> {
        let url = self.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::InvalidInput(format!(
                "base URL must start with http:// or https:// (got {url})"
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::InvalidInput(
                "DPTX_REQUEST_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(Error::InvalidInput(
                "DPTX_API_PASSWORD requires DPTX_API_USERNAME".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the request timeout as a `Duration`.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Retry bounds and delays used by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Attempts made by the transaction factory on version mismatch.
    pub create_max_attempts: u32,

    /// Attempts made by the bounded commit-only retry.
    pub commit_max_attempts: u32,

    /// Delay between bounded retry attempts, in milliseconds.
    pub retry_delay_ms: u64,

    /// Delay between whole-cycle restarts, in milliseconds.
    pub cycle_delay_ms: u64,

    /// Maximum whole cycles per operation. `0` means unbounded.
    pub max_cycles: u32,

    /// Maximum wall time spent restarting cycles, in seconds.
    #[serde(default)]
    pub max_elapsed_secs: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            create_max_attempts: DEFAULT_CREATE_MAX_ATTEMPTS,
            commit_max_attempts: DEFAULT_COMMIT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            cycle_delay_ms: DEFAULT_CYCLE_DELAY_MS,
            max_cycles: DEFAULT_MAX_CYCLES,
            max_elapsed_secs: None,
        }
    }
}

impl CoordinatorConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DPTX_CREATE_MAX_ATTEMPTS` (default: 3)
    /// - `DPTX_COMMIT_MAX_ATTEMPTS` (default: 3)
    /// - `DPTX_RETRY_DELAY_MS` (default: 2000)
    /// - `DPTX_CYCLE_DELAY_MS` (default: 2000)
    /// - `DPTX_MAX_CYCLES` (default: 10, `0` = unbounded)
    /// - `DPTX_MAX_ELAPSED_SECS` (default: unset)
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed, or if
    /// the resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(attempts) = env_u32("DPTX_CREATE_MAX_ATTEMPTS")? {
            config.create_max_attempts = attempts;
        }
        if let Some(attempts) = env_u32("DPTX_COMMIT_MAX_ATTEMPTS")? {
            config.commit_max_attempts = attempts;
        }
        if let Some(delay) = env_u64("DPTX_RETRY_DELAY_MS")? {
            config.retry_delay_ms = delay;
        }
        if let Some(delay) = env_u64("DPTX_CYCLE_DELAY_MS")? {
            config.cycle_delay_ms = delay;
        }
        if let Some(cycles) = env_u32("DPTX_MAX_CYCLES")? {
            config.max_cycles = cycles;
        }
        config.max_elapsed_secs = env_u64("DPTX_MAX_ELAPSED_SECS")?;

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if an attempt bound is zero.
    pub fn validate(&self) -> Result<()> {
        if self.create_max_attempts == 0 {
            return Err(Error::InvalidInput(
                "DPTX_CREATE_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.commit_max_attempts == 0 {
            return Err(Error::InvalidInput(
                "DPTX_COMMIT_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the bounded retry delay.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Returns the outer-loop policy described by this configuration.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_cycles: (self.max_cycles > 0).then_some(self.max_cycles),
            max_elapsed: self.max_elapsed_secs.map(Duration::from_secs),
            cycle_delay: Duration::from_millis(self.cycle_delay_ms),
        }
    }
}

/// Bound on whole-cycle restarts of the begin, mutate, commit loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum cycles, or `None` for no cycle bound.
    pub max_cycles: Option<u32>,
    /// Maximum elapsed time before giving up, or `None` for no time bound.
    pub max_elapsed: Option<Duration>,
    /// Delay between cycles.
    pub cycle_delay: Duration,
}

impl RetryPolicy {
    /// Returns true when another cycle may start after `cycles` completed
    /// cycles and `elapsed` time.
    #[must_use]
    pub fn allows_another(&self, cycles: u32, elapsed: Duration) -> bool {
        let within_cycles = self.max_cycles.is_none_or(|max| cycles < max);
        let within_time = self
            .max_elapsed
            .is_none_or(|max| elapsed + self.cycle_delay <= max);
        within_cycles && within_time
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        CoordinatorConfig::default().retry_policy()
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
}

fn env_u32(name: &str) -> Result<Option<u32>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u32>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u32: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.create_max_attempts, 3);
        assert_eq!(config.commit_max_attempts, 3);
        assert_eq!(config.retry_delay(), Duration::from_secs(2));

        let policy = config.retry_policy();
        assert_eq!(policy.max_cycles, Some(10));
        assert_eq!(policy.cycle_delay, Duration::from_secs(2));
    }

    #[test]
    fn zero_max_cycles_is_unbounded() {
        let config = CoordinatorConfig {
            max_cycles: 0,
            ..CoordinatorConfig::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_cycles, None);
        assert!(policy.allows_another(10_000, Duration::from_secs(3600)));
    }

    #[test]
    fn policy_respects_cycle_and_time_bounds() {
        let policy = RetryPolicy {
            max_cycles: Some(2),
            max_elapsed: Some(Duration::from_secs(5)),
            cycle_delay: Duration::from_secs(1),
        };
        assert!(policy.allows_another(1, Duration::ZERO));
        assert!(!policy.allows_another(2, Duration::ZERO));
        assert!(!policy.allows_another(1, Duration::from_millis(4_500)));
    }

    #[test]
    fn client_config_rejects_bad_url_and_lonely_password() {
        let err = ClientConfig::new("localhost:5555").validate().unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let mut config = ClientConfig::new("http://localhost:5555");
        config.password = Some("secret".to_string());
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn client_config_debug_redacts_password() {
        let config = ClientConfig::new("http://localhost:5555").with_credentials("admin", "hunter2");
        let rendered = format!("{config:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn coordinator_config_rejects_zero_attempts() {
        let config = CoordinatorConfig {
            commit_max_attempts: 0,
            ..CoordinatorConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
