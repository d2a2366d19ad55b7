//! Client configuration.
//!
//! [`ClientConfig`] bounds every asynchronous round trip the client makes and
//! sets the retry policy for idempotent metadata reads. Construct it with
//! [`ClientConfig::builder`] (validated) or deserialize it from any serde
//! format; [`LedgerClient`](crate::LedgerClient) validates deserialized
//! configurations before use.
//!
//! ```
//! use std::time::Duration;
//! use ledgerkit_client::{ClientConfig, RetryConfig};
//!
//! let config = ClientConfig::builder()
//!     .metadata_timeout(Duration::from_secs(5))
//!     .metadata_retry(RetryConfig::builder().max_retries(5).build())
//!     .build()?;
//! assert_eq!(config.max_ensemble_changes(), 3);
//! # Ok::<(), ledgerkit_client::ConfigError>(())
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default bound on a single metadata round trip (30 seconds).
const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on one entry's quorum write (10 seconds).
const DEFAULT_ADD_ENTRY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on one entry's quorum read (10 seconds).
const DEFAULT_READ_ENTRY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default cap on bookie replacements per append.
const DEFAULT_MAX_ENSEMBLE_CHANGES: u32 = 3;

/// Retry policy for transient metadata-store failures.
///
/// Only idempotent reads are retried. Compare-and-swap writes never are: a
/// retried write could hide a concurrent fencing event.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    #[builder(default = default_max_retries())]
    pub max_retries: u32,

    /// Backoff before the first retry; doubles per attempt.
    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    #[builder(default = default_initial_backoff())]
    pub initial_backoff: Duration,

    /// Upper bound on a single backoff.
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    #[builder(default = default_max_backoff())]
    pub max_backoff: Duration,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(5)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

/// Configuration of a [`LedgerClient`](crate::LedgerClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(with = "humantime_serde", default = "default_metadata_timeout")]
    pub(crate) metadata_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_add_entry_timeout")]
    pub(crate) add_entry_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_read_entry_timeout")]
    pub(crate) read_entry_timeout: Duration,

    #[serde(default)]
    pub(crate) metadata_retry: RetryConfig,

    #[serde(default = "default_max_ensemble_changes")]
    pub(crate) max_ensemble_changes: u32,
}

fn default_metadata_timeout() -> Duration {
    DEFAULT_METADATA_TIMEOUT
}

fn default_add_entry_timeout() -> Duration {
    DEFAULT_ADD_ENTRY_TIMEOUT
}

fn default_read_entry_timeout() -> Duration {
    DEFAULT_READ_ENTRY_TIMEOUT
}

fn default_max_ensemble_changes() -> u32 {
    DEFAULT_MAX_ENSEMBLE_CHANGES
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            metadata_timeout: DEFAULT_METADATA_TIMEOUT,
            add_entry_timeout: DEFAULT_ADD_ENTRY_TIMEOUT,
            read_entry_timeout: DEFAULT_READ_ENTRY_TIMEOUT,
            metadata_retry: RetryConfig::default(),
            max_ensemble_changes: DEFAULT_MAX_ENSEMBLE_CHANGES,
        }
    }
}

#[bon::bon]
impl ClientConfig {
    /// Creates a validated configuration.
    ///
    /// # Optional Fields
    ///
    /// * `metadata_timeout` - Bound on each metadata round trip (default: 30 seconds).
    /// * `add_entry_timeout` - Bound on one entry's quorum write (default: 10 seconds).
    /// * `read_entry_timeout` - Bound on one entry's quorum read (default: 10 seconds).
    /// * `metadata_retry` - Retry policy for metadata reads (default: [`RetryConfig::default`]).
    /// * `max_ensemble_changes` - Bookie replacements per append (default: 3).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a timeout is zero or the retry backoffs are
    /// inverted.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_METADATA_TIMEOUT)] metadata_timeout: Duration,
        #[builder(default = DEFAULT_ADD_ENTRY_TIMEOUT)] add_entry_timeout: Duration,
        #[builder(default = DEFAULT_READ_ENTRY_TIMEOUT)] read_entry_timeout: Duration,
        #[builder(default)] metadata_retry: RetryConfig,
        #[builder(default = DEFAULT_MAX_ENSEMBLE_CHANGES)] max_ensemble_changes: u32,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            metadata_timeout,
            add_entry_timeout,
            read_entry_timeout,
            metadata_retry,
            max_ensemble_changes,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks every field.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("metadata_timeout", self.metadata_timeout),
            ("add_entry_timeout", self.add_entry_timeout),
            ("read_entry_timeout", self.read_entry_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::MustBePositive { field, value: "0s".into() });
            }
        }
        if self.metadata_retry.initial_backoff > self.metadata_retry.max_backoff {
            return Err(ConfigError::InvalidRelation {
                message: format!(
                    "metadata_retry.initial_backoff ({:?}) exceeds metadata_retry.max_backoff \
                     ({:?})",
                    self.metadata_retry.initial_backoff, self.metadata_retry.max_backoff
                ),
            });
        }
        Ok(())
    }

    /// Bound on each metadata round trip.
    #[must_use]
    pub fn metadata_timeout(&self) -> Duration {
        self.metadata_timeout
    }

    /// Bound on one entry's quorum write.
    #[must_use]
    pub fn add_entry_timeout(&self) -> Duration {
        self.add_entry_timeout
    }

    /// Bound on one entry's quorum read.
    #[must_use]
    pub fn read_entry_timeout(&self) -> Duration {
        self.read_entry_timeout
    }

    /// Retry policy for metadata reads.
    #[must_use]
    pub fn metadata_retry(&self) -> &RetryConfig {
        &self.metadata_retry
    }

    /// Bookie replacements allowed per append.
    #[must_use]
    pub fn max_ensemble_changes(&self) -> u32 {
        self.max_ensemble_changes
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_match_default_impl() {
        let built = ClientConfig::builder().build().unwrap();
        assert_eq!(built, ClientConfig::default());
        assert_eq!(built.metadata_timeout(), Duration::from_secs(30));
        assert_eq!(built.add_entry_timeout(), Duration::from_secs(10));
        assert_eq!(built.read_entry_timeout(), Duration::from_secs(10));
        assert_eq!(built.max_ensemble_changes(), 3);
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let err = ClientConfig::builder().add_entry_timeout(Duration::ZERO).build().unwrap_err();
        assert_eq!(
            err,
            ConfigError::MustBePositive { field: "add_entry_timeout", value: "0s".into() }
        );
    }

    #[test]
    fn test_inverted_backoff_is_rejected() {
        let retry = RetryConfig::builder()
            .initial_backoff(Duration::from_secs(10))
            .max_backoff(Duration::from_secs(1))
            .build();
        let result = ClientConfig::builder().metadata_retry(retry).build();
        assert!(matches!(result, Err(ConfigError::InvalidRelation { .. })));
    }

    #[test]
    fn test_zero_ensemble_changes_is_allowed() {
        let config = ClientConfig::builder().max_ensemble_changes(0).build().unwrap();
        assert_eq!(config.max_ensemble_changes(), 0);
    }

    #[test]
    fn test_deserialization_with_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{ "metadata_timeout": "2s" }"#).unwrap();
        assert_eq!(config.metadata_timeout(), Duration::from_secs(2));
        assert_eq!(config.add_entry_timeout(), DEFAULT_ADD_ENTRY_TIMEOUT);
        assert_eq!(config.metadata_retry(), &RetryConfig::default());
    }

    #[test]
    fn test_deserialization_rejects_unknown_fields() {
        let result = serde_json::from_str::<ClientConfig>(r#"{ "metadata_timout": "2s" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialized_config_is_validated_separately() {
        let config: ClientConfig =
            serde_json::from_str(r#"{ "read_entry_timeout": "0s" }"#).unwrap();
        assert!(config.validate().is_err());
    }
}
