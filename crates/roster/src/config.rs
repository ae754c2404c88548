//! Roster configuration.
//!
//! All configuration types can be built through validating `bon` builders or
//! deserialized with `serde` (durations in `humantime` form, e.g. `"30s"`).
//! Deserialized values should be checked with [`RosterConfig::validate`]
//! before use; [`LifecycleCoordinator::new`](crate::LifecycleCoordinator::new)
//! does this for you.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use faculty_roster::{RetryConfig, RosterConfig};
//!
//! let config = RosterConfig::builder()
//!     .signed_url_ttl(Duration::from_secs(3600))
//!     .compensation_retry(RetryConfig::builder().max_retries(5).build()?)
//!     .build()?;
//! assert_eq!(config.signed_url_ttl(), Duration::from_secs(3600));
//! # Ok::<(), faculty_roster::ConfigError>(())
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default lifetime of signed attachment URLs (one day).
pub const DEFAULT_SIGNED_URL_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest signed URL lifetime accepted (seven days, the common object store ceiling).
pub const MAX_SIGNED_URL_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default backoff before the first retry.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(50);

/// Default ceiling on a single backoff.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Default pause between background reconciliation passes.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of backlog entries handled per reconciliation pass.
pub const DEFAULT_RECONCILE_BATCH_SIZE: usize = 64;

/// Backoff policy for compensating and post-commit object store calls.
///
/// # Validation
///
/// - `initial_backoff` must be non-zero
/// - `max_backoff` must be `>= initial_backoff`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the first attempt. Zero disables retrying.
    #[serde(default = "default_max_retries")]
    pub(crate) max_retries: u32,

    /// Backoff before the first retry; doubles per attempt.
    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    pub(crate) initial_backoff: Duration,

    /// Cap on a single backoff, before jitter.
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    pub(crate) max_backoff: Duration,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_initial_backoff() -> Duration {
    DEFAULT_INITIAL_BACKOFF
}

fn default_max_backoff() -> Duration {
    DEFAULT_MAX_BACKOFF
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

#[bon::bon]
impl RetryConfig {
    /// Creates a retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `initial_backoff` is zero or exceeds
    /// `max_backoff`.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_MAX_RETRIES)] max_retries: u32,
        #[builder(default = DEFAULT_INITIAL_BACKOFF)] initial_backoff: Duration,
        #[builder(default = DEFAULT_MAX_BACKOFF)] max_backoff: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self { max_retries, initial_backoff, max_backoff };
        config.validate()?;
        Ok(config)
    }

    /// Returns a policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    /// Checks the invariants the builder enforces.
    ///
    /// # Errors
    ///
    /// See [`RetryConfig::new`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_backoff.is_zero() {
            return Err(ConfigError::BelowMinimum {
                field: "initial_backoff",
                min: "1ms".into(),
                value: "0s".into(),
            });
        }
        if self.initial_backoff > self.max_backoff {
            return Err(ConfigError::InvalidRelation {
                message: format!(
                    "initial_backoff ({:?}) must not exceed max_backoff ({:?})",
                    self.initial_backoff, self.max_backoff
                ),
            });
        }
        Ok(())
    }

    /// Returns the number of retries after the first attempt.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the total number of attempts, counting the first one.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Returns the first backoff.
    #[must_use]
    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    /// Returns the backoff ceiling.
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }
}

/// Settings for the background [`Reconciler`](crate::Reconciler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconcilerConfig {
    /// Pause between passes.
    #[serde(with = "humantime_serde", default = "default_reconcile_interval")]
    pub(crate) interval: Duration,

    /// Backlog entries handled per pass.
    #[serde(default = "default_reconcile_batch_size")]
    pub(crate) batch_size: usize,
}

fn default_reconcile_interval() -> Duration {
    DEFAULT_RECONCILE_INTERVAL
}

fn default_reconcile_batch_size() -> usize {
    DEFAULT_RECONCILE_BATCH_SIZE
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self { interval: DEFAULT_RECONCILE_INTERVAL, batch_size: DEFAULT_RECONCILE_BATCH_SIZE }
    }
}

#[bon::bon]
impl ReconcilerConfig {
    /// Creates reconciler settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if `interval` or `batch_size` is zero.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_RECONCILE_INTERVAL)] interval: Duration,
        #[builder(default = DEFAULT_RECONCILE_BATCH_SIZE)] batch_size: usize,
    ) -> Result<Self, ConfigError> {
        let config = Self { interval, batch_size };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the builder enforces.
    ///
    /// # Errors
    ///
    /// See [`ReconcilerConfig::new`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::BelowMinimum {
                field: "interval",
                min: "1ms".into(),
                value: "0s".into(),
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "batch_size",
                min: "1".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }

    /// Returns the pause between passes.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the number of entries handled per pass.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

/// Top-level configuration of the lifecycle coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RosterConfig {
    /// Lifetime of the URL returned with a created lecturer.
    #[serde(with = "humantime_serde", default = "default_signed_url_ttl")]
    pub(crate) signed_url_ttl: Duration,

    /// Retry policy for blob compensation and post-commit blob deletion.
    #[serde(default)]
    pub(crate) compensation_retry: RetryConfig,

    /// Background reconciliation settings.
    #[serde(default)]
    pub(crate) reconciler: ReconcilerConfig,
}

fn default_signed_url_ttl() -> Duration {
    DEFAULT_SIGNED_URL_TTL
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            signed_url_ttl: DEFAULT_SIGNED_URL_TTL,
            compensation_retry: RetryConfig::default(),
            reconciler: ReconcilerConfig::default(),
        }
    }
}

#[bon::bon]
impl RosterConfig {
    /// Creates a roster configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `signed_url_ttl` is zero or longer than
    /// [`MAX_SIGNED_URL_TTL`], or a nested configuration is invalid.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_SIGNED_URL_TTL)] signed_url_ttl: Duration,
        #[builder(default)] compensation_retry: RetryConfig,
        #[builder(default)] reconciler: ReconcilerConfig,
    ) -> Result<Self, ConfigError> {
        let config = Self { signed_url_ttl, compensation_retry, reconciler };
        config.validate()?;
        Ok(config)
    }

    /// Checks every invariant, including nested configurations.
    ///
    /// # Errors
    ///
    /// See [`RosterConfig::new`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signed_url_ttl.is_zero() {
            return Err(ConfigError::BelowMinimum {
                field: "signed_url_ttl",
                min: "1s".into(),
                value: "0s".into(),
            });
        }
        if self.signed_url_ttl > MAX_SIGNED_URL_TTL {
            return Err(ConfigError::AboveMaximum {
                field: "signed_url_ttl",
                max: format!("{MAX_SIGNED_URL_TTL:?}"),
                value: format!("{:?}", self.signed_url_ttl),
            });
        }
        self.compensation_retry.validate()?;
        self.reconciler.validate()
    }

    /// Returns the signed URL lifetime.
    #[must_use]
    pub fn signed_url_ttl(&self) -> Duration {
        self.signed_url_ttl
    }

    /// Returns the compensation retry policy.
    #[must_use]
    pub fn compensation_retry(&self) -> &RetryConfig {
        &self.compensation_retry
    }

    /// Returns the reconciler settings.
    #[must_use]
    pub fn reconciler(&self) -> &ReconcilerConfig {
        &self.reconciler
    }
}
