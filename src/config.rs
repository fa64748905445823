//! Pool configuration options

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{PoolError, PoolResult};

/// Configuration for session pool behavior
///
/// # Examples
///
/// ```
/// use session_pool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new("orders-db")
///     .with_min_pool_size(2)
///     .with_max_pool_size(10)
///     .with_borrow_timeout(Duration::from_secs(5))
///     .with_max_lifetime(Duration::from_secs(3600));
///
/// assert_eq!(config.min_pool_size, 2);
/// assert_eq!(config.max_pool_size, 10);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfiguration {
    /// Name identifying the pool in logs
    pub unique_resource_name: String,

    /// Minimum number of sessions the maintenance pass tops up toward
    pub min_pool_size: usize,

    /// Hard cap on pool growth
    pub max_pool_size: usize,

    /// Maximum total wall-clock a borrower may wait for a session
    pub borrow_timeout: Duration,

    /// Sessions available continuously this long are destroyed while the
    /// pool is above `min_pool_size`; `None` disables idle shrinking
    pub max_idle_time: Option<Duration>,

    /// In-use sessions older than this since their last acquisition are
    /// forcibly reaped; `None` disables reaping
    pub reap_timeout: Option<Duration>,

    /// Available sessions older than this since creation are destroyed;
    /// `None` disables lifetime eviction
    pub max_lifetime: Option<Duration>,

    /// Period of the maintenance task; zero falls back to the default
    pub maintenance_interval: Duration,

    /// Opaque liveness probe passed to the session on each borrow
    pub test_query: Option<String>,

    /// Isolation level handed through to newly proxied sessions
    pub default_isolation_level: Option<i32>,
}

impl PoolConfiguration {
    /// Create a configuration with default values for the named pool
    pub fn new(unique_resource_name: impl Into<String>) -> Self {
        Self {
            unique_resource_name: unique_resource_name.into(),
            min_pool_size: 1,
            max_pool_size: 10,
            borrow_timeout: Duration::from_secs(30),
            max_idle_time: None,
            reap_timeout: None,
            max_lifetime: None,
            maintenance_interval: Duration::from_secs(60),
            test_query: None,
            default_isolation_level: None,
        }
    }

    /// Set the minimum pool size
    pub fn with_min_pool_size(mut self, size: usize) -> Self {
        self.min_pool_size = size;
        self
    }

    /// Set the maximum pool size
    ///
    /// # Examples
    ///
    /// ```
    /// use session_pool::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::new("db").with_max_pool_size(50);
    /// assert_eq!(config.max_pool_size, 50);
    /// ```
    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    /// Set the borrow timeout
    pub fn with_borrow_timeout(mut self, timeout: Duration) -> Self {
        self.borrow_timeout = timeout;
        self
    }

    /// Destroy sessions idle longer than `max_idle` while above the minimum
    /// size; equivalent to the "0 disables" knob when never called
    pub fn with_max_idle_time(mut self, max_idle: Duration) -> Self {
        self.max_idle_time = Some(max_idle);
        self
    }

    /// Forcibly reap sessions held longer than `reap_timeout`
    pub fn with_reap_timeout(mut self, reap_timeout: Duration) -> Self {
        self.reap_timeout = Some(reap_timeout);
        self
    }

    /// Destroy available sessions older than `max_lifetime`
    pub fn with_max_lifetime(mut self, max_lifetime: Duration) -> Self {
        self.max_lifetime = Some(max_lifetime);
        self
    }

    /// Set the maintenance task period
    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// Set the liveness probe string
    pub fn with_test_query(mut self, query: impl Into<String>) -> Self {
        self.test_query = Some(query.into());
        self
    }

    /// Set the isolation level handed to new session proxies
    pub fn with_default_isolation_level(mut self, level: i32) -> Self {
        self.default_isolation_level = Some(level);
        self
    }

    /// Validate the configuration, returning an error if inconsistent
    ///
    /// # Examples
    ///
    /// ```
    /// use session_pool::PoolConfiguration;
    ///
    /// assert!(PoolConfiguration::new("db").validate().is_ok());
    /// assert!(PoolConfiguration::new("db").with_max_pool_size(0).validate().is_err());
    /// ```
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_pool_size == 0 {
            return Err(PoolError::Internal(
                "max_pool_size must be greater than 0".into(),
            ));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(PoolError::Internal(format!(
                "min_pool_size ({}) must not exceed max_pool_size ({})",
                self.min_pool_size, self.max_pool_size
            )));
        }
        Ok(())
    }
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self::new("session-pool")
    }
}
