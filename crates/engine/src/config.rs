//! Engine configuration
//!
//! The pool receives configuration through [`EngineConfiguration`] and
//! snapshots it once at construction. [`EngineConfig`] is the immutable
//! production value; [`MutableEngineConfig`] lets tests adjust settings
//! between pool instances.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

/// Environment variable for the number of worker loops
pub const WORKER_COUNT_ENV: &str = "COMPUTE_ENGINE_WORKER_COUNT";

/// Environment variable for the polling delay, in milliseconds
pub const QUEUE_POLLING_DELAY_ENV: &str = "COMPUTE_ENGINE_QUEUE_POLLING_DELAY_MS";

const DEFAULT_WORKER_COUNT: usize = 1;
const DEFAULT_QUEUE_POLLING_DELAY: Duration = Duration::from_millis(2000);

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// At least one worker is required
    #[error("worker count must be at least 1, got {0}")]
    InvalidWorkerCount(usize),

    /// Polling delay must be strictly positive
    #[error("queue polling delay must be greater than zero")]
    InvalidQueuePollingDelay,

    /// Environment variable could not be parsed
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnvVar { name: &'static str, value: String },
}

/// Read-only view of engine settings
pub trait EngineConfiguration: Send + Sync {
    /// Number of independent worker loops (at least 1)
    fn worker_count(&self) -> usize;

    /// Sleep between polls when no task was claimed (strictly positive)
    fn queue_polling_delay(&self) -> Duration;
}

fn validate(worker_count: usize, queue_polling_delay: Duration) -> Result<(), ConfigError> {
    if worker_count == 0 {
        return Err(ConfigError::InvalidWorkerCount(worker_count));
    }
    if queue_polling_delay.is_zero() {
        return Err(ConfigError::InvalidQueuePollingDelay);
    }
    Ok(())
}

/// Immutable engine configuration
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use compute_engine::config::{EngineConfig, EngineConfiguration};
///
/// let config = EngineConfig::new(4, Duration::from_millis(500)).unwrap();
/// assert_eq!(config.worker_count(), 4);
///
/// assert!(EngineConfig::new(0, Duration::from_millis(500)).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineConfig {
    worker_count: usize,

    #[serde(rename = "queue_polling_delay_ms", with = "duration_millis")]
    queue_polling_delay: Duration,
}

impl EngineConfig {
    /// Create a validated configuration
    pub fn new(worker_count: usize, queue_polling_delay: Duration) -> Result<Self, ConfigError> {
        validate(worker_count, queue_polling_delay)?;
        Ok(Self {
            worker_count,
            queue_polling_delay,
        })
    }

    /// Create configuration from environment variables
    ///
    /// Unset variables fall back to the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let worker_count = match lookup(WORKER_COUNT_ENV) {
            Some(value) => parse_var(WORKER_COUNT_ENV, value)?,
            None => DEFAULT_WORKER_COUNT,
        };

        let queue_polling_delay = match lookup(QUEUE_POLLING_DELAY_ENV) {
            Some(value) => Duration::from_millis(parse_var(QUEUE_POLLING_DELAY_ENV, value)?),
            None => DEFAULT_QUEUE_POLLING_DELAY,
        };

        Self::new(worker_count, queue_polling_delay)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            queue_polling_delay: DEFAULT_QUEUE_POLLING_DELAY,
        }
    }
}

impl EngineConfiguration for EngineConfig {
    fn worker_count(&self) -> usize {
        self.worker_count
    }

    fn queue_polling_delay(&self) -> Duration {
        self.queue_polling_delay
    }
}

impl<'de> Deserialize<'de> for EngineConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Raw {
            #[serde(default = "default_worker_count")]
            worker_count: usize,
            #[serde(
                rename = "queue_polling_delay_ms",
                with = "duration_millis",
                default = "default_queue_polling_delay"
            )]
            queue_polling_delay: Duration,
        }

        fn default_worker_count() -> usize {
            DEFAULT_WORKER_COUNT
        }

        fn default_queue_polling_delay() -> Duration {
            DEFAULT_QUEUE_POLLING_DELAY
        }

        let raw = Raw::deserialize(deserializer)?;
        EngineConfig::new(raw.worker_count, raw.queue_polling_delay)
            .map_err(serde::de::Error::custom)
    }
}

/// Configuration whose settings can change after construction
///
/// Setters validate like [`EngineConfig::new`]. A running pool keeps the
/// snapshot it took at construction.
#[derive(Debug, Clone, Default)]
pub struct MutableEngineConfig {
    inner: EngineConfig,
}

impl MutableEngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_worker_count(&mut self, worker_count: usize) -> Result<&mut Self, ConfigError> {
        self.inner = EngineConfig::new(worker_count, self.inner.queue_polling_delay)?;
        Ok(self)
    }

    pub fn set_queue_polling_delay(&mut self, delay: Duration) -> Result<&mut Self, ConfigError> {
        self.inner = EngineConfig::new(self.inner.worker_count, delay)?;
        Ok(self)
    }

    /// Freeze the current settings
    pub fn snapshot(&self) -> EngineConfig {
        self.inner
    }
}

impl EngineConfiguration for MutableEngineConfig {
    fn worker_count(&self) -> usize {
        self.inner.worker_count
    }

    fn queue_polling_delay(&self) -> Duration {
        self.inner.queue_polling_delay
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvVar { name, value })
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
