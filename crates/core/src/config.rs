//! Daemon configuration
//!
//! Settings are plain serde structs so they can be embedded in an
//! application's TOML file. Every field has a default; durations are stored
//! as milliseconds.
//!
//! ```toml
//! leading_edge_buffer_ms = 500
//! fetching_cooldown_ms = 2000
//! stall_policy = "skip"
//!
//! [retry]
//! max_retries = 5
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do when a sequence gap refuses to close
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StallPolicy {
    /// Halt the subscription with `Error::ConvergenceStalled`
    #[default]
    Fail,
    /// Treat the missing numbers as permanently skipped and move on
    Skip,
}

/// Exponential retry settings for transient store faults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    /// Default: 3
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (milliseconds)
    /// Default: 100
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on any single delay (milliseconds)
    /// Default: 5000
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Disable retries entirely
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Set the number of retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the first retry delay
    pub fn with_base_delay_ms(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    /// Set the delay cap
    pub fn with_max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Delay before retry number `retry` (0-based): base * 2^retry, capped
    pub fn delay_for(&self, retry: u32) -> Duration {
        let multiplier = 2u64.saturating_pow(retry);
        let delay = self.base_delay_ms.saturating_mul(multiplier);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Settings shared by every fetcher of a daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonSettings {
    /// Minimum commit age before a row is read (milliseconds)
    /// Default: 1000
    #[serde(default = "default_leading_edge_buffer_ms")]
    pub leading_edge_buffer_ms: u64,

    /// Pause after reaching the tail under a continuous lifecycle (milliseconds)
    /// Default: 1000
    #[serde(default = "default_fetching_cooldown_ms")]
    pub fetching_cooldown_ms: u64,

    /// Delay between re-reads of a page with a gap (milliseconds)
    /// Default: 250
    #[serde(default = "default_convergence_delay_ms")]
    pub convergence_delay_ms: u64,

    /// Consecutive re-reads without progress before the stall policy applies
    /// Default: 20
    #[serde(default = "default_max_convergence_attempts")]
    pub max_convergence_attempts: u32,

    /// Action taken once a gap stalls
    #[serde(default)]
    pub stall_policy: StallPolicy,

    /// Retry policy for transient store faults
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_leading_edge_buffer_ms() -> u64 {
    1_000
}

fn default_fetching_cooldown_ms() -> u64 {
    1_000
}

fn default_convergence_delay_ms() -> u64 {
    250
}

fn default_max_convergence_attempts() -> u32 {
    20
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            leading_edge_buffer_ms: default_leading_edge_buffer_ms(),
            fetching_cooldown_ms: default_fetching_cooldown_ms(),
            convergence_delay_ms: default_convergence_delay_ms(),
            max_convergence_attempts: default_max_convergence_attempts(),
            stall_policy: StallPolicy::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl DaemonSettings {
    /// Create settings with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse settings from TOML
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let settings: Self = toml::from_str(source)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the fetcher cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_convergence_attempts == 0 {
            return Err(Error::Config(
                "max_convergence_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::Config(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        Ok(())
    }

    /// Set the leading-edge buffer
    pub fn with_leading_edge_buffer(mut self, buffer: Duration) -> Self {
        self.leading_edge_buffer_ms = buffer.as_millis() as u64;
        self
    }

    /// Set the continuous-lifecycle cooldown
    pub fn with_fetching_cooldown(mut self, cooldown: Duration) -> Self {
        self.fetching_cooldown_ms = cooldown.as_millis() as u64;
        self
    }

    /// Set the delay between convergence re-reads
    pub fn with_convergence_delay(mut self, delay: Duration) -> Self {
        self.convergence_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the convergence attempt bound
    pub fn with_max_convergence_attempts(mut self, attempts: u32) -> Self {
        self.max_convergence_attempts = attempts;
        self
    }

    /// Set the stall policy
    pub fn with_stall_policy(mut self, policy: StallPolicy) -> Self {
        self.stall_policy = policy;
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Leading-edge buffer as a duration
    pub fn leading_edge_buffer(&self) -> Duration {
        Duration::from_millis(self.leading_edge_buffer_ms)
    }

    /// Cooldown as a duration
    pub fn fetching_cooldown(&self) -> Duration {
        Duration::from_millis(self.fetching_cooldown_ms)
    }

    /// Convergence delay as a duration
    pub fn convergence_delay(&self) -> Duration {
        Duration::from_millis(self.convergence_delay_ms)
    }
}

/// Per-projection fetch options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncOptions {
    /// Sequence range covered by one page
    /// Default: 100
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    100
}

impl Default for AsyncOptions {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

impl AsyncOptions {
    /// Create options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from TOML
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let options: Self = toml::from_str(source)?;
        if options.page_size == 0 {
            return Err(Error::Config("page_size must be at least 1".to_string()));
        }
        Ok(options)
    }

    /// Set the page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}
