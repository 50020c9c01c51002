use std::time::Duration;

use backoff::{exponential::ExponentialBackoffBuilder, ExponentialBackoff};
use blink_common::models::{action::DEFAULT_LIVE_DATA_DELAY, trust::SecurityLevel};

/// Retry policy for idempotent requests (descriptor and registry fetches).
///
/// Component POSTs are never retried whatever this says.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum RetryConfiguration {
    NoRetry,
    Exponential(ExponentialRetryConfiguration),
}

impl Default for RetryConfiguration {
    fn default() -> Self {
        RetryConfiguration::exponential(
            Duration::from_millis(250),
            // increase backoff time by 75% each failure
            1.75,
            Duration::from_secs(10),
            // if all retries take longer than 30s, give up
            Some(Duration::from_secs(30)),
        )
    }
}

impl RetryConfiguration {
    pub fn exponential(
        initial_interval: Duration,
        multiplier: f64,
        max_interval: Duration,
        max_elapsed_time: Option<Duration>,
    ) -> Self {
        RetryConfiguration::Exponential(ExponentialRetryConfiguration::new(
            initial_interval,
            multiplier,
            max_interval,
            max_elapsed_time,
        ))
    }

    pub(crate) fn backoff_policy(&self) -> ExponentialBackoff {
        match self {
            // A zero elapsed budget makes the first failure permanent.
            RetryConfiguration::NoRetry => ExponentialBackoffBuilder::new()
                .with_max_elapsed_time(Some(Duration::ZERO))
                .build(),
            RetryConfiguration::Exponential(config) => ExponentialBackoffBuilder::new()
                .with_initial_interval(config.initial_interval)
                .with_multiplier(config.multiplier)
                .with_max_interval(config.max_interval)
                .with_max_elapsed_time(config.max_elapsed_time)
                .build(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ExponentialRetryConfiguration {
    initial_interval: Duration,
    multiplier: f64,
    max_interval: Duration,
    max_elapsed_time: Option<Duration>,
}

impl ExponentialRetryConfiguration {
    pub fn new(
        initial_interval: Duration,
        multiplier: f64,
        max_interval: Duration,
        max_elapsed_time: Option<Duration>,
    ) -> Self {
        Self { initial_interval, multiplier, max_interval, max_elapsed_time }
    }

    pub fn initial_interval(&self) -> Duration {
        self.initial_interval
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }

    pub fn max_elapsed_time(&self) -> Option<Duration> {
        self.max_elapsed_time
    }
}

/// Settings of one [`crate::session::ActionSession`].
#[derive(Clone, Debug)]
pub struct SessionConfig {
    security_level: SecurityLevel,
    live_data_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { security_level: SecurityLevel::default(), live_data_delay: DEFAULT_LIVE_DATA_DELAY }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Which trust verdicts may execute without a user override (default: only trusted).
    pub fn security_level(mut self, security_level: SecurityLevel) -> Self {
        self.security_level = security_level;
        self
    }

    /// Polling interval for live actions that do not declare one (default: 1s).
    pub fn live_data_delay(mut self, delay: Duration) -> Self {
        self.live_data_delay = delay;
        self
    }

    pub fn get_security_level(&self) -> SecurityLevel {
        self.security_level
    }

    pub fn get_live_data_delay(&self) -> Duration {
        self.live_data_delay
    }
}
