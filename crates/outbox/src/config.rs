//! Outbox processor configuration.

use std::time::Duration;

/// Tuning knobs for staging, delivery, and retention.
///
/// Environment overrides (all optional):
/// - `OUTBOX_BATCH_SIZE` — events claimed per pass (default: `50`)
/// - `OUTBOX_POLL_INTERVAL_SECS` — seconds between passes (default: `5`)
/// - `OUTBOX_MAX_RETRIES` — attempts before dead-lettering (default: `5`)
/// - `OUTBOX_RETENTION_DAYS` — processed-event retention (default: `30`)
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Maximum events claimed by one processing pass.
    pub batch_size: usize,
    /// Interval between background processing passes.
    pub poll_interval: Duration,
    /// Backoff after the first failure.
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    /// Failed attempts before an event moves to the DLQ.
    pub max_retries: u32,
    /// Jitter applied to each backoff, as a fraction (0.2 = ±20%).
    pub jitter: f64,
    /// How long processed events are retained before purging.
    pub retention: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            poll_interval: Duration::from_secs(5),
            initial_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(3600),
            max_retries: 5,
            jitter: 0.2,
            retention: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

impl OutboxConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let env_u64 = |key: &str| std::env::var(key).ok().and_then(|v| v.parse::<u64>().ok());
        Self {
            batch_size: env_u64("OUTBOX_BATCH_SIZE")
                .map(|v| v as usize)
                .unwrap_or(defaults.batch_size),
            poll_interval: env_u64("OUTBOX_POLL_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            max_retries: env_u64("OUTBOX_MAX_RETRIES")
                .map(|v| v as u32)
                .unwrap_or(defaults.max_retries),
            retention: env_u64("OUTBOX_RETENTION_DAYS")
                .map(|days| Duration::from_secs(days * 24 * 3600))
                .unwrap_or(defaults.retention),
            ..defaults
        }
    }
}
