//! Exponential backoff with jitter for failed deliveries.

use std::time::Duration;

use rand::Rng;

use crate::config::OutboxConfig;

// 2^31 seconds is far past any max_backoff; shifting further would only
// overflow.
const MAX_SHIFT: u32 = 31;

/// Computes the delay before retry number `retry_count + 1`, with a random
/// jitter factor to avoid synchronized retry storms.
pub fn backoff_delay(config: &OutboxConfig, retry_count: u32) -> Duration {
    let jitter = config.jitter.clamp(0.0, 1.0);
    let factor = if jitter == 0.0 {
        1.0
    } else {
        rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter)
    };
    backoff_delay_with_jitter(config, retry_count, factor)
}

/// The deterministic core of [`backoff_delay`]:
/// `min(initial * 2^retry_count, max) * factor`.
pub fn backoff_delay_with_jitter(
    config: &OutboxConfig,
    retry_count: u32,
    factor: f64,
) -> Duration {
    let shift = retry_count.min(MAX_SHIFT);
    let exponential = config
        .initial_backoff
        .saturating_mul(1u32.checked_shl(shift).unwrap_or(u32::MAX));
    let capped = exponential.min(config.max_backoff);
    capped.mul_f64(factor.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OutboxConfig {
        OutboxConfig {
            initial_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(3600),
            jitter: 0.2,
            ..OutboxConfig::default()
        }
    }

    #[test]
    fn doubles_per_retry_until_the_cap() {
        let config = config();
        assert_eq!(
            backoff_delay_with_jitter(&config, 0, 1.0),
            Duration::from_secs(10)
        );
        assert_eq!(
            backoff_delay_with_jitter(&config, 1, 1.0),
            Duration::from_secs(20)
        );
        assert_eq!(
            backoff_delay_with_jitter(&config, 3, 1.0),
            Duration::from_secs(80)
        );
        assert_eq!(
            backoff_delay_with_jitter(&config, 20, 1.0),
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn monotonically_non_decreasing_up_to_the_cap() {
        let config = config();
        let mut last = Duration::ZERO;
        for retry in 0..40 {
            let delay = backoff_delay_with_jitter(&config, retry, 1.0);
            assert!(delay >= last, "delay shrank at retry {retry}");
            assert!(delay <= config.max_backoff);
            last = delay;
        }
    }

    #[test]
    fn huge_retry_counts_do_not_overflow() {
        let config = config();
        assert_eq!(
            backoff_delay_with_jitter(&config, u32::MAX, 1.0),
            config.max_backoff
        );
    }

    #[test]
    fn jittered_delay_stays_within_the_band() {
        let config = config();
        for _ in 0..100 {
            let delay = backoff_delay(&config, 2);
            assert!(delay >= Duration::from_secs(32), "delay {delay:?} below -20%");
            assert!(delay <= Duration::from_secs(48), "delay {delay:?} above +20%");
        }
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let config = OutboxConfig {
            jitter: 0.0,
            ..config()
        };
        assert_eq!(backoff_delay(&config, 1), Duration::from_secs(20));
    }
}
