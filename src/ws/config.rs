#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::backoff::Backoff as _;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Configuration for [`ConnectionManager`](super::ConnectionManager) behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    /// Delay between a closed connection and the next attempt
    pub reconnect: ReconnectPolicy,
}

/// How long to wait after a closed connection before trying again.
///
/// Attempts are never capped; the manager retries until it is torn down.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectPolicy {
    /// The same delay after every closure. The default is three (3) seconds.
    Fixed(Duration),
    /// Exponentially growing, jittered delay that resets once a connection opens.
    Exponential(ReconnectConfig),
}

impl ReconnectPolicy {
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self::Fixed(delay)
    }

    #[must_use]
    pub fn exponential() -> Self {
        Self::Exponential(ReconnectConfig::default())
    }

    pub(crate) fn schedule(&self) -> Schedule {
        match self {
            Self::Fixed(delay) => Schedule::Fixed(*delay),
            Self::Exponential(config) => {
                let max = config.max_backoff;
                Schedule::Exponential(Box::new(config.clone().into()), max)
            }
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed(DEFAULT_RECONNECT_DELAY)
    }
}

/// Parameters for [`ReconnectPolicy::Exponential`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Initial backoff duration for first reconnection attempt
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff: DEFAULT_INITIAL_BACKOFF_DURATION,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl From<ReconnectConfig> for ExponentialBackoff {
    fn from(config: ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_backoff)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.backoff_multiplier)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Running delay state for one manager.
pub(crate) enum Schedule {
    Fixed(Duration),
    Exponential(Box<ExponentialBackoff>, Duration),
}

impl Schedule {
    /// Delay before the next attempt.
    pub(crate) fn next_delay(&mut self) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::Exponential(backoff, max) => backoff.next_backoff().unwrap_or(*max),
        }
    }

    /// Called when a connection opens.
    pub(crate) fn reset(&mut self) {
        if let Self::Exponential(backoff, _) = self {
            backoff.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reconnect_is_fixed_three_seconds() {
        let config = Config::default();
        assert_eq!(
            config.reconnect,
            ReconnectPolicy::Fixed(Duration::from_millis(3000))
        );
    }

    #[test]
    fn fixed_schedule_never_grows() {
        let mut schedule = ReconnectPolicy::fixed(Duration::from_millis(250)).schedule();

        for _ in 0..100 {
            assert_eq!(schedule.next_delay(), Duration::from_millis(250));
        }
        schedule.reset();
        assert_eq!(schedule.next_delay(), Duration::from_millis(250));
    }

    #[test]
    fn exponential_first_delay_near_initial() {
        let mut schedule = ReconnectPolicy::exponential().schedule();

        // Jitter is +/- 50%
        let first = schedule.next_delay();
        assert!(first >= Duration::from_millis(500) && first <= Duration::from_millis(1500));
    }

    #[test]
    fn exponential_respects_max_and_keeps_going() {
        let mut schedule = ReconnectPolicy::Exponential(ReconnectConfig {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 3.0,
        })
        .schedule();

        for _ in 0..50 {
            let delay = schedule.next_delay();
            assert!(delay <= Duration::from_secs(3), "{delay:?} exceeds jittered max");
        }
    }

    #[test]
    fn exponential_reset_restarts_sequence() {
        let mut schedule = ReconnectPolicy::exponential().schedule();

        for _ in 0..10 {
            let _delay = schedule.next_delay();
        }
        schedule.reset();

        assert!(schedule.next_delay() <= Duration::from_millis(1500));
    }
}
