//! Engine configuration.

use std::time::Duration;

/// Settings for cached resources.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long a cached value is served without asking the API.
    pub ttl: Duration,
    /// Number of notifications kept in the local inbox cache.
    pub max_notifications: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_notifications: 50,
        }
    }
}

impl CacheConfig {
    /// Builder: set the TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Builder: set the inbox bound.
    pub fn with_max_notifications(mut self, max: usize) -> Self {
        self.max_notifications = max;
        self
    }
}

/// Settings for the reservation change monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between polls.
    pub poll_interval: Duration,
    /// Delay after the first failed poll; doubled on each further failure.
    pub initial_backoff: Duration,
    /// Maximum backoff after consecutive failures.
    pub max_backoff: Duration,
    /// Whether to retry with backoff after a failed poll.
    pub backoff_enabled: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300), // 5 minutes
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(1800),  // 30 minutes
            backoff_enabled: true,
        }
    }
}

impl MonitorConfig {
    /// Creates a config with the given poll interval.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            ..Default::default()
        }
    }

    /// Builder: set the first backoff delay.
    pub fn with_initial_backoff(mut self, initial: Duration) -> Self {
        self.initial_backoff = initial;
        self
    }

    /// Builder: set max backoff.
    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = max;
        self
    }

    /// Builder: enable or disable backoff.
    pub fn with_backoff(mut self, enabled: bool) -> Self {
        self.backoff_enabled = enabled;
        self
    }

    /// Returns the delay before the next poll.
    pub fn next_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 || !self.backoff_enabled {
            return self.poll_interval;
        }
        let factor = 2u32.saturating_pow(consecutive_failures - 1);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Settings for reminder scheduling.
#[derive(Debug, Clone)]
pub struct ReminderConfig {
    /// Lead time used when the user has no preference stored.
    pub default_lead_minutes: u32,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            default_lead_minutes: 15,
        }
    }
}

impl ReminderConfig {
    pub fn with_default_lead_minutes(mut self, minutes: u32) -> Self {
        self.default_lead_minutes = minutes;
        self
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub monitor: MonitorConfig,
    pub reminders: ReminderConfig,
}

impl EngineConfig {
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_reminders(mut self, reminders: ReminderConfig) -> Self {
        self.reminders = reminders;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.cache.ttl, Duration::from_secs(300));
        assert_eq!(config.cache.max_notifications, 50);
        assert_eq!(config.monitor.poll_interval, Duration::from_secs(300));
        assert!(config.monitor.backoff_enabled);
        assert_eq!(config.reminders.default_lead_minutes, 15);
    }

    #[test]
    fn backoff_doubles_up_to_max() {
        let config = MonitorConfig::default();
        assert_eq!(config.next_delay(0), Duration::from_secs(300));
        assert_eq!(config.next_delay(1), Duration::from_secs(30));
        assert_eq!(config.next_delay(2), Duration::from_secs(60));
        assert_eq!(config.next_delay(4), Duration::from_secs(240));
        assert_eq!(config.next_delay(10), Duration::from_secs(1800));
        assert_eq!(config.next_delay(40), Duration::from_secs(1800));

        let config = config.with_backoff(false);
        assert_eq!(config.next_delay(3), Duration::from_secs(300));
    }

    #[test]
    fn custom_config() {
        let config = EngineConfig::default()
            .with_cache(CacheConfig::default().with_max_notifications(10))
            .with_monitor(MonitorConfig::new(Duration::from_secs(60)).with_backoff(false))
            .with_reminders(ReminderConfig::default().with_default_lead_minutes(30));

        assert_eq!(config.cache.max_notifications, 10);
        assert_eq!(config.monitor.poll_interval, Duration::from_secs(60));
        assert!(!config.monitor.backoff_enabled);
        assert_eq!(config.reminders.default_lead_minutes, 30);
    }
}
