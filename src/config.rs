//! Consumer and source tracking configuration.

use crate::{
    clock::{Clock, SystemClock},
    rolling::{InvalidConfiguration, RollingCounter},
    tracking::{NodePrefix, SourceKey, SourceTracker},
    Queue,
};
use std::time::Duration;

/// The default window over which message sources are counted
pub const DEFAULT_TRACKING_TTL: Duration = Duration::from_secs(1);

/// Errors which may be returned when building consumers or trackers from configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The tracking window was too short or too long
    #[error(transparent)]
    InvalidConfiguration(#[from] InvalidConfiguration),

    /// The consumer was not given a queue to read from
    #[error("consumer queue name must not be empty")]
    EmptyQueue,
}

/// Configuration for counting which node the consumed messages originate from.
///
/// Tracking is off by default. Counting runs once per received message, so it has a measurable
/// cost on the receive path; when disabled, no clock is read and no key is extracted.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct TrackingConfig {
    /// Whether message sources are counted at all
    pub enabled: bool,

    /// How long each received message counts towards its source
    #[cfg_attr(feature = "serde", serde(rename = "ttl_secs", with = "secs_f64"))]
    pub ttl: Duration,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        TrackingConfig {
            enabled: false,
            ttl: DEFAULT_TRACKING_TTL,
        }
    }
}

impl TrackingConfig {
    /// Turn source tracking on or off
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the window over which sources are counted
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Build a tracker keyed by the node prefix of each message ID.
    pub fn build_tracker(&self) -> Result<SourceTracker<NodePrefix, SystemClock>, ConfigError> {
        self.build_tracker_with(NodePrefix, SystemClock)
    }

    /// Build a tracker with a custom key extractor and clock.
    ///
    /// The window is validated even when tracking is disabled, so that a configuration which
    /// fails when switched on is rejected up front.
    pub fn build_tracker_with<X, C>(
        &self,
        extractor: X,
        clock: C,
    ) -> Result<SourceTracker<X, C>, ConfigError>
    where
        X: SourceKey,
        C: Clock,
    {
        let counter = RollingCounter::with_clock(self.ttl, clock)?;
        Ok(if self.enabled {
            SourceTracker::enabled(extractor, counter)
        } else {
            SourceTracker::disabled(extractor)
        })
    }
}

/// Configuration for a single consumer.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct ConsumerConfig {
    /// The queue to pull jobs from
    pub queue: Queue,

    /// Source tracking for the received jobs
    pub tracking: TrackingConfig,
}

impl ConsumerConfig {
    /// Create a configuration for consuming the given queue, with tracking disabled
    pub fn new(queue: impl Into<Queue>) -> Self {
        ConsumerConfig {
            queue: queue.into(),
            tracking: TrackingConfig::default(),
        }
    }

    /// Replace the source tracking configuration
    pub fn tracking(mut self, tracking: TrackingConfig) -> Self {
        self.tracking = tracking;
        self
    }

    /// Check this configuration for values which would fail at consumer construction
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.as_ref().is_empty() {
            return Err(ConfigError::EmptyQueue);
        }
        if self.tracking.ttl.is_zero() {
            return Err(InvalidConfiguration::zero().into());
        }
        Ok(())
    }
}

#[cfg(feature = "serde")]
mod secs_f64 {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(
        ttl: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(ttl.as_secs_f64())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        crate::rolling::ttl_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn tracking_is_disabled_by_default() {
        let config = ConsumerConfig::new("q");
        assert!(!config.tracking.enabled);
        assert_eq!(config.tracking.ttl, DEFAULT_TRACKING_TTL);
        assert!(!config.tracking.build_tracker().unwrap().is_enabled());
    }

    #[test]
    fn enabled_tracking_builds_counter() {
        let tracker = TrackingConfig::default()
            .enabled(true)
            .ttl(Duration::from_millis(100))
            .build_tracker_with(NodePrefix, ManualClock::new())
            .unwrap();
        assert!(tracker.is_enabled());
        assert_eq!(
            tracker.counter().map(|c| c.ttl()),
            Some(Duration::from_millis(100))
        );
    }

    #[test]
    fn zero_ttl_is_rejected_even_when_disabled() {
        let config = TrackingConfig::default().ttl(Duration::ZERO);
        assert!(matches!(
            config.build_tracker(),
            Err(ConfigError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            config.enabled(true).build_tracker(),
            Err(ConfigError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn validate_rejects_empty_queue() {
        assert!(matches!(
            ConsumerConfig::default().validate(),
            Err(ConfigError::EmptyQueue)
        ));
        assert!(ConsumerConfig::new("jobs").validate().is_ok());
        assert!(matches!(
            ConsumerConfig::new("jobs")
                .tracking(TrackingConfig::default().ttl(Duration::ZERO))
                .validate(),
            Err(ConfigError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn config_error_is_std_error() {
        crate::tests::assert_error::<ConfigError>();
    }

    #[cfg(feature = "serde")]
    mod serde_config {
        use super::*;

        #[test]
        fn deserialize_fractional_ttl() {
            let config: ConsumerConfig = serde_json::from_str(
                r#"{ "queue": "jobs", "tracking": { "enabled": true, "ttl_secs": 0.25 } }"#,
            )
            .unwrap();
            assert_eq!(config.queue, Queue::from("jobs"));
            assert!(config.tracking.enabled);
            assert_eq!(config.tracking.ttl, Duration::from_millis(250));
        }

        #[test]
        fn deserialize_defaults() {
            let config: ConsumerConfig = serde_json::from_str(r#"{ "queue": "jobs" }"#).unwrap();
            assert_eq!(config.tracking, TrackingConfig::default());
        }

        #[test]
        fn deserialize_rejects_negative_ttl() {
            let err = serde_json::from_str::<TrackingConfig>(r#"{ "ttl_secs": -1 }"#).unwrap_err();
            assert!(err.to_string().contains("at least 1ns"));
            assert!(serde_json::from_str::<TrackingConfig>(r#"{ "ttl_secs": 0 }"#).is_err());
        }

        #[test]
        fn deserialize_rejects_sub_nanosecond_ttl() {
            let err =
                serde_json::from_str::<TrackingConfig>(r#"{ "ttl_secs": 1e-12 }"#).unwrap_err();
            assert!(err.to_string().contains("at least 1ns"));
        }

        #[test]
        fn deserialize_rejects_oversized_ttl() {
            let err =
                serde_json::from_str::<TrackingConfig>(r#"{ "ttl_secs": 1e300 }"#).unwrap_err();
            assert!(err.to_string().contains("too long"));
        }
    }
}
