//! Capture and decoder configuration
//!
//! Both configs deserialize with `#[serde(default)]`, so a partial JSON
//! document only overrides the fields it names. Durations are written as
//! integer milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, CaptureResult};
use crate::protocol::PROTOCOL_VERSION;
use crate::types::PrivacyLevel;

/// Time budget a task may run before it must yield.
pub const DEFAULT_LONG_TASK_BUDGET: Duration = Duration::from_millis(30);

/// Hard upper bound on waiting for an idle slice.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Repeats of one mutation signature before it is throttled.
pub const DEFAULT_THROTTLE_THRESHOLD: u32 = 10;

/// How long a user interaction keeps the page "active".
pub const DEFAULT_INTERACTION_WINDOW: Duration = Duration::from_millis(3000);

/// History entries with no matching signature for this long are evicted.
pub const DEFAULT_HISTORY_QUIET_PERIOD: Duration = Duration::from_secs(30);

/// History table is wiped when it grows past this many entries.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;

/// Quiet time after the last throttled mutation before replay.
pub const DEFAULT_THROTTLE_FLUSH_DELAY: Duration = Duration::from_millis(33);

/// Events of one type closer than this are coalesced into one summary span.
pub const DEFAULT_SUMMARY_INTERVAL: Duration = Duration::from_millis(100);

/// Times the same diagnostic may be reported per page.
pub const DEFAULT_DIAGNOSTIC_REPEAT_LIMIT: usize = 1;

/// Forces a privacy level on every node whose stable selector contains
/// `selector`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskRule {
    /// Substring matched against the node's stable selector
    pub selector: String,
    /// Level applied on match
    pub level: PrivacyLevel,
}

impl MaskRule {
    /// Create a new rule
    pub fn new(selector: impl Into<String>, level: PrivacyLevel) -> Self {
        Self {
            selector: selector.into(),
            level,
        }
    }
}

/// Configuration for a capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Project the payloads belong to
    pub project_id: String,
    /// Visitor identifier
    pub user_id: String,
    /// Session identifier
    pub session_id: String,

    /// Per-call time budget before a task yields
    #[serde(with = "duration_ms")]
    pub long_task_budget: Duration,
    /// Hard timeout while waiting for an idle slice
    #[serde(with = "duration_ms")]
    pub idle_timeout: Duration,

    /// Repeats of a signature before throttling engages
    pub throttle_threshold: u32,
    /// Active interaction window length
    #[serde(with = "duration_ms")]
    pub interaction_window: Duration,
    /// Quiet period after which a history entry is evicted
    #[serde(with = "duration_ms")]
    pub history_quiet_period: Duration,
    /// Hard ceiling on history entries
    pub history_capacity: usize,
    /// Delay before throttled mutations are replayed
    #[serde(with = "duration_ms")]
    pub throttle_flush_delay: Duration,

    /// Privacy inherited by root nodes
    pub default_privacy: PrivacyLevel,
    /// Selector-matched privacy overrides
    pub mask_rules: Vec<MaskRule>,

    /// Same diagnostic is reported at most this many times per page
    pub diagnostic_repeat_limit: usize,
    /// Drop playback arrays from outgoing payloads
    pub lean: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            user_id: String::new(),
            session_id: String::new(),
            long_task_budget: DEFAULT_LONG_TASK_BUDGET,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            throttle_threshold: DEFAULT_THROTTLE_THRESHOLD,
            interaction_window: DEFAULT_INTERACTION_WINDOW,
            history_quiet_period: DEFAULT_HISTORY_QUIET_PERIOD,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            throttle_flush_delay: DEFAULT_THROTTLE_FLUSH_DELAY,
            default_privacy: PrivacyLevel::Sensitive,
            mask_rules: Vec::new(),
            diagnostic_repeat_limit: DEFAULT_DIAGNOSTIC_REPEAT_LIMIT,
            lean: false,
        }
    }
}

impl CaptureConfig {
    /// Create a config identifying the given project, user and session.
    pub fn for_session(
        project_id: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    /// Parse a config from JSON, filling unspecified fields with defaults.
    pub fn from_json(json: &str) -> CaptureResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| CaptureError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot work with.
    pub fn validate(&self) -> CaptureResult<()> {
        if self.throttle_threshold == 0 {
            return Err(CaptureError::Config(
                "throttle_threshold must be at least 1".to_string(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(CaptureError::Config(
                "history_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the payload decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Version the decoder speaks; payloads are checked against it
    pub version: String,
    /// Coalescing threshold for summary spans
    #[serde(with = "duration_ms")]
    pub summary_interval: Duration,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            summary_interval: DEFAULT_SUMMARY_INTERVAL,
        }
    }
}

impl DecoderConfig {
    /// Decoder config pinned to a specific protocol version.
    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Self::default()
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CaptureConfig::default();
        assert_eq!(config.long_task_budget, Duration::from_millis(30));
        assert_eq!(config.throttle_threshold, 10);
        assert_eq!(config.default_privacy, PrivacyLevel::Sensitive);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_overrides() {
        let config = CaptureConfig::from_json(
            r##"{"project_id":"p1","throttle_threshold":3,"idle_timeout":250,
                "mask_rules":[{"selector":"#checkout","level":"exclude"}]}"##,
        )
        .unwrap();

        assert_eq!(config.project_id, "p1");
        assert_eq!(config.throttle_threshold, 3);
        assert_eq!(config.idle_timeout, Duration::from_millis(250));
        assert_eq!(config.mask_rules[0].level, PrivacyLevel::Exclude);
        // Untouched fields keep their defaults
        assert_eq!(config.history_capacity, DEFAULT_HISTORY_CAPACITY);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = CaptureConfig::from_json(r#"{"throttle_threshold":0}"#);
        assert!(matches!(result, Err(CaptureError::Config(_))));

        let result = CaptureConfig::from_json("not json");
        assert!(matches!(result, Err(CaptureError::Config(_))));
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = CaptureConfig::for_session("p", "u", "s");
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"long_task_budget\":30"));
        let parsed = CaptureConfig::from_json(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_decoder_config_default_version() {
        let config = DecoderConfig::default();
        assert_eq!(config.version, PROTOCOL_VERSION);
        assert_eq!(config.summary_interval, DEFAULT_SUMMARY_INTERVAL);
    }
}
