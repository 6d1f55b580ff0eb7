//! Store settings.
//!
//! These settings control page split/merge thresholds, the retry policy of
//! tree clients, and when a store commits or shifts zones.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_AUTO_COMMIT_INTERVAL_MS, DEFAULT_AUTO_COMMIT_SIZE, DEFAULT_MAX_RETRIES,
    DEFAULT_MAX_ZONE_SIZE, DEFAULT_PAGE_SPLIT_SIZE, DEFAULT_SOFTEN_INTERVAL_MS,
    MIN_PAGE_SPLIT_SIZE,
};
use crate::error::{StoreError, StoreResult};

/// What a tree client does once store errors have exhausted its retries.
///
/// Resetting trades the tree's contents for availability: the client clears
/// itself to the empty tree and keeps serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolicy {
    /// Reset any tree to empty.
    Always,
    /// Reset only transient trees; durable trees propagate the error.
    #[default]
    TransientOnly,
    /// Never reset; always propagate the error.
    Never,
}

impl ResetPolicy {
    /// Returns true if a tree with the given transience may be reset.
    #[must_use]
    pub const fn allows_reset(self, is_transient: bool) -> bool {
        match self {
            Self::Always => true,
            Self::TransientOnly => is_transient,
            Self::Never => false,
        }
    }
}

/// Settings for a store and the trees it hosts.
///
/// # Example
///
/// ```rust
/// use arbor_common::config::StoreSettings;
///
/// let settings = StoreSettings::default().with_page_split_size(8192);
/// assert_eq!(settings.page_split_size, 8192);
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Encoded page size in bytes above which a page splits.
    /// Pages below half of it merge with a sibling.
    /// Default: 4096
    pub page_split_size: usize,

    /// Retries after a store error before a client gives up.
    /// Default: 2
    pub max_retries: usize,

    /// What to do once retries are exhausted.
    /// Default: `transient_only`
    pub failure_policy: ResetPolicy,

    /// Pending diff bytes that trigger an automatic commit.
    /// Default: 1048576 (1 MB)
    pub auto_commit_size: usize,

    /// Time since the last commit that triggers an automatic commit.
    /// Default: 10s
    #[serde(with = "humantime_serde")]
    pub auto_commit_interval: Duration,

    /// Zone size in bytes above which a commit shifts to a fresh zone.
    /// Default: 67108864 (64 MB)
    pub max_zone_size: usize,

    /// Cadence of background soften passes.
    /// Default: 1s
    #[serde(with = "humantime_serde")]
    pub soften_interval: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            page_split_size: DEFAULT_PAGE_SPLIT_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            failure_policy: ResetPolicy::default(),
            auto_commit_size: DEFAULT_AUTO_COMMIT_SIZE,
            auto_commit_interval: Duration::from_millis(DEFAULT_AUTO_COMMIT_INTERVAL_MS),
            max_zone_size: DEFAULT_MAX_ZONE_SIZE,
            soften_interval: Duration::from_millis(DEFAULT_SOFTEN_INTERVAL_MS),
        }
    }
}

impl StoreSettings {
    /// Creates settings with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates settings for tests: small pages so trees grow deep quickly,
    /// automatic commits disabled, and resets allowed for every tree.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            page_split_size: 256,
            max_retries: 2,
            failure_policy: ResetPolicy::Always,
            auto_commit_size: usize::MAX,
            auto_commit_interval: Duration::from_secs(3600),
            max_zone_size: 1024 * 1024,
            soften_interval: Duration::from_millis(10),
        }
    }

    /// Sets the page split size.
    #[must_use]
    pub fn with_page_split_size(mut self, size: usize) -> Self {
        self.page_split_size = size;
        self
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: ResetPolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Sets the automatic commit size.
    #[must_use]
    pub fn with_auto_commit_size(mut self, size: usize) -> Self {
        self.auto_commit_size = size;
        self
    }

    /// Sets the automatic commit interval.
    #[must_use]
    pub fn with_auto_commit_interval(mut self, interval: Duration) -> Self {
        self.auto_commit_interval = interval;
        self
    }

    /// Sets the maximum zone size.
    #[must_use]
    pub fn with_max_zone_size(mut self, size: usize) -> Self {
        self.max_zone_size = size;
        self
    }

    /// Returns the encoded size below which a page should merge.
    #[must_use]
    pub const fn page_merge_size(&self) -> usize {
        self.page_split_size / 2
    }

    /// Validates the settings and returns an error if invalid.
    pub fn validate(&self) -> StoreResult<()> {
        if self.page_split_size < MIN_PAGE_SPLIT_SIZE {
            return Err(StoreError::config(format!(
                "page_split_size must be at least {MIN_PAGE_SPLIT_SIZE} bytes"
            )));
        }

        if self.max_zone_size < self.page_split_size {
            return Err(StoreError::config(
                "max_zone_size must be at least page_split_size",
            ));
        }

        if self.auto_commit_size == 0 {
            return Err(StoreError::config("auto_commit_size must be non-zero"));
        }

        Ok(())
    }
}

/// Serde helper for Duration using humantime format.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        s.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = StoreSettings::default();
        assert_eq!(settings.page_split_size, 4096);
        assert_eq!(settings.max_retries, 2);
        assert_eq!(settings.failure_policy, ResetPolicy::TransientOnly);
        assert_eq!(settings.page_merge_size(), 2048);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_validation() {
        let settings = StoreSettings::default().with_page_split_size(16);
        assert!(settings.validate().is_err());

        let settings = StoreSettings::default()
            .with_page_split_size(4096)
            .with_max_zone_size(1024);
        assert!(settings.validate().is_err());

        let settings = StoreSettings::default().with_auto_commit_size(0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_reset_policy() {
        assert!(ResetPolicy::Always.allows_reset(false));
        assert!(ResetPolicy::TransientOnly.allows_reset(true));
        assert!(!ResetPolicy::TransientOnly.allows_reset(false));
        assert!(!ResetPolicy::Never.allows_reset(true));
    }

    #[test]
    fn test_testing_settings() {
        let settings = StoreSettings::for_testing();
        assert_eq!(settings.page_split_size, 256);
        assert_eq!(settings.failure_policy, ResetPolicy::Always);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_serde_humantime() {
        let settings = StoreSettings::default()
            .with_auto_commit_interval(Duration::from_secs(90))
            .with_failure_policy(ResetPolicy::Never);
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("\"1m 30s\""));
        assert!(json.contains("\"never\""));

        let parsed: StoreSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn test_serde_defaults_missing_fields() {
        let parsed: StoreSettings = serde_json::from_str(r#"{"page_split_size": 512}"#).unwrap();
        assert_eq!(parsed.page_split_size, 512);
        assert_eq!(parsed.max_retries, StoreSettings::default().max_retries);
    }
}
