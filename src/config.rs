//! Configuration types for federation-import

use crate::error::{Error, Result};
use crate::types::Phase;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path, path::PathBuf, time::Duration};

/// Top-level import configuration
///
/// Every field has a default, so `ImportConfig::default()` (or an empty JSON object) is a
/// working configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Storage settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Pacing of outbound calls to the source
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retry and back-off policy for page fetches
    #[serde(default)]
    pub retry: RetryConfig,

    /// Run-duration budget
    #[serde(default)]
    pub timeout: TimeoutConfig,

    /// Batch size, fetch concurrency, skipped-page retry
    #[serde(default)]
    pub batch: BatchConfig,

    /// Validation-rate floor
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Run lock behavior
    #[serde(default)]
    pub lock: LockConfig,

    /// Per-phase overrides
    #[serde(default)]
    pub phases: BTreeMap<Phase, PhaseOverrides>,
}

impl ImportConfig {
    /// Load configuration from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: ImportConfig = serde_json::from_str(&raw).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.batch.batch_size == 0 {
            return Err(config_error("batch size must be at least 1", "batch.batch_size"));
        }
        if self.batch.concurrency == 0 {
            return Err(config_error(
                "concurrency must be at least 1",
                "batch.concurrency",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(config_error(
                "max attempts must be at least 1",
                "retry.max_attempts",
            ));
        }
        if !(0.0..=1.0).contains(&self.validation.min_validation_rate) {
            return Err(config_error(
                "validation rate floor must be between 0.0 and 1.0",
                "validation.min_validation_rate",
            ));
        }
        for (phase, overrides) in &self.phases {
            if overrides.batch_size == Some(0) {
                return Err(config_error(
                    "batch size must be at least 1",
                    &format!("phases.{phase}.batch_size"),
                ));
            }
            if overrides.concurrency == Some(0) {
                return Err(config_error(
                    "concurrency must be at least 1",
                    &format!("phases.{phase}.concurrency"),
                ));
            }
            if overrides.max_attempts == Some(0) {
                return Err(config_error(
                    "max attempts must be at least 1",
                    &format!("phases.{phase}.max_attempts"),
                ));
            }
        }
        Ok(())
    }

    /// Total fetch attempts for a phase
    pub fn max_attempts_for(&self, phase: Phase) -> u32 {
        self.phases
            .get(&phase)
            .and_then(|o| o.max_attempts)
            .unwrap_or(self.retry.max_attempts)
    }

    /// Batch size for a phase
    pub fn batch_size_for(&self, phase: Phase) -> usize {
        self.phases
            .get(&phase)
            .and_then(|o| o.batch_size)
            .unwrap_or(self.batch.batch_size)
    }

    /// Fetch concurrency for a phase
    pub fn concurrency_for(&self, phase: Phase) -> usize {
        self.phases
            .get(&phase)
            .and_then(|o| o.concurrency)
            .unwrap_or(self.batch.concurrency)
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

/// Storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./federation-import.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Rate limiting configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Minimum delay between two source calls (default: 1000 ms)
    #[serde(default = "default_min_delay", with = "duration_ms_serde")]
    pub min_delay: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_delay: default_min_delay(),
        }
    }
}

/// Retry configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per operation, including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on every further retry (default: 1000 ms)
    #[serde(default = "default_base_delay", with = "duration_ms_serde")]
    pub base_delay: Duration,

    /// Fixed wait between attempts while the source is fully unreachable (default: 300 s)
    #[serde(default = "default_full_outage_delay", with = "duration_serde")]
    pub full_outage_delay: Duration,

    /// Consecutive failed pages that switch fetching into full-outage mode (default: 3)
    #[serde(default = "default_full_outage_threshold")]
    pub full_outage_threshold: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            full_outage_delay: default_full_outage_delay(),
            full_outage_threshold: default_full_outage_threshold(),
        }
    }
}

/// Run-duration budget
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Maximum wall-clock duration of one run (default: 12 hours)
    #[serde(default = "default_max_duration", with = "duration_serde")]
    pub max_duration: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            max_duration: default_max_duration(),
        }
    }
}

/// Batching and concurrency configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Records written (and checkpointed) per batch (default: 100)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Independent source sessions fetching pages in parallel (default: 3)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Largest number of skipped pages that still gets an end-of-phase retry pass (default: 5)
    #[serde(default = "default_skipped_page_retry_limit")]
    pub skipped_page_retry_limit: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            skipped_page_retry_limit: default_skipped_page_retry_limit(),
        }
    }
}

/// Validation configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Runs whose validation rate falls below this are flagged as degraded (default: 0.95)
    #[serde(default = "default_min_validation_rate")]
    pub min_validation_rate: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_validation_rate: default_min_validation_rate(),
        }
    }
}

/// Run lock configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockConfig {
    /// A lock held longer than this is treated as left behind by a crashed process
    /// (default: 13 hours)
    #[serde(default = "default_stale_after", with = "duration_serde")]
    pub stale_after: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after: default_stale_after(),
        }
    }
}

/// Per-phase settings that take precedence over the global ones
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PhaseOverrides {
    /// Total fetch attempts
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Records per batch
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Parallel source sessions
    #[serde(default)]
    pub concurrency: Option<usize>,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("federation-import.db")
}

fn default_min_delay() -> Duration {
    Duration::from_millis(1000)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_millis(1000)
}

fn default_full_outage_delay() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_full_outage_threshold() -> u32 {
    3
}

fn default_max_duration() -> Duration {
    Duration::from_secs(12 * 60 * 60)
}

fn default_batch_size() -> usize {
    100
}

fn default_concurrency() -> usize {
    3
}

fn default_skipped_page_retry_limit() -> usize {
    5
}

fn default_min_validation_rate() -> f64 {
    0.95
}

fn default_stale_after() -> Duration {
    Duration::from_secs(13 * 60 * 60)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let config: ImportConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.rate_limit.min_delay, Duration::from_millis(1000));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.full_outage_delay, Duration::from_secs(300));
        assert_eq!(config.timeout.max_duration, Duration::from_secs(43_200));
        assert_eq!(config.batch.batch_size, 100);
        assert_eq!(config.batch.skipped_page_retry_limit, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn durations_use_their_declared_units() {
        let config = ImportConfig::default();
        let json = serde_json::to_value(&config).expect("serialize failed");

        assert_eq!(json["rate_limit"]["min_delay"], 1000);
        assert_eq!(json["retry"]["base_delay"], 1000);
        assert_eq!(json["retry"]["full_outage_delay"], 300);
        assert_eq!(json["timeout"]["max_duration"], 43_200);
    }

    #[test]
    fn phase_overrides_take_precedence() {
        let json = r#"{
            "retry": { "max_attempts": 3 },
            "phases": { "GAMES": { "max_attempts": 5, "batch_size": 25 } }
        }"#;
        let config: ImportConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.max_attempts_for(Phase::Games), 5);
        assert_eq!(config.max_attempts_for(Phase::Clubs), 3);
        assert_eq!(config.batch_size_for(Phase::Games), 25);
        assert_eq!(config.batch_size_for(Phase::Players), 100);
        assert_eq!(config.concurrency_for(Phase::Games), 3);
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let mut config = ImportConfig::default();
        config.batch.batch_size = 0;

        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("batch.batch_size")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_out_of_range_rate_floor() {
        let mut config = ImportConfig::default();
        config.validation.min_validation_rate = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_phase_concurrency() {
        let mut config = ImportConfig::default();
        config.phases.insert(
            Phase::Players,
            PhaseOverrides {
                concurrency: Some(0),
                ..Default::default()
            },
        );

        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("phases.PLAYERS.concurrency"))
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn from_json_file_reads_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("import.json");
        std::fs::write(&path, r#"{ "batch": { "batch_size": 10 } }"#).unwrap();

        let config = ImportConfig::from_json_file(&path).unwrap();
        assert_eq!(config.batch.batch_size, 10);

        std::fs::write(&path, r#"{ "batch": { "batch_size": 0 } }"#).unwrap();
        assert!(ImportConfig::from_json_file(&path).is_err());
    }
}
