//! Engine configuration
//!
//! Every section has working defaults; a TOML file or `AMEM_*` environment
//! variables override individual fields.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MemoryError, MemoryResult};
use crate::store::ranking::TypeWeights;

/// Circuit breaker and retry settings for backend calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Consecutive failed calls before the circuit opens.
    pub failure_threshold: u32,
    /// Consecutive half-open successes before the circuit closes.
    pub success_threshold: u32,
    pub open_timeout_ms: u64,
    /// Wall-clock limit for a single attempt.
    pub attempt_timeout_ms: u64,
    /// Retries of transient failures (0 = run once).
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout_ms: 30_000,
            attempt_timeout_ms: 5_000,
            max_retries: 2,
            backoff_base_ms: 100,
            backoff_max_ms: 2_000,
        }
    }
}

impl ConnectorConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Delay before retry number `attempt` (1-based): base doubled per
    /// attempt, capped at `backoff_max_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let ms = self
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }
}

/// Ranking parameters for `recall`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecallConfig {
    pub half_life_days: f64,
    /// Lower bound of the recency factor
    pub recency_floor: f64,
    pub type_weights: TypeWeights,
    /// Records fetched per backend round trip; recall scans every page
    pub page_size: usize,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            half_life_days: 90.0,
            recency_floor: 0.5,
            type_weights: TypeWeights::default(),
            page_size: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Samples kept in the ring buffer
    pub window: usize,
    pub degraded_failure_rate: f64,
    pub unhealthy_failure_rate: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window: 1024,
            degraded_failure_rate: 0.1,
            unhealthy_failure_rate: 0.5,
        }
    }
}

/// Input bounds enforced before anything reaches the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum content length in characters
    pub max_content_len: usize,
    pub max_recall_limit: usize,
    /// Characters of normalized structure kept as a pattern sample
    pub pattern_sample_len: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_content_len: 10_000,
            max_recall_limit: 100,
            pattern_sample_len: 500,
        }
    }
}

/// Top-level configuration for [`MemoryEngine`](crate::MemoryEngine).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub connector: ConnectorConfig,
    pub recall: RecallConfig,
    pub monitor: MonitorConfig,
    pub limits: LimitsConfig,
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> MemoryResult<Self> {
        let config: EngineConfig =
            toml::from_str(raw).map_err(|e| MemoryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file. A missing file yields the defaults.
    pub fn from_toml_file(path: &Path) -> MemoryResult<Self> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| MemoryError::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&raw)?;
        info!(path = %path.display(), "Loaded engine configuration");
        Ok(config)
    }

    /// Defaults overridden by `AMEM_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> MemoryResult<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `AMEM_*` environment overrides on top of `self` and revalidate.
    pub fn with_env_overrides(mut self) -> MemoryResult<Self> {
        let c = &mut self.connector;
        env_override("AMEM_FAILURE_THRESHOLD", &mut c.failure_threshold);
        env_override("AMEM_SUCCESS_THRESHOLD", &mut c.success_threshold);
        env_override("AMEM_OPEN_TIMEOUT_MS", &mut c.open_timeout_ms);
        env_override("AMEM_ATTEMPT_TIMEOUT_MS", &mut c.attempt_timeout_ms);
        env_override("AMEM_MAX_RETRIES", &mut c.max_retries);
        env_override("AMEM_HALF_LIFE_DAYS", &mut self.recall.half_life_days);
        env_override("AMEM_MAX_CONTENT_LEN", &mut self.limits.max_content_len);
        env_override("AMEM_MONITOR_WINDOW", &mut self.monitor.window);
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> MemoryResult<()> {
        let c = &self.connector;
        if c.failure_threshold == 0 || c.success_threshold == 0 {
            return Err(MemoryError::Config(
                "circuit thresholds must be at least 1".to_string(),
            ));
        }
        if c.attempt_timeout_ms == 0 {
            return Err(MemoryError::Config(
                "attempt_timeout_ms must be positive".to_string(),
            ));
        }
        if c.backoff_max_ms < c.backoff_base_ms {
            return Err(MemoryError::Config(
                "backoff_max_ms must not be below backoff_base_ms".to_string(),
            ));
        }

        let r = &self.recall;
        if !(r.half_life_days.is_finite() && r.half_life_days > 0.0) {
            return Err(MemoryError::Config(
                "half_life_days must be a positive number".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&r.recency_floor) {
            return Err(MemoryError::Config(
                "recency_floor must lie in [0, 1]".to_string(),
            ));
        }
        r.type_weights.validate()?;
        if r.page_size == 0 {
            return Err(MemoryError::Config("page_size must be positive".to_string()));
        }

        let m = &self.monitor;
        if m.window == 0 {
            return Err(MemoryError::Config("monitor window must be positive".to_string()));
        }
        if !(0.0 < m.degraded_failure_rate
            && m.degraded_failure_rate <= m.unhealthy_failure_rate
            && m.unhealthy_failure_rate <= 1.0)
        {
            return Err(MemoryError::Config(
                "failure-rate thresholds must satisfy 0 < degraded <= unhealthy <= 1".to_string(),
            ));
        }

        let l = &self.limits;
        if l.max_content_len == 0 || l.max_recall_limit == 0 {
            return Err(MemoryError::Config(
                "content and recall limits must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_override<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => warn!(key, value = %raw, "Ignoring unparseable environment override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.connector.failure_threshold, 5);
        assert_eq!(cfg.connector.success_threshold, 2);
        assert_eq!(cfg.connector.open_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.connector.attempt_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.connector.max_retries, 2);
        assert_eq!(cfg.recall.half_life_days, 90.0);
        assert_eq!(cfg.monitor.window, 1024);
        assert_eq!(cfg.limits.max_content_len, 10_000);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let cfg = ConnectorConfig::default();
        assert_eq!(cfg.backoff(1), Duration::from_millis(100));
        assert_eq!(cfg.backoff(2), Duration::from_millis(200));
        assert_eq!(cfg.backoff(3), Duration::from_millis(400));
        assert_eq!(cfg.backoff(6), Duration::from_millis(2_000));
        assert_eq!(cfg.backoff(60), Duration::from_millis(2_000));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg = EngineConfig::from_toml_str(
            r#"
            [connector]
            failure_threshold = 3

            [recall]
            half_life_days = 30.0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.connector.failure_threshold, 3);
        assert_eq!(cfg.connector.success_threshold, 2);
        assert_eq!(cfg.recall.half_life_days, 30.0);
        assert_eq!(cfg.limits, LimitsConfig::default());
    }

    #[test]
    fn test_invalid_toml_values_rejected() {
        let err = EngineConfig::from_toml_str("[connector]\nfailure_threshold = 0\n").unwrap_err();
        assert!(matches!(err, MemoryError::Config(_)));

        let err = EngineConfig::from_toml_str("[recall]\nrecency_floor = 1.5\n").unwrap_err();
        assert!(matches!(err, MemoryError::Config(_)));

        let err = EngineConfig::from_toml_str("not toml at all [").unwrap_err();
        assert!(matches!(err, MemoryError::Config(_)));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EngineConfig::from_toml_file(&dir.path().join("amem.toml")).unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn test_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("amem.toml");
        std::fs::write(&path, "[limits]\nmax_recall_limit = 20\n").unwrap();
        let cfg = EngineConfig::from_toml_file(&path).unwrap();
        assert_eq!(cfg.limits.max_recall_limit, 20);
    }
}
