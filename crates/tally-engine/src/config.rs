//! # Ledger Configuration
//!
//! Thresholds and tuning for reconciliation, the resilience wrapper, the
//! Ledger Store connection and scheduled consistency scans.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     AUTO_CORRECT_LIMIT=100                                             │
//! │     CIRCUIT_BREAKER_THRESHOLD=5                                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tally/tally.toml (Linux)                                 │
//! │     ~/Library/Application Support/com.tally.ledger/tally.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # tally.toml
//! [reconciliation]
//! auto_correct_limit = 100   # minor units
//! tolerance_epsilon = 1      # minor units
//!
//! [resilience]
//! circuit_breaker_threshold = 5
//! circuit_breaker_reset_ms = 30000
//! retry_max_attempts = 3
//! retry_base_delay_ms = 1000
//!
//! [database]
//! path = "tally.db"
//!
//! [validation]
//! interval_secs = 3600
//! lookback_days = 1
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use tally_core::{Money, ReconciliationPolicy, DEFAULT_AUTO_CORRECT_LIMIT, DEFAULT_TOLERANCE_EPSILON};

// =============================================================================
// Reconciliation Settings
// =============================================================================

/// Discrepancy thresholds, in minor units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationSettings {
    /// Surpluses strictly below this are auto-corrected. At or below
    /// `tolerance_epsilon` it disables auto-correction, and every count
    /// outside ε is then CRITICAL.
    #[serde(default = "default_auto_correct_limit")]
    pub auto_correct_limit: i64,

    /// |discrepancy| below this is EXACT.
    #[serde(default = "default_tolerance_epsilon")]
    pub tolerance_epsilon: i64,
}

fn default_auto_correct_limit() -> i64 {
    DEFAULT_AUTO_CORRECT_LIMIT
}
fn default_tolerance_epsilon() -> i64 {
    DEFAULT_TOLERANCE_EPSILON
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        ReconciliationSettings {
            auto_correct_limit: default_auto_correct_limit(),
            tolerance_epsilon: default_tolerance_epsilon(),
        }
    }
}

// =============================================================================
// Resilience Settings
// =============================================================================

/// Circuit breaker, retry and telemetry tuning for Ledger Store calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceSettings {
    /// Consecutive failures before the breaker opens.
    #[serde(default = "default_breaker_threshold")]
    pub circuit_breaker_threshold: u32,

    /// Cooldown before a single half-open probe is allowed.
    #[serde(default = "default_breaker_reset")]
    pub circuit_breaker_reset_ms: u64,

    /// Total attempts for idempotent calls, the first one included.
    #[serde(default = "default_retry_attempts")]
    pub retry_max_attempts: u32,

    /// First backoff delay; doubles each retry.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,

    /// Upper bound on a single store call. Exceeding it is a failure.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,

    /// Ring buffer size for call samples.
    #[serde(default = "default_telemetry_window")]
    pub telemetry_window: usize,

    /// A call slower than this counts against SLA compliance.
    #[serde(default = "default_sla_latency")]
    pub sla_latency_ms: u64,

    /// Escalate when compliance (basis points) drops below this.
    #[serde(default = "default_sla_target")]
    pub sla_target_bps: u32,
}

fn default_breaker_threshold() -> u32 {
    5
}
fn default_breaker_reset() -> u64 {
    30_000
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_base_delay() -> u64 {
    1_000
}
fn default_retry_max_delay() -> u64 {
    30_000
}
fn default_call_timeout() -> u64 {
    5_000
}
fn default_telemetry_window() -> usize {
    256
}
fn default_sla_latency() -> u64 {
    500
}
fn default_sla_target() -> u32 {
    9_900
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        ResilienceSettings {
            circuit_breaker_threshold: default_breaker_threshold(),
            circuit_breaker_reset_ms: default_breaker_reset(),
            retry_max_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            call_timeout_ms: default_call_timeout(),
            telemetry_window: default_telemetry_window(),
            sla_latency_ms: default_sla_latency(),
            sla_target_bps: default_sla_target(),
        }
    }
}

impl ResilienceSettings {
    pub fn reset_after(&self) -> Duration {
        Duration::from_millis(self.circuit_breaker_reset_ms)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn sla_latency(&self) -> Duration {
        Duration::from_millis(self.sla_latency_ms)
    }
}

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file path. Relative paths resolve against the working directory.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("tally.db")
}
fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Validation Settings
// =============================================================================

/// Scheduled cross-source consistency scans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSettings {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Number of past business dates re-checked on each tick, today included.
    #[serde(default = "default_lookback")]
    pub lookback_days: u32,
}

fn default_interval() -> u64 {
    3_600
}
fn default_lookback() -> u32 {
    1
}

impl Default for ValidationSettings {
    fn default() -> Self {
        ValidationSettings {
            interval_secs: default_interval(),
            lookback_days: default_lookback(),
        }
    }
}

// =============================================================================
// Ledger Config
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub reconciliation: ReconciliationSettings,

    #[serde(default)]
    pub resilience: ResilienceSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub validation: ValidationSettings,
}

impl LedgerConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (tally.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading ledger config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load ledger config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> EngineResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| EngineError::Config("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Ledger config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        let rec = &self.reconciliation;
        if rec.tolerance_epsilon < 1 {
            return Err(EngineError::Config(
                "tolerance_epsilon must be at least 1 minor unit".into(),
            ));
        }
        if rec.auto_correct_limit < 0 {
            return Err(EngineError::Config(
                "auto_correct_limit must not be negative".into(),
            ));
        }

        let res = &self.resilience;
        if res.circuit_breaker_threshold == 0 {
            return Err(EngineError::Config(
                "circuit_breaker_threshold must be greater than 0".into(),
            ));
        }
        if res.retry_max_attempts == 0 {
            return Err(EngineError::Config(
                "retry_max_attempts must be greater than 0".into(),
            ));
        }
        if res.call_timeout_ms == 0 || res.telemetry_window == 0 {
            return Err(EngineError::Config(
                "call_timeout_ms and telemetry_window must be greater than 0".into(),
            ));
        }
        if res.sla_target_bps > 10_000 {
            return Err(EngineError::Config(
                "sla_target_bps must be at most 10000".into(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(EngineError::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.validation.interval_secs == 0 {
            return Err(EngineError::Config(
                "validation interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(limit) = env_parse("AUTO_CORRECT_LIMIT") {
            debug!(limit, "Overriding auto-correct limit from environment");
            self.reconciliation.auto_correct_limit = limit;
        }
        if let Some(epsilon) = env_parse("TOLERANCE_EPSILON") {
            self.reconciliation.tolerance_epsilon = epsilon;
        }

        if let Some(threshold) = env_parse("CIRCUIT_BREAKER_THRESHOLD") {
            self.resilience.circuit_breaker_threshold = threshold;
        }
        if let Some(reset) = env_parse("CIRCUIT_BREAKER_RESET_MS") {
            self.resilience.circuit_breaker_reset_ms = reset;
        }
        if let Some(attempts) = env_parse("RETRY_MAX_ATTEMPTS") {
            self.resilience.retry_max_attempts = attempts;
        }
        if let Some(delay) = env_parse("RETRY_BASE_DELAY_MS") {
            self.resilience.retry_base_delay_ms = delay;
        }
        if let Some(timeout) = env_parse("STORE_CALL_TIMEOUT_MS") {
            self.resilience.call_timeout_ms = timeout;
        }

        if let Ok(path) = std::env::var("TALLY_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tally", "ledger")
            .map(|dirs| dirs.config_dir().join("tally.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// The reconciliation policy these settings describe.
    pub fn policy(&self) -> ReconciliationPolicy {
        ReconciliationPolicy {
            tolerance_epsilon: Money::from_minor(self.reconciliation.tolerance_epsilon),
            auto_correct_limit: Money::from_minor(self.reconciliation.auto_correct_limit),
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LedgerConfig::default();
        assert_eq!(config.reconciliation.auto_correct_limit, 100);
        assert_eq!(config.reconciliation.tolerance_epsilon, 1);
        assert_eq!(config.resilience.circuit_breaker_threshold, 5);
        assert_eq!(config.resilience.circuit_breaker_reset_ms, 30_000);
        assert_eq!(config.resilience.retry_max_attempts, 3);
        assert_eq!(config.resilience.retry_base_delay_ms, 1_000);
        assert!(config.validate().is_ok());
        assert_eq!(config.policy(), ReconciliationPolicy::default());
    }

    #[test]
    fn test_config_validation() {
        let mut config = LedgerConfig::default();
        config.reconciliation.tolerance_epsilon = 0;
        assert!(config.validate().is_err());

        let mut config = LedgerConfig::default();
        config.resilience.circuit_breaker_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = LedgerConfig::default();
        config.resilience.retry_max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = LedgerConfig::default();
        config.reconciliation.auto_correct_limit = -1;
        assert!(config.validate().is_err());

        // Zero switches auto-correction off; EXACT counts stay quiet
        let mut config = LedgerConfig::default();
        config.reconciliation.auto_correct_limit = 0;
        assert!(config.validate().is_ok());
        let policy = config.policy();
        assert!(!policy.is_critical(Money::zero()));
        assert!(!policy.is_auto_correctable(Money::from_minor(50)));
        assert!(policy.is_critical(Money::from_minor(50)));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: LedgerConfig = toml::from_str(
            r#"
            [reconciliation]
            auto_correct_limit = 250

            [resilience]
            retry_max_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.reconciliation.auto_correct_limit, 250);
        assert_eq!(config.reconciliation.tolerance_epsilon, 1);
        assert_eq!(config.resilience.retry_max_attempts, 5);
        assert_eq!(config.resilience.circuit_breaker_threshold, 5);
        assert_eq!(config.validation.interval_secs, 3_600);
    }

    #[test]
    fn test_toml_serialization() {
        let config = LedgerConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[reconciliation]"));
        assert!(toml_str.contains("[resilience]"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("tally-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("tally.toml");

        let mut config = LedgerConfig::default();
        config.validation.lookback_days = 7;
        config.save(Some(path.clone())).unwrap();

        let loaded = LedgerConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.validation.lookback_days, 7);

        let _ = std::fs::remove_dir_all(dir);
    }
}
