//! Engine configuration
//!
//! Plain settings with sensible defaults, optionally loaded from a JSON file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default time an `Open` proposal may wait for signatures (one day)
pub const DEFAULT_PROPOSAL_TTL_SECS: u64 = 86_400;

/// Longest accepted proposal TTL (about a century)
pub const MAX_PROPOSAL_TTL_SECS: u64 = 100 * 365 * 86_400;

/// Default deadline for a single backend or chain call
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

/// Default interval between confirmation polls
pub const DEFAULT_CONFIRMATION_POLL_MS: u64 = 1_000;

/// Default deadline for an origination to confirm
pub const DEFAULT_CONFIRMATION_TIMEOUT_MS: u64 = 120_000;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds an `Open` proposal stays eligible for signatures
    pub proposal_ttl_secs: u64,
    /// Deadline for each backend/chain call, in milliseconds
    pub call_timeout_ms: u64,
    /// Interval between confirmation polls, in milliseconds
    pub confirmation_poll_ms: u64,
    /// Deadline for an operation to confirm, in milliseconds
    pub confirmation_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            proposal_ttl_secs: DEFAULT_PROPOSAL_TTL_SECS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            confirmation_poll_ms: DEFAULT_CONFIRMATION_POLL_MS,
            confirmation_timeout_ms: DEFAULT_CONFIRMATION_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file; missing keys take their defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = fs::File::open(path)?;
        let config: EngineConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.proposal_ttl_secs > MAX_PROPOSAL_TTL_SECS {
            return Err(ConfigError::Invalid(format!(
                "proposal_ttl_secs {} exceeds {}",
                self.proposal_ttl_secs, MAX_PROPOSAL_TTL_SECS
            )));
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "call_timeout_ms must be at least 1".to_string(),
            ));
        }
        if self.confirmation_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "confirmation_poll_ms must be at least 1".to_string(),
            ));
        }
        if self.confirmation_timeout_ms < self.confirmation_poll_ms {
            return Err(ConfigError::Invalid(format!(
                "confirmation_timeout_ms {} is shorter than confirmation_poll_ms {}",
                self.confirmation_timeout_ms, self.confirmation_poll_ms
            )));
        }
        Ok(())
    }

    /// Proposal TTL, capped at [`MAX_PROPOSAL_TTL_SECS`]
    pub fn proposal_ttl(&self) -> chrono::Duration {
        let secs = self.proposal_ttl_secs.min(MAX_PROPOSAL_TTL_SECS);
        chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn confirmation_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirmation_poll_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.proposal_ttl(), chrono::Duration::days(1));
        assert_eq!(config.call_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_partial_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("engine.json");
        let mut file = fs::File::create(&path).unwrap();
        write!(file, r#"{{ "proposal_ttl_secs": 60, "call_timeout_ms": 500 }}"#).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.proposal_ttl_secs, 60);
        assert_eq!(config.call_timeout_ms, 500);
        assert_eq!(config.confirmation_poll_ms, DEFAULT_CONFIRMATION_POLL_MS);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let config = EngineConfig {
            call_timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = EngineConfig {
            confirmation_poll_ms: 5_000,
            confirmation_timeout_ms: 1_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_ttl_rejected() {
        let config = EngineConfig {
            proposal_ttl_secs: u64::MAX,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        // Still usable without panicking if validation was skipped
        assert_eq!(
            config.proposal_ttl(),
            chrono::Duration::seconds(MAX_PROPOSAL_TTL_SECS as i64)
        );

        let config = EngineConfig {
            proposal_ttl_secs: MAX_PROPOSAL_TTL_SECS,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_malformed_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("engine.json");
        fs::write(&path, "not json").unwrap();

        assert!(matches!(
            EngineConfig::from_file(&path),
            Err(ConfigError::ParseError(_))
        ));
    }
}
