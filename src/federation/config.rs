//! Static configuration of the federation syncer.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::universe::ProofType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse syncer config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid syncer config: {0}")]
    Invalid(String),
}

/// Exponential backoff between two attempts of the same sync unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 60_000,
            multiplier: 2,
        }
    }
}

impl BackoffPolicy {
    /// Wait after the `attempt`-th failed attempt: `initial * multiplier^(attempt - 1)`,
    /// capped at `max_ms`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = u64::from(self.multiplier).checked_pow(exponent);
        let millis = factor
            .and_then(|factor| self.initial_ms.checked_mul(factor))
            .map_or(self.max_ms, |millis| millis.min(self.max_ms));
        Duration::from_millis(millis)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncerConfig {
    /// Bound on every call made to a peer.
    pub fetch_timeout_ms: u64,
    /// Attempts per sync unit before it stays FAILED.
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    /// Proof types synced by [`FederationSyncer::sync_all`](super::FederationSyncer::sync_all).
    pub proof_types: Vec<ProofType>,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 30_000,
            max_attempts: 5,
            backoff: BackoffPolicy::default(),
            proof_types: ProofType::ALL.to_vec(),
        }
    }
}

impl SyncerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_timeout_ms == 0 {
            return Err(ConfigError::Invalid("fetch_timeout_ms must be positive".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be positive".into()));
        }
        if self.backoff.multiplier == 0 {
            return Err(ConfigError::Invalid("backoff multiplier must be positive".into()));
        }
        if self.backoff.initial_ms > self.backoff.max_ms {
            return Err(ConfigError::Invalid(format!(
                "backoff initial_ms {} exceeds max_ms {}",
                self.backoff.initial_ms, self.backoff.max_ms
            )));
        }
        if self.proof_types.is_empty() {
            return Err(ConfigError::Invalid("no proof type to sync".into()));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::{BackoffPolicy, ConfigError, SyncerConfig};
    use crate::universe::ProofType;

    #[test]
    fn test_backoff_grows_and_caps() {
        let backoff = BackoffPolicy::default();
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(4), Duration::from_secs(8));
        assert_eq!(backoff.delay(7), Duration::from_secs(60));
        assert_eq!(backoff.delay(200), Duration::from_secs(60));
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = SyncerConfig::from_json(r#"{"max_attempts": 3, "backoff": {"initial_ms": 10}}"#)
            .unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.fetch_timeout(), Duration::from_secs(30));
        assert_eq!(config.backoff.initial_ms, 10);
        assert_eq!(config.backoff.max_ms, 60_000);
        assert_eq!(config.proof_types, ProofType::ALL.to_vec());
    }

    #[test]
    fn test_proof_types_parse() {
        let config = SyncerConfig::from_json(r#"{"proof_types": ["transfer"]}"#).unwrap();
        assert_eq!(config.proof_types, vec![ProofType::Transfer]);
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        assert!(matches!(
            SyncerConfig::from_json(r#"{"max_attempts": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SyncerConfig::from_json(r#"{"backoff": {"initial_ms": 5000, "max_ms": 10}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SyncerConfig::from_json(r#"{"proof_types": ["minting"]}"#),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            SyncerConfig::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
