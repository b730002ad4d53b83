//! Replication Policy Types
//!
//! A replication config pairs a replication type with a copy count. Pipelines
//! and containers both carry one, and a container may only bind to a
//! pipeline with an equal config.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// =============================================================================
// Replication Type
// =============================================================================

/// Replication scheme of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationType {
    /// Single-writer, no consensus between members
    StandAlone,
    /// Consensus-replicated across all members
    Ratis,
}

impl std::fmt::Display for ReplicationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicationType::StandAlone => write!(f, "STAND_ALONE"),
            ReplicationType::Ratis => write!(f, "RATIS"),
        }
    }
}

impl FromStr for ReplicationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "STAND_ALONE" | "STANDALONE" => Ok(ReplicationType::StandAlone),
            "RATIS" => Ok(ReplicationType::Ratis),
            other => Err(Error::InvalidReplication(format!(
                "unknown replication type: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Replication Factor
// =============================================================================

/// Number of copies; always at least one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ReplicationFactor(u32);

impl ReplicationFactor {
    pub const ONE: ReplicationFactor = ReplicationFactor(1);
    pub const THREE: ReplicationFactor = ReplicationFactor(3);

    pub fn new(factor: u32) -> Result<Self> {
        if factor == 0 {
            return Err(Error::InvalidReplication(
                "replication factor must be at least 1".into(),
            ));
        }
        Ok(Self(factor))
    }

    #[inline]
    pub fn get(&self) -> u32 {
        self.0
    }

    /// Number of pipeline members this factor requires
    #[inline]
    pub fn node_count(&self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<u32> for ReplicationFactor {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ReplicationFactor> for u32 {
    fn from(factor: ReplicationFactor) -> Self {
        factor.0
    }
}

impl std::fmt::Display for ReplicationFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Replication Config
// =============================================================================

/// Replication type plus factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationConfig {
    pub replication_type: ReplicationType,
    pub factor: ReplicationFactor,
}

impl ReplicationConfig {
    pub fn new(replication_type: ReplicationType, factor: ReplicationFactor) -> Self {
        Self {
            replication_type,
            factor,
        }
    }

    /// Single-copy stand-alone replication
    pub fn stand_alone_one() -> Self {
        Self::new(ReplicationType::StandAlone, ReplicationFactor::ONE)
    }

    /// Three-way consensus replication
    pub fn ratis_three() -> Self {
        Self::new(ReplicationType::Ratis, ReplicationFactor::THREE)
    }
}

impl std::fmt::Display for ReplicationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.replication_type, self.factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_factor_rejected() {
        assert!(ReplicationFactor::new(0).is_err());
        assert_eq!(ReplicationFactor::new(3).unwrap(), ReplicationFactor::THREE);
    }

    #[test]
    fn test_replication_type_parse() {
        assert_eq!("stand_alone".parse::<ReplicationType>().unwrap(), ReplicationType::StandAlone);
        assert_eq!("STANDALONE".parse::<ReplicationType>().unwrap(), ReplicationType::StandAlone);
        assert_eq!("ratis".parse::<ReplicationType>().unwrap(), ReplicationType::Ratis);
        assert!("erasure".parse::<ReplicationType>().is_err());
    }

    #[test]
    fn test_factor_deserialize_rejects_zero() {
        let config: std::result::Result<ReplicationConfig, _> =
            serde_json::from_str(r#"{"replicationType":"RATIS","factor":0}"#);
        assert!(config.is_err());

        let config: ReplicationConfig =
            serde_json::from_str(r#"{"replicationType":"STAND_ALONE","factor":1}"#).unwrap();
        assert_eq!(config, ReplicationConfig::stand_alone_one());
        assert_eq!(config.to_string(), "STAND_ALONE/1");
    }
}
