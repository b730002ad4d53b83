//! Control Plane Configuration
//!
//! Loaded from YAML when a config file is given, otherwise defaults; CLI
//! flags in `main` override individual fields afterwards.

use crate::domain::replication::ReplicationConfig;
use crate::error::{Error, Result};
use crate::placement::PlacementPolicyKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for the storage container manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScmConfig {
    /// Containers an open pipeline hosts before a new pipeline is formed
    pub container_limit_per_pipeline: usize,
    /// Nodes above this used/capacity ratio are not picked for new pipelines
    pub max_utilization: f64,
    /// Node selection strategy
    pub placement: PlacementPolicyKind,
    /// Form baseline pipelines when the control plane starts
    pub create_pipelines_on_startup: bool,
    /// Replication configs formed at startup
    pub baseline_replication: Vec<ReplicationConfig>,
    /// Heartbeat age after which a datanode is considered offline
    pub stale_node_interval_secs: u64,
    /// How often the stale-node sweep runs
    pub sweep_interval_secs: u64,
}

impl Default for ScmConfig {
    fn default() -> Self {
        Self {
            container_limit_per_pipeline: 3,
            max_utilization: 0.95,
            placement: PlacementPolicyKind::Capacity,
            create_pipelines_on_startup: true,
            baseline_replication: vec![ReplicationConfig::stand_alone_one()],
            stale_node_interval_secs: 90,
            sweep_interval_secs: 30,
        }
    }
}

impl ScmConfig {
    /// Parse a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ScmConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Reject values the control plane cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.container_limit_per_pipeline == 0 {
            return Err(Error::Configuration(
                "containerLimitPerPipeline must be at least 1".into(),
            ));
        }
        if !(self.max_utilization > 0.0 && self.max_utilization <= 1.0) {
            return Err(Error::Configuration(format!(
                "maxUtilization must be in (0, 1], got {}",
                self.max_utilization
            )));
        }
        if self.stale_node_interval_secs == 0 || self.sweep_interval_secs == 0 {
            return Err(Error::Configuration(
                "stale node and sweep intervals must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::replication::{ReplicationFactor, ReplicationType};
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = ScmConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.placement, PlacementPolicyKind::Capacity);
        assert_eq!(config.baseline_replication, vec![ReplicationConfig::stand_alone_one()]);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = ScmConfig::from_yaml(
            r#"
containerLimitPerPipeline: 5
placement: rack_aware
baselineReplication:
  - replicationType: RATIS
    factor: 3
"#,
        )
        .unwrap();

        assert_eq!(config.container_limit_per_pipeline, 5);
        assert_eq!(config.placement, PlacementPolicyKind::RackAware);
        assert_eq!(
            config.baseline_replication,
            vec![ReplicationConfig::new(ReplicationType::Ratis, ReplicationFactor::THREE)]
        );
        assert_eq!(config.stale_node_interval_secs, 90);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ScmConfig::from_yaml("containerLimitPerPipeline: 0").is_err());
        assert!(ScmConfig::from_yaml("maxUtilization: 1.5").is_err());
        assert!(ScmConfig::from_yaml("baselineReplication: [{replicationType: RATIS, factor: 0}]").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "maxUtilization: 0.8").unwrap();

        let config = ScmConfig::from_file(file.path()).unwrap();
        assert!((config.max_utilization - 0.8).abs() < f64::EPSILON);
    }
}
