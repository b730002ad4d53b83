//! Control Plane Metrics
//!
//! Prometheus metrics owned by the control plane. Counters move on each
//! operation; gauges are refreshed from the tables right before a scrape.

use crate::error::{Error, Result};
use crate::node::RegistryStats;
use crate::pipeline::PipelineStats;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Metrics for the storage container manager
pub struct ScmMetrics {
    registry: Registry,
    pub containers_created: IntCounter,
    pub placement_failures: IntCounter,
    pub pipelines_closed: IntCounter,
    pub nodes_total: IntGauge,
    pub nodes_online: IntGauge,
    pub pipelines_open: IntGauge,
    pub pipelines_created: IntGauge,
    pub containers_total: IntGauge,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let metric = IntCounter::new(name, help).map_err(metrics_error)?;
    registry.register(Box::new(metric.clone())).map_err(metrics_error)?;
    Ok(metric)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge> {
    let metric = IntGauge::new(name, help).map_err(metrics_error)?;
    registry.register(Box::new(metric.clone())).map_err(metrics_error)?;
    Ok(metric)
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}

impl ScmMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        Ok(Self {
            containers_created: counter(&registry, "scm_containers_created_total", "Containers allocated")?,
            placement_failures: counter(
                &registry,
                "scm_placement_failures_total",
                "Container allocations that found too few eligible datanodes",
            )?,
            pipelines_closed: counter(&registry, "scm_pipelines_closed_total", "Pipelines closed")?,
            nodes_total: gauge(&registry, "scm_datanodes", "Known datanodes")?,
            nodes_online: gauge(&registry, "scm_datanodes_online", "Datanodes with a fresh heartbeat")?,
            pipelines_open: gauge(&registry, "scm_pipelines_open", "Open pipelines")?,
            pipelines_created: gauge(&registry, "scm_pipelines_created", "Pipelines formed since start")?,
            containers_total: gauge(&registry, "scm_containers", "Known containers")?,
            registry,
        })
    }

    /// Refresh gauges from table snapshots
    pub fn refresh(&self, nodes: &RegistryStats, pipelines: &PipelineStats, containers: usize) {
        self.nodes_total.set(nodes.total_nodes as i64);
        self.nodes_online.set(nodes.online_nodes as i64);
        self.pipelines_open.set(pipelines.open as i64);
        self.pipelines_created.set(pipelines.created_total as i64);
        self.containers_total.set(containers as i64);
    }

    /// Text exposition format
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_metrics() {
        let metrics = ScmMetrics::new().unwrap();
        metrics.containers_created.inc();
        metrics.refresh(
            &RegistryStats {
                total_nodes: 3,
                online_nodes: 2,
                ..Default::default()
            },
            &PipelineStats::default(),
            1,
        );

        let (_, body) = metrics.encode().unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("scm_containers_created_total 1"));
        assert!(text.contains("scm_datanodes_online 2"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = ScmMetrics::new().unwrap();
        let b = ScmMetrics::new().unwrap();
        a.pipelines_closed.inc();
        assert_eq!(b.pipelines_closed.get(), 0);
    }
}
