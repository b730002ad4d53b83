//! Storage Container Manager - Control Plane
//!
//! Tracks datanodes, groups them into replication pipelines and allocates
//! containers onto those pipelines for a distributed object store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                      REST API (axum)  /  ContainerLocationProtocol          │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                       ControlPlane (facade + metrics)                       │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │    Container    │  │    Pipeline     │  │        Usage                │  │
//! │  │    Manager      │──│    Manager      │  │        Tracker              │  │
//! │  └─────────────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │                                │                         │                  │
//! │                     ┌──────────┴──────────┐              │                  │
//! │                     │  Placement Policy   │              │                  │
//! │                     │ (capacity / rack)   │              │                  │
//! │                     └──────────┬──────────┘              │                  │
//! │                                │                         │                  │
//! │                    ┌───────────┴─────────────────────────┴─┐                │
//! │                    │  Node Registry (64-way sharded)       │                │
//! │                    │  heartbeats, normalization, events    │                │
//! │                    └───────────────────────────────────────┘                │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: Facade, metrics and REST API
//! - [`node`]: Datanode descriptors and the node registry
//! - [`placement`]: Node selection policies
//! - [`pipeline`]: Pipeline lifecycle
//! - [`container`]: Container allocation
//! - [`usage`]: Per-datanode usage queries
//! - [`domain`]: Replication types and the protocol port
//! - [`config`]: Control plane configuration
//! - [`error`]: Error types and handling

pub mod config;
pub mod container;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod node;
pub mod pipeline;
pub mod placement;
pub mod usage;

// Re-export commonly used types
pub use config::ScmConfig;

pub use container::{Container, ContainerId, ContainerManager, ContainerState};

pub use controlplane::{
    ApiServer, ApiServerConfig, ControlPlane, ControlPlaneStatus, RestRouter, ScmMetrics,
};

pub use domain::ports::{
    ContainerDescriptor, ContainerLocationProtocol, NodeDescriptor, PipelineDescriptor,
    UsageDescriptor,
};
pub use domain::replication::{ReplicationConfig, ReplicationFactor, ReplicationType};

pub use error::{Error, ErrorAction, Result};

pub use node::{Node, NodeId, NodeRegistry, NodeReport, Port, PortName, RegistryEvent, RegistryStats};

pub use pipeline::{Pipeline, PipelineId, PipelineManager, PipelineState, PipelineStats};

pub use placement::{CapacityPlacement, PlacementPolicy, PlacementPolicyKind, RackAwarePlacement};

pub use usage::{UsageInfo, UsageTracker};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
