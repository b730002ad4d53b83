//! Node Module
//!
//! Datanode descriptors, version normalization, and the sharded registry
//! that tracks capacity reports and heartbeat health.

pub mod descriptor;
pub mod events;
pub mod registry;

pub use descriptor::*;
pub use events::*;
pub use registry::*;
