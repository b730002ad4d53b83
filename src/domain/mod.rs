//! Domain layer - Replication policy types and port definitions
//!
//! The port trait defines the boundary between the control plane core and
//! the transports that expose it.

pub mod ports;
pub mod replication;

pub use ports::*;
pub use replication::*;
