//! Placement Module
//!
//! Node selection for new pipelines: the pluggable policy trait and its
//! capacity-based and rack-aware implementations.

pub mod capacity;
pub mod policy;
pub mod rack_aware;

pub use capacity::*;
pub use policy::*;
pub use rack_aware::*;
