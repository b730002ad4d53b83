//! Control Plane Module
//!
//! The storage container manager facade, its metrics and the REST API
//! that exposes it.

pub mod api;
pub mod metrics;
pub mod scm;

pub use api::*;
pub use metrics::*;
pub use scm::*;
