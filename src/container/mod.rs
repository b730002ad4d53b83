//! Container Module
//!
//! Replicated storage units and their binding to pipelines.

pub mod manager;
pub mod types;

pub use manager::*;
pub use types::*;
