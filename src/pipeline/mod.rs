//! Pipeline Module
//!
//! Replication groups of datanodes and the manager that forms, reuses and
//! closes them.

pub mod manager;
pub mod types;

pub use manager::*;
pub use types::*;
