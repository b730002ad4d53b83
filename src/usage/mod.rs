//! Usage Module
//!
//! Per-datanode container counts and space usage.

pub mod tracker;

pub use tracker::*;
