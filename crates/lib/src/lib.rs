//! brick-lib: build orchestration core for brick
//!
//! This crate decides what to build, in which order, and whether earlier
//! results can be reused:
//! - `BuildGraph`: targets, effective dependency edges and controlled runtime
//!   growth
//! - `Scheduler`: readiness-driven dispatch onto a bounded worker pool
//! - `Cache`: content-addressed artifacts keyed by Merkle fingerprints
//! - `BuildExecutor`: isolated execution of build actions
//! - `Reporter`: delivery of build events to observers such as `BuildMetrics`

pub mod cache;
pub mod config;
pub mod consts;
pub mod events;
pub mod execute;
pub mod graph;
pub mod hooks;
pub mod label;
pub mod manifest;
pub mod metrics;
pub mod platform;
pub mod schedule;
pub mod target;
pub mod util;
