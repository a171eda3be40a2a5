//! Ingest library for container resource metrics
//!
//! This crate provides the core functionality for:
//! - Label mapping of remote-write timeseries
//! - Watermarked interval batching with late-data tolerance
//! - CPU counter delta derivation with reset detection
//! - Time-flushed buffering of pod ownership metadata
//! - Chunked, failure-isolated persistence to MySQL
//! - Health checks and observability

pub mod buffer;
pub mod health;
pub mod labels;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod proto;
pub mod store;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::IngestMetrics;
