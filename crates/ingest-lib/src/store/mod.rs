//! Storage gateway for interval rows and ownership metadata
//!
//! The pipeline talks to storage through the `Store` trait; the MySQL
//! implementation lives in `mysql.rs`, and tests substitute in-memory
//! fakes. All writes are upserts keyed on the tables' primary keys, so
//! overlapping flushes after a partial failure merge instead of
//! duplicating.

mod error;
mod mysql;

pub use error::StoreError;
pub use mysql::{MySqlStore, MySqlStoreConfig};

use async_trait::async_trait;

use crate::models::{MetricRow, OwnerRow};

/// Relational store consumed by the persistence pipeline.
#[async_trait]
pub trait Store: Send + Sync {
    /// Creates the backing tables when missing.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Writes metric rows, merging the metric columns on primary-key
    /// conflict. Returns the number of rows submitted.
    async fn upsert_metrics(&self, rows: &[MetricRow]) -> Result<u64, StoreError>;

    /// Writes ownership rows, ignoring primary-key conflicts. Returns the
    /// number of rows submitted.
    async fn insert_owners(&self, rows: &[OwnerRow]) -> Result<u64, StoreError>;
}
