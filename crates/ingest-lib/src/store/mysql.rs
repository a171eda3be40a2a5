//! MySQL-backed storage gateway
//!
//! Connection-pooled access with bounded concurrency: pool exhaustion
//! blocks the caller until a connection frees up or the acquire timeout
//! fires, which is the service's only backpressure toward the database.
//! Row sets are written as multi-row statements in `chunk_size` chunks.

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::{MySql, QueryBuilder};
use std::time::Duration;
use tracing::{debug, info};

use super::error::{classify, StoreError};
use super::Store;
use crate::models::{MetricRow, OwnerRow};

/// Connection settings for the MySQL gateway.
#[derive(Debug, Clone)]
pub struct MySqlStoreConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

/// Pooled MySQL store for interval rows and ownership metadata.
pub struct MySqlStore {
    pool: MySqlPool,
    chunk_size: usize,
}

impl MySqlStore {
    pub async fn connect(cfg: &MySqlStoreConfig, chunk_size: usize) -> Result<Self, StoreError> {
        if chunk_size == 0 {
            return Err(StoreError::Config {
                reason: "chunk size must be positive".to_string(),
            });
        }

        let options = MySqlConnectOptions::new()
            .host(&cfg.host)
            .port(cfg.port)
            .username(&cfg.user)
            .password(&cfg.password)
            .database(&cfg.database);

        let pool = MySqlPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(cfg.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(classify)?;

        info!(host = %cfg.host, database = %cfg.database, "Connected to metrics store");

        Ok(Self { pool, chunk_size })
    }
}

#[async_trait]
impl Store for MySqlStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS container_metrics (
                time TIMESTAMP,
                environment VARCHAR(255),
                pod VARCHAR(255),
                container VARCHAR(255),
                cpu_usage DOUBLE,
                cpu_limit DOUBLE,
                memory_usage DOUBLE,
                memory_limit DOUBLE,
                PRIMARY KEY (time, environment, pod, container)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pod_owners (
                environment VARCHAR(255),
                pod VARCHAR(255),
                owner VARCHAR(255),
                PRIMARY KEY (environment, pod)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        info!("Database schema is in place");
        Ok(())
    }

    async fn upsert_metrics(&self, rows: &[MetricRow]) -> Result<u64, StoreError> {
        let mut written = 0u64;

        for chunk in rows.chunks(self.chunk_size) {
            let mut builder: QueryBuilder<MySql> = QueryBuilder::new(
                "INSERT INTO container_metrics \
                 (time, environment, pod, container, cpu_usage, cpu_limit, memory_usage, memory_limit) ",
            );
            builder.push_values(chunk, |mut values, row| {
                values
                    .push_bind(row.time)
                    .push_bind(&row.environment)
                    .push_bind(&row.pod)
                    .push_bind(&row.container)
                    .push_bind(row.cpu_usage)
                    .push_bind(row.cpu_limit)
                    .push_bind(row.memory_usage)
                    .push_bind(row.memory_limit);
            });
            // Merge semantics: the same interval can flush again when a
            // later chunk overlaps it; a NULL must never wipe a value
            // written earlier.
            builder.push(
                " ON DUPLICATE KEY UPDATE \
                 cpu_usage = IFNULL(VALUES(cpu_usage), cpu_usage), \
                 cpu_limit = IFNULL(VALUES(cpu_limit), cpu_limit), \
                 memory_usage = IFNULL(VALUES(memory_usage), memory_usage), \
                 memory_limit = IFNULL(VALUES(memory_limit), memory_limit)",
            );

            builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(classify)?;

            written += chunk.len() as u64;
            debug!(rows = chunk.len(), "Metric chunk written");
        }

        Ok(written)
    }

    async fn insert_owners(&self, rows: &[OwnerRow]) -> Result<u64, StoreError> {
        let mut written = 0u64;

        for chunk in rows.chunks(self.chunk_size) {
            let mut builder: QueryBuilder<MySql> =
                QueryBuilder::new("INSERT IGNORE INTO pod_owners (environment, pod, owner) ");
            builder.push_values(chunk, |mut values, row| {
                values
                    .push_bind(&row.environment)
                    .push_bind(&row.pod)
                    .push_bind(&row.owner);
            });

            builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(classify)?;

            written += chunk.len() as u64;
            debug!(rows = chunk.len(), "Owner chunk written");
        }

        Ok(written)
    }
}
