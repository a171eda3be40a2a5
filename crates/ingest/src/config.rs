//! Service configuration

use anyhow::{Context, Result};
use ingest_lib::pipeline::PipelineConfig;
use ingest_lib::store::MySqlStoreConfig;
use serde::Deserialize;
use std::time::Duration;

/// Ingest service configuration, read from `INGEST_`-prefixed environment
/// variables. The database parameters carry no defaults; a missing one
/// aborts startup.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Database host
    pub db_host: String,

    /// Database user
    pub db_user: String,

    /// Database password
    pub db_password: String,

    /// Database schema name
    pub db_name: String,

    /// Database port
    #[serde(default = "default_db_port")]
    pub db_port: u16,

    /// Upper bound on pooled database connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// HTTP listen port for /receive and the probe endpoints
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Width of one interval slot in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Slots kept beyond the newest to absorb late samples
    #[serde(default = "default_max_delay_slots")]
    pub max_delay_slots: usize,

    /// Hard cap on slots a sample may address past the watermark
    #[serde(default = "default_max_ahead_slots")]
    pub max_ahead_slots: usize,

    /// Rows per storage write statement
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Seconds between ownership flushes
    #[serde(default = "default_owner_flush_interval_secs")]
    pub owner_flush_interval_secs: u64,

    /// Oldest backlog in seconds the initial watermark may point at
    #[serde(default = "default_retention_floor_secs")]
    pub retention_floor_secs: u64,
}

fn default_db_port() -> u16 {
    3306
}

fn default_db_max_connections() -> u32 {
    32
}

fn default_listen_port() -> u16 {
    8080
}

fn default_interval_secs() -> u64 {
    60
}

fn default_max_delay_slots() -> usize {
    5
}

fn default_max_ahead_slots() -> usize {
    240
}

fn default_chunk_size() -> usize {
    5000
}

fn default_owner_flush_interval_secs() -> u64 {
    300
}

fn default_retention_floor_secs() -> u64 {
    3600
}

impl IngestConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("INGEST"))
            .build()
            .context("failed to read configuration sources")?;

        config.try_deserialize().context(
            "invalid or incomplete configuration \
             (INGEST_DB_HOST, INGEST_DB_USER, INGEST_DB_PASSWORD and INGEST_DB_NAME are required)",
        )
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            interval: Duration::from_secs(self.interval_secs),
            max_delay: self.max_delay_slots,
            max_ahead: self.max_ahead_slots,
            owner_flush_interval: Duration::from_secs(self.owner_flush_interval_secs),
            retention_floor: Duration::from_secs(self.retention_floor_secs),
        }
    }

    pub fn store_config(&self) -> MySqlStoreConfig {
        MySqlStoreConfig {
            host: self.db_host.clone(),
            port: self.db_port,
            user: self.db_user.clone(),
            password: self.db_password.clone(),
            database: self.db_name.clone(),
            max_connections: self.db_max_connections,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}
