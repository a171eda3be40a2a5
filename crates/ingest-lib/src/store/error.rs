//! Storage error taxonomy
//!
//! Flushes are fire-and-forget from the buffers' point of view, so the
//! only distinction that matters upstream is transient (retryable
//! connectivity/operational trouble) versus fatal (schema or programming
//! errors that will not heal on their own).

use thiserror::Error;

/// Errors surfaced by the storage gateway.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transient storage failure: {source}")]
    Transient {
        #[source]
        source: sqlx::Error,
    },

    #[error("storage failure: {source}")]
    Fatal {
        #[source]
        source: sqlx::Error,
    },

    #[error("invalid storage configuration: {reason}")]
    Config { reason: String },
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient { .. })
    }
}

/// MySQL error codes that indicate a retryable operational condition:
/// too many connections, lock wait timeout, deadlock, server gone away,
/// lost connection.
const TRANSIENT_MYSQL_CODES: &[&str] = &["1040", "1205", "1213", "2006", "2013"];

/// Sorts a driver error into the transient/fatal taxonomy.
pub(crate) fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Transient { source: err },
        sqlx::Error::Database(db) => {
            let transient = db
                .code()
                .map(|code| TRANSIENT_MYSQL_CODES.contains(&code.as_ref()))
                .unwrap_or(false);
            if transient {
                StoreError::Transient { source: err }
            } else {
                StoreError::Fatal { source: err }
            }
        }
        _ => StoreError::Fatal { source: err },
    }
}
