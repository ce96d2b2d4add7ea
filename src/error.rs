//! CDC error taxonomy.
//!
//! Each variant corresponds to one of the failure classes in the design:
//! config errors are fatal to instance start, transport errors drive the
//! reconnect policy, protocol/decode errors are per-event and logged, and
//! so on. See `canal_instance` for how these are turned into retries,
//! reconnects, or a terminal `Failed` status.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CdcError {
    /// Bad credentials, missing required field — fatal to instance start.
    #[error("config error: {0}")]
    Config(String),

    /// Connect/read/write on the replication socket — triggers reconnect.
    #[error("transport error: {0}")]
    Transport(String),

    /// Framing inconsistency, checksum mismatch, unknown event body.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A single row in a RowsEvent could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Event Sink `send` timed out with the queue full.
    #[error("backpressure: sink send timed out after {0:?}")]
    Backpressure(std::time::Duration),

    /// Webhook/database handler failure, isolated to that handler.
    #[error("handler error: {0}")]
    Handler(String),

    /// Meta Store read/write failure.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("timeout")]
    Timeout,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CdcError>;
