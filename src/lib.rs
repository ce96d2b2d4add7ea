//! MySQL binlog CDC replication engine.
//!
//! Impersonates a MySQL replica, streams the primary's binlog, decodes
//! row-change events, and delivers them to subscribers (HTTP webhooks,
//! a local event log) with durable position tracking for resumable,
//! at-least-once delivery.

pub mod auth;
pub mod binlog_client;
pub mod canal_instance;
pub mod config;
pub mod connection;
pub mod database_handler;
pub mod decode;
pub mod error;
pub mod event_sink;
pub mod events;
pub mod gtid;
pub mod handler;
pub mod meta_store;
pub mod position;
pub mod protocol;
pub mod supervisor;
pub mod table_map;
pub mod task;
pub mod webhook_handler;

pub use binlog_client::BinlogClient;
pub use canal_instance::CanalInstance;
pub use config::CanalConfig;
pub use connection::ConnectionConfig;
pub use database_handler::{DatabaseHandler, EventLogSink, EventLogStatus};
pub use error::{CdcError, Result};
pub use event_sink::EventSink;
pub use events::{CellValue, Column, Event, EventType, RowData, TableMeta};
pub use gtid::GtidSet;
pub use handler::EventHandler;
pub use meta_store::MetaStore;
pub use position::Position;
pub use supervisor::ServiceSupervisor;
pub use task::Task;
pub use webhook_handler::{WebhookConfig, WebhookHandler};
