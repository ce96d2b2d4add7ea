//! Standalone MySQL CDC replication engine.
//!
//! Connects to a MySQL primary, replicates its binlog, and delivers
//! decoded row-change events to webhook and database-log subscribers
//! registered through the Service Supervisor.

use async_trait::async_trait;
use canal_rs::{CanalConfig, EventLogSink, EventLogStatus, EventType, MetaStore, ServiceSupervisor, Task};
use std::env;
use std::sync::Arc;
use tracing::info;

/// Stand-in `EventLogSink` that just logs. A real deployment injects
/// its own implementation backed by whatever the operator's database
/// of record is.
struct LoggingEventLogSink;

#[async_trait]
impl EventLogSink for LoggingEventLogSink {
    async fn create_event_log(
        &self,
        task_id: u32,
        schema: &str,
        table: &str,
        event_type: EventType,
        data_json: &str,
        status: EventLogStatus,
        error_msg: Option<&str>,
    ) -> canal_rs::Result<()> {
        info!(task_id, schema, table, ?event_type, status = status.as_str(), error_msg, %data_json, "event log entry");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut config = CanalConfig::default();
    config.connection.host = env::var("CANAL_HOST").unwrap_or_else(|_| "localhost".to_string());
    config.connection.port = env::var("CANAL_PORT").unwrap_or_else(|_| "3306".to_string()).parse().unwrap_or(3306);
    config.connection.username = env::var("CANAL_USERNAME").unwrap_or_else(|_| "root".to_string());
    config.connection.password = env::var("CANAL_PASSWORD").unwrap_or_default();
    config.connection.server_id = env::var("CANAL_SERVER_ID").unwrap_or_else(|_| "1001".to_string()).parse().unwrap_or(1001);
    config.storage.database_storage_enabled = env::var("CANAL_DATABASE_STORAGE_ENABLED").map(|v| v == "true").unwrap_or(false);
    config.validate()?;

    let meta_store_path = env::var("CANAL_META_STORE_PATH").unwrap_or_else(|_| "canal-rs.sqlite".to_string());
    let meta_store = Arc::new(MetaStore::open(&meta_store_path)?);

    let supervisor = Arc::new(ServiceSupervisor::new(config, Arc::new(LoggingEventLogSink), meta_store));
    supervisor.spawn_background_jobs();

    let database = env::var("CANAL_WATCH_DATABASE").unwrap_or_else(|_| "test".to_string());
    let table = env::var("CANAL_WATCH_TABLE").unwrap_or_default();
    let callback_url = env::var("CANAL_CALLBACK_URL").unwrap_or_else(|_| "http://localhost:8080/webhook".to_string());

    let task = Task::new(1, "default", database, table, callback_url);
    supervisor.create_task(task).await?;

    info!("canal-rs started, replicating binlog");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    supervisor.stop_task(1).await?;

    Ok(())
}
