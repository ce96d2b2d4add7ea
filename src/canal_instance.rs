//! Per-task lifecycle: owns a Binlog Client and an Event Sink, pumps
//! decoded rows from one to the other, and checkpoints progress to the
//! Meta Store on an interval.

use crate::binlog_client::{BinlogClient, DecodedEvent};
use crate::config::ReconnectSettings;
use crate::connection::{ConnectionConfig, MySqlConnection};
use crate::error::{CdcError, Result};
use crate::event_sink::EventSink;
use crate::events::TableMeta;
use crate::handler::EventHandler;
use crate::meta_store::MetaStore;
use crate::position::Position;
use crate::task::Task;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const CHECKPOINT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10);
const MAX_SEND_RETRIES: u32 = 3;
/// Consecutive checkpoint failures after which an instance is reported
/// `degraded` (spec: ">10 consecutive"), while it keeps delivering events
/// off its in-memory position.
const CHECKPOINT_DEGRADED_THRESHOLD: u32 = 10;

#[derive(Debug, Clone)]
pub struct InstanceStatus {
    pub running: bool,
    pub position: Position,
    pub last_event_time: Option<DateTime<Utc>>,
    pub error_msg: Option<String>,
    /// True once checkpoint persistence has failed more than
    /// `CHECKPOINT_DEGRADED_THRESHOLD` times in a row.
    pub degraded: bool,
}

struct Shared {
    position: RwLock<Position>,
    last_event_time: RwLock<Option<DateTime<Utc>>>,
    error_msg: RwLock<Option<String>>,
    watch: RwLock<HashSet<(String, String)>>,
    running: AtomicBool,
    stop_notify: Notify,
    /// Set alongside `stop_notify`; checked inside loops that may be
    /// mid-iteration (not parked on `.notified()`) when `stop()` runs, since
    /// `Notify::notify_waiters` only wakes tasks already waiting and does
    /// not buffer a permit.
    stop_requested: AtomicBool,
    checkpoint_failures: AtomicU32,
    degraded: AtomicBool,
}

/// Resolves real column names for `(schema, table)`: the Meta Store cache
/// first, falling back to an admin `INFORMATION_SCHEMA` query (cached back
/// into the Meta Store on success). Returns `None` on any failure, in which
/// case `TableMeta` falls back to its own `col_N` placeholders.
async fn resolve_column_names(
    meta_store: &MetaStore,
    connection_config: &ConnectionConfig,
    schema: &str,
    table: &str,
) -> Option<Vec<String>> {
    if schema.is_empty() || table.is_empty() {
        return None;
    }
    if let Ok(Some(meta)) = meta_store.load_table_meta(schema, table).await {
        return Some(meta.columns);
    }

    let mut conn = match MySqlConnection::connect(connection_config.clone()).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(error = %e, schema, table, "failed to open admin connection for schema resolution");
            return None;
        }
    };

    match conn.get_table_schema(schema, table).await {
        Ok(columns) if !columns.is_empty() => {
            let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
            let types: Vec<String> = columns.iter().map(|c| c.column_type.clone()).collect();
            let meta = TableMeta {
                schema: schema.to_string(),
                table: table.to_string(),
                columns: names.clone(),
                types,
            };
            if let Err(e) = meta_store.save_table_meta(schema, table, meta).await {
                warn!(error = %e, "failed to cache resolved table schema");
            }
            Some(names)
        }
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, schema, table, "failed to resolve table schema, column names will use placeholders");
            None
        }
    }
}

/// Couples one Task's Binlog Client, Event Sink, and the watch filter
/// derived from it. One instance runs at most one pump at a time.
pub struct CanalInstance {
    task: Task,
    connection_config: ConnectionConfig,
    meta_store: Arc<MetaStore>,
    reconnect: ReconnectSettings,
    gtid_enabled: bool,
    sink: Arc<AsyncMutex<EventSink>>,
    shared: Arc<Shared>,
    pump_handle: Option<JoinHandle<()>>,
    checkpoint_handle: Option<JoinHandle<()>>,
}

impl CanalInstance {
    pub fn new(
        task: Task,
        connection_config: ConnectionConfig,
        meta_store: Arc<MetaStore>,
        reconnect: ReconnectSettings,
        gtid_enabled: bool,
    ) -> Self {
        let watch = HashSet::from([(task.database.clone(), task.table.clone())]);
        CanalInstance {
            task,
            connection_config,
            meta_store,
            reconnect,
            gtid_enabled,
            sink: Arc::new(AsyncMutex::new(EventSink::new())),
            shared: Arc::new(Shared {
                position: RwLock::new(Position::initial()),
                last_event_time: RwLock::new(None),
                error_msg: RwLock::new(None),
                watch: RwLock::new(watch),
                running: AtomicBool::new(false),
                stop_notify: Notify::new(),
                stop_requested: AtomicBool::new(false),
                checkpoint_failures: AtomicU32::new(0),
                degraded: AtomicBool::new(false),
            }),
            pump_handle: None,
            checkpoint_handle: None,
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub async fn subscribe(&self, schema: &str, table: &str, handler: Arc<dyn EventHandler>) {
        self.shared.watch.write().insert((schema.to_string(), table.to_string()));
        self.sink.lock().await.subscribe(schema, table, handler);
    }

    pub async fn unsubscribe(&self, schema: &str, table: &str, handler_name: &str) {
        self.sink.lock().await.unsubscribe(schema, table, handler_name);
    }

    pub fn status(&self) -> InstanceStatus {
        InstanceStatus {
            running: self.shared.running.load(Ordering::Relaxed),
            position: self.shared.position.read().clone(),
            last_event_time: *self.shared.last_event_time.read(),
            error_msg: self.shared.error_msg.read().clone(),
            degraded: self.shared.degraded.load(Ordering::Relaxed),
        }
    }

    /// Loads the last checkpoint, starts the Event Sink and Binlog
    /// Client, then spawns the pump and checkpoint tasks.
    pub async fn start(&mut self) -> Result<()> {
        let instance_id = self.task.instance_id();
        let position = self.meta_store.load_position(&instance_id).await?;
        *self.shared.position.write() = position.clone();

        let watch = self.shared.watch.read().clone();
        let mut client = BinlogClient::new(self.connection_config.clone(), position, Some(watch.clone()), self.gtid_enabled);
        for (schema, table) in watch.iter() {
            if let Some(columns) = resolve_column_names(&self.meta_store, &self.connection_config, schema, table).await {
                client.set_column_names(schema, table, columns);
            }
        }
        client.start().await?;

        self.sink.lock().await.start();
        self.shared.running.store(true, Ordering::Relaxed);
        self.shared.stop_requested.store(false, Ordering::Relaxed);
        *self.shared.error_msg.write() = None;

        self.pump_handle = Some(self.spawn_pump(client));
        self.checkpoint_handle = Some(self.spawn_checkpoint(instance_id));
        Ok(())
    }

    fn spawn_pump(&self, mut client: BinlogClient) -> JoinHandle<()> {
        let shared = self.shared.clone();
        let sink = self.sink.clone();
        let event_types = self.task.event_types.clone();
        let connection_config = self.connection_config.clone();
        let reconnect = self.reconnect.clone();
        let meta_store = self.meta_store.clone();
        let gtid_enabled = self.gtid_enabled;

        tokio::spawn(async move {
            let mut attempts = 0u32;
            loop {
                if shared.stop_requested.load(Ordering::Relaxed) {
                    break;
                }
                let next = tokio::select! {
                    _ = shared.stop_notify.notified() => break,
                    result = client.next_event() => result,
                };

                match next {
                    Ok(Some(DecodedEvent::Rows(events))) => {
                        for event in events {
                            if shared.stop_requested.load(Ordering::Relaxed) {
                                break;
                            }
                            if !event_types.contains(&event.event_type) {
                                continue;
                            }
                            if !Self::deliver_with_retry(&sink, event).await {
                                *shared.error_msg.write() = Some("sink backpressure exceeded retry budget".into());
                                shared.running.store(false, Ordering::Relaxed);
                                return;
                            }
                        }
                        *shared.position.write() = client.position();
                        *shared.last_event_time.write() = Some(Utc::now());
                        attempts = 0;
                    }
                    Ok(Some(_other)) => {
                        *shared.position.write() = client.position();
                    }
                    Ok(None) => {
                        info!("binlog client stream ended");
                        break;
                    }
                    Err(e) => {
                        attempts += 1;
                        warn!(error = %e, attempt = attempts, "binlog stream error, reconnecting");
                        if attempts > reconnect.max_attempts {
                            error!("exceeded max reconnect attempts, marking instance failed");
                            *shared.error_msg.write() = Some(e.to_string());
                            shared.running.store(false, Ordering::Relaxed);
                            return;
                        }
                        tokio::select! {
                            _ = shared.stop_notify.notified() => break,
                            _ = tokio::time::sleep(reconnect.interval) => {},
                        }
                        if shared.stop_requested.load(Ordering::Relaxed) {
                            break;
                        }
                        let resume_from = shared.position.read().clone();
                        let watch = shared.watch.read().clone();
                        client = BinlogClient::new(connection_config.clone(), resume_from, Some(watch.clone()), gtid_enabled);
                        for (schema, table) in watch.iter() {
                            if let Some(columns) = resolve_column_names(&meta_store, &connection_config, schema, table).await {
                                client.set_column_names(schema, table, columns);
                            }
                        }
                        if let Err(e) = client.start().await {
                            warn!(error = %e, "reconnect attempt failed");
                        }
                    }
                }
            }
            shared.running.store(false, Ordering::Relaxed);
        })
    }

    async fn deliver_with_retry(sink: &Arc<AsyncMutex<EventSink>>, event: crate::events::Event) -> bool {
        for attempt in 0..=MAX_SEND_RETRIES {
            let result = sink.lock().await.send(event.clone()).await;
            match result {
                Ok(()) => return true,
                Err(CdcError::Backpressure(_)) if attempt < MAX_SEND_RETRIES => continue,
                Err(e) => {
                    warn!(error = %e, "event sink rejected delivery");
                    return false;
                }
            }
        }
        false
    }

    fn spawn_checkpoint(&self, instance_id: String) -> JoinHandle<()> {
        let shared = self.shared.clone();
        let meta_store = self.meta_store.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CHECKPOINT_INTERVAL);
            loop {
                if shared.stop_requested.load(Ordering::Relaxed) {
                    break;
                }
                tokio::select! {
                    _ = shared.stop_notify.notified() => break,
                    _ = interval.tick() => {
                        let position = shared.position.read().clone();
                        match meta_store.save_position(&instance_id, position).await {
                            Ok(()) => {
                                shared.checkpoint_failures.store(0, Ordering::Relaxed);
                                shared.degraded.store(false, Ordering::Relaxed);
                            }
                            Err(e) => {
                                let failures = shared.checkpoint_failures.fetch_add(1, Ordering::Relaxed) + 1;
                                warn!(error = %e, failures, "checkpoint save failed, continuing with in-memory position");
                                if failures > CHECKPOINT_DEGRADED_THRESHOLD {
                                    shared.degraded.store(true, Ordering::Relaxed);
                                }
                            }
                        }
                    }
                }
            }
            // final flush before exit
            let position = shared.position.read().clone();
            if let Err(e) = meta_store.save_position(&instance_id, position).await {
                error!(error = %e, "final checkpoint flush failed");
            }
        })
    }

    /// Stops the pump and checkpoint tasks (the checkpoint task performs
    /// one final flush before exiting), then stops the Event Sink.
    ///
    /// `stop_notify.notify_waiters()` only wakes tasks already parked on
    /// `.notified()`; a pump mid-iteration of its inner per-row delivery
    /// loop would miss it. `stop_requested` is checked every loop
    /// iteration in both tasks so cancellation is bounded even then.
    pub async fn stop(&mut self) {
        self.shared.stop_requested.store(true, Ordering::Relaxed);
        self.shared.stop_notify.notify_waiters();
        self.shared.running.store(false, Ordering::Relaxed);

        if let Some(handle) = self.pump_handle.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.checkpoint_handle.take() {
            let _ = handle.await;
        }

        self.sink.lock().await.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectSettings;
    use crate::task::Task;

    fn sample_task() -> Task {
        Task::new(1, "t1", "test", "users", "http://example.invalid/hook")
    }

    #[test]
    fn new_instance_starts_not_running() {
        let store = Arc::new(MetaStore::open_in_memory().unwrap());
        let instance = CanalInstance::new(sample_task(), ConnectionConfig::default(), store, ReconnectSettings::default(), false);
        let status = instance.status();
        assert!(!status.running);
        assert!(status.error_msg.is_none());
        assert!(!status.degraded);
    }

    #[test]
    fn watch_filter_seeded_from_task() {
        let store = Arc::new(MetaStore::open_in_memory().unwrap());
        let instance = CanalInstance::new(sample_task(), ConnectionConfig::default(), store, ReconnectSettings::default(), false);
        assert!(instance.shared.watch.read().contains(&("test".to_string(), "users".to_string())));
    }
}
