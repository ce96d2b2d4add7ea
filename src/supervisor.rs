//! Maintains the `task.id -> Canal Instance` map: creates, updates,
//! stops, and deletes instances, and runs the periodic health-check and
//! Meta Store cleanup sweeps.

use crate::canal_instance::{CanalInstance, InstanceStatus};
use crate::config::{CanalConfig, ReconnectSettings};
use crate::connection::ConnectionConfig;
use crate::database_handler::{DatabaseHandler, EventLogSink};
use crate::error::Result;
use crate::meta_store::MetaStore;
use crate::task::Task;
use crate::webhook_handler::{WebhookConfig, WebhookHandler};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

const HEALTH_CHECK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
const STALE_THRESHOLD: chrono::Duration = chrono::Duration::minutes(5);
const CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

pub struct ServiceSupervisor {
    instances: RwLock<HashMap<u32, CanalInstance>>,
    connection_config: ConnectionConfig,
    meta_store: Arc<MetaStore>,
    reconnect: ReconnectSettings,
    event_log_sink: Arc<dyn EventLogSink>,
    database_storage_enabled: bool,
    gtid_enabled: bool,
    cleanup_ttl: Option<std::time::Duration>,
}

impl ServiceSupervisor {
    pub fn new(config: CanalConfig, event_log_sink: Arc<dyn EventLogSink>, meta_store: Arc<MetaStore>) -> Self {
        ServiceSupervisor {
            instances: RwLock::new(HashMap::new()),
            connection_config: ConnectionConfig {
                hostname: config.connection.host,
                port: config.connection.port,
                username: config.connection.username,
                password: config.connection.password,
                database: None,
                server_id: config.connection.server_id,
                timeout: config.connection.read_timeout,
                heartbeat_interval: config.connection.heartbeat_interval,
            },
            meta_store,
            reconnect: config.reconnect,
            event_log_sink,
            database_storage_enabled: config.storage.database_storage_enabled,
            gtid_enabled: config.binlog.gtid_enabled,
            cleanup_ttl: None,
        }
    }

    /// Builds a Canal Instance for `task`, wires a Webhook Handler and a
    /// Database Handler subscribed to `(task.database, task.table)`, and
    /// starts it.
    pub async fn create_task(&self, task: Task) -> Result<()> {
        let task_id = task.id;
        let schema = task.database.clone();
        let table = task.table.clone();
        let callback_url = task.callback_url.clone();

        let mut instance = CanalInstance::new(
            task.clone(),
            self.connection_config.clone(),
            self.meta_store.clone(),
            self.reconnect.clone(),
            self.gtid_enabled,
        );

        let webhook = Arc::new(WebhookHandler::new(
            format!("webhook-{task_id}"),
            WebhookConfig { url: callback_url, ..Default::default() },
        ));
        let database_handler = Arc::new(DatabaseHandler::new(
            format!("database-{task_id}"),
            task_id,
            self.database_storage_enabled,
            self.event_log_sink.clone(),
        ));

        instance.subscribe(&schema, &table, webhook).await;
        instance.subscribe(&schema, &table, database_handler).await;
        instance.start().await?;

        self.instances.write().await.insert(task_id, instance);
        Ok(())
    }

    /// Stops and replaces the existing instance; never mutates in place.
    pub async fn update_task(&self, id: u32, task: Task) -> Result<()> {
        self.stop_task(id).await?;
        self.create_task(task).await
    }

    pub async fn stop_task(&self, id: u32) -> Result<()> {
        let mut instance = self.instances.write().await.remove(&id);
        if let Some(instance) = instance.as_mut() {
            instance.stop().await;
        }
        Ok(())
    }

    /// Stops the instance, if any, but deliberately leaves its
    /// checkpointed position and cached table metadata in the Meta
    /// Store: a later `create_task` with the same id resumes instead of
    /// replaying from the head.
    pub async fn delete_task(&self, id: u32) -> Result<()> {
        self.stop_task(id).await
    }

    pub async fn get_status(&self) -> HashMap<u32, InstanceStatus> {
        self.instances.read().await.iter().map(|(id, instance)| (*id, instance.status())).collect()
    }

    pub async fn health_check_once(&self) {
        let now = Utc::now();
        for (id, instance) in self.instances.read().await.iter() {
            let status = instance.status();
            if let Some(last) = status.last_event_time {
                if now - last > STALE_THRESHOLD {
                    warn!(task_id = id, last_event_time = %last, "canal instance has not emitted an event recently");
                }
            }
        }
    }

    pub async fn cleanup_once(&self) -> Result<()> {
        if let Some(ttl) = self.cleanup_ttl {
            self.meta_store.cleanup(ttl).await?;
        }
        Ok(())
    }

    /// Spawns the health-check and Meta Store cleanup sweeps as
    /// detached background loops. Intended to be called once at
    /// service startup.
    pub fn spawn_background_jobs(self: &Arc<Self>) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
            loop {
                interval.tick().await;
                supervisor.health_check_once().await;
            }
        });

        let supervisor = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                if let Err(e) = supervisor.cleanup_once().await {
                    warn!(error = %e, "meta store cleanup sweep failed");
                }
            }
        });

        info!("service supervisor background jobs started");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_handler::EventLogStatus;
    use crate::events::EventType;
    use async_trait::async_trait;

    struct NullSink;

    #[async_trait]
    impl EventLogSink for NullSink {
        async fn create_event_log(
            &self,
            _task_id: u32,
            _schema: &str,
            _table: &str,
            _event_type: EventType,
            _data_json: &str,
            _status: EventLogStatus,
            _error_msg: Option<&str>,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn get_status_is_empty_for_new_supervisor() {
        let store = Arc::new(MetaStore::open_in_memory().unwrap());
        let supervisor = ServiceSupervisor::new(CanalConfig::default(), Arc::new(NullSink), store);
        assert!(supervisor.get_status().await.is_empty());
    }

    #[tokio::test]
    async fn stop_task_on_unknown_id_is_a_no_op() {
        let store = Arc::new(MetaStore::open_in_memory().unwrap());
        let supervisor = ServiceSupervisor::new(CanalConfig::default(), Arc::new(NullSink), store);
        assert!(supervisor.stop_task(999).await.is_ok());
    }
}
