//! Thin adapter that appends each event to a local event log via an
//! injected sink, rather than speaking to a concrete database crate.

use crate::error::Result;
use crate::events::{Event, EventType};
use crate::handler::EventHandler;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLogStatus {
    Success,
    Failed,
}

impl EventLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLogStatus::Success => "success",
            EventLogStatus::Failed => "failed",
        }
    }
}

/// External collaborator that durably records one row per delivered
/// event. Implemented outside the core (e.g. by the HTTP admin layer);
/// the core only needs this contract.
#[async_trait]
#[allow(clippy::too_many_arguments)]
pub trait EventLogSink: Send + Sync {
    async fn create_event_log(
        &self,
        task_id: u32,
        schema: &str,
        table: &str,
        event_type: EventType,
        data_json: &str,
        status: EventLogStatus,
        error_msg: Option<&str>,
    ) -> Result<()>;
}

pub struct DatabaseHandler {
    name: String,
    task_id: u32,
    enabled: bool,
    sink: std::sync::Arc<dyn EventLogSink>,
}

impl DatabaseHandler {
    pub fn new(name: impl Into<String>, task_id: u32, enabled: bool, sink: std::sync::Arc<dyn EventLogSink>) -> Self {
        DatabaseHandler { name: name.into(), task_id, enabled, sink }
    }
}

#[async_trait]
impl EventHandler for DatabaseHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let row = if event.event_type == EventType::Delete { &event.before } else { &event.after };
        let data_json = serde_json::to_string(row)?;

        self.sink
            .create_event_log(
                self.task_id,
                &event.schema,
                &event.table,
                event.event_type,
                &data_json,
                EventLogStatus::Success,
                None,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::Position;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct RecordingSink {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventLogSink for RecordingSink {
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
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn sample_event() -> Event {
        Event {
            id: "f:1:0".into(),
            schema: "test".into(),
            table: "users".into(),
            event_type: EventType::Insert,
            timestamp: chrono::Utc::now(),
            position: Position::new("f", 1),
            before: None,
            after: Some(vec![]),
            sql: None,
        }
    }

    #[tokio::test]
    async fn disabled_handler_is_a_no_op() {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = DatabaseHandler::new("db", 1, false, Arc::new(RecordingSink { count: count.clone() }));
        handler.handle(&sample_event()).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn enabled_handler_forwards_to_sink() {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = DatabaseHandler::new("db", 1, true, Arc::new(RecordingSink { count: count.clone() }));
        handler.handle(&sample_event()).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
