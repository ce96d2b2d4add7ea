//! Process-internal event multiplexer.
//!
//! Keyed by `(schema, table)`, holds a set of handlers and dispatches
//! each event to all matching handlers concurrently, with a bounded
//! ingress queue and a per-handler dispatch timeout.

use crate::error::{CdcError, Result};
use crate::events::Event;
use crate::handler::EventHandler;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const QUEUE_CAPACITY: usize = 1000;
const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

type HandlerKey = (String, String);

#[derive(Default)]
struct HandlerTable {
    handlers: HashMap<HandlerKey, Vec<Arc<dyn EventHandler>>>,
}

impl HandlerTable {
    fn matching(&self, schema: &str, table: &str) -> Vec<Arc<dyn EventHandler>> {
        let mut out = Vec::new();
        for key in [
            (schema.to_string(), table.to_string()),
            (String::new(), table.to_string()),
            (schema.to_string(), String::new()),
            (String::new(), String::new()),
        ] {
            if let Some(v) = self.handlers.get(&key) {
                out.extend(v.iter().cloned());
            }
        }
        out
    }
}

pub struct EventSink {
    table: Arc<RwLock<HandlerTable>>,
    sender: Option<mpsc::Sender<Event>>,
    consumer: Option<JoinHandle<()>>,
    stopped: Arc<AtomicBool>,
}

impl EventSink {
    pub fn new() -> Self {
        EventSink {
            table: Arc::new(RwLock::new(HandlerTable::default())),
            sender: None,
            consumer: None,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates the bounded ingress queue and spawns the single consumer.
    pub fn start(&mut self) {
        let (tx, mut rx) = mpsc::channel::<Event>(QUEUE_CAPACITY);
        let table = self.table.clone();
        let stopped = self.stopped.clone();

        let consumer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let handlers = table.read().matching(&event.schema, &event.table);
                if !handlers.is_empty() {
                    let mut joins = Vec::with_capacity(handlers.len());
                    for handler in handlers {
                        let event = event.clone();
                        joins.push(tokio::spawn(async move {
                            match tokio::time::timeout(DISPATCH_TIMEOUT, handler.handle(&event)).await {
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => warn!(handler = handler.name(), error = %e, "handler failed"),
                                Err(_) => warn!(handler = handler.name(), "handler dispatch timed out"),
                            }
                        }));
                    }
                    for join in joins {
                        let _ = join.await;
                    }
                }
                // checked after the event above is fully dispatched, never
                // mid-dispatch, so `stop()` drains rather than truncates
                if stopped.load(Ordering::Relaxed) {
                    break;
                }
            }
            debug!("event sink consumer exiting");
        });

        self.sender = Some(tx);
        self.consumer = Some(consumer);
    }

    /// Enqueues `event`, failing with `Backpressure` if the queue stays
    /// full for `ENQUEUE_TIMEOUT`.
    pub async fn send(&self, event: Event) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| CdcError::Other("event sink not started".into()))?;

        match tokio::time::timeout(ENQUEUE_TIMEOUT, sender.send(event)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(CdcError::Other("event sink consumer has exited".into())),
            Err(_) => Err(CdcError::Backpressure(ENQUEUE_TIMEOUT)),
        }
    }

    /// Registers `handler` under `(schema, table)`. Idempotent by
    /// `handler.name()`: calling this twice with the same name replaces
    /// nothing and results in exactly one registration.
    pub fn subscribe(&self, schema: &str, table: &str, handler: Arc<dyn EventHandler>) {
        let key = (schema.to_string(), table.to_string());
        let mut guard = self.table.write();
        let entry = guard.handlers.entry(key).or_default();
        if !entry.iter().any(|h| h.name() == handler.name()) {
            entry.push(handler);
        }
    }

    pub fn unsubscribe(&self, schema: &str, table: &str, handler_name: &str) {
        let key = (schema.to_string(), table.to_string());
        let mut guard = self.table.write();
        if let Some(entry) = guard.handlers.get_mut(&key) {
            entry.retain(|h| h.name() != handler_name);
        }
    }

    /// Signals the consumer to drain whatever is already queued and
    /// exit, then awaits it. Dropping the sender makes `rx.recv()`
    /// return `None` once the queue empties; `stopped` is the faster
    /// path when events keep arriving faster than that. Never aborts a
    /// dispatch in progress. Safe to call multiple times.
    pub async fn stop(&mut self) {
        self.stopped.store(true, Ordering::Relaxed);
        self.sender = None;
        if let Some(consumer) = self.consumer.take() {
            let _ = consumer.await;
        }
    }
}

impl Default for EventSink {
    fn default() -> Self {
        EventSink::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use crate::position::Position;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler {
        name: String,
        count: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl EventHandler for CountingHandler {
        fn name(&self) -> &str {
            &self.name
        }
        async fn handle(&self, _event: &Event) -> Result<()> {
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
            after: None,
            sql: None,
        }
    }

    #[tokio::test]
    async fn subscribe_is_idempotent_by_name() {
        let sink = EventSink::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(CountingHandler { name: "h1".into(), count: count.clone() });
        sink.subscribe("test", "users", handler.clone());
        sink.subscribe("test", "users", handler);
        assert_eq!(sink.table.read().matching("test", "users").len(), 1);
    }

    #[tokio::test]
    async fn dispatch_reaches_matching_handler() {
        let mut sink = EventSink::new();
        sink.start();
        let count = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(CountingHandler { name: "h1".into(), count: count.clone() });
        sink.subscribe("test", "users", handler);

        sink.send(sample_event()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        sink.stop().await;
    }

    #[tokio::test]
    async fn unsubscribe_removes_handler() {
        let sink = EventSink::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(CountingHandler { name: "h1".into(), count });
        sink.subscribe("test", "users", handler);
        sink.unsubscribe("test", "users", "h1");
        assert!(sink.table.read().matching("test", "users").is_empty());
    }
}
