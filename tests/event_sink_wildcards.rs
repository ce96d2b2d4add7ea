//! Fan-out across the four wildcard subscription shapes, exercised
//! through the public `EventSink`/`EventHandler` seam rather than the
//! crate-internal `HandlerTable` directly.

use async_trait::async_trait;
use canal_rs::{Event, EventHandler, EventSink, EventType, Position};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct CountingHandler {
    name: String,
    count: Arc<AtomicUsize>,
}

#[async_trait]
impl EventHandler for CountingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, _event: &Event) -> canal_rs::Result<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn handler(name: &str) -> (Arc<CountingHandler>, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    (Arc::new(CountingHandler { name: name.into(), count: count.clone() }), count)
}

fn event(schema: &str, table: &str) -> Event {
    Event {
        id: format!("{schema}.{table}:1:0"),
        schema: schema.into(),
        table: table.into(),
        event_type: EventType::Insert,
        timestamp: chrono::Utc::now(),
        position: Position::new("bin.000001", 4),
        before: None,
        after: None,
        sql: None,
    }
}

#[tokio::test]
async fn every_wildcard_shape_reaches_its_subscriber() {
    let mut sink = EventSink::new();
    sink.start();

    let (exact, exact_count) = handler("exact");
    let (table_wild, table_count) = handler("table-wild");
    let (schema_wild, schema_count) = handler("schema-wild");
    let (global, global_count) = handler("global");

    sink.subscribe("shop", "orders", exact);
    sink.subscribe("", "orders", table_wild);
    sink.subscribe("shop", "", schema_wild);
    sink.subscribe("", "", global);

    sink.send(event("shop", "orders")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(exact_count.load(Ordering::SeqCst), 1);
    assert_eq!(table_count.load(Ordering::SeqCst), 1);
    assert_eq!(schema_count.load(Ordering::SeqCst), 1);
    assert_eq!(global_count.load(Ordering::SeqCst), 1);

    // An event for a different schema/table never reaches the exact
    // or table-wildcard subscribers, but the schema- and
    // fully-wildcarded subscribers still see it.
    sink.send(event("shop", "invoices")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(exact_count.load(Ordering::SeqCst), 1);
    assert_eq!(table_count.load(Ordering::SeqCst), 1);
    assert_eq!(schema_count.load(Ordering::SeqCst), 2);
    assert_eq!(global_count.load(Ordering::SeqCst), 2);

    sink.stop().await;
}
