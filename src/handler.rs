//! The handler contract the Event Sink dispatches to.

use crate::error::Result;
use crate::events::Event;
use async_trait::async_trait;

/// Implemented by anything that wants to receive events for a
/// `(schema, table)` subscription. `name()` is the identity used for
/// idempotent `subscribe`/`unsubscribe`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, event: &Event) -> Result<()>;
}
