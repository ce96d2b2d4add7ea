//! Batching, retrying HTTP delivery of events to a subscriber's URL.

use crate::error::Result;
use crate::events::Event;
use crate::handler::EventHandler;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{debug, error, warn};

const USER_AGENT: &str = "canal-rs-webhook/1";

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub max_retries: u32,
    pub retry_interval: Duration,
    pub client_timeout: Duration,
    pub source: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        WebhookConfig {
            url: String::new(),
            batch_size: 10,
            batch_timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_interval: Duration::from_secs(1),
            client_timeout: Duration::from_secs(30),
            source: "canal-rs".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    events: &'a [Event],
    timestamp: i64,
    source: &'a str,
}

#[derive(Debug, Default)]
pub struct WebhookStats {
    pub success_count: AtomicU64,
    pub error_count: AtomicU64,
}

struct BatchState {
    buffer: Vec<Event>,
    timer_armed_at: Option<Instant>,
}

/// Delivers batches of events to a webhook URL. `handle()` never
/// blocks on the network: the buffer is flushed from a detached task.
pub struct WebhookHandler {
    name: String,
    config: WebhookConfig,
    client: reqwest::Client,
    state: Arc<AsyncMutex<BatchState>>,
    stats: Arc<WebhookStats>,
}

impl WebhookHandler {
    pub fn new(name: impl Into<String>, config: WebhookConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.client_timeout)
            .build()
            .unwrap_or_default();

        WebhookHandler {
            name: name.into(),
            config,
            client,
            state: Arc::new(AsyncMutex::new(BatchState { buffer: Vec::new(), timer_armed_at: None })),
            stats: Arc::new(WebhookStats::default()),
        }
    }

    pub fn stats(&self) -> &WebhookStats {
        &self.stats
    }

    async fn append(&self, event: Event) {
        let should_flush = {
            let mut guard = self.state.lock().await;
            guard.buffer.push(event);
            if guard.buffer.len() >= self.config.batch_size {
                true
            } else {
                if guard.timer_armed_at.is_none() {
                    guard.timer_armed_at = Some(Instant::now());
                    let state = self.state.clone();
                    let client = self.client.clone();
                    let config = self.config.clone();
                    let stats = self.stats.clone();
                    let timeout = self.config.batch_timeout;
                    tokio::spawn(async move {
                        tokio::time::sleep(timeout).await;
                        flush_batch(&state, &client, &config, &stats).await;
                    });
                }
                false
            }
        };

        if should_flush {
            flush_batch(&self.state, &self.client, &self.config, &self.stats).await;
        }
    }
}

async fn flush_batch(
    state: &Arc<AsyncMutex<BatchState>>,
    client: &reqwest::Client,
    config: &WebhookConfig,
    stats: &Arc<WebhookStats>,
) {
    let batch = {
        let mut guard = state.lock().await;
        guard.timer_armed_at = None;
        if guard.buffer.is_empty() {
            return;
        }
        std::mem::take(&mut guard.buffer)
    };

    let client = client.clone();
    let config = config.clone();
    let stats = stats.clone();
    // Detached: an in-flight send must not be interrupted by the
    // instance stopping mid-flush.
    tokio::spawn(async move {
        send_with_retry(&client, &config, &stats, batch).await;
    });
}

async fn send_with_retry(client: &reqwest::Client, config: &WebhookConfig, stats: &WebhookStats, batch: Vec<Event>) {
    let payload = WebhookPayload {
        events: &batch,
        timestamp: chrono::Utc::now().timestamp(),
        source: &config.source,
    };

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            tokio::time::sleep(config.retry_interval * attempt).await;
        }

        let result = client
            .post(&config.url)
            .header("Content-Type", "application/json")
            .header("X-Event-Count", batch.len().to_string())
            .header("User-Agent", USER_AGENT)
            .json(&payload)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                stats.success_count.fetch_add(batch.len() as u64, Ordering::Relaxed);
                debug!(count = batch.len(), "webhook batch delivered");
                return;
            }
            Ok(response) => {
                stats.error_count.fetch_add(1, Ordering::Relaxed);
                warn!(status = %response.status(), attempt, "webhook returned non-2xx");
            }
            Err(e) => {
                stats.error_count.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, attempt, "webhook send failed");
            }
        }
    }

    error!(count = batch.len(), url = %config.url, "webhook batch dropped after exhausting retries");
}

#[async_trait]
impl EventHandler for WebhookHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        self.append(event.clone()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use crate::position::Position;

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

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = WebhookConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.batch_timeout, Duration::from_secs(5));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_interval, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn handle_buffers_below_batch_size_without_flushing() {
        let handler = WebhookHandler::new("wh", WebhookConfig { url: "http://127.0.0.1:1".into(), ..Default::default() });
        handler.handle(&sample_event()).await.unwrap();
        let guard = handler.state.lock().await;
        assert_eq!(guard.buffer.len(), 1);
    }

    #[tokio::test]
    async fn handle_flushes_immediately_at_batch_size() {
        let handler = WebhookHandler::new(
            "wh",
            WebhookConfig { url: "http://127.0.0.1:1".into(), batch_size: 2, ..Default::default() },
        );
        handler.handle(&sample_event()).await.unwrap();
        handler.handle(&sample_event()).await.unwrap();
        // allow the detached flush task to swap the buffer
        tokio::time::sleep(Duration::from_millis(20)).await;
        let guard = handler.state.lock().await;
        assert!(guard.buffer.is_empty());
    }
}
