//! Webhook delivery against a real (loopback) HTTP server: the first
//! attempts return 500, a later attempt returns 200, and delivery must
//! succeed without the caller ever observing the failures.

use canal_rs::{Event, EventHandler, EventType, Position, WebhookConfig, WebhookHandler};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn sample_event() -> Event {
    Event {
        id: "bin.000001:4:0".into(),
        schema: "shop".into(),
        table: "orders".into(),
        event_type: EventType::Insert,
        timestamp: chrono::Utc::now(),
        position: Position::new("bin.000001", 4),
        before: None,
        after: None,
        sql: None,
    }
}

/// Accepts a single HTTP/1.1 request, drains the body by Content-Length,
/// and replies with `status`. Minimal on purpose: just enough to let
/// `reqwest` complete the round trip.
async fn serve_one(listener: &TcpListener, status: &'static str) {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut buf = vec![0u8; 8192];
    let mut total_read = 0;
    let mut content_length = None;

    loop {
        let n = socket.read(&mut buf[total_read..]).await.unwrap();
        total_read += n;
        let text = String::from_utf8_lossy(&buf[..total_read]);
        if let Some(header_end) = text.find("\r\n\r\n") {
            if content_length.is_none() {
                content_length = text
                    .lines()
                    .find(|l| l.to_ascii_lowercase().starts_with("content-length:"))
                    .and_then(|l| l.split(':').nth(1))
                    .and_then(|v| v.trim().parse::<usize>().ok());
            }
            let body_so_far = total_read - (header_end + 4);
            if content_length.map(|cl| body_so_far >= cl).unwrap_or(true) {
                break;
            }
        }
        if n == 0 {
            break;
        }
    }

    let response = format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    socket.write_all(response.as_bytes()).await.unwrap();
    socket.shutdown().await.ok();
}

#[tokio::test]
async fn delivery_succeeds_after_transient_failures() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("http://{addr}/hook");

    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_for_server = attempts.clone();
    let server = tokio::spawn(async move {
        serve_one(&listener, "500 Internal Server Error").await;
        attempts_for_server.fetch_add(1, Ordering::SeqCst);
        serve_one(&listener, "500 Internal Server Error").await;
        attempts_for_server.fetch_add(1, Ordering::SeqCst);
        serve_one(&listener, "200 OK").await;
        attempts_for_server.fetch_add(1, Ordering::SeqCst);
    });

    let handler = WebhookHandler::new(
        "wh",
        WebhookConfig {
            url,
            batch_size: 1,
            max_retries: 3,
            retry_interval: Duration::from_millis(20),
            ..Default::default()
        },
    );

    handler.handle(&sample_event()).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    // give the detached retry task a moment to record the final outcome
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(handler.stats().success_count.load(Ordering::SeqCst), 1);
}
