use axum::{
    body::Body,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use request_curl::{
    ConfigOverrides, CurlLoggerConfig, LoggingSink, MultiSink, Outcome, Record, RecordSink,
    RequestCurlLayer, SinkError,
};
use serde::{Deserialize, Serialize};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{net::TcpListener, time::sleep};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Sink that keeps recent records in memory so `/stats` can show them
#[derive(Debug, Clone, Default)]
struct DemoSink {
    records: Arc<Mutex<Vec<StoredRecord>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    correlation_id: u64,
    command: String,
    status: Option<u16>,
    outcome: String,
    duration_ms: u64,
}

impl DemoSink {
    fn snapshot(&self) -> Vec<StoredRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl RecordSink for DemoSink {
    async fn write(&self, record: Record) -> Result<(), SinkError> {
        let status = match &record.outcome {
            Outcome::Response { status, .. } => Some(*status),
            Outcome::Error(_) => None,
        };
        let mut records = self.records.lock().unwrap();
        records.push(StoredRecord {
            correlation_id: record.correlation_id,
            command: record.command,
            status,
            outcome: record.outcome.text().to_owned(),
            duration_ms: record.duration.as_millis() as u64,
        });
        // Keep the last hundred
        if records.len() > 100 {
            records.remove(0);
        }
        Ok(())
    }
}

async fn hello_handler() -> impl IntoResponse {
    sleep(Duration::from_millis(100)).await; // Simulate some work
    "Hello, World!"
}

async fn echo_handler(body: Bytes) -> impl IntoResponse {
    format!("Echo: {}", String::from_utf8_lossy(&body))
}

async fn streaming_handler() -> impl IntoResponse {
    use futures::stream;

    let stream = stream::unfold(0u32, |count| async move {
        if count >= 5 {
            None
        } else {
            sleep(Duration::from_millis(200)).await;
            Some((
                Ok::<_, std::convert::Infallible>(Bytes::from(format!("chunk-{count}\n"))),
                count + 1,
            ))
        }
    });

    Response::builder()
        .header("content-type", "text/plain")
        .body(Body::from_stream(stream))
        .unwrap()
}

async fn large_response_handler() -> impl IntoResponse {
    // Over the default response limit, so the record shows the placeholder
    "x".repeat(8192)
}

async fn stats_handler(sink: DemoSink) -> impl IntoResponse {
    let records = sink.snapshot();
    axum::Json(serde_json::json!({
        "total_records": records.len(),
        "errors": records.iter().filter(|r| r.status.is_none()).count(),
        "records": records
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,request_curl=info,tower_http=debug")),
        )
        .init();

    info!("Starting request-curl demo server");

    // Environment settings apply unless overridden here
    let config = CurlLoggerConfig::resolve(
        ConfigOverrides {
            watchdog_timeout: Some(Duration::from_secs(30)),
            ..ConfigOverrides::default()
        },
        |key| std::env::var(key).ok(),
    )?;

    let demo_sink = DemoSink::default();
    let sinks = MultiSink::new().with(LoggingSink).with(demo_sink.clone());
    let layer = RequestCurlLayer::new(config, sinks);
    let stats_sink = demo_sink.clone();

    let app = Router::new()
        .route("/hello", get(hello_handler))
        .route("/echo", post(echo_handler))
        .route("/streaming", get(streaming_handler))
        .route("/large", get(large_response_handler))
        .route("/stats", get(move || stats_handler(stats_sink.clone())))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(layer)
                .into_inner(),
        );

    info!("Demo server endpoints:");
    info!("  GET  /hello      - Simple greeting");
    info!("  POST /echo       - Echo request body");
    info!("  GET  /streaming  - Streaming response");
    info!("  GET  /large      - Large response (replaced in the record)");
    info!("  GET  /stats      - Recent curl records");
    info!("");
    info!("Try these commands:");
    info!("  curl http://localhost:3000/hello");
    info!("  curl -X POST -d \"it's a test\" http://localhost:3000/echo");
    info!("  curl http://localhost:3000/streaming");
    info!("  curl http://localhost:3000/large");
    info!("  curl http://localhost:3000/stats");

    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    info!("Demo server listening on http://localhost:3000");

    axum::serve(listener, app).await?;

    Ok(())
}
