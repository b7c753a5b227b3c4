//! # request-curl
//!
//! A Tower middleware that turns every HTTP exchange passing through an axum (or any
//! Tower) service into a replayable `curl` command, paired with the response body or error
//! it produced.
//!
//! ## Features
//!
//! - **Purely observational**: bodies are teed as they stream, never buffered in front of
//!   the caller, and inner errors pass through untouched
//! - **Bounded capture**: request and response bodies are held to configurable byte limits,
//!   with oversize bodies replaced by a placeholder
//! - **Shell-safe output**: URLs, headers and bodies are quoted so the command can be pasted
//!   straight into a shell
//! - **Off-path logging**: records are queued for a background writer; a slow destination
//!   causes drops, never request latency
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::{routing::get, Router};
//! use request_curl::{CurlLoggerConfig, LoggingSink, RequestCurlLayer};
//!
//! async fn hello() -> &'static str {
//!     "Hello, World!"
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     tracing_subscriber::fmt()
//!         .with_env_filter("request_curl=info")
//!         .init();
//!
//!     let config = CurlLoggerConfig::from_env().expect("invalid request-curl settings");
//!     let app = Router::new()
//!         .route("/hello", get(hello))
//!         .layer(RequestCurlLayer::new(config, LoggingSink));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```
//!
//! Each request then produces a log event like:
//!
//! ```text
//! curl -X GET 'http://localhost:3000/hello' -H 'host: localhost:3000' -H 'accept: */*'
//!  Hello, World!
//! ```
//!
//! ## Custom Sinks
//!
//! Implement [`RecordSink`] to send records somewhere other than the log:
//!
//! ```rust
//! use request_curl::{Record, RecordSink, SinkError};
//! use std::sync::Mutex;
//!
//! #[derive(Default)]
//! struct InMemorySink {
//!     commands: Mutex<Vec<String>>,
//! }
//!
//! impl RecordSink for InMemorySink {
//!     async fn write(&self, record: Record) -> Result<(), SinkError> {
//!         self.commands.lock().unwrap().push(record.command);
//!         Ok(())
//!     }
//! }
//! ```

use axum::{
    body::{Body, HttpBody},
    extract::Request,
    http::{
        header::{CONTENT_LENGTH, HOST},
        HeaderMap, Method, StatusCode, Uri,
    },
    response::Response,
};
use futures::FutureExt;
use std::{
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::SystemTime,
};
use tokio::{
    sync::oneshot,
    time::{timeout_at, Instant},
};
use tower::{Layer, Service};
use tracing::{debug, error, info, instrument, warn};

pub mod body_wrapper;
use body_wrapper::{create_body_capture_stream, CaptureFuture};

pub mod capture;
pub use capture::{CaptureError, ExchangeCapture};

pub mod config;
pub use config::{ConfigError, ConfigOverrides, CurlLoggerConfig};

pub mod curl;

pub mod logging_sink;
pub use logging_sink::LoggingSink;

pub mod multi_sink;
pub use multi_sink::MultiSink;

pub mod sink;
pub use sink::{AsyncSink, RecordSink, SinkError};

pub mod truncate;
pub use truncate::{TextEncoding, TruncationMode, TruncationPolicy};

pub mod types;
pub use types::{ErrorKind, Exchange, ExchangeError, Headers, Outcome, Record};

/// `tracing` target for failures inside the middleware itself.
pub const DIAGNOSTICS: &str = "request_curl::diagnostics";

/// Global atomic counter for correlation IDs and process start timestamp
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(1);
static PROCESS_START_TIME: std::sync::OnceLock<u64> = std::sync::OnceLock::new();

/// Generate a unique correlation ID combining process start time and counter
fn generate_correlation_id() -> u64 {
    let start_time = *PROCESS_START_TIME.get_or_init(|| {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    });

    let counter = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed);

    // High 32 bits: process start timestamp, Low 32 bits: counter
    (start_time << 32) | (counter & 0xFFFFFFFF)
}

/// Rebuild an absolute URL for a request whose URI may only carry a path.
fn absolute_url(uri: &Uri, headers: &HeaderMap, default_scheme: &str) -> String {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return uri.to_string();
    }
    let scheme = uri.scheme_str().unwrap_or(default_scheme);
    let host = uri
        .authority()
        .map(|authority| authority.as_str())
        .or_else(|| headers.get(HOST).and_then(|value| value.to_str().ok()))
        .unwrap_or("localhost");
    let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
    format!("{scheme}://{host}{path}")
}

/// Body length announced by the `content-length` header, if any.
fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Responses that hyper sends without ever polling their body.
fn body_is_skipped(method: &Method, status: u16) -> bool {
    *method == Method::HEAD
        || (100..200).contains(&status)
        || status == StatusCode::NO_CONTENT.as_u16()
        || status == StatusCode::NOT_MODIFIED.as_u16()
}

struct Shared {
    config: CurlLoggerConfig,
    sink: AsyncSink,
}

/// Tower layer that records each request as a curl command.
///
/// Constructing the layer spawns the [`AsyncSink`] worker that feeds the provided
/// [`RecordSink`], so it must be called from within a tokio runtime. A configuration with
/// `enabled: false` produces a layer that passes every request straight through.
///
/// # Examples
///
/// ```rust,no_run
/// use request_curl::{CurlLoggerConfig, LoggingSink, RequestCurlLayer, TruncationPolicy};
/// use axum::{routing::get, Router};
/// use tower::ServiceBuilder;
///
/// # async fn hello() -> &'static str { "Hello" }
/// # #[tokio::main]
/// # async fn main() {
/// let config = CurlLoggerConfig {
///     policy: TruncationPolicy {
///         response_body_limit: 512,
///         ..TruncationPolicy::default()
///     },
///     ..CurlLoggerConfig::default()
/// };
///
/// let app: Router = Router::new()
///     .route("/hello", get(hello))
///     .layer(ServiceBuilder::new().layer(RequestCurlLayer::new(config, LoggingSink)));
/// # }
/// ```
#[derive(Clone)]
pub struct RequestCurlLayer {
    shared: Option<Arc<Shared>>,
}

impl RequestCurlLayer {
    /// Create a layer writing finished records to `sink` through a bounded background queue.
    pub fn new<S: RecordSink>(config: CurlLoggerConfig, sink: S) -> Self {
        if !config.enabled {
            info!("Request curl logging disabled");
            return Self { shared: None };
        }

        info!(
            request_body_limit = config.policy.request_body_limit,
            response_body_limit = config.policy.response_body_limit,
            placeholder = %config.policy.placeholder,
            encoding = %config.policy.encoding,
            mode = ?config.policy.mode,
            queue_capacity = config.queue_capacity,
            watchdog_ms = config.watchdog_timeout.as_millis() as u64,
            "Request curl logging enabled"
        );

        let sink = AsyncSink::spawn(sink, config.queue_capacity);
        Self {
            shared: Some(Arc::new(Shared { config, sink })),
        }
    }

    /// The background sink handle, or `None` when logging is disabled.
    pub fn sink(&self) -> Option<&AsyncSink> {
        self.shared.as_ref().map(|shared| &shared.sink)
    }
}

impl<S> Layer<S> for RequestCurlLayer {
    type Service = RequestCurlService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestCurlService {
            inner,
            shared: self.shared.clone(),
        }
    }
}

/// Tower service implementation for the curl recording middleware.
///
/// Wraps an inner service and observes each request/response as it flows through. Users
/// typically don't interact with this type directly - it's created by [`RequestCurlLayer`].
#[derive(Clone)]
pub struct RequestCurlService<S> {
    inner: S,
    shared: Option<Arc<Shared>>,
}

/// What the inner service produced, sent from the response path to the exchange task.
enum InnerOutcome {
    Responded {
        status: u16,
        body: Option<CaptureFuture>,
    },
    Failed(String),
}

impl<S> Service<Request> for RequestCurlService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    #[instrument(skip_all)]
    fn call(&mut self, mut request: Request) -> Self::Future {
        let Some(shared) = self.shared.clone() else {
            return Box::pin(self.inner.call(request));
        };

        let correlation_id = generate_correlation_id();
        let started_at = SystemTime::now();
        let deadline = Instant::now() + shared.config.watchdog_timeout;

        let method = request.method().clone();
        let url = absolute_url(
            request.uri(),
            request.headers(),
            &shared.config.default_scheme,
        );
        let headers = Headers::from(request.headers());
        let declared_len = declared_length(request.headers());

        debug!(correlation_id = %correlation_id, method = %method, url = %url, "Extracted request metadata");

        let request_capture = if shared.config.capture_request_body
            && !request.body().is_end_stream()
        {
            let body = std::mem::replace(request.body_mut(), Body::empty());
            let cap = shared.config.policy.request_body_limit.saturating_add(1);
            let (body_stream, capture_future) = create_body_capture_stream(body, cap);
            *request.body_mut() = body_stream;
            Some(capture_future)
        } else {
            None
        };

        let (outcome_tx, outcome_rx) = oneshot::channel();

        let task = ExchangeTask {
            correlation_id,
            started_at,
            deadline,
            method,
            url,
            headers,
            declared_len,
            shared: shared.clone(),
        };
        tokio::spawn(
            AssertUnwindSafe(task.run(request_capture, outcome_rx))
                .catch_unwind()
                .map(move |result| {
                    if result.is_err() {
                        error!(target: DIAGNOSTICS, correlation_id = %correlation_id, "Exchange capture panicked; record lost");
                    }
                }),
        );

        let future = self.inner.call(request);

        Box::pin(async move {
            let mut result = future.await;

            let outcome = match &mut result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = if shared.config.capture_response_body {
                        let body = std::mem::replace(response.body_mut(), Body::empty());
                        let cap = shared.config.policy.response_body_limit.saturating_add(1);
                        let (body_stream, capture_future) = create_body_capture_stream(body, cap);
                        *response.body_mut() = body_stream;
                        Some(capture_future)
                    } else {
                        None
                    };
                    InnerOutcome::Responded { status, body }
                }
                Err(e) => InnerOutcome::Failed(e.to_string()),
            };

            // The exchange task may already have given up; the caller never cares
            let _ = outcome_tx.send(outcome);
            result
        })
    }
}

/// Per-request state moved into the background task that owns the [`ExchangeCapture`].
struct ExchangeTask {
    correlation_id: u64,
    started_at: SystemTime,
    deadline: Instant,
    method: Method,
    url: String,
    headers: Headers,
    declared_len: Option<usize>,
    shared: Arc<Shared>,
}

impl ExchangeTask {
    async fn run(
        self,
        request_capture: Option<CaptureFuture>,
        outcome_rx: oneshot::Receiver<InnerOutcome>,
    ) {
        let ExchangeTask {
            correlation_id,
            started_at,
            deadline,
            method,
            url,
            headers,
            declared_len,
            shared,
        } = self;
        let watchdog = shared.config.watchdog_timeout;
        let mut capture = ExchangeCapture::started_at(correlation_id, started_at);

        // A streaming handler may only finish reading the request once its response has
        // been drained, so both sides are awaited together
        let request_side = async move {
            match request_capture {
                Some(capture_future) => Some(timeout_at(deadline, capture_future).await),
                None => None,
            }
        };
        let skipped = |status: u16| body_is_skipped(&method, status);
        let response_side = async move {
            match timeout_at(deadline, outcome_rx).await {
                Err(_) => Err(ExchangeError::timed_out(watchdog)),
                Ok(Err(_)) => Err(ExchangeError::aborted(
                    "request dropped before a response was produced",
                )),
                Ok(Ok(InnerOutcome::Failed(message))) => Err(ExchangeError::service(message)),
                Ok(Ok(InnerOutcome::Responded { status, body: None })) => Ok((status, None)),
                Ok(Ok(InnerOutcome::Responded {
                    status,
                    body: Some(capture_future),
                })) => match timeout_at(deadline, capture_future).await {
                    Err(_) => Err(ExchangeError::timed_out(watchdog)),
                    Ok(Err(e)) => Err(ExchangeError::body(e.to_string())),
                    Ok(Ok(captured)) if captured.complete || skipped(status) => {
                        Ok((status, Some(captured.bytes)))
                    }
                    Ok(Ok(captured)) => Err(ExchangeError::aborted(format!(
                        "response stream dropped after {} bytes",
                        captured.total_len
                    ))),
                },
            }
        };
        let (request_body, response) = tokio::join!(request_side, response_side);

        let (request_body, request_incomplete) = match request_body {
            None => (None, false),
            Some(Ok(Ok(captured)))
                if captured.complete || declared_len == Some(captured.total_len) =>
            {
                (Some(captured.bytes), false)
            }
            Some(Ok(Ok(captured))) => {
                warn!(
                    target: DIAGNOSTICS,
                    correlation_id = %correlation_id,
                    read = captured.total_len,
                    declared = ?declared_len,
                    "Request body not fully read by the service; recording placeholder"
                );
                (None, true)
            }
            Some(Ok(Err(e))) => {
                warn!(target: DIAGNOSTICS, correlation_id = %correlation_id, error = %e, "Error capturing request body");
                (None, true)
            }
            Some(Err(_)) => (None, true),
        };

        let started = capture
            .on_request_start(method.as_str(), url, headers, request_body)
            .and_then(|()| {
                if request_incomplete {
                    capture.on_request_body_incomplete()
                } else {
                    Ok(())
                }
            });
        if let Err(e) = started {
            error!(target: DIAGNOSTICS, error = %e, "Capture protocol violation");
            return;
        }

        let closed = match response {
            Ok((status, body)) => capture.on_response_end(status, body),
            Err(error) => capture.on_error(error),
        };
        if let Err(e) = closed {
            error!(target: DIAGNOSTICS, error = %e, "Capture protocol violation");
            return;
        }

        match capture.finalize(&shared.config.policy) {
            Ok(record) => {
                debug!(
                    correlation_id = %correlation_id,
                    duration_ms = record.duration.as_millis() as u64,
                    "Exchange recorded"
                );
                // Drops are reported by the sink itself
                let _ = shared.sink.submit(record);
            }
            Err(e) => error!(target: DIAGNOSTICS, error = %e, "Capture protocol violation"),
        }
    }
}
