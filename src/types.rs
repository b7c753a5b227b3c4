//! Data types for captured exchanges and the records rendered from them.
//!
//! An [`Exchange`] is the raw material collected while a request is in flight; a [`Record`]
//! is the finished, immutable output handed to a [`RecordSink`](crate::RecordSink).

use axum::http::HeaderMap;
use bytes::Bytes;
use std::{
    fmt,
    time::{Duration, SystemTime},
};

/// Ordered HTTP headers with case-insensitive lookup.
///
/// Entries keep the order in which they were captured, and repeated names stay as separate
/// entries so that each one becomes its own `-H` flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a header, keeping any existing entries with the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value stored under `name`, compared ASCII case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Convert an axum `HeaderMap`, decoding non-UTF-8 values lossily.
impl From<&HeaderMap> for Headers {
    fn from(headers: &HeaderMap) -> Self {
        headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_owned(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect()
    }
}

/// Why an exchange ended without a complete response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The wrapped service returned an error
    Service,
    /// A request or response body stream failed
    Body,
    /// The caller went away before the exchange completed
    Aborted,
    /// The exchange outlived the watchdog deadline
    TimedOut,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Service => "service error",
            ErrorKind::Body => "body error",
            ErrorKind::Aborted => "aborted",
            ErrorKind::TimedOut => "timed out",
        })
    }
}

/// Failure description attached to an exchange closed via
/// [`ExchangeCapture::on_error`](crate::ExchangeCapture::on_error).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ExchangeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ExchangeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn service(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Service, message)
    }

    pub fn body(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Body, message)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Aborted, message)
    }

    pub fn timed_out(after: Duration) -> Self {
        Self::new(
            ErrorKind::TimedOut,
            format!("exchange still open after {}ms", after.as_millis()),
        )
    }
}

/// One request paired with its eventual response or error.
///
/// Built and owned by a single [`ExchangeCapture`](crate::ExchangeCapture); `ended_at` is
/// `None` while the exchange is still open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Correlates this exchange with log lines emitted while it was in flight
    pub correlation_id: u64,
    /// HTTP method as sent by the client
    pub method: String,
    /// Absolute request URL
    pub url: String,
    /// Request headers in capture order
    pub headers: Headers,
    /// Request body bytes, if captured
    pub request_body: Option<Bytes>,
    /// The service stopped reading the request body before its end, so no captured bytes
    /// can stand in for it
    pub request_body_incomplete: bool,
    /// Response status code, if a response was produced
    pub status: Option<u16>,
    /// Response body bytes, if captured
    pub response_body: Option<Bytes>,
    /// Failure that closed the exchange instead of a response
    pub error: Option<ExchangeError>,
    pub started_at: SystemTime,
    pub ended_at: Option<SystemTime>,
}

/// The paired result shown beneath a rendered command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A response was produced; `body` is already truncated and decoded
    Response { status: u16, body: String },
    /// The exchange failed; the text is the error description
    Error(String),
}

impl Outcome {
    pub fn text(&self) -> &str {
        match self {
            Outcome::Response { body, .. } => body,
            Outcome::Error(text) => text,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// The finished output for one exchange.
///
/// Produced by [`ExchangeCapture::finalize`](crate::ExchangeCapture::finalize) and consumed
/// once by a sink. Its `Display` form is the command, then the outcome, each followed by a
/// line break:
///
/// ```text
/// curl -X GET 'http://localhost/hello' -H 'host: localhost'
///  Hello, World!
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub correlation_id: u64,
    /// Shell-safe curl command reconstructing the request
    pub command: String,
    pub outcome: Outcome,
    /// When the exchange closed
    pub timestamp: SystemTime,
    /// Time from request start to exchange close
    pub duration: Duration,
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \n {} \n", self.command, self.outcome)
    }
}
