//! Lifecycle of a single captured exchange.
//!
//! An [`ExchangeCapture`] moves through three states:
//!
//! ```text
//! pending --on_request_start--> open --on_response_end / on_error--> closed
//! ```
//!
//! Each transition happens at most once. Out-of-order calls are rejected with a
//! [`CaptureError`] and leave the capture untouched. [`ExchangeCapture::finalize`] only
//! succeeds once the exchange is closed.

use bytes::Bytes;
use std::time::SystemTime;

use crate::{
    curl,
    truncate::TruncationPolicy,
    types::{Exchange, ExchangeError, Headers, Outcome, Record},
};

/// Lifecycle hooks called out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("exchange {0}: response or error reported before the request started")]
    NotStarted(u64),
    #[error("exchange {0}: request start reported twice")]
    AlreadyStarted(u64),
    #[error("exchange {0}: already closed")]
    AlreadyClosed(u64),
    #[error("exchange {0}: cannot finalize while still open")]
    StillOpen(u64),
}

enum CaptureState {
    Pending,
    Open(Exchange),
    Closed(Exchange),
}

/// Collects one request/response lifecycle into an [`Exchange`] and renders it.
///
/// # Examples
///
/// ```rust
/// use request_curl::{ExchangeCapture, Headers, TruncationPolicy};
/// use bytes::Bytes;
///
/// let mut capture = ExchangeCapture::new(1);
/// capture
///     .on_request_start("GET", "https://api.example.com/users?id=5", Headers::new(), None)
///     .unwrap();
/// capture
///     .on_response_end(200, Some(Bytes::from_static(br#"{"ok":true}"#)))
///     .unwrap();
///
/// let record = capture.finalize(&TruncationPolicy::default()).unwrap();
/// assert_eq!(record.command, "curl -X GET 'https://api.example.com/users?id=5'");
/// assert_eq!(record.outcome.text(), r#"{"ok":true}"#);
/// ```
pub struct ExchangeCapture {
    correlation_id: u64,
    started_at: SystemTime,
    state: CaptureState,
}

impl ExchangeCapture {
    /// Start a capture whose clock begins now.
    pub fn new(correlation_id: u64) -> Self {
        Self::started_at(correlation_id, SystemTime::now())
    }

    /// Start a capture with an explicit start time, e.g. when the request was received
    /// before the capture was created.
    pub fn started_at(correlation_id: u64, started_at: SystemTime) -> Self {
        Self {
            correlation_id,
            started_at,
            state: CaptureState::Pending,
        }
    }

    pub fn correlation_id(&self) -> u64 {
        self.correlation_id
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, CaptureState::Open(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, CaptureState::Closed(_))
    }

    /// The captured exchange, once the request side has been recorded.
    pub fn exchange(&self) -> Option<&Exchange> {
        match &self.state {
            CaptureState::Pending => None,
            CaptureState::Open(exchange) | CaptureState::Closed(exchange) => Some(exchange),
        }
    }

    /// Record the request side. Valid exactly once, before anything else.
    pub fn on_request_start(
        &mut self,
        method: impl Into<String>,
        url: impl Into<String>,
        headers: Headers,
        body: Option<Bytes>,
    ) -> Result<(), CaptureError> {
        if !matches!(self.state, CaptureState::Pending) {
            return Err(CaptureError::AlreadyStarted(self.correlation_id));
        }

        self.state = CaptureState::Open(Exchange {
            correlation_id: self.correlation_id,
            method: method.into(),
            url: url.into(),
            headers,
            request_body: body,
            request_body_incomplete: false,
            status: None,
            response_body: None,
            error: None,
            started_at: self.started_at,
            ended_at: None,
        });
        Ok(())
    }

    /// Mark the request body as only partly read. The command then carries the placeholder
    /// in place of whatever fragment was seen.
    pub fn on_request_body_incomplete(&mut self) -> Result<(), CaptureError> {
        match &mut self.state {
            CaptureState::Open(exchange) => {
                exchange.request_body = None;
                exchange.request_body_incomplete = true;
                Ok(())
            }
            CaptureState::Pending => Err(CaptureError::NotStarted(self.correlation_id)),
            CaptureState::Closed(_) => Err(CaptureError::AlreadyClosed(self.correlation_id)),
        }
    }

    /// Close the exchange with a response.
    pub fn on_response_end(&mut self, status: u16, body: Option<Bytes>) -> Result<(), CaptureError> {
        self.close(|exchange| {
            exchange.status = Some(status);
            exchange.response_body = body;
        })
    }

    /// Close the exchange with a failure.
    pub fn on_error(&mut self, error: ExchangeError) -> Result<(), CaptureError> {
        self.close(|exchange| exchange.error = Some(error))
    }

    fn close(&mut self, apply: impl FnOnce(&mut Exchange)) -> Result<(), CaptureError> {
        match std::mem::replace(&mut self.state, CaptureState::Pending) {
            CaptureState::Open(mut exchange) => {
                apply(&mut exchange);
                exchange.ended_at = Some(SystemTime::now());
                self.state = CaptureState::Closed(exchange);
                Ok(())
            }
            CaptureState::Pending => Err(CaptureError::NotStarted(self.correlation_id)),
            closed @ CaptureState::Closed(_) => {
                self.state = closed;
                Err(CaptureError::AlreadyClosed(self.correlation_id))
            }
        }
    }

    /// Render the closed exchange into a [`Record`].
    ///
    /// Takes `&self`, so repeated calls yield equal records. An error outcome takes
    /// precedence over any response body, and its text is held to the response limit.
    pub fn finalize(&self, policy: &TruncationPolicy) -> Result<Record, CaptureError> {
        let exchange = match &self.state {
            CaptureState::Closed(exchange) => exchange,
            CaptureState::Pending | CaptureState::Open(_) => {
                return Err(CaptureError::StillOpen(self.correlation_id))
            }
        };

        let outcome = match &exchange.error {
            Some(error) => Outcome::Error(policy.response_text(&error.to_string())),
            None => Outcome::Response {
                status: exchange.status.unwrap_or_default(),
                body: exchange
                    .response_body
                    .as_deref()
                    .map(|bytes| policy.response_body(bytes))
                    .unwrap_or_default(),
            },
        };

        let timestamp = exchange.ended_at.unwrap_or(exchange.started_at);
        Ok(Record {
            correlation_id: self.correlation_id,
            command: curl::render(exchange, policy),
            outcome,
            timestamp,
            duration: timestamp
                .duration_since(exchange.started_at)
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;

    fn auth_headers() -> Headers {
        [("Authorization", "Bearer abc")].into_iter().collect()
    }

    #[test]
    fn test_get_scenario() {
        let mut capture = ExchangeCapture::new(1);
        capture
            .on_request_start(
                "GET",
                "https://api.example.com/users?id=5",
                auth_headers(),
                None,
            )
            .unwrap();
        capture
            .on_response_end(200, Some(Bytes::from_static(br#"{"ok":true}"#)))
            .unwrap();

        let record = capture.finalize(&TruncationPolicy::default()).unwrap();
        assert_eq!(
            record.command,
            "curl -X GET 'https://api.example.com/users?id=5' -H 'Authorization: Bearer abc'"
        );
        assert!(!record.command.contains("--data-raw"));
        assert_eq!(
            record.outcome,
            Outcome::Response {
                status: 200,
                body: r#"{"ok":true}"#.to_owned()
            }
        );
    }

    #[test]
    fn test_oversize_request_scenario() {
        let policy = TruncationPolicy {
            request_body_limit: 2048,
            ..TruncationPolicy::default()
        };
        let response = "r".repeat(50);

        let mut capture = ExchangeCapture::new(2);
        capture
            .on_request_start(
                "POST",
                "http://svc/upload",
                Headers::new(),
                Some(Bytes::from(vec![b'p'; 5000])),
            )
            .unwrap();
        capture
            .on_response_end(201, Some(Bytes::from(response.clone())))
            .unwrap();

        let record = capture.finalize(&policy).unwrap();
        assert_eq!(
            record.command,
            "curl -X POST 'http://svc/upload' --data-raw 'the response is too large'"
        );
        assert_eq!(record.outcome.text(), response);

        let omitting = TruncationPolicy {
            omit_oversize_request_body: true,
            ..policy
        };
        let record = capture.finalize(&omitting).unwrap();
        assert_eq!(record.command, "curl -X POST 'http://svc/upload'");
    }

    #[test]
    fn test_error_scenario() {
        let mut capture = ExchangeCapture::new(3);
        capture
            .on_request_start("GET", "http://svc/", Headers::new(), None)
            .unwrap();
        capture
            .on_error(ExchangeError::service("connection refused"))
            .unwrap();

        let record = capture.finalize(&TruncationPolicy::default()).unwrap();
        assert_eq!(
            record.outcome,
            Outcome::Error("service error: connection refused".to_owned())
        );
        assert_eq!(capture.exchange().unwrap().response_body, None);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut capture = ExchangeCapture::new(4);
        capture
            .on_request_start(
                "PUT",
                "http://svc/item/1",
                auth_headers(),
                Some(Bytes::from_static(b"name=x")),
            )
            .unwrap();
        capture.on_response_end(204, None).unwrap();

        let policy = TruncationPolicy::default();
        let first = capture.finalize(&policy).unwrap();
        let second = capture.finalize(&policy).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.outcome.text(), "");
    }

    #[test]
    fn test_protocol_violations() {
        let policy = TruncationPolicy::default();
        let mut capture = ExchangeCapture::new(5);

        assert_eq!(
            capture.on_response_end(200, None),
            Err(CaptureError::NotStarted(5))
        );
        assert_eq!(
            capture.on_error(ExchangeError::aborted("gone")),
            Err(CaptureError::NotStarted(5))
        );
        assert_eq!(capture.finalize(&policy), Err(CaptureError::StillOpen(5)));

        capture
            .on_request_start("GET", "http://svc/", Headers::new(), None)
            .unwrap();
        assert!(capture.is_open());
        assert_eq!(
            capture.on_request_start("GET", "http://svc/", Headers::new(), None),
            Err(CaptureError::AlreadyStarted(5))
        );
        assert_eq!(capture.finalize(&policy), Err(CaptureError::StillOpen(5)));

        capture.on_response_end(200, None).unwrap();
        assert!(capture.is_closed());
        assert_eq!(
            capture.on_error(ExchangeError::aborted("late")),
            Err(CaptureError::AlreadyClosed(5))
        );
        assert_eq!(
            capture.on_response_end(500, None),
            Err(CaptureError::AlreadyClosed(5))
        );

        // Rejected calls leave the captured outcome intact
        let exchange = capture.exchange().unwrap();
        assert_eq!(exchange.status, Some(200));
        assert_eq!(exchange.error, None);
    }

    #[test]
    fn test_incomplete_request_body() {
        let mut capture = ExchangeCapture::new(8);
        assert_eq!(
            capture.on_request_body_incomplete(),
            Err(CaptureError::NotStarted(8))
        );

        capture
            .on_request_start(
                "POST",
                "http://svc/p",
                Headers::new(),
                Some(Bytes::from_static(b"first")),
            )
            .unwrap();
        capture.on_request_body_incomplete().unwrap();
        capture.on_response_end(200, None).unwrap();
        assert_eq!(
            capture.on_request_body_incomplete(),
            Err(CaptureError::AlreadyClosed(8))
        );

        let record = capture.finalize(&TruncationPolicy::default()).unwrap();
        assert_eq!(
            record.command,
            "curl -X POST 'http://svc/p' --data-raw 'the response is too large'"
        );
    }

    #[test]
    fn test_timing_fields() {
        let started = SystemTime::UNIX_EPOCH;
        let mut capture = ExchangeCapture::started_at(6, started);
        capture
            .on_request_start("GET", "http://svc/", Headers::new(), None)
            .unwrap();
        assert_eq!(capture.exchange().unwrap().ended_at, None);

        capture
            .on_error(ExchangeError::timed_out(std::time::Duration::from_secs(1)))
            .unwrap();
        let exchange = capture.exchange().unwrap();
        assert!(exchange.ended_at.unwrap() > started);
        assert_eq!(exchange.error.as_ref().unwrap().kind, ErrorKind::TimedOut);

        let record = capture.finalize(&TruncationPolicy::default()).unwrap();
        assert_eq!(record.timestamp, exchange.ended_at.unwrap());
        assert!(record.duration > std::time::Duration::ZERO);
    }

    #[test]
    fn test_response_body_truncated_in_record() {
        let policy = TruncationPolicy {
            response_body_limit: 4,
            placeholder: "<too big>".to_owned(),
            ..TruncationPolicy::default()
        };
        let mut capture = ExchangeCapture::new(7);
        capture
            .on_request_start("GET", "http://svc/", Headers::new(), None)
            .unwrap();
        capture
            .on_response_end(200, Some(Bytes::from_static(b"12345")))
            .unwrap();

        let record = capture.finalize(&policy).unwrap();
        assert_eq!(record.outcome.text(), "<too big>");
    }
}
