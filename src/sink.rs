//! Off-path delivery of finished records.
//!
//! [`AsyncSink`] owns a bounded queue and one worker task. Producers call
//! [`AsyncSink::submit`], which never waits: if the queue is full or the worker is gone, the
//! record is dropped and a rate-limited warning is logged. The worker hands each record to
//! the configured [`RecordSink`], reporting (never retrying) any write failure.

use futures::FutureExt;
use std::{
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, Instant},
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::{types::Record, DIAGNOSTICS};

/// Default number of records that may wait for the worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Errors from handing a record to a sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("record queue is full")]
    QueueFull,
    #[error("record queue is closed")]
    Closed,
    #[error("sink rejected record: {0}")]
    Rejected(String),
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for finished records.
///
/// Implementations decide where records go (a log, a file, a collector). `write` runs on the
/// [`AsyncSink`] worker, never on a request's path; one record is written at a time.
///
/// # Examples
///
/// ```rust
/// use request_curl::{Record, RecordSink, SinkError};
///
/// struct StdoutSink;
///
/// impl RecordSink for StdoutSink {
///     async fn write(&self, record: Record) -> Result<(), SinkError> {
///         print!("{record}");
///         Ok(())
///     }
/// }
/// ```
pub trait RecordSink: Send + Sync + 'static {
    /// Write one record.
    fn write(&self, record: Record) -> impl std::future::Future<Output = Result<(), SinkError>> + Send;
}

impl<S: RecordSink> RecordSink for Arc<S> {
    fn write(&self, record: Record) -> impl std::future::Future<Output = Result<(), SinkError>> + Send {
        (**self).write(record)
    }
}

/// Logs at most one warning per interval and counts what it suppressed in between.
struct RateLimitedReport {
    interval: Duration,
    last_report_ms: AtomicU64,
    suppressed: AtomicU64,
}

impl RateLimitedReport {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_report_ms: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Returns `Some(suppressed)` when a report is due.
    fn due(&self) -> Option<u64> {
        let now_ms = elapsed_ms() + 1;
        let last = self.last_report_ms.load(Ordering::Relaxed);
        let due = last == 0 || now_ms.saturating_sub(last) >= self.interval.as_millis() as u64;
        if due
            && self
                .last_report_ms
                .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            Some(self.suppressed.swap(0, Ordering::Relaxed))
        } else {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            None
        }
    }
}

fn elapsed_ms() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}

struct SinkStats {
    dropped: AtomicU64,
    failed: AtomicU64,
    drop_report: RateLimitedReport,
    failure_report: RateLimitedReport,
}

/// Non-blocking handle to a background record writer.
///
/// Cloning is cheap; all clones feed the same queue and worker. The worker exits once every
/// handle has been dropped and the queue has drained.
///
/// # Examples
///
/// ```rust
/// use request_curl::{AsyncSink, LoggingSink};
///
/// # #[tokio::main]
/// # async fn main() {
/// let sink = AsyncSink::spawn(LoggingSink, 256);
/// assert_eq!(sink.dropped(), 0);
/// # }
/// ```
#[derive(Clone)]
pub struct AsyncSink {
    tx: mpsc::Sender<Record>,
    stats: Arc<SinkStats>,
}

impl AsyncSink {
    /// Spawn the worker on the current tokio runtime and return a handle to its queue.
    ///
    /// A `capacity` of zero is raised to one.
    pub fn spawn<S: RecordSink>(sink: S, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Record>(capacity.max(1));
        let stats = Arc::new(SinkStats {
            dropped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            drop_report: RateLimitedReport::new(Duration::from_secs(1)),
            failure_report: RateLimitedReport::new(Duration::from_secs(1)),
        });
        let worker_stats = stats.clone();

        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let correlation_id = record.correlation_id;
                let result = AssertUnwindSafe(sink.write(record)).catch_unwind().await;
                let error = match result {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => "sink panicked".to_owned(),
                };
                let failed = worker_stats.failed.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(suppressed) = worker_stats.failure_report.due() {
                    warn!(
                        target: DIAGNOSTICS,
                        correlation_id = %correlation_id,
                        error = %error,
                        failed_total = failed,
                        suppressed,
                        "Record sink failed; record dropped"
                    );
                }
            }
            debug!("Record sink worker stopped");
        });

        Self { tx, stats }
    }

    /// Queue `record` for writing without waiting.
    ///
    /// A full or closed queue drops the record; the error is returned for callers that care,
    /// and a warning is logged at most once per second.
    pub fn submit(&self, record: Record) -> Result<(), SinkError> {
        let error = match self.tx.try_send(record) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(_)) => SinkError::QueueFull,
            Err(TrySendError::Closed(_)) => SinkError::Closed,
        };

        let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(suppressed) = self.stats.drop_report.due() {
            warn!(
                target: DIAGNOSTICS,
                error = %error,
                dropped_total = dropped,
                suppressed,
                "Dropping curl record"
            );
        }
        Err(error)
    }

    /// Records dropped because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    /// Records the sink failed to write.
    pub fn failed(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Outcome;
    use std::sync::Mutex;
    use std::time::SystemTime;
    use tokio::sync::Notify;

    fn record(id: u64) -> Record {
        Record {
            correlation_id: id,
            command: format!("curl -X GET 'http://h/{id}'"),
            outcome: Outcome::Response {
                status: 200,
                body: "ok".to_owned(),
            },
            timestamp: SystemTime::UNIX_EPOCH,
            duration: Duration::ZERO,
        }
    }

    #[derive(Default)]
    struct Collect {
        ids: Mutex<Vec<u64>>,
    }

    impl RecordSink for Collect {
        async fn write(&self, record: Record) -> Result<(), SinkError> {
            self.ids.lock().unwrap().push(record.correlation_id);
            Ok(())
        }
    }

    async fn wait_for(sink: &Collect, count: usize) -> Vec<u64> {
        for _ in 0..100 {
            let ids = sink.ids.lock().unwrap().clone();
            if ids.len() >= count {
                return ids;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sink.ids.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_records_are_written() {
        let collect = Arc::new(Collect::default());
        let sink = AsyncSink::spawn(collect.clone(), 16);

        for id in 0..5 {
            sink.submit(record(id)).unwrap();
        }

        assert_eq!(wait_for(&collect, 5).await, vec![0, 1, 2, 3, 4]);
        assert_eq!(sink.dropped(), 0);
    }

    /// Blocks every write until released.
    struct Stalled {
        release: Arc<Notify>,
        written: AtomicU64,
    }

    impl RecordSink for Stalled {
        async fn write(&self, _record: Record) -> Result<(), SinkError> {
            self.release.notified().await;
            self.written.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let release = Arc::new(Notify::new());
        let stalled = Arc::new(Stalled {
            release: release.clone(),
            written: AtomicU64::new(0),
        });
        let sink = AsyncSink::spawn(stalled.clone(), 1);

        let results: Vec<_> = (0..4).map(|id| sink.submit(record(id))).collect();

        // One slot in the queue plus at most one record held by the worker
        let accepted = results.iter().filter(|r| r.is_ok()).count();
        assert!((1..=2).contains(&accepted));
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, SinkError::QueueFull)));
        assert_eq!(sink.dropped(), (4 - accepted) as u64);

        release.notify_waiters();
    }

    /// Fails the first write, panics on the second, then succeeds.
    struct Flaky {
        calls: AtomicU64,
        written: Mutex<Vec<u64>>,
    }

    impl RecordSink for Flaky {
        async fn write(&self, record: Record) -> Result<(), SinkError> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(SinkError::Rejected("destination unavailable".to_owned())),
                1 => panic!("sink exploded"),
                _ => {
                    self.written.lock().unwrap().push(record.correlation_id);
                    Ok(())
                }
            }
        }
    }

    #[tokio::test]
    async fn test_worker_survives_sink_failures() {
        let flaky = Arc::new(Flaky {
            calls: AtomicU64::new(0),
            written: Mutex::new(Vec::new()),
        });
        let sink = AsyncSink::spawn(flaky.clone(), 8);

        for id in 0..3 {
            sink.submit(record(id)).unwrap();
        }

        for _ in 0..100 {
            if !flaky.written.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*flaky.written.lock().unwrap(), vec![2]);
        assert_eq!(sink.failed(), 2);
    }

    #[test]
    fn test_rate_limited_report() {
        let report = RateLimitedReport::new(Duration::from_secs(3600));
        assert_eq!(report.due(), Some(0));
        assert_eq!(report.due(), None);
        assert_eq!(report.due(), None);
        assert_eq!(report.suppressed.load(Ordering::Relaxed), 2);
    }
}
