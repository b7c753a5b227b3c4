//! Composite sink for fanning records out to several destinations.
//!
//! [`MultiSink`] holds any number of [`RecordSink`] implementations and writes each record
//! to all of them concurrently.
//!
//! # Example
//!
//! ```rust
//! use request_curl::{LoggingSink, MultiSink};
//!
//! let sink = MultiSink::new().with(LoggingSink);
//! assert_eq!(sink.len(), 1);
//!
//! // let layer = RequestCurlLayer::new(config, sink);
//! ```

use crate::{Record, RecordSink, SinkError};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;

/// Dyn-compatible mirror of [`RecordSink`] so different sinks can share one `Vec`.
trait DynSink: Send + Sync + 'static {
    fn write_boxed(&self, record: Record) -> BoxFuture<'_>;
}

struct SinkWrapper<S: RecordSink> {
    inner: S,
}

impl<S: RecordSink> DynSink for SinkWrapper<S> {
    fn write_boxed(&self, record: Record) -> BoxFuture<'_> {
        Box::pin(self.inner.write(record))
    }
}

/// A sink that delegates to multiple inner sinks.
///
/// Every inner sink receives its own clone of each record, and all writes run concurrently.
/// If any of them fail, the first error (in registration order) is returned after all
/// writes have finished, so one failing destination never starves the others.
pub struct MultiSink {
    sinks: Vec<Arc<dyn DynSink>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Add a sink. Returns self for builder pattern.
    pub fn with<S: RecordSink>(mut self, sink: S) -> Self {
        self.sinks.push(Arc::new(SinkWrapper { inner: sink }));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }
}

impl Default for MultiSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordSink for MultiSink {
    async fn write(&self, record: Record) -> Result<(), SinkError> {
        let writes: Vec<_> = self
            .sinks
            .iter()
            .map(|sink| sink.write_boxed(record.clone()))
            .collect();
        futures::future::join_all(writes)
            .await
            .into_iter()
            .collect::<Result<Vec<()>, SinkError>>()
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Outcome;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, SystemTime};

    struct CountingSink {
        count: Arc<AtomicUsize>,
    }

    impl RecordSink for CountingSink {
        async fn write(&self, _record: Record) -> Result<(), SinkError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingSink;

    impl RecordSink for FailingSink {
        async fn write(&self, _record: Record) -> Result<(), SinkError> {
            Err(SinkError::Rejected("disk full".to_owned()))
        }
    }

    struct CapturingSink {
        commands: Arc<Mutex<Vec<String>>>,
    }

    impl RecordSink for CapturingSink {
        async fn write(&self, record: Record) -> Result<(), SinkError> {
            self.commands.lock().unwrap().push(record.command);
            Ok(())
        }
    }

    fn create_test_record() -> Record {
        Record {
            correlation_id: 123,
            command: "curl -X GET 'http://localhost/test'".to_owned(),
            outcome: Outcome::Response {
                status: 200,
                body: "ok".to_owned(),
            },
            timestamp: SystemTime::now(),
            duration: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_multi_sink_empty() {
        let sink = MultiSink::new();
        assert!(sink.is_empty());
        assert_eq!(sink.len(), 0);

        sink.write(create_test_record()).await.unwrap();
    }

    #[tokio::test]
    async fn test_multi_sink_fans_out() {
        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));
        let commands = Arc::new(Mutex::new(Vec::new()));

        let sink = MultiSink::new()
            .with(CountingSink {
                count: count1.clone(),
            })
            .with(CountingSink {
                count: count2.clone(),
            })
            .with(CapturingSink {
                commands: commands.clone(),
            });
        assert_eq!(sink.len(), 3);

        sink.write(create_test_record()).await.unwrap();
        assert_eq!(count1.load(Ordering::SeqCst), 1);
        assert_eq!(count2.load(Ordering::SeqCst), 1);
        assert_eq!(
            *commands.lock().unwrap(),
            vec!["curl -X GET 'http://localhost/test'".to_owned()]
        );
    }

    #[tokio::test]
    async fn test_failure_does_not_skip_other_sinks() {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = MultiSink::new().with(FailingSink).with(CountingSink {
            count: count.clone(),
        });

        let err = sink.write(create_test_record()).await.unwrap_err();
        assert!(matches!(err, SinkError::Rejected(_)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    /// Sink that waits at a barrier - proves concurrent execution
    struct BarrierSink {
        barrier: Arc<tokio::sync::Barrier>,
    }

    impl RecordSink for BarrierSink {
        async fn write(&self, _record: Record) -> Result<(), SinkError> {
            self.barrier.wait().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sinks_run_concurrently() {
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let sink = MultiSink::new()
            .with(BarrierSink {
                barrier: barrier.clone(),
            })
            .with(BarrierSink {
                barrier: barrier.clone(),
            });

        // Sequential writes would deadlock at the barrier
        let result = tokio::time::timeout(Duration::from_secs(1), sink.write(create_test_record())).await;
        assert!(result.is_ok(), "sinks must be written concurrently");
    }
}
