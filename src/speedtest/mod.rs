pub mod download;
pub mod meter;
pub mod ping;
pub mod upload;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestKind {
    Download,
    Upload,
    Ping,
}

impl TestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TestKind::Download => "download",
            TestKind::Upload => "upload",
            TestKind::Ping => "ping",
        }
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reporting epoch of an active test.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSample {
    /// Throughput over the last epoch. Always zero for ping probes.
    pub speed_mbps: f64,
    /// Progress of the test in `[0, 100]`.
    pub elapsed_percent: f64,
    /// Time since the test started.
    pub elapsed: Duration,
    /// Round trip of the probe this sample reports, ping tests only.
    pub latency_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub kind: TestKind,
    pub speed_mbps: f64,
    pub latency_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
    /// Total bytes moved by a transfer test.
    pub bytes: u64,
    pub elapsed: Duration,
}

/// A single-use measurement unit: one per test, never reused.
pub trait Measurement: Send {
    fn measure(
        self: Box<Self>,
        progress_tx: mpsc::Sender<ProgressSample>,
        cancel: CancelSignal,
    ) -> BoxFuture<'static, Result<TestResult>>;
}

/// Creates a linked cancel handle and signal.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelSignal(rx))
}

/// Owner side of a cooperative cancellation flag.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// Observer side, polled by samplers and probers at every I/O boundary.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        if self.0.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_labels() {
        assert_eq!(TestKind::Download.to_string(), "download");
        assert_eq!(TestKind::Ping.as_str(), "ping");
    }

    #[tokio::test]
    async fn cancel_signal_resolves_after_cancel() {
        let (handle, mut signal) = cancel_pair();
        assert!(!signal.is_cancelled());

        let waiter = tokio::spawn(async move {
            signal.cancelled().await;
            signal.is_cancelled()
        });
        handle.cancel();
        assert!(waiter.await.unwrap());
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn dropped_handle_never_cancels() {
        let (handle, mut signal) = cancel_pair();
        drop(handle);
        let res = tokio::time::timeout(Duration::from_millis(50), signal.cancelled()).await;
        assert!(res.is_err());
    }
}
