use futures::future::BoxFuture;
use reqwest::{Client, Url};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{CancelSignal, Measurement, ProgressSample, TestKind, TestResult};
use crate::error::{Error, NetworkError, Result};

/// One round-trip measurement against an endpoint.
pub trait Probe: Send + Sync {
    fn probe(&self) -> BoxFuture<'_, std::result::Result<Duration, NetworkError>>;
}

/// HEAD request; the round trip ends when response headers arrive.
pub struct HttpProbe {
    client: Client,
    url: Url,
}

impl HttpProbe {
    pub fn new(client: Client, url: Url) -> Self {
        Self { client, url }
    }
}

impl Probe for HttpProbe {
    fn probe(&self) -> BoxFuture<'_, std::result::Result<Duration, NetworkError>> {
        Box::pin(async move {
            let start = Instant::now();
            // Any status is a completed round trip.
            self.client.head(self.url.clone()).send().await?;
            Ok(start.elapsed())
        })
    }
}

/// TCP handshake time to `host:port`.
pub struct TcpProbe {
    addr: String,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn from_url(url: &Url) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidConfig(format!("`{url}` has no host")))?;
        let port = url
            .port()
            .ok_or_else(|| Error::InvalidConfig(format!("`{url}` has no port")))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Ok(Self::new(if host.contains(':') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        }))
    }
}

impl Probe for TcpProbe {
    fn probe(&self) -> BoxFuture<'_, std::result::Result<Duration, NetworkError>> {
        Box::pin(async move {
            let start = Instant::now();
            let stream = TcpStream::connect(&self.addr).await?;
            let rtt = start.elapsed();
            drop(stream);
            Ok(rtt)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Mean,
    Median,
}

/// How successful probes are folded into one latency figure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyPolicy {
    pub aggregation: Aggregation,
    /// Fraction of probes that must succeed. `0.0` accepts any partial loss.
    pub min_success_ratio: f64,
}

impl Default for LatencyPolicy {
    fn default() -> Self {
        Self {
            aggregation: Aggregation::Mean,
            min_success_ratio: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub latency_ms: f64,
    pub jitter_ms: f64,
}

impl LatencyPolicy {
    pub fn summarize(
        &self,
        samples: &[f64],
        attempts: u32,
        last_error: Option<&NetworkError>,
    ) -> std::result::Result<LatencyStats, NetworkError> {
        if samples.is_empty() {
            return Err(NetworkError::AllProbesFailed {
                attempts,
                last: last_error.map(|e| e.to_string()).unwrap_or_default(),
            });
        }

        let succeeded = samples.len() as u32;
        if attempts > 0 && (succeeded as f64 / attempts as f64) < self.min_success_ratio {
            return Err(NetworkError::InsufficientProbes { succeeded, attempts });
        }

        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let latency_ms = match self.aggregation {
            Aggregation::Mean => mean,
            Aggregation::Median => median(samples),
        };
        let jitter_ms = if samples.len() > 1 {
            let variance: f64 = samples.iter().map(|&x| (x - mean).powi(2)).sum::<f64>()
                / (samples.len() - 1) as f64;
            variance.sqrt()
        } else {
            0.0
        };

        Ok(LatencyStats { latency_ms, jitter_ms })
    }
}

fn median(samples: &[f64]) -> f64 {
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

pub struct PingTest {
    probe: Box<dyn Probe>,
    count: u32,
    timeout: Duration,
    spacing: Duration,
    policy: LatencyPolicy,
}

impl PingTest {
    pub fn new(
        probe: Box<dyn Probe>,
        count: u32,
        timeout: Duration,
        spacing: Duration,
        policy: LatencyPolicy,
    ) -> Self {
        Self {
            probe,
            count: count.max(1),
            timeout,
            spacing,
            policy,
        }
    }

    pub async fn run(
        self,
        progress_tx: mpsc::Sender<ProgressSample>,
        mut cancel: CancelSignal,
    ) -> Result<TestResult> {
        let start = Instant::now();
        let mut samples = Vec::with_capacity(self.count as usize);
        let mut last_error = None;

        for attempt in 1..=self.count {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::CancelledByCaller),
                outcome = tokio::time::timeout(self.timeout, self.probe.probe()) => outcome,
            };

            let latest = match outcome {
                Ok(Ok(rtt)) => {
                    let ms = rtt.as_secs_f64() * 1000.0;
                    samples.push(ms);
                    Some(ms)
                }
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "probe failed");
                    last_error = Some(e);
                    None
                }
                Err(_) => {
                    warn!(attempt, timeout = ?self.timeout, "probe timed out");
                    last_error = Some(NetworkError::Timeout);
                    None
                }
            };

            let _ = progress_tx
                .send(ProgressSample {
                    speed_mbps: 0.0,
                    elapsed_percent: attempt as f64 / self.count as f64 * 100.0,
                    elapsed: start.elapsed(),
                    latency_ms: latest,
                })
                .await;

            if attempt < self.count {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::CancelledByCaller),
                    _ = tokio::time::sleep(self.spacing) => {}
                }
            }
        }

        let stats = self
            .policy
            .summarize(&samples, self.count, last_error.as_ref())?;
        debug!(
            succeeded = samples.len(),
            attempts = self.count,
            latency_ms = stats.latency_ms,
            "ping finished"
        );

        Ok(TestResult {
            kind: TestKind::Ping,
            speed_mbps: 0.0,
            latency_ms: Some(stats.latency_ms),
            jitter_ms: Some(stats.jitter_ms),
            bytes: 0,
            elapsed: start.elapsed(),
        })
    }
}

impl Measurement for PingTest {
    fn measure(
        self: Box<Self>,
        progress_tx: mpsc::Sender<ProgressSample>,
        cancel: CancelSignal,
    ) -> BoxFuture<'static, Result<TestResult>> {
        Box::pin((*self).run(progress_tx, cancel))
    }
}
