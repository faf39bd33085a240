use futures::future::BoxFuture;
use futures::StreamExt;
use reqwest::{Client, Url};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;

use super::meter::ThroughputMeter;
use super::{CancelSignal, Measurement, ProgressSample, TestKind, TestResult};
use crate::error::{Error, NetworkError, Result};

/// Timed streaming download against a single endpoint.
pub struct DownloadTest {
    client: Client,
    url: Url,
    timeout: Duration,
    report_interval: Duration,
}

impl DownloadTest {
    pub fn new(client: Client, url: Url, timeout: Duration, report_interval: Duration) -> Self {
        Self {
            client,
            url,
            timeout,
            report_interval,
        }
    }

    pub async fn run(
        self,
        progress_tx: mpsc::Sender<ProgressSample>,
        mut cancel: CancelSignal,
    ) -> Result<TestResult> {
        let start = Instant::now();
        let deadline = tokio::time::Instant::from_std(start + self.timeout);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::CancelledByCaller),
            _ = tokio::time::sleep_until(deadline) => return Err(NetworkError::Timeout.into()),
            response = self.client.get(self.url.clone()).send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::Status {
                status: status.as_u16(),
                url: self.url.to_string(),
            }
            .into());
        }

        let mut meter = ThroughputMeter::new(start, self.timeout, response.content_length());
        let mut stream = response.bytes_stream();
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::from_std(start + self.report_interval),
            self.report_interval,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut timed_out = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(bytes = meter.total(), "download cancelled");
                    return Err(Error::CancelledByCaller);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    timed_out = true;
                    break;
                }
                tick = ticker.tick() => {
                    let _ = progress_tx.send(meter.tick(tick.into_std())).await;
                }
                chunk = stream.next() => match chunk {
                    Some(Ok(chunk)) => meter.record(chunk.len()),
                    // An endpoint hanging up mid-body still gave us a measurement.
                    Some(Err(e)) if meter.total() > 0 => {
                        debug!(error = %e, bytes = meter.total(), "download stream ended early");
                        break;
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                },
            }
        }
        drop(stream);

        if meter.total() == 0 {
            return Err(if timed_out {
                NetworkError::Timeout
            } else {
                NetworkError::EmptyResponse
            }
            .into());
        }

        let (speed_mbps, elapsed) = meter.finish(Instant::now());
        debug!(bytes = meter.total(), ?elapsed, timed_out, "download finished");

        Ok(TestResult {
            kind: TestKind::Download,
            speed_mbps,
            latency_ms: None,
            jitter_ms: None,
            bytes: meter.total(),
            elapsed,
        })
    }
}

impl Measurement for DownloadTest {
    fn measure(
        self: Box<Self>,
        progress_tx: mpsc::Sender<ProgressSample>,
        cancel: CancelSignal,
    ) -> BoxFuture<'static, Result<TestResult>> {
        Box::pin((*self).run(progress_tx, cancel))
    }
}
