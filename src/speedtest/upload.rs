use futures::future::BoxFuture;
use futures::Stream;
use rand::{RngCore, SeedableRng};
use reqwest::{header, Body, Client, Url};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;

use super::meter::ThroughputMeter;
use super::{CancelSignal, Measurement, ProgressSample, TestKind, TestResult};
use crate::error::{Error, NetworkError, Result};

/// Timed streaming upload of generated data.
pub struct UploadTest {
    client: Client,
    url: Url,
    timeout: Duration,
    report_interval: Duration,
    chunk: Arc<Vec<u8>>,
    limit: Option<u64>,
}

impl UploadTest {
    pub fn new(
        client: Client,
        url: Url,
        timeout: Duration,
        report_interval: Duration,
        chunk_size: usize,
        limit: Option<u64>,
    ) -> Self {
        let mut rng = rand::rngs::StdRng::from_entropy();
        let mut chunk = vec![0u8; chunk_size.max(1)];
        rng.fill_bytes(&mut chunk);
        Self {
            client,
            url,
            timeout,
            report_interval,
            chunk: Arc::new(chunk),
            limit,
        }
    }

    pub async fn run(
        self,
        progress_tx: mpsc::Sender<ProgressSample>,
        mut cancel: CancelSignal,
    ) -> Result<TestResult> {
        let start = Instant::now();
        let deadline = tokio::time::Instant::from_std(start + self.timeout);
        let sent = Arc::new(AtomicU64::new(0));

        let body = Body::wrap_stream(payload(self.chunk.clone(), self.limit, sent.clone()));
        let request = self
            .client
            .post(self.url.clone())
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send();
        tokio::pin!(request);

        let mut meter = ThroughputMeter::new(start, self.timeout, self.limit);
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
                    debug!(bytes = sent.load(Ordering::Relaxed), "upload cancelled");
                    return Err(Error::CancelledByCaller);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    timed_out = true;
                    break;
                }
                tick = ticker.tick() => {
                    meter.set_total(sent.load(Ordering::Relaxed));
                    let _ = progress_tx.send(meter.tick(tick.into_std())).await;
                }
                response = &mut request => {
                    let response = response?;
                    let status = response.status();
                    if !status.is_success() {
                        return Err(NetworkError::Status {
                            status: status.as_u16(),
                            url: self.url.to_string(),
                        }
                        .into());
                    }
                    break;
                }
            }
        }

        meter.set_total(sent.load(Ordering::Relaxed));
        if meter.total() == 0 {
            return Err(NetworkError::Timeout.into());
        }

        let (speed_mbps, elapsed) = meter.finish(Instant::now());
        debug!(bytes = meter.total(), ?elapsed, timed_out, "upload finished");

        Ok(TestResult {
            kind: TestKind::Upload,
            speed_mbps,
            latency_ms: None,
            jitter_ms: None,
            bytes: meter.total(),
            elapsed,
        })
    }
}

/// Endless (or `limit`-capped) body stream, counting bytes as the client pulls them.
fn payload(
    chunk: Arc<Vec<u8>>,
    limit: Option<u64>,
    sent: Arc<AtomicU64>,
) -> impl Stream<Item = std::io::Result<Vec<u8>>> + Send + 'static {
    futures::stream::unfold(0u64, move |produced| {
        let chunk = chunk.clone();
        let sent = sent.clone();
        async move {
            let remaining = limit.map_or(u64::MAX, |limit| limit.saturating_sub(produced));
            if remaining == 0 {
                return None;
            }
            let len = (chunk.len() as u64).min(remaining) as usize;
            sent.fetch_add(len as u64, Ordering::Relaxed);
            Some((Ok(chunk[..len].to_vec()), produced + len as u64))
        }
    })
}

impl Measurement for UploadTest {
    fn measure(
        self: Box<Self>,
        progress_tx: mpsc::Sender<ProgressSample>,
        cancel: CancelSignal,
    ) -> BoxFuture<'static, Result<TestResult>> {
        Box::pin((*self).run(progress_tx, cancel))
    }
}
