//! Test orchestration: the single active-test slot, unit selection, event
//! aggregation and cancellation.

use futures::FutureExt;
use parking_lot::Mutex;
use reqwest::Client;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, info, warn};

use crate::config::{ResolvedConfig, TestConfig};
use crate::error::{Error, NetworkError, Result};
use crate::events::{EngineEvent, EventChannel, EventName, Subscription, TestId};
use crate::network::{self, InterfaceSource, NetworkClass};
use crate::settings::Settings;
use crate::speedtest::download::DownloadTest;
use crate::speedtest::ping::{HttpProbe, PingTest, Probe, TcpProbe};
use crate::speedtest::upload::UploadTest;
use crate::speedtest::{cancel_pair, CancelHandle, CancelSignal, Measurement, TestKind, TestResult};

/// Snapshot of the orchestrator's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running {
        test: TestId,
        kind: TestKind,
        started_at: Instant,
    },
}

struct ActiveTest {
    id: TestId,
    kind: TestKind,
    started_at: Instant,
    cancel: CancelHandle,
}

enum Slot {
    Idle,
    Running(ActiveTest),
}

struct Inner {
    settings: Settings,
    client: Client,
    runtime: Handle,
    events: EventChannel,
    slot: Mutex<Slot>,
    idle: Notify,
    next_id: AtomicU64,
    available: AtomicBool,
    interfaces: Arc<dyn InterfaceSource>,
}

/// Network measurement engine. Cheap to clone; clones share one test slot.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    /// Must be called from within a tokio runtime.
    pub fn new(settings: Settings) -> Result<Self> {
        Self::with_interface_source(settings, Arc::from(network::host_source()))
    }

    pub fn with_interface_source(
        settings: Settings,
        interfaces: Arc<dyn InterfaceSource>,
    ) -> Result<Self> {
        settings.validate()?;
        let runtime = Handle::try_current().map_err(|_| Error::ModuleUnavailable)?;

        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| {
                warn!(error = %e, "failed to build http client");
                Error::ModuleUnavailable
            })?;

        Ok(Self {
            inner: Arc::new(Inner {
                settings,
                client,
                runtime,
                events: EventChannel::new(),
                slot: Mutex::new(Slot::Idle),
                idle: Notify::new(),
                next_id: AtomicU64::new(1),
                available: AtomicBool::new(true),
                interfaces,
            }),
        })
    }

    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn events(&self) -> &EventChannel {
        &self.inner.events
    }

    pub fn add_listener<F>(&self, name: EventName, handler: F) -> Subscription
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.inner.events.add_listener(name, handler)
    }

    pub fn remove_all_listeners(&self, name: Option<EventName>) {
        self.inner.events.remove_all_listeners(name)
    }

    pub fn state(&self) -> EngineState {
        match &*self.inner.slot.lock() {
            Slot::Idle => EngineState::Idle,
            Slot::Running(active) => EngineState::Running {
                test: active.id,
                kind: active.kind,
                started_at: active.started_at,
            },
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(&*self.inner.slot.lock(), Slot::Running(_))
    }

    /// Synchronous network classification.
    pub fn classify(&self) -> NetworkClass {
        network::classify_with(self.inner.interfaces.as_ref())
    }

    pub async fn network_type(&self) -> NetworkClass {
        let interfaces = self.inner.interfaces.clone();
        tokio::task::spawn_blocking(move || network::classify_with(interfaces.as_ref()))
            .await
            .unwrap_or(NetworkClass::Unknown)
    }

    pub fn test_download_speed(&self, config: TestConfig) -> Result<TestId> {
        self.start(TestKind::Download, config)
    }

    pub fn test_upload_speed(&self, config: TestConfig) -> Result<TestId> {
        self.start(TestKind::Upload, config)
    }

    pub fn test_ping(&self, config: TestConfig) -> Result<TestId> {
        self.start(TestKind::Ping, config)
    }

    /// Starts a test. Results arrive only through events.
    pub fn start(&self, kind: TestKind, config: TestConfig) -> Result<TestId> {
        let id = self.reserve_id();
        self.launch(id, kind, config)?;
        Ok(id)
    }

    /// Starts a test and resolves with its terminal event.
    pub async fn run(&self, kind: TestKind, config: TestConfig) -> Result<TestResult> {
        let id = self.reserve_id();
        let (tx, rx) = oneshot::channel();
        let result_slot = Mutex::new(Some(tx));

        let subscription = RemoveOnDrop(self.inner.events.add_any_listener(move |event| {
            if event.test_id() != id || !event.is_terminal() {
                return;
            }
            let Some(tx) = result_slot.lock().take() else {
                return;
            };
            let outcome = match event {
                EngineEvent::CompleteTest { result, .. } => Ok(result.clone()),
                EngineEvent::ErrorTest { error, .. } => Err(error.clone()),
                _ => Err(Error::CancelledByCaller),
            };
            let _ = tx.send(outcome);
        }));

        self.launch(id, kind, config)?;
        let outcome = rx.await.unwrap_or(Err(Error::ModuleUnavailable));
        drop(subscription);
        outcome
    }

    /// Requests cancellation of the active test. Returns `false` when idle.
    pub fn cancel_test(&self) -> bool {
        match &*self.inner.slot.lock() {
            Slot::Idle => false,
            Slot::Running(active) => {
                if !active.cancel.is_cancelled() {
                    info!(test = %active.id, kind = %active.kind, "cancelling test");
                }
                active.cancel.cancel();
                true
            }
        }
    }

    /// Resolves once no test is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }

    /// Cancels any active test and refuses new ones.
    pub fn shutdown(&self) {
        self.inner.available.store(false, Ordering::SeqCst);
        self.cancel_test();
    }

    fn reserve_id(&self) -> TestId {
        TestId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn launch(&self, id: TestId, kind: TestKind, config: TestConfig) -> Result<()> {
        if !self.is_available() {
            return Err(Error::ModuleUnavailable);
        }
        if let Slot::Running(active) = &*self.inner.slot.lock() {
            return Err(Error::AlreadyRunning { kind: active.kind });
        }

        let resolved = config.resolve(kind, self.inner.settings.default_url(kind))?;
        let url = resolved.url.clone();
        let unit = self.build_unit(kind, resolved)?;
        self.install(id, kind, url.as_str(), unit)
    }

    /// Claims the slot for `unit` and spawns it.
    fn install(
        &self,
        id: TestId,
        kind: TestKind,
        target: &str,
        unit: Box<dyn Measurement>,
    ) -> Result<()> {
        let (cancel, signal) = cancel_pair();

        {
            let mut slot = self.inner.slot.lock();
            if let Slot::Running(active) = &*slot {
                return Err(Error::AlreadyRunning { kind: active.kind });
            }
            *slot = Slot::Running(ActiveTest {
                id,
                kind,
                started_at: Instant::now(),
                cancel,
            });
        }

        info!(test = %id, %kind, %target, "test started");
        self.inner
            .runtime
            .spawn(drive(self.inner.clone(), id, kind, unit, signal));
        Ok(())
    }

    /// Picks the producer for the test kind and URL scheme.
    fn build_unit(&self, kind: TestKind, resolved: ResolvedConfig) -> Result<Box<dyn Measurement>> {
        let settings = &self.inner.settings;
        let client = self.inner.client.clone();
        let ResolvedConfig { url, config } = resolved;

        let unit: Box<dyn Measurement> = match (kind, url.scheme()) {
            (TestKind::Download, "http" | "https") => Box::new(DownloadTest::new(
                client,
                url,
                config.timeout(),
                config.report_interval(),
            )),
            (TestKind::Upload, "http" | "https") => Box::new(UploadTest::new(
                client,
                url,
                config.timeout(),
                config.report_interval(),
                settings.upload_chunk_size,
                config.upload_bytes,
            )),
            (TestKind::Ping, scheme @ ("http" | "https" | "tcp")) => {
                let probe: Box<dyn Probe> = if scheme == "tcp" {
                    Box::new(TcpProbe::from_url(&url)?)
                } else {
                    Box::new(HttpProbe::new(client, url))
                };
                Box::new(PingTest::new(
                    probe,
                    config.probe_count(),
                    config.timeout(),
                    settings.probe_spacing,
                    settings.latency,
                ))
            }
            (kind, scheme) => {
                return Err(Error::UnsupportedPlatform(format!(
                    "no {kind} transport for `{scheme}` urls"
                )))
            }
        };
        Ok(unit)
    }
}

/// Runs one unit to completion, forwarding its samples as epoch events.
async fn drive(
    inner: Arc<Inner>,
    id: TestId,
    kind: TestKind,
    unit: Box<dyn Measurement>,
    signal: CancelSignal,
) {
    let (progress_tx, mut progress_rx) = mpsc::channel(32);
    let events = inner.events.clone();

    let measure = AssertUnwindSafe(unit.measure(progress_tx, signal)).catch_unwind();
    let forward = async {
        while let Some(sample) = progress_rx.recv().await {
            events.emit(EngineEvent::CompleteEpoch {
                test: id,
                kind,
                sample,
            });
        }
    };

    let (outcome, ()) = tokio::join!(measure, forward);
    let outcome = outcome.unwrap_or_else(|_| {
        Err(NetworkError::Transport(format!("{kind} measurement panicked")).into())
    });
    inner.finish(id, kind, outcome);
}

impl Inner {
    /// Emits the terminal event and frees the slot in one step, so the
    /// terminal event is queued before any later test can start.
    fn finish(&self, id: TestId, kind: TestKind, outcome: Result<TestResult>) {
        let mut slot = self.slot.lock();
        let cancelled = match &*slot {
            Slot::Running(active) if active.id == id => active.cancel.is_cancelled(),
            _ => {
                warn!(test = %id, "finished test does not own the slot");
                return;
            }
        };

        let event = match outcome {
            _ if cancelled => {
                info!(test = %id, %kind, "test cancelled");
                EngineEvent::TestCanceled { test: id, kind }
            }
            Err(Error::CancelledByCaller) => EngineEvent::TestCanceled { test: id, kind },
            Ok(result) => {
                info!(
                    test = %id,
                    %kind,
                    speed_mbps = result.speed_mbps,
                    latency_ms = ?result.latency_ms,
                    "test complete"
                );
                EngineEvent::CompleteTest {
                    test: id,
                    kind,
                    result,
                }
            }
            Err(error) => {
                warn!(test = %id, %kind, %error, "test failed");
                EngineEvent::ErrorTest {
                    test: id,
                    kind,
                    error,
                }
            }
        };

        if !self.events.emit(event) {
            debug!(test = %id, "event dispatcher gone");
        }
        *slot = Slot::Idle;
        drop(slot);
        self.idle.notify_waiters();
    }
}

struct RemoveOnDrop(Subscription);

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        self.0.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::StaticSource;
    use crate::speedtest::ProgressSample;
    use futures::future::BoxFuture;
    use std::time::Duration;

    /// Ignores cancellation and finishes with whatever it is handed.
    struct Held {
        outcome: oneshot::Receiver<Result<TestResult>>,
    }

    impl Measurement for Held {
        fn measure(
            self: Box<Self>,
            _progress_tx: mpsc::Sender<ProgressSample>,
            _cancel: CancelSignal,
        ) -> BoxFuture<'static, Result<TestResult>> {
            let Held { outcome } = *self;
            Box::pin(async move { outcome.await.unwrap_or(Err(Error::ModuleUnavailable)) })
        }
    }

    fn finished() -> TestResult {
        TestResult {
            kind: TestKind::Download,
            speed_mbps: 80.0,
            latency_ms: None,
            jitter_ms: None,
            bytes: 10_000_000,
            elapsed: Duration::from_secs(1),
        }
    }

    /// Runs a held unit, optionally cancels it, then lets it finish.
    async fn settle(cancel_first: bool, outcome: Result<TestResult>) -> (TestId, Vec<EngineEvent>) {
        let engine =
            Engine::with_interface_source(Settings::default(), Arc::new(StaticSource(None)))
                .unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = engine
            .events()
            .add_any_listener(move |event| sink.lock().push(event.clone()));

        let (release, held) = oneshot::channel();
        let id = engine.reserve_id();
        engine
            .install(id, TestKind::Download, "held", Box::new(Held { outcome: held }))
            .unwrap();
        if cancel_first {
            assert!(engine.cancel_test());
        }
        release.send(outcome).unwrap();

        tokio::time::timeout(Duration::from_secs(2), engine.wait_idle())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!engine.cancel_test());
        let events = seen.lock().clone();
        (id, events)
    }

    #[tokio::test]
    async fn success_after_cancel_is_reported_as_cancelled() {
        let (id, events) = settle(true, Ok(finished())).await;
        assert_eq!(
            events,
            vec![EngineEvent::TestCanceled {
                test: id,
                kind: TestKind::Download
            }]
        );
    }

    #[tokio::test]
    async fn failure_after_cancel_is_reported_as_cancelled() {
        let (id, events) = settle(true, Err(NetworkError::Timeout.into())).await;
        assert_eq!(
            events,
            vec![EngineEvent::TestCanceled {
                test: id,
                kind: TestKind::Download
            }]
        );
    }

    #[tokio::test]
    async fn uncancelled_success_completes() {
        let (id, events) = settle(false, Ok(finished())).await;
        assert_eq!(
            events,
            vec![EngineEvent::CompleteTest {
                test: id,
                kind: TestKind::Download,
                result: finished(),
            }]
        );
    }

    #[tokio::test]
    async fn second_install_is_rejected() {
        let engine =
            Engine::with_interface_source(Settings::default(), Arc::new(StaticSource(None)))
                .unwrap();
        let (release, held) = oneshot::channel();
        let first = engine.reserve_id();
        engine
            .install(first, TestKind::Upload, "held", Box::new(Held { outcome: held }))
            .unwrap();

        let (_keep, other) = oneshot::channel();
        let err = engine
            .install(
                engine.reserve_id(),
                TestKind::Ping,
                "held",
                Box::new(Held { outcome: other }),
            )
            .unwrap_err();
        assert_eq!(err, Error::AlreadyRunning { kind: TestKind::Upload });

        release.send(Ok(finished())).unwrap();
        tokio::time::timeout(Duration::from_secs(2), engine.wait_idle())
            .await
            .unwrap();
    }
}
