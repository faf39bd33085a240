//! Per-engine event channel.
//!
//! Producers push events into an unbounded queue; a single dispatcher task
//! drains it and invokes listeners, so delivery order equals emit order and
//! producers never wait on listeners.

use parking_lot::RwLock;
use serde_json::{json, Value};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{error, trace};

use crate::error::Error;
use crate::speedtest::{ProgressSample, TestKind, TestResult};

/// Identifies one test run within an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestId(pub u64);

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    CompleteEpoch,
    CompleteTest,
    ErrorTest,
    TestCanceled,
}

impl EventName {
    pub const ALL: [EventName; 4] = [
        EventName::CompleteEpoch,
        EventName::CompleteTest,
        EventName::ErrorTest,
        EventName::TestCanceled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventName::CompleteEpoch => "onCompleteEpoch",
            EventName::CompleteTest => "onCompleteTest",
            EventName::ErrorTest => "onErrorTest",
            EventName::TestCanceled => "onTestCanceled",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown event `{s}`")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    CompleteEpoch {
        test: TestId,
        kind: TestKind,
        sample: ProgressSample,
    },
    CompleteTest {
        test: TestId,
        kind: TestKind,
        result: TestResult,
    },
    ErrorTest {
        test: TestId,
        kind: TestKind,
        error: Error,
    },
    TestCanceled {
        test: TestId,
        kind: TestKind,
    },
}

impl EngineEvent {
    pub fn name(&self) -> EventName {
        match self {
            EngineEvent::CompleteEpoch { .. } => EventName::CompleteEpoch,
            EngineEvent::CompleteTest { .. } => EventName::CompleteTest,
            EngineEvent::ErrorTest { .. } => EventName::ErrorTest,
            EngineEvent::TestCanceled { .. } => EventName::TestCanceled,
        }
    }

    pub fn test_id(&self) -> TestId {
        match self {
            EngineEvent::CompleteEpoch { test, .. }
            | EngineEvent::CompleteTest { test, .. }
            | EngineEvent::ErrorTest { test, .. }
            | EngineEvent::TestCanceled { test, .. } => *test,
        }
    }

    pub fn kind(&self) -> TestKind {
        match self {
            EngineEvent::CompleteEpoch { kind, .. }
            | EngineEvent::CompleteTest { kind, .. }
            | EngineEvent::ErrorTest { kind, .. }
            | EngineEvent::TestCanceled { kind, .. } => *kind,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EngineEvent::CompleteEpoch { .. })
    }

    /// Payload in the shape the mobile bridge emits.
    pub fn payload(&self) -> Value {
        match self {
            EngineEvent::CompleteEpoch { kind, sample, .. } => json!({
                "type": kind,
                "speed": sample.speed_mbps,
                "progress": sample.elapsed_percent,
                "latency": sample.latency_ms,
            }),
            EngineEvent::CompleteTest { kind, result, .. } => json!({
                "type": kind,
                "speed": result.speed_mbps,
                "latency": result.latency_ms,
                "jitter": result.jitter_ms,
            }),
            EngineEvent::ErrorTest { kind, error, .. } => json!({
                "type": kind,
                "error": error.code(),
                "message": error.to_string(),
            }),
            EngineEvent::TestCanceled { kind, .. } => json!({ "type": kind }),
        }
    }
}

type Handler = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

struct Listener {
    id: u64,
    name: Option<EventName>,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<Listener>,
}

impl Registry {
    fn handlers_for(&self, name: EventName) -> Vec<Handler> {
        self.listeners
            .iter()
            .filter(|l| l.name.map_or(true, |n| n == name))
            .map(|l| l.handler.clone())
            .collect()
    }
}

#[derive(Clone)]
pub struct EventChannel {
    tx: mpsc::UnboundedSender<EngineEvent>,
    registry: Arc<RwLock<Registry>>,
}

impl EventChannel {
    /// Must be called inside a tokio runtime; spawns the dispatcher task.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(RwLock::new(Registry::default()));
        tokio::spawn(dispatch(rx, registry.clone()));
        Self { tx, registry }
    }

    /// Queues an event. Returns `false` once the dispatcher is gone.
    pub fn emit(&self, event: EngineEvent) -> bool {
        trace!(event = %event.name(), test = %event.test_id(), "emit");
        self.tx.send(event).is_ok()
    }

    pub fn add_listener<F>(&self, name: EventName, handler: F) -> Subscription
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.register(Some(name), Arc::new(handler))
    }

    /// Listener for every event name.
    pub fn add_any_listener<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    /// Drops listeners for `name`, or every listener when `None`.
    pub fn remove_all_listeners(&self, name: Option<EventName>) {
        let mut registry = self.registry.write();
        match name {
            Some(name) => registry.listeners.retain(|l| l.name != Some(name)),
            None => registry.listeners.clear(),
        }
    }

    pub fn listener_count(&self, name: EventName) -> usize {
        self.registry
            .read()
            .listeners
            .iter()
            .filter(|l| l.name == Some(name))
            .count()
    }

    fn register(&self, name: Option<EventName>, handler: Handler) -> Subscription {
        let mut registry = self.registry.write();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.push(Listener { id, name, handler });
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
            removed: AtomicBool::new(false),
        }
    }
}

async fn dispatch(mut rx: mpsc::UnboundedReceiver<EngineEvent>, registry: Arc<RwLock<Registry>>) {
    while let Some(event) = rx.recv().await {
        // Snapshot so handlers may add or remove listeners.
        let handlers = registry.read().handlers_for(event.name());
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                error!(event = %event.name(), "event listener panicked");
            }
        }
    }
}

/// Handle returned by `add_listener`. Dropping it keeps the listener.
pub struct Subscription {
    id: u64,
    registry: Weak<RwLock<Registry>>,
    removed: AtomicBool,
}

impl Subscription {
    /// Unsubscribes. Safe to call any number of times.
    pub fn remove(&self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.write().listeners.retain(|l| l.id != self.id);
        }
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("removed", &self.is_removed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn canceled(id: u64) -> EngineEvent {
        EngineEvent::TestCanceled {
            test: TestId(id),
            kind: TestKind::Upload,
        }
    }

    fn epoch(id: u64, speed: f64) -> EngineEvent {
        EngineEvent::CompleteEpoch {
            test: TestId(id),
            kind: TestKind::Download,
            sample: ProgressSample {
                speed_mbps: speed,
                elapsed_percent: 10.0,
                elapsed: Duration::from_secs(1),
                latency_ms: None,
            },
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[test]
    fn names_round_trip() {
        for name in EventName::ALL {
            assert_eq!(name.as_str().parse::<EventName>().unwrap(), name);
        }
        assert!("onProgressTest".parse::<EventName>().is_err());
    }

    #[tokio::test]
    async fn delivers_in_order_to_matching_listeners() {
        let channel = EventChannel::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = channel.add_listener(EventName::CompleteEpoch, move |e| {
            if let EngineEvent::CompleteEpoch { sample, .. } = e {
                sink.lock().push(sample.speed_mbps);
            }
        });

        for i in 0..5 {
            channel.emit(epoch(1, i as f64));
        }
        channel.emit(canceled(1));
        settle().await;

        assert_eq!(*seen.lock(), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let channel = EventChannel::new();
        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();
        let sub = channel.add_listener(EventName::TestCanceled, move |_| *counter.lock() += 1);

        channel.emit(canceled(1));
        settle().await;
        sub.remove();
        sub.remove();
        channel.emit(canceled(2));
        settle().await;

        assert_eq!(*hits.lock(), 1);
        assert!(sub.is_removed());
        assert_eq!(channel.listener_count(EventName::TestCanceled), 0);
    }

    #[tokio::test]
    async fn remove_all_by_name() {
        let channel = EventChannel::new();
        let _a = channel.add_listener(EventName::CompleteTest, |_| {});
        let _b = channel.add_listener(EventName::ErrorTest, |_| {});
        channel.remove_all_listeners(Some(EventName::CompleteTest));
        assert_eq!(channel.listener_count(EventName::CompleteTest), 0);
        assert_eq!(channel.listener_count(EventName::ErrorTest), 1);
        channel.remove_all_listeners(None);
        assert_eq!(channel.listener_count(EventName::ErrorTest), 0);
    }

    #[tokio::test]
    async fn panicking_listener_does_not_stop_dispatch() {
        let channel = EventChannel::new();
        let _bad = channel.add_listener(EventName::TestCanceled, |_| panic!("boom"));
        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();
        let _good = channel.add_listener(EventName::TestCanceled, move |_| *counter.lock() += 1);

        channel.emit(canceled(1));
        channel.emit(canceled(2));
        settle().await;
        assert_eq!(*hits.lock(), 2);
    }

    #[test]
    fn bridge_payloads() {
        let payload = epoch(3, 12.5).payload();
        assert_eq!(payload["speed"], 12.5);
        assert_eq!(payload["progress"], 10.0);
        assert_eq!(payload["type"], "download");

        let err = EngineEvent::ErrorTest {
            test: TestId(4),
            kind: TestKind::Ping,
            error: Error::CancelledByCaller,
        };
        assert_eq!(err.payload()["error"], "CANCELLED");
        assert!(err.is_terminal());
        assert!(!epoch(3, 1.0).is_terminal());
    }
}
