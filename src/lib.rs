//! Network measurement engine.
//!
//! Download and upload throughput sampling, latency probing and host network
//! classification behind a single-test orchestrator that streams progress
//! through a per-engine event channel.
//!
//! ```no_run
//! # async fn demo() -> netspeed::Result<()> {
//! use netspeed::{Engine, EventName, Settings, TestConfig, TestKind};
//!
//! let engine = Engine::new(Settings::default())?;
//! let progress = engine.add_listener(EventName::CompleteEpoch, |event| {
//!     println!("{}", event.payload());
//! });
//! let result = engine.run(TestKind::Download, TestConfig::default()).await?;
//! println!("{:.1} Mbps", result.speed_mbps);
//! progress.remove();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod logging;
pub mod network;
pub mod settings;
pub mod speedtest;

pub use config::TestConfig;
pub use engine::{Engine, EngineState};
pub use error::{Error, NetworkError, Result};
pub use events::{EngineEvent, EventChannel, EventName, Subscription, TestId};
pub use network::NetworkClass;
pub use settings::Settings;
pub use speedtest::{ProgressSample, TestKind, TestResult};
