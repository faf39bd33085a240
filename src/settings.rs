use std::time::Duration;

use crate::error::{Error, Result};
use crate::speedtest::ping::{Aggregation, LatencyPolicy};
use crate::speedtest::TestKind;

pub const DEFAULT_DOWNLOAD_URL: &str = "https://httpbin.org/bytes/10485760";
pub const DEFAULT_UPLOAD_URL: &str = "https://httpbin.org/post";
pub const DEFAULT_PING_URL: &str = "https://www.google.com";

/// Engine-wide settings. Per-test knobs live in [`TestConfig`](crate::TestConfig).
#[derive(Debug, Clone)]
pub struct Settings {
    pub download_url: String,
    pub upload_url: String,
    pub ping_url: String,
    pub connect_timeout: Duration,
    pub upload_chunk_size: usize,
    /// Pause between consecutive latency probes.
    pub probe_spacing: Duration,
    pub latency: LatencyPolicy,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_url: DEFAULT_DOWNLOAD_URL.to_string(),
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            ping_url: DEFAULT_PING_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            upload_chunk_size: 64 * 1024,
            probe_spacing: Duration::from_millis(200),
            latency: LatencyPolicy::default(),
            user_agent: concat!("netspeed/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Settings {
    /// Defaults overlaid with `NETSPEED_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(url) = lookup("NETSPEED_DOWNLOAD_URL") {
            settings.download_url = url;
        }
        if let Some(url) = lookup("NETSPEED_UPLOAD_URL") {
            settings.upload_url = url;
        }
        if let Some(url) = lookup("NETSPEED_PING_URL") {
            settings.ping_url = url;
        }
        if let Some(ms) = lookup("NETSPEED_CONNECT_TIMEOUT_MS") {
            settings.connect_timeout =
                Duration::from_millis(parse_num("NETSPEED_CONNECT_TIMEOUT_MS", &ms)?);
        }
        if let Some(size) = lookup("NETSPEED_UPLOAD_CHUNK_SIZE") {
            settings.upload_chunk_size =
                parse_num("NETSPEED_UPLOAD_CHUNK_SIZE", &size)? as usize;
        }
        if let Some(ms) = lookup("NETSPEED_PROBE_SPACING_MS") {
            settings.probe_spacing =
                Duration::from_millis(parse_num("NETSPEED_PROBE_SPACING_MS", &ms)?);
        }
        if let Some(agg) = lookup("NETSPEED_LATENCY_AGGREGATION") {
            settings.latency.aggregation = match agg.to_ascii_lowercase().as_str() {
                "mean" => Aggregation::Mean,
                "median" => Aggregation::Median,
                other => {
                    return Err(Error::InvalidConfig(format!(
                        "NETSPEED_LATENCY_AGGREGATION: unknown value `{other}`"
                    )))
                }
            };
        }
        if let Some(ratio) = lookup("NETSPEED_MIN_SUCCESS_RATIO") {
            settings.latency.min_success_ratio = ratio.trim().parse().map_err(|_| {
                Error::InvalidConfig(format!(
                    "NETSPEED_MIN_SUCCESS_RATIO: `{ratio}` is not a number"
                ))
            })?;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.upload_chunk_size == 0 {
            return Err(Error::InvalidConfig(
                "upload chunk size must be greater than zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.latency.min_success_ratio) {
            return Err(Error::InvalidConfig("min success ratio must be within [0, 1]".into()));
        }
        Ok(())
    }

    pub fn default_url(&self, kind: TestKind) -> &str {
        match kind {
            TestKind::Download => &self.download_url,
            TestKind::Upload => &self.upload_url,
            TestKind::Ping => &self.ping_url,
        }
    }
}

fn parse_num(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{key}: `{value}` is not a number")))
}
