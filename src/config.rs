//! Per-test configuration.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::speedtest::TestKind;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_REPORT_INTERVAL_MS: u64 = 1_000;

/// Configuration of a single test. Field names on the wire follow the bridge
/// shape: `{ url, timeout, reportInterval, count, uploadBytes }`.
///
/// The bridge's `epochSize` is accepted and ignored: no native module ever
/// read it, and the sampling cadence is set by `reportInterval` alone.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TestConfig {
    /// Endpoint; `None` uses the engine default for the test kind.
    pub url: Option<String>,
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,
    #[serde(rename = "reportInterval")]
    pub report_interval_ms: u64,
    /// Probe count for ping tests.
    #[serde(rename = "count")]
    pub sample_count: Option<u32>,
    /// Cap on the generated upload payload. Unbounded when `None`.
    pub upload_bytes: Option<u64>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            report_interval_ms: DEFAULT_REPORT_INTERVAL_MS,
            sample_count: None,
            upload_bytes: None,
        }
    }
}

impl TestConfig {
    /// Ping tests have no default timeout.
    pub fn ping(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            ..Self::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_sample_count(mut self, count: u32) -> Self {
        self.sample_count = Some(count);
        self
    }

    pub fn with_upload_bytes(mut self, bytes: u64) -> Self {
        self.upload_bytes = Some(bytes);
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    pub fn probe_count(&self) -> u32 {
        self.sample_count.unwrap_or(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig("timeout must be greater than zero".into()));
        }
        if self.report_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "report interval must be greater than zero".into(),
            ));
        }
        if self.sample_count == Some(0) {
            return Err(Error::InvalidConfig("probe count must be greater than zero".into()));
        }
        if self.upload_bytes == Some(0) {
            return Err(Error::InvalidConfig("upload size must be greater than zero".into()));
        }
        if let Some(url) = &self.url {
            if url.trim().is_empty() {
                return Err(Error::InvalidConfig("url must not be empty".into()));
            }
        }
        Ok(())
    }

    /// Validated config with its endpoint resolved against `default_url`.
    pub(crate) fn resolve(self, kind: TestKind, default_url: &str) -> Result<ResolvedConfig> {
        self.validate()?;
        let raw = self.url.clone().unwrap_or_else(|| default_url.to_string());
        let url = reqwest::Url::parse(&raw)
            .map_err(|e| Error::InvalidConfig(format!("invalid {kind} url `{raw}`: {e}")))?;
        Ok(ResolvedConfig { url, config: self })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ResolvedConfig {
    pub url: reqwest::Url,
    pub config: TestConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_bridge_defaults() {
        let config = TestConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.report_interval(), Duration::from_secs(1));
        assert_eq!(config.probe_count(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_bridge_json() {
        let config = TestConfig::from_json(
            r#"{"url":"https://example.com/ping","timeout":1500,"count":5}"#,
        )
        .unwrap();
        assert_eq!(config.url.as_deref(), Some("https://example.com/ping"));
        assert_eq!(config.timeout_ms, 1500);
        assert_eq!(config.report_interval_ms, DEFAULT_REPORT_INTERVAL_MS);
        assert_eq!(config.probe_count(), 5);
    }

    #[test]
    fn epoch_size_is_accepted_and_ignored() {
        let config = TestConfig::from_json(
            r#"{"url":"https://example.com/bytes/100","epochSize":8,"reportInterval":250}"#,
        )
        .unwrap();
        assert_eq!(config.report_interval(), Duration::from_millis(250));
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(
            config,
            TestConfig::default()
                .with_url("https://example.com/bytes/100")
                .with_report_interval(Duration::from_millis(250))
        );
    }

    #[test]
    fn rejects_zero_values() {
        assert!(matches!(
            TestConfig::ping(0).validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(TestConfig::default()
            .with_report_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(TestConfig::ping(100).with_sample_count(0).validate().is_err());
        assert!(TestConfig::default().with_upload_bytes(0).validate().is_err());
    }

    #[test]
    fn resolve_uses_default_url() {
        let resolved = TestConfig::default()
            .resolve(TestKind::Download, "https://example.com/bytes/10")
            .unwrap();
        assert_eq!(resolved.url.as_str(), "https://example.com/bytes/10");
    }

    #[test]
    fn resolve_rejects_garbage_url() {
        let err = TestConfig::default()
            .with_url("not a url")
            .resolve(TestKind::Upload, "https://example.com")
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
    }

    #[test]
    fn bad_json_is_invalid_config() {
        assert!(matches!(
            TestConfig::from_json("{\"timeout\": \"soon\"}"),
            Err(Error::InvalidConfig(_))
        ));
    }
}
