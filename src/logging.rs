use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    /// Log destination. Logging stays off without one, since stderr belongs
    /// to the terminal UI.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// `NETSPEED_LOG` for the level, `NETSPEED_LOG_FILE` for the destination.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(level) = std::env::var("NETSPEED_LOG") {
            config.level = level;
        }
        config.file = std::env::var_os("NETSPEED_LOG_FILE").map(PathBuf::from);
        config
    }
}

/// Initialize logging. `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let Some(path) = &config.file else {
        return Ok(());
    };

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            Error::InvalidConfig(format!("cannot open log file {}: {e}", path.display()))
        })?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init()
        .map_err(|e| Error::InvalidConfig(format!("failed to init logging: {e}")))?;

    Ok(())
}
