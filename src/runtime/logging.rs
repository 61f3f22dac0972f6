//! Log subscriber installation.
//!
//! The editor owns the terminal, so logging is off unless a level is
//! configured, and goes to a file when one is given.

use super::config::BridgeConfig;
use super::error::{BridgeError, BridgeResult};
use once_cell::sync::OnceCell;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, EnvFilter};

static LOGGING: OnceCell<()> = OnceCell::new();

/// Install the global subscriber described by `config`, at most once per
/// process. Returns whether logging is active.
pub fn init_logging(config: &BridgeConfig) -> BridgeResult<bool> {
    if LOGGING.get().is_some() {
        return Ok(true);
    }
    let Some(level) = config.log_level.as_deref() else {
        return Ok(false);
    };

    let filter = EnvFilter::try_new(level)
        .map_err(|err| BridgeError::Config(format!("invalid log level '{}': {}", level, err)))?;

    let writer = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    LOGGING.get_or_try_init(|| {
        // Another subscriber may already be set by an embedding process.
        let _ = fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .try_init();
        Ok::<(), BridgeError>(())
    })?;
    Ok(true)
}
