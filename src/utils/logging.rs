//! Global `tracing` subscriber setup.
//!
//! `RUST_LOG` takes precedence over the configured level, e.g.
//! `RUST_LOG=wirekit::protocol=debug`.

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

/// Install a fmt subscriber (plain or JSON) as the global default.
///
/// Returns `Ok(false)` when a global subscriber was already installed, which
/// is what happens when tests or a host application got there first.
pub fn init_logging(config: &LoggingConfig) -> Result<bool> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.log_level.as_str().to_ascii_lowercase())
            .map_err(|e| ProtocolError::ConfigError(format!("Invalid log filter: {e}")))?,
    };

    let installed = if config.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_ok()
    };

    if installed {
        info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    }
    Ok(installed)
}
