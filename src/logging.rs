//! Logger initialisation
//!
//! Uses the log4rs file named in the configuration when it exists, otherwise
//! falls back to env_logger (`RUST_LOG`, default `info`).

use log::{debug, info};
use std::path::Path;

use crate::config::LoggingConfig;
use crate::error::{BinaryDataError, Result};

pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let path = Path::new(&config.config_file);
    if path.exists() {
        log4rs::init_file(path, Default::default())
            .map_err(|e| BinaryDataError::Config(format!("{}: {}", path.display(), e)))?;
        info!("Logging configured from {}", path.display());
        return Ok(());
    }

    let env = env_logger::Env::default().default_filter_or("info");
    if let Err(e) = env_logger::Builder::from_env(env).try_init() {
        // a logger is already installed, keep it
        debug!("Logger already initialised: {}", e);
    }
    Ok(())
}
