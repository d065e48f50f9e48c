//! Logging Module
//!
//! Initializes application logging with tracing: a compact console layer
//! always, plus a daily-rolling file layer when a log directory is
//! configured.

use crate::config::LoggingConfig;
use crate::{GatewayError, Result};
use tracing::{debug, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    // Config level is the default; RUST_LOG wins when set
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_target(false)
        .with_level(true)
        .compact();

    let file_layer = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                GatewayError::IoError(format!(
                    "failed to create log directory {:?}: {}",
                    dir, e
                ))
            })?;

            let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, "s3-gateway.log");

            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file_appender)
                    .with_ansi(false)
                    .with_target(true)
                    .with_level(true)
                    .compact(),
            )
        }
        None => None,
    };

    let result = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    match result {
        Ok(()) => {
            if let Some(dir) = &config.log_dir {
                info!("Application logs also written to {:?}", dir);
            }
        }
        Err(_) => {
            // Already initialized, likely in tests
            debug!("Tracing subscriber already initialized, skipping");
        }
    }

    Ok(())
}
