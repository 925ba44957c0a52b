//! Raptor Common Library
//!
//! Shared building blocks for the Raptor drive bridges:
//!
//! - [`config`] - Zenoh and logging configuration (JSON5 format)
//! - [`serialization`] - JSON/CBOR encoding and decoding
//! - [`session`] - Zenoh session management
//! - [`topics`] - Key expression builders for site/device topics
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod serialization;
pub mod session;
pub mod topics;

pub use config::{LogFormat, LoggingConfig, ZenohConfig, load_config, parse_config};
pub use error::{Error, Result};
pub use serialization::{Format, decode, decode_auto, encode};
pub use session::connect;
pub use topics::{DEFAULT_ROOT, TopicBuilder};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level when it is set.
///
/// # Example
///
/// ```ignore
/// use raptor_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
