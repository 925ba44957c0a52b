use zenoh::Session;

use crate::config::ZenohConfig;
use crate::error::{Error, Result};

/// Build a zenoh configuration from ours.
fn build_config(config: &ZenohConfig) -> Result<zenoh::Config> {
    let mut zenoh_config = zenoh::Config::default();

    let mode_str = match config.mode.as_str() {
        "client" | "peer" | "router" => format!("\"{}\"", config.mode),
        other => {
            return Err(Error::Config(format!(
                "Invalid Zenoh mode: '{}'. Expected 'client', 'peer', or 'router'",
                other
            )));
        }
    };

    zenoh_config
        .insert_json5("mode", &mode_str)
        .map_err(|e| Error::Config(format!("Failed to set mode: {}", e)))?;

    if !config.connect.is_empty() {
        let endpoints_json = serde_json::to_string(&config.connect)?;
        zenoh_config
            .insert_json5("connect/endpoints", &endpoints_json)
            .map_err(|e| Error::Config(format!("Failed to set connect endpoints: {}", e)))?;
    }

    if !config.listen.is_empty() {
        let endpoints_json = serde_json::to_string(&config.listen)?;
        zenoh_config
            .insert_json5("listen/endpoints", &endpoints_json)
            .map_err(|e| Error::Config(format!("Failed to set listen endpoints: {}", e)))?;
    }

    match (&config.username, &config.password) {
        (Some(user), Some(password)) => {
            zenoh_config
                .insert_json5("transport/auth/usrpwd/user", &serde_json::to_string(user)?)
                .map_err(|e| Error::Config(format!("Failed to set user: {}", e)))?;
            zenoh_config
                .insert_json5(
                    "transport/auth/usrpwd/password",
                    &serde_json::to_string(password)?,
                )
                .map_err(|e| Error::Config(format!("Failed to set password: {}", e)))?;
        }
        (None, None) => {}
        _ => {
            return Err(Error::Config(
                "Zenoh username and password must be set together".to_string(),
            ));
        }
    }

    Ok(zenoh_config)
}

/// Connect to Zenoh using the provided configuration.
pub async fn connect(config: &ZenohConfig) -> Result<Session> {
    let zenoh_config = build_config(config)?;

    tracing::info!(
        mode = %config.mode,
        connect = ?config.connect,
        listen = ?config.listen,
        authenticated = config.username.is_some(),
        "Connecting to Zenoh"
    );

    let session = zenoh::open(zenoh_config).await?;

    tracing::info!(zid = %session.zid(), "Connected to Zenoh");

    Ok(session)
}
