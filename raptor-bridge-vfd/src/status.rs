//! Bridge status reporting on `<prefix>/@/status`.

use serde::{Deserialize, Serialize};

use crate::publisher::Publisher;

/// Bridge name in status messages.
pub const BRIDGE_NAME: &str = "vfd";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    Running,
    Offline,
}

/// Configured drive addresses, as reported in the status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveAddresses {
    pub main: String,
    pub inner_wheel: String,
    pub outer_wheel: String,
}

/// Bridge status information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStatus {
    pub bridge: String,
    pub version: String,
    pub status: BridgeState,
    pub site: String,
    pub device: String,
    pub drives: DriveAddresses,
    pub direction_control: bool,
}

impl BridgeStatus {
    pub fn running(
        site: impl Into<String>,
        device: impl Into<String>,
        drives: DriveAddresses,
        direction_control: bool,
    ) -> Self {
        Self {
            bridge: BRIDGE_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            status: BridgeState::Running,
            site: site.into(),
            device: device.into(),
            drives,
            direction_control,
        }
    }

    /// Same identity, marked offline.
    pub fn offline(&self) -> Self {
        Self {
            status: BridgeState::Offline,
            ..self.clone()
        }
    }
}

/// Publishes the running status on startup and offline on shutdown.
pub struct StatusPublisher {
    publisher: Publisher,
    status: BridgeStatus,
}

impl StatusPublisher {
    /// `publisher` must point at the status key.
    pub fn new(publisher: Publisher, status: BridgeStatus) -> Self {
        Self { publisher, status }
    }

    pub async fn publish_running(&self) -> raptor_common::Result<()> {
        self.publisher.put(&self.status).await
    }

    pub async fn publish_offline(&self) -> raptor_common::Result<()> {
        self.publisher.put(&self.status.offline()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status() -> BridgeStatus {
        BridgeStatus::running(
            "mill",
            "raptor1",
            DriveAddresses {
                main: "192.168.1.152:502".to_string(),
                inner_wheel: "192.168.1.153:502".to_string(),
                outer_wheel: "192.168.1.154:502".to_string(),
            },
            false,
        )
    }

    #[test]
    fn test_status_running() {
        let status = status();
        assert_eq!(status.bridge, "vfd");
        assert_eq!(status.status, BridgeState::Running);
        assert_eq!(status.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_status_offline_keeps_identity() {
        let offline = status().offline();
        assert_eq!(offline.status, BridgeState::Offline);
        assert_eq!(offline.site, "mill");
        assert_eq!(offline.drives.outer_wheel, "192.168.1.154:502");
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_value(status()).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["bridge"], "vfd");
        assert_eq!(json["drives"]["main"], "192.168.1.152:502");
        assert_eq!(json["direction_control"], false);
    }
}
