//! Modbus-TCP links to the drives.
//!
//! Two kinds of connection exist:
//!
//! - [`DriveConnector`]: a fresh connection per operation. Used for every
//!   telemetry read and for all child-drive writes; reused child sockets were
//!   seen to drop writes silently.
//! - [`MainDriveSession`]: the one long-lived connection to the main drive,
//!   shared by the dispatcher and the poll loop and serialized by a single
//!   owner.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{DriveError, Result};
use crate::registers::{Coil, Param, TELEMETRY_LEN, TELEMETRY_START};
use crate::telemetry::TelemetrySample;

/// Position of a drive in the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveRole {
    /// Chain/paddle drive running the soft-PLC.
    Main,
    /// Child drive of the inner wheel.
    InnerWheel,
    /// Child drive of the outer wheel.
    OuterWheel,
}

impl DriveRole {
    /// Capitalized name for operator-facing messages.
    pub fn label(&self) -> &'static str {
        match self {
            DriveRole::Main => "Chain",
            DriveRole::InnerWheel => "Inner wheel",
            DriveRole::OuterWheel => "Outer wheel",
        }
    }
}

impl fmt::Display for DriveRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriveRole::Main => write!(f, "chain"),
            DriveRole::InnerWheel => write!(f, "inner wheel"),
            DriveRole::OuterWheel => write!(f, "outer wheel"),
        }
    }
}

/// Network address of one drive.
///
/// The host may be an IP address or a name; names are resolved on every
/// connect, inside the connect timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveEndpoint {
    pub role: DriveRole,
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
}

impl DriveEndpoint {
    pub fn new(role: DriveRole, host: impl Into<String>, port: u16, unit_id: u8) -> Self {
        Self {
            role,
            host: host.into(),
            port,
            unit_id,
        }
    }

    /// `host:port`, with IPv6 literals bracketed.
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// True if both endpoints name the same host and port.
    pub fn same_target(&self, other: &DriveEndpoint) -> bool {
        self.port == other.port && self.host.eq_ignore_ascii_case(&other.host)
    }
}

impl fmt::Display for DriveEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.role, self.addr())
    }
}

/// Connect and per-call timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTimeouts {
    pub connect: Duration,
    pub io: Duration,
}

impl LinkTimeouts {
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            connect: timeout,
            io: timeout,
        }
    }
}

/// Operations that open a fresh connection, do one thing, and close it.
#[async_trait]
pub trait DriveConnector: Send + Sync + 'static {
    /// Read the telemetry block of a drive.
    async fn read_telemetry(&self, endpoint: &DriveEndpoint) -> Result<TelemetrySample>;

    /// Write one holding register.
    ///
    /// Callers are expected to have checked the write against the
    /// [`WritePolicy`](crate::registers::WritePolicy).
    async fn write_register(&self, endpoint: &DriveEndpoint, param: Param, value: u16)
    -> Result<()>;
}

/// Operations on the persistent main-drive connection.
#[async_trait]
pub trait MainDriveSession: Send + Sync + 'static {
    /// Endpoint of the main drive.
    fn endpoint(&self) -> &DriveEndpoint;

    /// Write a soft-PLC coil.
    async fn write_coil(&self, coil: Coil, on: bool) -> Result<()>;

    /// Read a soft-PLC coil.
    async fn read_coil(&self, coil: Coil) -> Result<bool>;

    /// Write one holding register of the main drive.
    async fn write_register(&self, param: Param, value: u16) -> Result<()>;
}

async fn open(endpoint: &DriveEndpoint, timeout: Duration) -> Result<Context> {
    let connect_failed = |reason: String| DriveError::ConnectFailed {
        role: endpoint.role,
        addr: endpoint.addr(),
        reason,
    };

    let connect = async {
        let addr = tokio::net::lookup_host((endpoint.host.as_str(), endpoint.port))
            .await?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no address for {}", endpoint.host),
                )
            })?;
        tcp::connect_slave(addr, Slave(endpoint.unit_id)).await
    };

    tokio::time::timeout(timeout, connect)
        .await
        .map_err(|_| connect_failed("connection timeout".to_string()))?
        .map_err(|e| connect_failed(e.to_string()))
}

async fn close(endpoint: &DriveEndpoint, mut ctx: Context) {
    if let Err(e) = ctx.disconnect().await {
        debug!(drive = %endpoint, error = %e, "Disconnect failed");
    }
}

/// [`DriveConnector`] over Modbus-TCP.
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    read: LinkTimeouts,
    write: LinkTimeouts,
}

impl TcpConnector {
    pub fn new(read: LinkTimeouts, write: LinkTimeouts) -> Self {
        Self { read, write }
    }
}

#[async_trait]
impl DriveConnector for TcpConnector {
    async fn read_telemetry(&self, endpoint: &DriveEndpoint) -> Result<TelemetrySample> {
        let unavailable = |reason: String| DriveError::TelemetryUnavailable {
            role: endpoint.role,
            addr: endpoint.addr(),
            reason,
        };

        let address = TELEMETRY_START.address()?;
        let mut ctx = open(endpoint, self.read.connect)
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let words = tokio::time::timeout(
            self.read.io,
            ctx.read_holding_registers(address, TELEMETRY_LEN),
        )
        .await
        .map_err(|_| unavailable("read timeout".to_string()))?
        .map_err(|e| unavailable(e.to_string()))?
        .map_err(|e| unavailable(format!("exception: {:?}", e)))?;

        close(endpoint, ctx).await;

        TelemetrySample::decode(&words).ok_or_else(|| {
            unavailable(format!(
                "short read: got {} registers, need {}",
                words.len(),
                TELEMETRY_LEN
            ))
        })
    }

    async fn write_register(
        &self,
        endpoint: &DriveEndpoint,
        param: Param,
        value: u16,
    ) -> Result<()> {
        let write_failed = |reason: String| DriveError::WriteFailed {
            role: endpoint.role,
            addr: endpoint.addr(),
            target: param.to_string(),
            value,
            reason,
        };

        let address = param.address()?;
        let mut ctx = open(endpoint, self.write.connect).await?;

        tokio::time::timeout(self.write.io, ctx.write_single_register(address, value))
            .await
            .map_err(|_| write_failed("write timeout".to_string()))?
            .map_err(|e| write_failed(e.to_string()))?
            .map_err(|e| write_failed(format!("exception: {:?}", e)))?;

        close(endpoint, ctx).await;
        debug!(drive = %endpoint, register = %param, value, "Register written");
        Ok(())
    }
}

/// A request on the main-drive connection.
#[derive(Debug, Clone, Copy)]
enum MainOp {
    WriteCoil { address: u16, on: bool },
    ReadCoil { address: u16 },
    WriteRegister { address: u16, value: u16 },
}

async fn execute(ctx: &mut Context, op: MainOp) -> tokio_modbus::Result<Option<bool>> {
    match op {
        MainOp::WriteCoil { address, on } => {
            Ok(ctx.write_single_coil(address, on).await?.map(|()| None))
        }
        MainOp::ReadCoil { address } => Ok(ctx
            .read_coils(address, 1)
            .await?
            .map(|bits| bits.first().copied())),
        MainOp::WriteRegister { address, value } => Ok(ctx
            .write_single_register(address, value)
            .await?
            .map(|()| None)),
    }
}

/// [`MainDriveSession`] over one persistent Modbus-TCP connection.
///
/// The context lives behind a mutex so exactly one request is on the stream
/// at a time. A transport error or timeout drops the context; the next call
/// reconnects.
pub struct MainDriveConnection {
    endpoint: DriveEndpoint,
    timeouts: LinkTimeouts,
    ctx: Mutex<Option<Context>>,
}

impl MainDriveConnection {
    /// Connect to the main drive. Failure here is a startup error.
    pub async fn connect(endpoint: DriveEndpoint, timeouts: LinkTimeouts) -> Result<Self> {
        let ctx = open(&endpoint, timeouts.connect).await?;
        info!(drive = %endpoint, "Connected to main drive");

        Ok(Self {
            endpoint,
            timeouts,
            ctx: Mutex::new(Some(ctx)),
        })
    }

    async fn run(
        &self,
        op: MainOp,
        fail: impl Fn(String) -> DriveError,
    ) -> Result<Option<bool>> {
        let mut guard = self.ctx.lock().await;

        let mut ctx = match guard.take() {
            Some(ctx) => ctx,
            None => {
                let ctx = open(&self.endpoint, self.timeouts.connect).await?;
                info!(drive = %self.endpoint, "Reconnected to main drive");
                ctx
            }
        };

        match tokio::time::timeout(self.timeouts.io, execute(&mut ctx, op)).await {
            Ok(Ok(Ok(value))) => {
                *guard = Some(ctx);
                Ok(value)
            }
            Ok(Ok(Err(exception))) => {
                *guard = Some(ctx);
                Err(fail(format!("exception: {:?}", exception)))
            }
            Ok(Err(e)) => {
                warn!(drive = %self.endpoint, error = %e, "Transport error, dropping connection");
                Err(fail(e.to_string()))
            }
            Err(_) => {
                warn!(drive = %self.endpoint, "Request timeout, dropping connection");
                Err(fail("timeout".to_string()))
            }
        }
    }

    fn write_failed(&self, target: String, value: u16) -> impl Fn(String) -> DriveError + '_ {
        move |reason| DriveError::WriteFailed {
            role: self.endpoint.role,
            addr: self.endpoint.addr(),
            target: target.clone(),
            value,
            reason,
        }
    }
}

#[async_trait]
impl MainDriveSession for MainDriveConnection {
    fn endpoint(&self) -> &DriveEndpoint {
        &self.endpoint
    }

    async fn write_coil(&self, coil: Coil, on: bool) -> Result<()> {
        let op = MainOp::WriteCoil {
            address: coil.address()?,
            on,
        };
        self.run(op, self.write_failed(coil.to_string(), u16::from(on)))
            .await
            .map(|_| ())
    }

    async fn read_coil(&self, coil: Coil) -> Result<bool> {
        let op = MainOp::ReadCoil {
            address: coil.address()?,
        };
        let unavailable = |reason: String| DriveError::TelemetryUnavailable {
            role: self.endpoint.role,
            addr: self.endpoint.addr(),
            reason: format!("{}: {}", coil, reason),
        };

        self.run(op, unavailable)
            .await?
            .ok_or_else(|| DriveError::TelemetryUnavailable {
                role: self.endpoint.role,
                addr: self.endpoint.addr(),
                reason: format!("{}: empty response", coil),
            })
    }

    async fn write_register(&self, param: Param, value: u16) -> Result<()> {
        let op = MainOp::WriteRegister {
            address: param.address()?,
            value,
        };
        self.run(op, self.write_failed(param.to_string(), value))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(role: DriveRole) -> DriveEndpoint {
        DriveEndpoint::new(role, "192.168.1.153", 502, 1)
    }

    #[test]
    fn test_role_names() {
        assert_eq!(DriveRole::Main.to_string(), "chain");
        assert_eq!(DriveRole::InnerWheel.to_string(), "inner wheel");
        assert_eq!(DriveRole::OuterWheel.label(), "Outer wheel");
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(
            endpoint(DriveRole::InnerWheel).to_string(),
            "inner wheel (192.168.1.153:502)"
        );
    }

    #[test]
    fn test_endpoint_addr_forms() {
        let named = DriveEndpoint::new(DriveRole::Main, "vfd-main.local", 502, 1);
        assert_eq!(named.addr(), "vfd-main.local:502");

        let v6 = DriveEndpoint::new(DriveRole::Main, "fd00::152", 1502, 1);
        assert_eq!(v6.addr(), "[fd00::152]:1502");

        let upper = DriveEndpoint::new(DriveRole::InnerWheel, "VFD-MAIN.local", 502, 1);
        assert!(named.same_target(&upper));
        assert!(!named.same_target(&DriveEndpoint::new(DriveRole::Main, "vfd-main.local", 503, 1)));
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_connect_failed() {
        let ep = DriveEndpoint::new(DriveRole::InnerWheel, "no-such-drive.invalid", 502, 1);

        let err = open(&ep, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, DriveError::ConnectFailed { .. }));
        assert_eq!(err.role(), Some(DriveRole::InnerWheel));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_failed() {
        // Port 1 on loopback is closed on any sane test host.
        let ep = DriveEndpoint::new(DriveRole::OuterWheel, "127.0.0.1", 1, 1);
        let connector = TcpConnector::new(
            LinkTimeouts::uniform(Duration::from_millis(500)),
            LinkTimeouts::uniform(Duration::from_millis(500)),
        );

        let err = connector
            .write_register(&ep, crate::registers::SPEED_SETPOINT, 600)
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::ConnectFailed { .. }));
        assert_eq!(err.role(), Some(DriveRole::OuterWheel));

        let err = connector.read_telemetry(&ep).await.unwrap_err();
        assert!(matches!(err, DriveError::TelemetryUnavailable { .. }));
    }
}
