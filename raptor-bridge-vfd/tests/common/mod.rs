//! In-memory drives for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use raptor_bridge_vfd::coordinator::{DualWriteCoordinator, SpeedLimits, WheelSettings};
use raptor_bridge_vfd::error::{DriveError, Result};
use raptor_bridge_vfd::link::{DriveConnector, DriveEndpoint, DriveRole, MainDriveSession};
use raptor_bridge_vfd::registers::{Coil, Param, WritePolicy};
use raptor_bridge_vfd::telemetry::TelemetrySample;
use tokio::sync::Barrier;

pub const WHEEL_LIMITS: SpeedLimits = SpeedLimits { min: 100, max: 1500 };
pub const CHAIN_LIMITS: SpeedLimits = SpeedLimits { min: 100, max: 1200 };
pub const OUTER_RATIO: f64 = 0.9167;

pub fn main_endpoint() -> DriveEndpoint {
    DriveEndpoint::new(DriveRole::Main, "192.168.1.152", 502, 1)
}

pub fn inner_endpoint() -> DriveEndpoint {
    DriveEndpoint::new(DriveRole::InnerWheel, "192.168.1.153", 502, 1)
}

pub fn outer_endpoint() -> DriveEndpoint {
    DriveEndpoint::new(DriveRole::OuterWheel, "192.168.1.151", 502, 1)
}

pub fn wheel_settings() -> WheelSettings {
    WheelSettings {
        limits: WHEEL_LIMITS,
        outer_ratio: OUTER_RATIO,
    }
}

pub fn coordinator(
    connector: &Arc<FakeConnector>,
    direction_control: bool,
) -> DualWriteCoordinator<FakeConnector> {
    DualWriteCoordinator::new(
        Arc::clone(connector),
        inner_endpoint(),
        outer_endpoint(),
        WritePolicy::with_direction_control(direction_control),
        wheel_settings(),
    )
}

/// A register write seen by a fake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Write {
    pub role: DriveRole,
    pub param: Param,
    pub value: u16,
}

/// Fresh-connection drive access with scriptable per-drive failures.
#[derive(Default)]
pub struct FakeConnector {
    writes: Mutex<Vec<Write>>,
    failing_writes: Mutex<HashSet<DriveRole>>,
    failing_reads: Mutex<HashSet<DriveRole>>,
    telemetry: Mutex<HashMap<DriveRole, TelemetrySample>>,
    rendezvous: Option<Arc<Barrier>>,
    read_rendezvous: Option<Arc<Barrier>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every write waits until `parties` writes are in flight at once.
    pub fn with_rendezvous(parties: usize) -> Arc<Self> {
        Arc::new(Self {
            rendezvous: Some(Arc::new(Barrier::new(parties))),
            ..Self::default()
        })
    }

    /// Every telemetry read waits until `parties` reads are in flight at once.
    pub fn with_read_rendezvous(parties: usize) -> Arc<Self> {
        Arc::new(Self {
            read_rendezvous: Some(Arc::new(Barrier::new(parties))),
            ..Self::default()
        })
    }

    pub fn fail_writes(&self, role: DriveRole) {
        self.failing_writes.lock().unwrap().insert(role);
    }

    pub fn heal_writes(&self) {
        self.failing_writes.lock().unwrap().clear();
    }

    pub fn fail_reads(&self, role: DriveRole) {
        self.failing_reads.lock().unwrap().insert(role);
    }

    pub fn heal_reads(&self) {
        self.failing_reads.lock().unwrap().clear();
    }

    pub fn set_telemetry(&self, role: DriveRole, sample: TelemetrySample) {
        self.telemetry.lock().unwrap().insert(role, sample);
    }

    /// Attempted writes, including failed ones.
    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().unwrap().clone()
    }

    pub fn writes_to(&self, role: DriveRole) -> Vec<Write> {
        self.writes().into_iter().filter(|w| w.role == role).collect()
    }
}

#[async_trait]
impl DriveConnector for FakeConnector {
    async fn read_telemetry(&self, endpoint: &DriveEndpoint) -> Result<TelemetrySample> {
        if let Some(barrier) = &self.read_rendezvous {
            barrier.wait().await;
        }

        if self.failing_reads.lock().unwrap().contains(&endpoint.role) {
            return Err(DriveError::TelemetryUnavailable {
                role: endpoint.role,
                addr: endpoint.addr(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(self
            .telemetry
            .lock()
            .unwrap()
            .get(&endpoint.role)
            .copied()
            .unwrap_or_default())
    }

    async fn write_register(&self, endpoint: &DriveEndpoint, param: Param, value: u16) -> Result<()> {
        self.writes.lock().unwrap().push(Write {
            role: endpoint.role,
            param,
            value,
        });

        if let Some(barrier) = &self.rendezvous {
            barrier.wait().await;
        }

        if self.failing_writes.lock().unwrap().contains(&endpoint.role) {
            return Err(DriveError::WriteFailed {
                role: endpoint.role,
                addr: endpoint.addr(),
                target: param.to_string(),
                value,
                reason: "connection reset".to_string(),
            });
        }
        Ok(())
    }
}

/// One call seen on the main drive session, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainCall {
    WriteCoil(Coil, bool),
    ReadCoil(Coil),
    WriteRegister(Param, u16),
}

/// The persistent main-drive connection.
pub struct FakeMain {
    endpoint: DriveEndpoint,
    calls: Mutex<Vec<MainCall>>,
    coils: Mutex<HashMap<Coil, bool>>,
    fail_writes: Mutex<bool>,
    fail_reads: Mutex<bool>,
    unreachable: Mutex<bool>,
}

impl FakeMain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            endpoint: main_endpoint(),
            calls: Mutex::new(Vec::new()),
            coils: Mutex::new(HashMap::new()),
            fail_writes: Mutex::new(false),
            fail_reads: Mutex::new(false),
            unreachable: Mutex::new(false),
        })
    }

    pub fn set_coil(&self, coil: Coil, on: bool) {
        self.coils.lock().unwrap().insert(coil, on);
    }

    pub fn fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap() = fail;
    }

    pub fn fail_reads(&self, fail: bool) {
        *self.fail_reads.lock().unwrap() = fail;
    }

    /// Coil reads fail to connect, as when the drive is powered off.
    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock().unwrap() = unreachable;
    }

    pub fn calls(&self) -> Vec<MainCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<MainCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, MainCall::ReadCoil(_)))
            .collect()
    }

    fn write_failed(&self, target: String, value: u16) -> DriveError {
        DriveError::WriteFailed {
            role: DriveRole::Main,
            addr: self.endpoint.addr(),
            target,
            value,
            reason: "broken pipe".to_string(),
        }
    }
}

#[async_trait]
impl MainDriveSession for FakeMain {
    fn endpoint(&self) -> &DriveEndpoint {
        &self.endpoint
    }

    async fn write_coil(&self, coil: Coil, on: bool) -> Result<()> {
        self.calls.lock().unwrap().push(MainCall::WriteCoil(coil, on));
        if *self.fail_writes.lock().unwrap() {
            return Err(self.write_failed(coil.to_string(), u16::from(on)));
        }
        self.coils.lock().unwrap().insert(coil, on);
        Ok(())
    }

    async fn read_coil(&self, coil: Coil) -> Result<bool> {
        self.calls.lock().unwrap().push(MainCall::ReadCoil(coil));
        if *self.unreachable.lock().unwrap() {
            return Err(DriveError::ConnectFailed {
                role: DriveRole::Main,
                addr: self.endpoint.addr(),
                reason: "connect timed out".to_string(),
            });
        }
        if *self.fail_reads.lock().unwrap() {
            return Err(DriveError::TelemetryUnavailable {
                role: DriveRole::Main,
                addr: self.endpoint.addr(),
                reason: format!("{}: timeout", coil),
            });
        }
        Ok(self.coils.lock().unwrap().get(&coil).copied().unwrap_or(false))
    }

    async fn write_register(&self, param: Param, value: u16) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(MainCall::WriteRegister(param, value));
        if *self.fail_writes.lock().unwrap() {
            return Err(self.write_failed(param.to_string(), value));
        }
        Ok(())
    }
}
