//! Periodic telemetry aggregation.
//!
//! Every tick reads the three drives concurrently, reads the two status
//! coils on the main drive, copies the control state, and publishes one
//! [`Snapshot`]. Nothing that goes wrong in a tick stops the loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::DriveError;
use crate::link::{DriveConnector, DriveEndpoint, MainDriveSession};
use crate::registers::{Coil, CoilMap};
use crate::state::{ControlReader, ControlState, Direction};
use crate::telemetry::TelemetrySample;

/// Default time between ticks.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// The published state of the whole machine at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub seq: u64,
    /// RFC 3339, nanosecond precision, UTC.
    pub ts: String,

    pub chain: TelemetrySample,
    pub inner_wheel: TelemetrySample,
    pub outer_wheel: TelemetrySample,

    // Copies of the chain drive fields for older consumers.
    pub voltage: u16,
    pub target_rpm: u16,
    pub actual_rpm: u16,

    pub wheels_running: bool,
    pub paddle_running: bool,
    pub wheel_direction: Direction,
    pub wheel_speed: u16,
    pub chain_speed: u16,
    /// Empty when there is no warning.
    pub direction_warning: String,
}

/// Telemetry of the three drives for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DriveReadings {
    pub chain: TelemetrySample,
    pub inner_wheel: TelemetrySample,
    pub outer_wheel: TelemetrySample,
}

/// Status coils read from the main drive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoilStatus {
    pub wheels_running: bool,
    pub paddle_running: bool,
}

impl Snapshot {
    pub fn assemble(
        seq: u64,
        ts: DateTime<Utc>,
        readings: DriveReadings,
        coils: CoilStatus,
        control: &ControlState,
    ) -> Self {
        Self {
            seq,
            ts: ts.to_rfc3339_opts(SecondsFormat::Nanos, true),
            chain: readings.chain,
            inner_wheel: readings.inner_wheel,
            outer_wheel: readings.outer_wheel,
            voltage: readings.chain.voltage,
            target_rpm: readings.chain.target_rpm,
            actual_rpm: readings.chain.actual_rpm,
            wheels_running: coils.wheels_running,
            paddle_running: coils.paddle_running,
            wheel_direction: control.direction,
            wheel_speed: control.wheel_speed,
            chain_speed: control.chain_speed,
            direction_warning: control.warning_text().to_string(),
        }
    }

    /// One-line console summary.
    pub fn summary(&self) -> String {
        format!(
            "pub seq={} chain[rpm={},A={:.1}] inner[rpm={},A={:.1}] outer[rpm={},A={:.1}] volt={} wheels={} paddle={}",
            self.seq,
            self.chain.actual_rpm,
            self.chain.amps,
            self.inner_wheel.actual_rpm,
            self.inner_wheel.amps,
            self.outer_wheel.actual_rpm,
            self.outer_wheel.amps,
            self.voltage,
            self.wheels_running,
            self.paddle_running,
        )
    }
}

/// Destination of published snapshots.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn publish(&self, snapshot: &Snapshot) -> raptor_common::Result<()>;
}

/// Builds and publishes snapshots on a fixed interval.
pub struct SnapshotPoller<M: MainDriveSession, C: DriveConnector> {
    main: Arc<M>,
    connector: Arc<C>,
    inner: DriveEndpoint,
    outer: DriveEndpoint,
    coils: CoilMap,
    control: ControlReader,
    interval: Duration,
    seq: u64,
}

impl<M: MainDriveSession, C: DriveConnector> SnapshotPoller<M, C> {
    pub fn new(
        main: Arc<M>,
        connector: Arc<C>,
        inner: DriveEndpoint,
        outer: DriveEndpoint,
        coils: CoilMap,
        control: ControlReader,
    ) -> Self {
        Self {
            main,
            connector,
            inner,
            outer,
            coils,
            control,
            interval: DEFAULT_INTERVAL,
            seq: 0,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sequence number of the last assembled snapshot, 0 before the first.
    pub fn last_seq(&self) -> u64 {
        self.seq
    }

    /// Run the loop forever.
    pub async fn run<S: SnapshotSink>(mut self, sink: S) {
        info!(interval_ms = self.interval.as_millis() as u64, "Starting snapshot poller");

        loop {
            let snapshot = self.poll_once().await;

            match sink.publish(&snapshot).await {
                Ok(()) => debug!(seq = snapshot.seq, "Snapshot published"),
                Err(e) => warn!(seq = snapshot.seq, error = %e, "Failed to publish snapshot"),
            }
            info!("{}", snapshot.summary());

            tokio::time::sleep(self.interval).await;
        }
    }

    /// Collect one tick and assign it the next sequence number.
    pub async fn poll_once(&mut self) -> Snapshot {
        let readings = self.read_drives().await;
        let coils = self.read_coils().await;
        let control = self.control.snapshot();

        self.seq += 1;
        Snapshot::assemble(self.seq, Utc::now(), readings, coils, &control)
    }

    async fn read_drives(&self) -> DriveReadings {
        let chain = self.spawn_read(self.main.endpoint());
        let inner = self.spawn_read(&self.inner);
        let outer = self.spawn_read(&self.outer);

        let (chain, inner, outer) = tokio::join!(chain, inner, outer);

        DriveReadings {
            chain: chain.unwrap_or_else(|e| join_failed(e)),
            inner_wheel: inner.unwrap_or_else(|e| join_failed(e)),
            outer_wheel: outer.unwrap_or_else(|e| join_failed(e)),
        }
    }

    fn spawn_read(&self, endpoint: &DriveEndpoint) -> tokio::task::JoinHandle<TelemetrySample> {
        let connector = Arc::clone(&self.connector);
        let endpoint = endpoint.clone();
        tokio::spawn(async move {
            match connector.read_telemetry(&endpoint).await {
                Ok(sample) => sample,
                Err(e) => {
                    warn!(drive = %endpoint, error = %e, "Telemetry read failed");
                    TelemetrySample::default()
                }
            }
        })
    }

    /// Read both status coils. If the main drive cannot be reached for the
    /// first one, the second is not tried this tick, so an unreachable drive
    /// costs one connect timeout rather than two.
    async fn read_coils(&self) -> CoilStatus {
        let wheels = self.main.read_coil(self.coils.wheels_status).await;
        if let Err(e @ DriveError::ConnectFailed { .. }) = &wheels {
            warn!(error = %e, "Main drive unreachable, skipping status coils this tick");
            return CoilStatus::default();
        }

        let paddle = self.main.read_coil(self.coils.chain_status).await;
        CoilStatus {
            wheels_running: coil_or_off(self.coils.wheels_status, wheels),
            paddle_running: coil_or_off(self.coils.chain_status, paddle),
        }
    }
}

fn coil_or_off(coil: Coil, read: crate::error::Result<bool>) -> bool {
    match read {
        Ok(on) => on,
        Err(e) => {
            warn!(coil = %coil, error = %e, "Coil read failed");
            false
        }
    }
}

fn join_failed(e: tokio::task::JoinError) -> TelemetrySample {
    warn!(error = %e, "Telemetry task failed");
    TelemetrySample::default()
}
