//! Same-register writes to both wheel drives.
//!
//! The wheels are mechanically coupled, so "both drives took the write" and
//! "only one did" must be told apart. Each write gets its own fresh
//! connection and its own task; both tasks are joined before the combined
//! outcome is classified.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{DriveError, Result};
use crate::link::{DriveConnector, DriveEndpoint};
use crate::registers::{DIRECTION, Param, SPEED_SETPOINT, WritePolicy};
use crate::state::{ControlStore, Direction};

/// Warning stored when neither wheel changed direction.
pub const BOTH_FAILED_WARNING: &str = "Direction change failed on both wheels";

/// Inclusive speed range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedLimits {
    pub min: u16,
    pub max: u16,
}

impl SpeedLimits {
    pub fn clamp(&self, speed: u16) -> u16 {
        speed.clamp(self.min, self.max)
    }

    pub fn contains(&self, speed: u16) -> bool {
        (self.min..=self.max).contains(&speed)
    }
}

/// Outer wheel target for an inner wheel speed.
pub fn outer_wheel_speed(speed: u16, ratio: f64) -> u16 {
    (f64::from(speed) * ratio)
        .round()
        .clamp(0.0, f64::from(u16::MAX)) as u16
}

/// Combined result of one write to both wheels.
#[derive(Debug, Clone)]
pub enum DualWriteOutcome {
    BothOk,
    InnerFailed(DriveError),
    OuterFailed(DriveError),
    BothFailed { inner: DriveError, outer: DriveError },
}

impl DualWriteOutcome {
    pub fn classify(inner: Result<()>, outer: Result<()>) -> Self {
        match (inner, outer) {
            (Ok(()), Ok(())) => DualWriteOutcome::BothOk,
            (Err(inner), Ok(())) => DualWriteOutcome::InnerFailed(inner),
            (Ok(()), Err(outer)) => DualWriteOutcome::OuterFailed(outer),
            (Err(inner), Err(outer)) => DualWriteOutcome::BothFailed { inner, outer },
        }
    }

    pub fn is_both_ok(&self) -> bool {
        matches!(self, DualWriteOutcome::BothOk)
    }
}

/// Result of a wheel speed command.
#[derive(Debug, Clone)]
pub struct SpeedOutcome {
    /// Clamped speed sent to the inner wheel and recorded in the state.
    pub inner_speed: u16,
    /// Ratio-adjusted speed sent to the outer wheel.
    pub outer_speed: u16,
    pub writes: DualWriteOutcome,
}

/// Speed limits and gearing compensation of the wheel pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelSettings {
    pub limits: SpeedLimits,
    pub outer_ratio: f64,
}

/// Executes paired writes against the inner and outer wheel drives.
pub struct DualWriteCoordinator<C: DriveConnector> {
    connector: Arc<C>,
    inner: DriveEndpoint,
    outer: DriveEndpoint,
    policy: WritePolicy,
    wheels: WheelSettings,
}

impl<C: DriveConnector> DualWriteCoordinator<C> {
    pub fn new(
        connector: Arc<C>,
        inner: DriveEndpoint,
        outer: DriveEndpoint,
        policy: WritePolicy,
        wheels: WheelSettings,
    ) -> Self {
        Self {
            connector,
            inner,
            outer,
            policy,
            wheels,
        }
    }

    pub fn policy(&self) -> WritePolicy {
        self.policy
    }

    /// Change the direction of both wheels.
    ///
    /// State handling by outcome:
    /// - both ok: direction updated, warning cleared
    /// - both failed: direction kept, warning set
    /// - one failed: direction updated to follow the drive that moved,
    ///   warning names the wheel that did not
    ///
    /// Returns `WriteRefused` without touching the drives or the state when
    /// direction control is disabled.
    pub async fn set_direction(
        &self,
        requested: Direction,
        store: &ControlStore,
    ) -> Result<DualWriteOutcome> {
        let value = requested.register_value();
        self.policy.check(DIRECTION, value)?;

        info!(direction = %requested, register = %DIRECTION, value, "Setting wheel direction");

        let outcome = self.write_both(DIRECTION, value, value).await;

        match &outcome {
            DualWriteOutcome::BothOk => {
                info!(direction = %requested, "Direction set on both wheels");
                store.update(|s| {
                    s.direction = requested;
                    s.mismatch_warning = None;
                });
            }
            DualWriteOutcome::BothFailed { inner, outer } => {
                error!(
                    direction = %requested,
                    inner = %inner,
                    outer = %outer,
                    "Direction change failed on both wheels"
                );
                store.update(|s| s.mismatch_warning = Some(BOTH_FAILED_WARNING.to_string()));
            }
            DualWriteOutcome::InnerFailed(err) => {
                warn!(direction = %requested, error = %err, "Inner wheel failed, outer wheel changed direction");
                store.update(|s| {
                    s.direction = requested;
                    s.mismatch_warning = Some(mismatch_warning(&self.inner));
                });
            }
            DualWriteOutcome::OuterFailed(err) => {
                warn!(direction = %requested, error = %err, "Outer wheel failed, inner wheel changed direction");
                store.update(|s| {
                    s.direction = requested;
                    s.mismatch_warning = Some(mismatch_warning(&self.outer));
                });
            }
        }

        Ok(outcome)
    }

    /// Set the wheel speed.
    ///
    /// The request is clamped into the configured limits; the outer wheel
    /// gets the clamped speed times the gearing ratio. The recorded speed is
    /// updated once both writes have finished, whatever their result.
    pub async fn set_speed(&self, requested: u16, store: &ControlStore) -> Result<SpeedOutcome> {
        let inner_speed = self.wheels.limits.clamp(requested);
        if inner_speed != requested {
            warn!(requested, clamped = inner_speed, "Wheel speed clamped");
        }
        let outer_speed = outer_wheel_speed(inner_speed, self.wheels.outer_ratio);

        self.policy.check(SPEED_SETPOINT, inner_speed)?;
        self.policy.check(SPEED_SETPOINT, outer_speed)?;

        let writes = self
            .write_both(SPEED_SETPOINT, inner_speed, outer_speed)
            .await;

        match &writes {
            DualWriteOutcome::BothOk => {}
            DualWriteOutcome::InnerFailed(err) | DualWriteOutcome::OuterFailed(err) => {
                warn!(error = %err, "Wheel speed write failed on one drive");
            }
            DualWriteOutcome::BothFailed { inner, outer } => {
                warn!(inner = %inner, outer = %outer, "Wheel speed write failed on both drives");
            }
        }

        store.update(|s| s.wheel_speed = inner_speed);
        info!(
            inner = inner_speed,
            outer = outer_speed,
            ratio = self.wheels.outer_ratio,
            "Wheel speed set"
        );

        Ok(SpeedOutcome {
            inner_speed,
            outer_speed,
            writes,
        })
    }

    async fn write_both(&self, param: Param, inner_value: u16, outer_value: u16) -> DualWriteOutcome {
        let inner = self.spawn_write(&self.inner, param, inner_value);
        let outer = self.spawn_write(&self.outer, param, outer_value);

        let (inner, outer) = tokio::join!(inner, outer);

        DualWriteOutcome::classify(
            joined(inner, &self.inner, param, inner_value),
            joined(outer, &self.outer, param, outer_value),
        )
    }

    fn spawn_write(&self, endpoint: &DriveEndpoint, param: Param, value: u16) -> JoinHandle<Result<()>> {
        let connector = Arc::clone(&self.connector);
        let endpoint = endpoint.clone();
        tokio::spawn(async move {
            let result = connector.write_register(&endpoint, param, value).await;
            if result.is_ok() {
                info!(drive = %endpoint, register = %param, value, "Write ok");
            }
            result
        })
    }
}

fn joined(
    handle: std::result::Result<Result<()>, tokio::task::JoinError>,
    endpoint: &DriveEndpoint,
    param: Param,
    value: u16,
) -> Result<()> {
    handle.unwrap_or_else(|e| {
        Err(DriveError::WriteFailed {
            role: endpoint.role,
            addr: endpoint.addr(),
            target: param.to_string(),
            value,
            reason: format!("write task failed: {}", e),
        })
    })
}

fn mismatch_warning(failed: &DriveEndpoint) -> String {
    format!(
        "WARNING: {} ({}) direction change failed - wheels may be mismatched!",
        failed.role.label(),
        failed.host
    )
}
