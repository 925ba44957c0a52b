//! Operator commands and the serial dispatcher that executes them.

use std::sync::Arc;

use raptor_common::decode_auto;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zenoh::Session;

use crate::coordinator::{DualWriteCoordinator, SpeedLimits};
use crate::error::Result;
use crate::link::{DriveConnector, MainDriveSession};
use crate::registers::{CoilMap, SPEED_SETPOINT};
use crate::state::{ControlReader, ControlStore, Direction};

/// Default depth of the command queue.
pub const QUEUE_CAPACITY: usize = 16;

/// One inbound command. Every field is optional and absent fields cause no
/// I/O at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wheels_running: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_running: Option<bool>,
    /// `"fwd"` or `"rev"`; anything else is taken as forward.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wheel_direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wheel_speed: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_speed: Option<u16>,
}

impl Command {
    /// Decode a bus payload (JSON, or CBOR when it does not look like JSON).
    pub fn from_payload(payload: &[u8]) -> raptor_common::Result<Self> {
        decode_auto(payload)
    }

    pub fn is_empty(&self) -> bool {
        self.wheels_running.is_none()
            && self.chain_running.is_none()
            && self.wheel_direction.is_none()
            && self.wheel_speed.is_none()
            && self.chain_speed.is_none()
    }
}

/// Single consumer of the command queue.
///
/// Owns the [`ControlStore`]; nothing else writes control state. One command
/// is executed at a time and its fields are applied in a fixed order.
pub struct CommandDispatcher<M: MainDriveSession, C: DriveConnector> {
    main: Arc<M>,
    wheels: DualWriteCoordinator<C>,
    store: ControlStore,
    coils: CoilMap,
    chain_limits: SpeedLimits,
}

impl<M: MainDriveSession, C: DriveConnector> CommandDispatcher<M, C> {
    pub fn new(
        main: Arc<M>,
        wheels: DualWriteCoordinator<C>,
        store: ControlStore,
        coils: CoilMap,
        chain_limits: SpeedLimits,
    ) -> Self {
        Self {
            main,
            wheels,
            store,
            coils,
            chain_limits,
        }
    }

    /// Read handle on the control state this dispatcher maintains.
    pub fn reader(&self) -> ControlReader {
        self.store.reader()
    }

    /// Drain the queue until every sender is gone.
    pub async fn run(self, mut rx: mpsc::Receiver<Command>) {
        info!("Command dispatcher started");

        while let Some(command) = rx.recv().await {
            self.execute(command).await;
        }

        info!("Command queue closed, dispatcher stopped");
    }

    /// Apply one command.
    ///
    /// Fields run in order: wheels coil, chain coil, direction, wheel speed,
    /// chain speed. A failure is logged and the next field still runs.
    pub async fn execute(&self, command: Command) {
        debug!(?command, "Executing command");

        if let Some(on) = command.wheels_running {
            match self.main.write_coil(self.coils.wheels_run, on).await {
                Ok(()) => info!(coil = %self.coils.wheels_run, on, "Wheels run coil written"),
                Err(e) => warn!(error = %e, "Wheels run/stop failed"),
            }
        }

        if let Some(on) = command.chain_running {
            match self.main.write_coil(self.coils.chain_run, on).await {
                Ok(()) => info!(coil = %self.coils.chain_run, on, "Chain run coil written"),
                Err(e) => warn!(error = %e, "Chain run/stop failed"),
            }
        }

        if let Some(requested) = command.wheel_direction.as_deref() {
            if self.wheels.policy().direction_control() {
                let direction = Direction::from_command(requested);
                if let Err(e) = self.wheels.set_direction(direction, &self.store).await {
                    warn!(error = %e, "Direction command not executed");
                }
            } else {
                info!(
                    requested,
                    "Direction control disabled, ignoring wheel_direction"
                );
            }
        }

        if let Some(speed) = command.wheel_speed {
            if let Err(e) = self.wheels.set_speed(speed, &self.store).await {
                warn!(error = %e, "Wheel speed command not executed");
            }
        }

        if let Some(speed) = command.chain_speed {
            if let Err(e) = self.set_chain_speed(speed).await {
                warn!(error = %e, "Chain speed write failed");
            }
        }
    }

    async fn set_chain_speed(&self, requested: u16) -> Result<()> {
        let speed = self.chain_limits.clamp(requested);
        if speed != requested {
            warn!(requested, clamped = speed, "Chain speed clamped");
        }

        self.wheels.policy().check(SPEED_SETPOINT, speed)?;
        self.main.write_register(SPEED_SETPOINT, speed).await?;

        self.store.update(|s| s.chain_speed = speed);
        info!(speed, "Chain speed set");
        Ok(())
    }
}

/// Subscribe to the command topic and feed the queue.
///
/// Returns when the subscriber or the queue closes. A full queue holds the
/// listener until the dispatcher catches up.
pub async fn listen(session: Session, key: String, tx: mpsc::Sender<Command>) -> zenoh::Result<()> {
    let subscriber = session.declare_subscriber(&key).await?;
    info!(key = %key, "Listening for commands");

    while let Ok(sample) = subscriber.recv_async().await {
        let payload = sample.payload().to_bytes();

        let command = match Command::from_payload(&payload) {
            Ok(command) => command,
            Err(e) => {
                warn!(
                    error = %e,
                    payload = %String::from_utf8_lossy(&payload),
                    "Dropping malformed command"
                );
                continue;
            }
        };

        if command.is_empty() {
            debug!("Dropping empty command");
            continue;
        }

        if tx.send(command).await.is_err() {
            warn!("Command queue closed, listener stopping");
            break;
        }
    }

    subscriber.undeclare().await?;
    Ok(())
}
