//! Register and coil map of the drives, with the write-safety table.
//!
//! Parameter numbers are 1-based as printed in the drive manual (`P0122`).
//! The wire uses 0-based addresses, so every write goes through
//! [`Param::address`] or [`Coil::address`].
//!
//! The classification below was established empirically on the installed
//! drives. Writing the command-source block without its undocumented
//! dependent parameters leaves a drive in CONFIG state across power cycles,
//! and recovery means copying values over from a working drive by hand.
//! Anything not listed is refused.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DriveError, Result};

/// A vendor parameter (holding register), 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Param(pub u16);

impl Param {
    /// 0-based wire address.
    pub fn address(self) -> Result<u16> {
        self.0
            .checked_sub(1)
            .ok_or(DriveError::InvalidAddress(self.0))
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{:04}", self.0)
    }
}

/// A coil, 1-based as used by the soft-PLC tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Coil(pub u16);

impl Coil {
    /// 0-based wire address.
    pub fn address(self) -> Result<u16> {
        self.0
            .checked_sub(1)
            .ok_or(DriveError::InvalidAddress(self.0))
    }
}

impl fmt::Display for Coil {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "coil {}", self.0)
    }
}

/// First parameter of the telemetry block (target speed).
pub const TELEMETRY_START: Param = Param(2);
/// Telemetry block length: P0002..=P0007.
pub const TELEMETRY_LEN: u16 = 6;
/// Speed reference.
pub const SPEED_SETPOINT: Param = Param(122);
/// Rotation direction (0 forward, 1 reverse).
pub const DIRECTION: Param = Param(227);

/// Soft-PLC coils on the main drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoilMap {
    /// Wheels run/stop (write).
    pub wheels_run: Coil,
    /// Chain run/stop (write).
    pub chain_run: Coil,
    /// Wheels running status (read).
    pub wheels_status: Coil,
    /// Chain/paddle running status (read).
    pub chain_status: Coil,
}

impl Default for CoilMap {
    fn default() -> Self {
        Self {
            wheels_run: Coil(50066),
            chain_run: Coil(50067),
            wheels_status: Coil(16033),
            chain_status: Coil(65),
        }
    }
}

/// Write-safety class of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterClass {
    /// Pure value update; repeated writes are harmless.
    SafeSetpoint,
    /// May switch the drive's command source away from the panel switches.
    HazardousSource,
    /// Never written by this bridge.
    Forbidden,
    /// Status registers; writing them is meaningless.
    ReadOnly,
}

/// One row of the register table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSpec {
    pub first: Param,
    pub last: Param,
    pub name: &'static str,
    pub class: RegisterClass,
}

impl RegisterSpec {
    const fn single(param: u16, name: &'static str, class: RegisterClass) -> Self {
        Self::range(param, param, name, class)
    }

    const fn range(first: u16, last: u16, name: &'static str, class: RegisterClass) -> Self {
        Self {
            first: Param(first),
            last: Param(last),
            name,
            class,
        }
    }

    fn contains(&self, param: Param) -> bool {
        self.first <= param && param <= self.last
    }
}

/// Known registers. Subject to revision as more is learned about the drives.
pub const REGISTER_TABLE: &[RegisterSpec] = &[
    RegisterSpec::range(2, 7, "telemetry block", RegisterClass::ReadOnly),
    RegisterSpec::single(122, "speed reference", RegisterClass::SafeSetpoint),
    RegisterSpec::single(204, "load parameter set", RegisterClass::Forbidden),
    RegisterSpec::range(220, 226, "command source selection", RegisterClass::Forbidden),
    RegisterSpec::single(227, "direction", RegisterClass::HazardousSource),
    RegisterSpec::single(228, "jog source selection", RegisterClass::Forbidden),
];

/// Look up a parameter in the table.
pub fn lookup(param: Param) -> Option<&'static RegisterSpec> {
    REGISTER_TABLE.iter().find(|entry| entry.contains(param))
}

/// Classify a parameter; unlisted parameters are forbidden.
pub fn classify(param: Param) -> RegisterClass {
    lookup(param)
        .map(|entry| entry.class)
        .unwrap_or(RegisterClass::Forbidden)
}

/// Which register classes may be written, decided once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WritePolicy {
    direction_control: bool,
}

impl WritePolicy {
    /// Policy allowing only safe setpoints.
    pub fn setpoints_only() -> Self {
        Self::default()
    }

    /// Policy that additionally allows the direction register.
    pub fn with_direction_control(enabled: bool) -> Self {
        Self {
            direction_control: enabled,
        }
    }

    /// Whether direction writes are allowed.
    pub fn direction_control(&self) -> bool {
        self.direction_control
    }

    /// Check a write against the table before it is issued.
    pub fn check(&self, param: Param, value: u16) -> Result<()> {
        let refuse = |reason: &str| DriveError::WriteRefused {
            param,
            value,
            reason: reason.to_string(),
        };

        match classify(param) {
            RegisterClass::SafeSetpoint => Ok(()),
            RegisterClass::HazardousSource if self.direction_control => {
                tracing::warn!(
                    register = %param,
                    value,
                    "Writing hazardous register; drive may switch its command source"
                );
                Ok(())
            }
            RegisterClass::HazardousSource => Err(refuse("direction control is disabled")),
            RegisterClass::ReadOnly => Err(refuse("register is read-only")),
            RegisterClass::Forbidden => Err(refuse(
                "register may force the drive into CONFIG state and is never written",
            )),
        }
    }
}
