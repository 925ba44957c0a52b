//! Error types for drive I/O.

use thiserror::Error;

use crate::link::DriveRole;
use crate::registers::Param;

/// Failure of a single operation against one drive.
///
/// None of these are fatal: the dispatcher and the poll loop catch them at
/// the operation boundary, log them, and carry on.
#[derive(Debug, Clone, Error)]
pub enum DriveError {
    /// TCP connect (or re-connect) to the drive failed or timed out.
    #[error("connect to {role} drive at {addr} failed: {reason}")]
    ConnectFailed {
        role: DriveRole,
        addr: String,
        reason: String,
    },

    /// Telemetry block could not be read this tick.
    #[error("telemetry unavailable from {role} drive at {addr}: {reason}")]
    TelemetryUnavailable {
        role: DriveRole,
        addr: String,
        reason: String,
    },

    /// A register or coil write (or coil read) failed on the wire.
    #[error("{target} = {value} on {role} drive at {addr} failed: {reason}")]
    WriteFailed {
        role: DriveRole,
        addr: String,
        target: String,
        value: u16,
        reason: String,
    },

    /// The register table refused the write before any I/O happened.
    #[error("write of {value} to {param} refused: {reason}")]
    WriteRefused {
        param: Param,
        value: u16,
        reason: String,
    },

    /// A 1-based register or coil number that has no wire address.
    #[error("invalid 1-based address {0}")]
    InvalidAddress(u16),
}

impl DriveError {
    /// Drive role this error concerns, if any.
    pub fn role(&self) -> Option<DriveRole> {
        match self {
            DriveError::ConnectFailed { role, .. }
            | DriveError::TelemetryUnavailable { role, .. }
            | DriveError::WriteFailed { role, .. } => Some(*role),
            DriveError::WriteRefused { .. } | DriveError::InvalidAddress(_) => None,
        }
    }
}

/// Result type alias using [`DriveError`].
pub type Result<T> = std::result::Result<T, DriveError>;
