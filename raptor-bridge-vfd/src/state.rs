//! Locally tracked control state.
//!
//! The child drives are never polled for direction or speed (reading them
//! back triggers the command-source switch), so the last commanded values
//! are kept here and are authoritative.
//!
//! [`ControlStore`] is the only writer and is owned by the dispatcher. Any
//! number of [`ControlReader`]s observe whole values; an update is swapped in
//! atomically, never field by field.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Wheel rotation direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    #[serde(rename = "fwd")]
    Forward,
    #[serde(rename = "rev")]
    Reverse,
}

impl Direction {
    /// Parse an operator command. Only the exact string `"rev"` means
    /// reverse; anything else, including `"REV"` or `" rev"`, is forward.
    pub fn from_command(value: &str) -> Self {
        if value == "rev" {
            Direction::Reverse
        } else {
            Direction::Forward
        }
    }

    /// Value written to the direction register.
    pub fn register_value(self) -> u16 {
        match self {
            Direction::Forward => 0,
            Direction::Reverse => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Forward => "fwd",
            Direction::Reverse => "rev",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last commanded control values plus any outstanding mismatch warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlState {
    pub direction: Direction,
    pub wheel_speed: u16,
    pub chain_speed: u16,
    /// Set when the two wheels may disagree; cleared by the next symmetric
    /// direction write.
    pub mismatch_warning: Option<String>,
}

impl ControlState {
    /// Startup state: forward, configured default speeds, no warning.
    pub fn initial(wheel_speed: u16, chain_speed: u16) -> Self {
        Self {
            direction: Direction::Forward,
            wheel_speed,
            chain_speed,
            mismatch_warning: None,
        }
    }

    /// Warning text as published, empty when there is none.
    pub fn warning_text(&self) -> &str {
        self.mismatch_warning.as_deref().unwrap_or("")
    }
}

/// Single writer of the control state.
#[derive(Debug)]
pub struct ControlStore {
    tx: watch::Sender<ControlState>,
}

impl ControlStore {
    pub fn new(initial: ControlState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Apply a change and publish the new value as one unit.
    pub fn update(&self, change: impl FnOnce(&mut ControlState)) {
        self.tx.send_modify(change);
    }

    /// Copy of the current value.
    pub fn current(&self) -> ControlState {
        self.tx.borrow().clone()
    }

    /// A read-only handle.
    pub fn reader(&self) -> ControlReader {
        ControlReader {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read-only view of the control state.
#[derive(Debug, Clone)]
pub struct ControlReader {
    rx: watch::Receiver<ControlState>,
}

impl ControlReader {
    /// Copy of the latest value.
    pub fn snapshot(&self) -> ControlState {
        self.rx.borrow().clone()
    }
}
