//! Per-drive telemetry sample and its register decoding.

use serde::{Deserialize, Serialize};

use crate::registers::TELEMETRY_LEN;

/// Raw current is percent of rated current in half-percent steps.
pub const AMPS_SCALE: f32 = 200.0;

/// Telemetry of one drive for one poll tick.
///
/// A failed read yields [`TelemetrySample::default`], all zeros.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// P0002
    pub target_rpm: u16,
    /// P0003
    pub actual_rpm: u16,
    /// P0005, DC bus voltage.
    pub voltage: u16,
    /// P0006 scaled by [`AMPS_SCALE`].
    pub amps: f32,
    /// P0007, 0 stopped, 1 running; other codes are drive specific.
    pub drive_state: u16,
}

impl TelemetrySample {
    /// Decode the P0002..=P0007 block.
    ///
    /// Returns `None` on a short read. P0004 is skipped.
    pub fn decode(words: &[u16]) -> Option<Self> {
        if words.len() < TELEMETRY_LEN as usize {
            return None;
        }

        Some(Self {
            target_rpm: words[0],
            actual_rpm: words[1],
            voltage: words[3],
            amps: f32::from(words[4]) / AMPS_SCALE,
            drive_state: words[5],
        })
    }
}
