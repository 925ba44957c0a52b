//! Zenoh bridge for a three-drive Modbus-TCP VFD fleet.
//!
//! One main drive runs the chain and hosts the soft-PLC coils; two child
//! drives turn a mechanically coupled wheel pair. Operators command the
//! fleet over Zenoh and receive one telemetry snapshot per poll tick.
//!
//! # Key Expressions
//!
//! ```text
//! raptor/<site>/<device>/state       snapshots (published)
//! raptor/<site>/<device>/cmd         commands (subscribed)
//! raptor/<site>/<device>/@/status    bridge status
//! ```
//!
//! # Tasks
//!
//! - [`command::CommandDispatcher`] executes commands one at a time and is
//!   the only writer of the control state.
//! - [`poller::SnapshotPoller`] reads all three drives concurrently each
//!   tick and publishes the merged snapshot.
//! - [`command::listen`] decodes bus messages into the command queue.

pub mod command;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod link;
pub mod poller;
pub mod publisher;
pub mod registers;
pub mod state;
pub mod status;
pub mod telemetry;

pub use error::{DriveError, Result};
