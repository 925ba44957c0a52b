//! Zenoh publishing of snapshots and other values.

use async_trait::async_trait;
use raptor_common::{Format, Result, encode};
use serde::Serialize;
use zenoh::Session;

use crate::poller::{Snapshot, SnapshotSink};

/// Puts serialized values on one key expression.
#[derive(Clone, Debug)]
pub struct Publisher {
    session: Session,
    key: String,
    format: Format,
}

impl Publisher {
    pub fn new(session: Session, key: impl Into<String>, format: Format) -> Self {
        Self {
            session,
            key: key.into(),
            format,
        }
    }

    /// Serialize and put a value.
    pub async fn put<T: Serialize>(&self, value: &T) -> Result<()> {
        let payload = encode(value, self.format)?;
        self.session.put(&self.key, payload).await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotSink for Publisher {
    async fn publish(&self, snapshot: &Snapshot) -> Result<()> {
        self.put(snapshot).await
    }
}
