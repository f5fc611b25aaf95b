//! Replay cache for assertion IDs.
//!
//! Backed by the same redb database as the session store, so a seen
//! assertion ID stays seen across process restarts for as long as its
//! validity window runs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use crate::error::StoreError;

/// redb table for seen assertion IDs (key: assertion ID, value:
/// MessagePack expiry timestamp).
pub(crate) const REPLAY_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("assertion_replay");

/// Tracks assertion IDs for the duration of their validity window.
///
/// The existence check and the insert happen in one write transaction,
/// so of two concurrent submissions carrying the same assertion ID
/// exactly one passes.
#[derive(Clone)]
pub struct ReplayCache {
    db: Arc<Database>,
}

impl ReplayCache {
    pub(crate) fn new(db: Arc<Database>) -> Result<Self, StoreError> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(REPLAY_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db })
    }

    /// Record `assertion_id` if unseen, with its window end as expiry.
    ///
    /// Returns false when the ID was already recorded and its window
    /// has not yet elapsed.
    pub fn check_and_mark(
        &self,
        assertion_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let data = rmp_serde::to_vec(&expires_at)?;
        let write_txn = self.db.begin_write()?;
        let fresh = {
            let mut table = write_txn.open_table(REPLAY_TABLE)?;
            let x = match table.insert(assertion_id, data.as_slice())? {
                Some(previous) => match rmp_serde::from_slice::<DateTime<Utc>>(previous.value()) {
                    Ok(previous_expiry) => Utc::now() > previous_expiry,
                    // Unreadable entry, treat as expired.
                    Err(_) => true,
                },
                None => true,
            };
            x
        };
        write_txn.commit()?;
        Ok(fresh)
    }

    /// Whether `assertion_id` has been recorded.
    pub fn contains(&self, assertion_id: &str) -> Result<bool, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(REPLAY_TABLE)?;
        Ok(table.get(assertion_id)?.is_some())
    }

    /// Drop entries whose validity window has passed. Returns the
    /// number of entries removed.
    pub fn evict_expired(&self) -> Result<usize, StoreError> {
        let now = Utc::now();

        let expired: Vec<String> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(REPLAY_TABLE)?;

            let mut ids = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                match rmp_serde::from_slice::<DateTime<Utc>>(value.value()) {
                    Ok(expires_at) if now > expires_at => {
                        ids.push(key.value().to_string());
                    }
                    Err(_) => {
                        ids.push(key.value().to_string());
                    }
                    _ => {}
                }
            }
            ids
        };

        if expired.is_empty() {
            return Ok(0);
        }

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(REPLAY_TABLE)?;
            for id in &expired {
                table.remove(id.as_str())?;
            }
        }
        write_txn.commit()?;

        debug!(evicted = expired.len(), "Evicted expired replay entries");
        Ok(expired.len())
    }
}
