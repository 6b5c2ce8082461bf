//! Alert group storage using redb.
//!
//! Records carry a monotonically increasing `version`; state transitions go
//! through `compare_and_update`, which rejects writes whose expected version
//! no longer matches the stored one. Two racing writers therefore serialize:
//! the loser observes a version conflict and re-reads.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// Alert groups table: key = alert_group_id, value = StoredAlertGroup (JSON)
const ALERT_GROUPS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("alert_groups");

/// Stored alert group representation.
///
/// The full record lives in `body` as opaque JSON; the columns pulled out
/// here are the ones the store itself needs for concurrency control and
/// listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAlertGroup {
    /// Unique alert group ID
    pub id: String,
    /// Current state (firing, acknowledged, resolved, silenced)
    pub state: String,
    /// Optimistic concurrency stamp
    pub version: u64,
    /// Last write timestamp
    pub updated_at: i64,
    /// Full serialized alert group, including its escalation snapshot
    pub body: serde_json::Value,
}

/// Persistent alert group store.
pub struct AlertGroupStore {
    db: Arc<Database>,
}

impl AlertGroupStore {
    /// Open an alert group store in the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let db_path = path.join("alert_groups.redb");
        let db = Database::create(db_path)
            .map_err(|e| Error::Storage(format!("Failed to open alert group database: {}", e)))?;

        // Create the table up front so reads never race table creation
        let write_txn = db.begin_write()?;
        {
            write_txn.open_table(ALERT_GROUPS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Insert a new record. Fails if the id already exists.
    pub fn insert(&self, record: &StoredAlertGroup) -> Result<()> {
        let value = serde_json::to_string(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ALERT_GROUPS_TABLE)?;
            let exists = table.get(record.id.as_str())?.is_some();
            if exists {
                return Err(Error::InvalidInput(format!(
                    "Alert group already exists: {}",
                    record.id
                )));
            }
            table.insert(record.id.as_str(), value.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get a record by id.
    pub fn get(&self, id: &str) -> Result<Option<StoredAlertGroup>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ALERT_GROUPS_TABLE)?;
        match table.get(id)? {
            Some(guard) => {
                let record: StoredAlertGroup = serde_json::from_str(guard.value())?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Replace a record if and only if the stored version matches.
    ///
    /// The read and the write happen inside one redb write transaction, so
    /// the version check is atomic with respect to other writers.
    pub fn compare_and_update(&self, expected_version: u64, record: &StoredAlertGroup) -> Result<()> {
        let value = serde_json::to_string(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ALERT_GROUPS_TABLE)?;
            let found = {
                match table.get(record.id.as_str())? {
                    Some(guard) => {
                        let current: StoredAlertGroup = serde_json::from_str(guard.value())?;
                        Some(current.version)
                    }
                    None => None,
                }
            };
            match found {
                None => {
                    return Err(Error::NotFound(format!("Alert group not found: {}", record.id)));
                }
                Some(found) if found != expected_version => {
                    tracing::debug!(
                        alert_group_id = %record.id,
                        expected = expected_version,
                        found,
                        "Alert group version conflict"
                    );
                    return Err(Error::VersionConflict {
                        id: record.id.clone(),
                        expected: expected_version,
                        found,
                    });
                }
                Some(_) => {
                    table.insert(record.id.as_str(), value.as_str())?;
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// List all stored records.
    pub fn list(&self) -> Result<Vec<StoredAlertGroup>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ALERT_GROUPS_TABLE)?;

        let mut records = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            let record: StoredAlertGroup = serde_json::from_str(value.value())?;
            records.push(record);
        }
        Ok(records)
    }

    /// Remove a record. Returns whether it existed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(ALERT_GROUPS_TABLE)?;
            let existed = table.remove(id)?.is_some();
            existed
        };
        write_txn.commit()?;
        Ok(existed)
    }
}
