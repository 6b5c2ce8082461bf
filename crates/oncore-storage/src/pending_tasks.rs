//! Durable buffer for scheduled tasks that could not be enqueued.
//!
//! Losing a scheduled escalation step is a correctness bug, not a
//! degradation: if the task queue is unavailable, the task is written here
//! and replayed later instead of being dropped.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use uuid::Uuid;

use oncore_core::queue::ScheduledTask;

use crate::error::{Error, Result};

// Pending tasks table: key = task_id, value = ScheduledTask (bincode)
const PENDING_TASKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("pending_tasks");

/// Persistent store of tasks awaiting replay.
pub struct PendingTaskStore {
    db: Arc<Database>,
}

impl PendingTaskStore {
    /// Open a pending task store in the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let db_path = path.join("pending_tasks.redb");
        let db = Database::create(db_path)
            .map_err(|e| Error::Storage(format!("Failed to open pending task database: {}", e)))?;

        let write_txn = db.begin_write()?;
        {
            write_txn.open_table(PENDING_TASKS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Persist a task for later replay.
    pub fn append(&self, task: &ScheduledTask) -> Result<()> {
        let bytes = bincode::serialize(task)?;
        let key = task.id.to_string();

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PENDING_TASKS_TABLE)?;
            table.insert(key.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// List all tasks awaiting replay.
    pub fn list(&self) -> Result<Vec<ScheduledTask>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PENDING_TASKS_TABLE)?;

        let mut tasks = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            let task: ScheduledTask = bincode::deserialize(value.value())?;
            tasks.push(task);
        }
        Ok(tasks)
    }

    /// Remove a replayed task. Returns whether it existed.
    pub fn remove(&self, id: &Uuid) -> Result<bool> {
        let key = id.to_string();
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(PENDING_TASKS_TABLE)?;
            let existed = table.remove(key.as_str())?.is_some();
            existed
        };
        write_txn.commit()?;
        Ok(existed)
    }

    /// Number of tasks awaiting replay.
    pub fn len(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use oncore_core::ids::AlertGroupId;
    use oncore_core::queue::TaskKind;

    fn task() -> ScheduledTask {
        ScheduledTask::new(
            Utc::now(),
            TaskKind::EscalationStep {
                alert_group_id: AlertGroupId::new(),
                escalation_id: Uuid::new_v4(),
                expected_order: 2,
            },
        )
    }

    #[test]
    fn test_append_list_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingTaskStore::open(dir.path()).unwrap();
        assert!(store.is_empty().unwrap());

        let t = task();
        store.append(&t).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed, vec![t.clone()]);

        assert!(store.remove(&t.id).unwrap());
        assert!(!store.remove(&t.id).unwrap());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_round_trip_preserves_task() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingTaskStore::open(dir.path()).unwrap();

        let t = task();
        store.append(&t).unwrap();

        let restored = &store.list().unwrap()[0];
        assert_eq!(restored.run_at, t.run_at);
        assert_eq!(restored.kind, t.kind);
    }
}
