//! Alert group persistence.
//!
//! The repository is the storage collaborator of the state machine: plain
//! reads before every executor invocation, and a compare-and-set `update`
//! keyed on the group's version for transitions. `update` bumps the version
//! on success; a `VersionConflict` error means another writer got there
//! first and the caller must re-read.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use oncore_core::ids::AlertGroupId;
use oncore_storage::{AlertGroupStore, StoredAlertGroup};

use crate::alert_group::AlertGroup;
use crate::error::{Error, Result};

/// Load/save access to alert groups.
#[async_trait]
pub trait AlertGroupRepository: Send + Sync {
    /// Persist a new alert group. Fails if the id already exists.
    async fn insert(&self, group: &AlertGroup) -> Result<()>;

    /// Load the current state of an alert group.
    async fn get(&self, id: &AlertGroupId) -> Result<Option<AlertGroup>>;

    /// Compare-and-set update. On success the group's version is bumped;
    /// on `Error::VersionConflict` the group is left untouched.
    async fn update(&self, group: &mut AlertGroup) -> Result<()>;

    /// All alert groups.
    async fn list(&self) -> Result<Vec<AlertGroup>>;
}

/// In-memory repository.
#[derive(Default)]
pub struct MemoryAlertGroups {
    groups: RwLock<HashMap<AlertGroupId, AlertGroup>>,
}

impl MemoryAlertGroups {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertGroupRepository for MemoryAlertGroups {
    async fn insert(&self, group: &AlertGroup) -> Result<()> {
        let mut groups = self.groups.write().await;
        if groups.contains_key(&group.id) {
            return Err(Error::Validation(format!(
                "Alert group already exists: {}",
                group.id
            )));
        }
        groups.insert(group.id.clone(), group.clone());
        Ok(())
    }

    async fn get(&self, id: &AlertGroupId) -> Result<Option<AlertGroup>> {
        Ok(self.groups.read().await.get(id).cloned())
    }

    async fn update(&self, group: &mut AlertGroup) -> Result<()> {
        let mut groups = self.groups.write().await;
        let current = groups
            .get(&group.id)
            .ok_or_else(|| Error::NotFound(format!("Alert group not found: {}", group.id)))?;
        if current.version != group.version {
            return Err(Error::VersionConflict(format!(
                "alert group {}: expected version {}, found {}",
                group.id, group.version, current.version
            )));
        }
        group.version += 1;
        groups.insert(group.id.clone(), group.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<AlertGroup>> {
        Ok(self.groups.read().await.values().cloned().collect())
    }
}

/// Repository backed by the persistent redb store.
pub struct RedbAlertGroups {
    store: AlertGroupStore,
}

impl RedbAlertGroups {
    /// Open the store in the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            store: AlertGroupStore::open(path)?,
        })
    }

    fn to_stored(group: &AlertGroup) -> Result<StoredAlertGroup> {
        Ok(StoredAlertGroup {
            id: group.id.to_string(),
            state: group.state.as_str().to_string(),
            version: group.version,
            updated_at: Utc::now().timestamp(),
            body: serde_json::to_value(group)?,
        })
    }

    fn from_stored(stored: StoredAlertGroup) -> Result<AlertGroup> {
        let mut group: AlertGroup = serde_json::from_value(stored.body)?;
        // The stored version column is authoritative
        group.version = stored.version;
        Ok(group)
    }
}

#[async_trait]
impl AlertGroupRepository for RedbAlertGroups {
    async fn insert(&self, group: &AlertGroup) -> Result<()> {
        self.store.insert(&Self::to_stored(group)?)?;
        Ok(())
    }

    async fn get(&self, id: &AlertGroupId) -> Result<Option<AlertGroup>> {
        match self.store.get(&id.to_string())? {
            Some(stored) => Ok(Some(Self::from_stored(stored)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, group: &mut AlertGroup) -> Result<()> {
        let expected = group.version;
        group.version += 1;
        let stored = Self::to_stored(group)?;
        match self.store.compare_and_update(expected, &stored) {
            Ok(()) => Ok(()),
            Err(e) => {
                group.version = expected;
                Err(e.into())
            }
        }
    }

    async fn list(&self) -> Result<Vec<AlertGroup>> {
        self.store
            .list()?
            .into_iter()
            .map(Self::from_stored)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChannelFilter, EscalationChain, EscalationPolicy, EscalationStep};
    use crate::snapshot::EscalationSnapshot;

    fn group_with_snapshot() -> AlertGroup {
        let chain = EscalationChain::new("chain-1", "default")
            .with_policy(EscalationPolicy::new("p-0", 0, EscalationStep::Wait).with_wait_delay(60));
        let filter = ChannelFilter::new("cf-1", "default").with_escalation_chain(chain);

        let mut group = AlertGroup::new("grafana", "High CPU", "CPU above 95%");
        group.escalation_snapshot = EscalationSnapshot::build(&filter);
        group
    }

    #[tokio::test]
    async fn test_memory_repository_cas() {
        let repo = MemoryAlertGroups::new();
        let mut group = group_with_snapshot();
        repo.insert(&group).await.unwrap();

        // A second writer loads the same version
        let mut racing = repo.get(&group.id).await.unwrap().unwrap();

        repo.update(&mut group).await.unwrap();
        assert_eq!(group.version, 1);

        // The racing writer loses
        let result = repo.update(&mut racing).await;
        assert!(matches!(result, Err(Error::VersionConflict(_))));
        assert_eq!(racing.version, 0);
    }

    #[tokio::test]
    async fn test_memory_repository_insert_twice() {
        let repo = MemoryAlertGroups::new();
        let group = group_with_snapshot();
        repo.insert(&group).await.unwrap();
        assert!(repo.insert(&group).await.is_err());
    }

    #[tokio::test]
    async fn test_redb_repository_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = RedbAlertGroups::open(dir.path()).unwrap();

        let mut group = group_with_snapshot();
        repo.insert(&group).await.unwrap();

        let loaded = repo.get(&group.id).await.unwrap().unwrap();
        assert_eq!(loaded.escalation_snapshot, group.escalation_snapshot);
        assert_eq!(loaded.version, 0);

        group.state = crate::alert_group::AlertGroupState::Acknowledged;
        repo.update(&mut group).await.unwrap();
        assert_eq!(group.version, 1);

        let reloaded = repo.get(&group.id).await.unwrap().unwrap();
        assert!(reloaded.is_acknowledged());
        assert_eq!(reloaded.version, 1);
    }

    #[tokio::test]
    async fn test_redb_repository_version_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let repo = RedbAlertGroups::open(dir.path()).unwrap();

        let mut group = group_with_snapshot();
        repo.insert(&group).await.unwrap();

        let mut racing = repo.get(&group.id).await.unwrap().unwrap();
        repo.update(&mut group).await.unwrap();

        let result = repo.update(&mut racing).await;
        assert!(matches!(result, Err(Error::VersionConflict(_))));
        assert_eq!(racing.version, 0);
    }

    #[tokio::test]
    async fn test_redb_snapshot_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let group = group_with_snapshot();

        {
            let repo = RedbAlertGroups::open(dir.path()).unwrap();
            repo.insert(&group).await.unwrap();
        }

        let repo = RedbAlertGroups::open(dir.path()).unwrap();
        let loaded = repo.get(&group.id).await.unwrap().unwrap();
        assert_eq!(loaded.escalation_snapshot, group.escalation_snapshot);
    }
}
