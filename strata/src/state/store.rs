//! The job state tracker.
//!
//! Every (load id, table) pair moves through a small state machine while its
//! package loads. The tracker persists those states outside the loader's
//! memory, keyed by deterministic identifiers, so a resumed run knows which
//! tables are already committed, which are staged and only need verification,
//! and which must be retried from scratch.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{ErrorKind, StrataResult};
use crate::package::PackageStorage;
use crate::strata_error;

/// File holding the per-table states inside a package directory.
const STATE_FILE: &str = "state.json";

/// Load state of one table within one package.
///
/// Successful tables move `New → Staged → Committed`; a non-retryable error
/// moves `New`/`Staged` to `Failed`. Retries re-enter at `New`. `Committed`
/// is terminal: a retried package never re-commits a committed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableLoadState {
    #[default]
    New,
    Staged,
    Committed,
    Failed,
}

impl TableLoadState {
    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Same-state writes are allowed and treated as no-ops by the stores.
    pub fn can_transition_to(self, next: TableLoadState) -> bool {
        use TableLoadState::*;
        matches!(
            (self, next),
            (New, Staged) | (Staged, Committed) | (New, Failed) | (Staged, Failed) | (Failed, New)
        ) || self == next
    }
}

/// Trait for persisting per-(package, table) load states.
pub trait StateStore {
    /// Returns the recorded state, defaulting to [`TableLoadState::New`] for
    /// tables never seen before.
    fn get(
        &self,
        load_id: &str,
        table: &str,
    ) -> impl Future<Output = StrataResult<TableLoadState>> + Send;

    /// Records a state transition, rejecting illegal ones with an invalid
    /// state error.
    fn set(
        &self,
        load_id: &str,
        table: &str,
        state: TableLoadState,
    ) -> impl Future<Output = StrataResult<()>> + Send;

    /// Returns all recorded table states of a package.
    fn package_states(
        &self,
        load_id: &str,
    ) -> impl Future<Output = StrataResult<BTreeMap<String, TableLoadState>>> + Send;
}

fn check_transition(
    load_id: &str,
    table: &str,
    current: TableLoadState,
    next: TableLoadState,
) -> StrataResult<()> {
    if !current.can_transition_to(next) {
        return Err(strata_error!(
            ErrorKind::InvalidState,
            "Illegal table load state transition",
            format!("package '{load_id}', table '{table}': {current:?} -> {next:?}")
        ));
    }
    Ok(())
}

/// In-memory state tracker for tests and development.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<Mutex<HashMap<String, BTreeMap<String, TableLoadState>>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    async fn get(&self, load_id: &str, table: &str) -> StrataResult<TableLoadState> {
        let inner = self.inner.lock().await;
        Ok(inner
            .get(load_id)
            .and_then(|tables| tables.get(table))
            .copied()
            .unwrap_or_default())
    }

    async fn set(&self, load_id: &str, table: &str, state: TableLoadState) -> StrataResult<()> {
        let mut inner = self.inner.lock().await;
        let tables = inner.entry(load_id.to_string()).or_default();
        let current = tables.get(table).copied().unwrap_or_default();
        check_transition(load_id, table, current, state)?;
        tables.insert(table.to_string(), state);
        Ok(())
    }

    async fn package_states(
        &self,
        load_id: &str,
    ) -> StrataResult<BTreeMap<String, TableLoadState>> {
        let inner = self.inner.lock().await;
        Ok(inner.get(load_id).cloned().unwrap_or_default())
    }
}

/// State tracker persisted as `state.json` inside each package directory.
///
/// The state file travels with the package through archiving, so an archived
/// package keeps its commit record. Writes rewrite the whole file through a
/// temporary name, serialized by an internal lock.
#[derive(Debug, Clone)]
pub struct FsStateStore {
    storage: PackageStorage,
    write_lock: Arc<Mutex<()>>,
}

impl FsStateStore {
    pub fn new(storage: PackageStorage) -> Self {
        Self {
            storage,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn state_path(&self, load_id: &str) -> std::path::PathBuf {
        if self.storage.is_archived(load_id) {
            self.storage.loaded_dir(load_id).join(STATE_FILE)
        } else {
            self.storage.package_dir(load_id).join(STATE_FILE)
        }
    }

    fn read_states(&self, load_id: &str) -> StrataResult<BTreeMap<String, TableLoadState>> {
        let path = self.state_path(load_id);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }
}

impl StateStore for FsStateStore {
    async fn get(&self, load_id: &str, table: &str) -> StrataResult<TableLoadState> {
        Ok(self
            .read_states(load_id)?
            .get(table)
            .copied()
            .unwrap_or_default())
    }

    async fn set(&self, load_id: &str, table: &str, state: TableLoadState) -> StrataResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut states = self.read_states(load_id)?;
        let current = states.get(table).copied().unwrap_or_default();
        check_transition(load_id, table, current, state)?;
        states.insert(table.to_string(), state);

        let path = self.state_path(load_id);
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let tmp = dir.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
        std::fs::write(&tmp, serde_json::to_vec_pretty(&states)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    async fn package_states(
        &self,
        load_id: &str,
    ) -> StrataResult<BTreeMap<String, TableLoadState>> {
        self.read_states(load_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tables_default_to_new() {
        let store = MemoryStateStore::new();
        assert_eq!(
            store.get("1700000000.1", "events").await.unwrap(),
            TableLoadState::New
        );
    }

    #[tokio::test]
    async fn the_happy_path_reaches_committed() {
        let store = MemoryStateStore::new();
        store
            .set("1700000000.1", "events", TableLoadState::Staged)
            .await
            .unwrap();
        store
            .set("1700000000.1", "events", TableLoadState::Committed)
            .await
            .unwrap();
        assert_eq!(
            store.get("1700000000.1", "events").await.unwrap(),
            TableLoadState::Committed
        );
    }

    #[tokio::test]
    async fn committed_tables_cannot_regress() {
        let store = MemoryStateStore::new();
        store
            .set("1700000000.1", "events", TableLoadState::Staged)
            .await
            .unwrap();
        store
            .set("1700000000.1", "events", TableLoadState::Committed)
            .await
            .unwrap();

        for state in [
            TableLoadState::New,
            TableLoadState::Staged,
            TableLoadState::Failed,
        ] {
            let err = store
                .set("1700000000.1", "events", state)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidState);
        }
    }

    #[tokio::test]
    async fn failed_tables_retry_from_new() {
        let store = MemoryStateStore::new();
        store
            .set("1700000000.1", "events", TableLoadState::Failed)
            .await
            .unwrap();
        store
            .set("1700000000.1", "events", TableLoadState::New)
            .await
            .unwrap();
        store
            .set("1700000000.1", "events", TableLoadState::Staged)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn fs_store_survives_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let storage = PackageStorage::new(dir.path()).unwrap();
        storage.create_package("1700000000.1").unwrap();

        let store = FsStateStore::new(storage.clone());
        store
            .set("1700000000.1", "events", TableLoadState::Staged)
            .await
            .unwrap();
        store
            .set("1700000000.1", "events", TableLoadState::Committed)
            .await
            .unwrap();

        let reopened = FsStateStore::new(storage.clone());
        assert_eq!(
            reopened.get("1700000000.1", "events").await.unwrap(),
            TableLoadState::Committed
        );

        // The record travels with the package when it is archived.
        storage.archive("1700000000.1").unwrap();
        assert_eq!(
            reopened.get("1700000000.1", "events").await.unwrap(),
            TableLoadState::Committed
        );
    }
}
