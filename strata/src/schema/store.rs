//! The versioned schema store shared by the normalizer and the loader.
//!
//! Schema evolution is a two-phase protocol: `propose` validates a diff
//! against the current version and returns a candidate without mutating
//! anything; `commit` installs the candidate atomically, provided no other
//! commit advanced the version in between (optimistic concurrency). Packages
//! for the same dataset may be normalized concurrently, but only one may
//! advance the schema at a time; losers re-propose against the new current
//! version without re-normalizing their data.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{ErrorKind, StrataResult};
use crate::schema::diff::SchemaDiff;
use crate::schema::version::SchemaVersion;
use crate::strata_error;

/// A validated next schema version, produced by `propose` and not yet
/// installed.
#[derive(Debug, Clone)]
pub struct CandidateVersion {
    /// Dataset the candidate belongs to.
    pub dataset: String,
    /// Version number of the snapshot the candidate was proposed against.
    pub base_version: u64,
    /// The fully materialized next version.
    pub next: SchemaVersion,
    /// The diff that produced it, persisted alongside the version.
    pub diff: SchemaDiff,
}

/// Trait for storing and evolving dataset schemas.
///
/// Implementations must keep `current` cheap and safe to call concurrently,
/// and must serialize `commit` per dataset. The version check inside `commit`
/// must not be held across I/O to destinations.
pub trait SchemaStore {
    /// Returns the latest committed schema version for `dataset`.
    ///
    /// Datasets that were never committed to report the empty version 0.
    fn current(&self, dataset: &str) -> impl Future<Output = StrataResult<Arc<SchemaVersion>>> + Send;

    /// Atomically installs a candidate as the new current version.
    ///
    /// Fails with a schema conflict when another commit advanced the dataset
    /// since the candidate was proposed; the caller must re-propose.
    fn commit(
        &self,
        candidate: CandidateVersion,
    ) -> impl Future<Output = StrataResult<Arc<SchemaVersion>>> + Send;

    /// Returns the committed version numbers of `dataset` in ascending order.
    fn history(&self, dataset: &str) -> impl Future<Output = StrataResult<Vec<u64>>> + Send;

    /// Validates `diff` against the current version and returns a candidate
    /// next version without mutating stored state.
    fn propose(
        &self,
        dataset: &str,
        diff: SchemaDiff,
    ) -> impl Future<Output = StrataResult<CandidateVersion>> + Send
    where
        Self: Sync,
    {
        async move {
            let current = self.current(dataset).await?;
            let next = current.apply(&diff)?;
            Ok(CandidateVersion {
                dataset: dataset.to_string(),
                base_version: current.version,
                next,
                diff,
            })
        }
    }
}

#[derive(Debug)]
struct DatasetSchemas {
    current: Arc<SchemaVersion>,
    versions: Vec<u64>,
}

/// In-memory schema store for tests and development.
///
/// All versions are lost when the process terminates.
#[derive(Debug, Clone, Default)]
pub struct MemorySchemaStore {
    inner: Arc<Mutex<HashMap<String, DatasetSchemas>>>,
}

impl MemorySchemaStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchemaStore for MemorySchemaStore {
    async fn current(&self, dataset: &str) -> StrataResult<Arc<SchemaVersion>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .get(dataset)
            .map(|schemas| schemas.current.clone())
            .unwrap_or_else(|| Arc::new(SchemaVersion::empty())))
    }

    async fn commit(&self, candidate: CandidateVersion) -> StrataResult<Arc<SchemaVersion>> {
        let mut inner = self.inner.lock().await;
        let schemas = inner
            .entry(candidate.dataset.clone())
            .or_insert_with(|| DatasetSchemas {
                current: Arc::new(SchemaVersion::empty()),
                versions: Vec::new(),
            });

        if schemas.current.version != candidate.base_version {
            return Err(strata_error!(
                ErrorKind::SchemaConflict,
                "A concurrent commit advanced the schema version",
                format!(
                    "dataset '{}': proposed against {}, current is {}",
                    candidate.dataset, candidate.base_version, schemas.current.version
                )
            ));
        }

        let next = Arc::new(candidate.next);
        schemas.versions.push(next.version);
        schemas.current = next.clone();

        debug!(
            dataset = %candidate.dataset,
            version = next.version,
            "committed schema version"
        );

        Ok(next)
    }

    async fn history(&self, dataset: &str) -> StrataResult<Vec<u64>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .get(dataset)
            .map(|schemas| schemas.versions.clone())
            .unwrap_or_default())
    }
}

/// On-disk representation of one committed schema version.
#[derive(Debug, Serialize, Deserialize)]
struct StoredVersion {
    snapshot: SchemaVersion,
    diff: SchemaDiff,
}

/// Filesystem-backed schema store.
///
/// Each committed version is one JSON document `version.<n>.json` under a
/// per-dataset directory, written to a temporary file and atomically renamed
/// into place. The latest version per dataset is cached in memory; commits are
/// serialized through the cache lock, which is never held across destination
/// I/O.
#[derive(Debug, Clone)]
pub struct FsSchemaStore {
    root: PathBuf,
    cache: Arc<Mutex<HashMap<String, Arc<SchemaVersion>>>>,
}

impl FsSchemaStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> StrataResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            cache: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn dataset_dir(&self, dataset: &str) -> PathBuf {
        self.root.join(dataset)
    }

    fn version_file(&self, dataset: &str, version: u64) -> PathBuf {
        self.dataset_dir(dataset).join(format!("version.{version}.json"))
    }

    /// Lists committed version numbers by scanning the dataset directory.
    fn scan_versions(&self, dataset: &str) -> StrataResult<Vec<u64>> {
        let dir = self.dataset_dir(dataset);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if let Some(version) = parse_version_file_name(&entry.file_name().to_string_lossy()) {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    /// Loads the latest committed version from disk, or the empty version.
    fn load_latest(&self, dataset: &str) -> StrataResult<Arc<SchemaVersion>> {
        let Some(latest) = self.scan_versions(dataset)?.pop() else {
            return Ok(Arc::new(SchemaVersion::empty()));
        };

        let path = self.version_file(dataset, latest);
        let contents = std::fs::read_to_string(&path)?;
        let stored: StoredVersion = serde_json::from_str(&contents)?;
        Ok(Arc::new(stored.snapshot))
    }
}

impl SchemaStore for FsSchemaStore {
    async fn current(&self, dataset: &str) -> StrataResult<Arc<SchemaVersion>> {
        let mut cache = self.cache.lock().await;
        if let Some(current) = cache.get(dataset) {
            return Ok(current.clone());
        }

        let current = self.load_latest(dataset)?;
        cache.insert(dataset.to_string(), current.clone());
        Ok(current)
    }

    async fn commit(&self, candidate: CandidateVersion) -> StrataResult<Arc<SchemaVersion>> {
        let mut cache = self.cache.lock().await;

        let current = match cache.get(&candidate.dataset) {
            Some(current) => current.clone(),
            None => self.load_latest(&candidate.dataset)?,
        };
        if current.version != candidate.base_version {
            return Err(strata_error!(
                ErrorKind::SchemaConflict,
                "A concurrent commit advanced the schema version",
                format!(
                    "dataset '{}': proposed against {}, current is {}",
                    candidate.dataset, candidate.base_version, current.version
                )
            ));
        }

        let target = self.version_file(&candidate.dataset, candidate.next.version);
        if target.exists() {
            return Err(strata_error!(
                ErrorKind::SchemaConflict,
                "A schema version file with this number already exists",
                target.display()
            ));
        }

        let dir = self.dataset_dir(&candidate.dataset);
        std::fs::create_dir_all(&dir)?;

        let stored = StoredVersion {
            snapshot: candidate.next,
            diff: candidate.diff,
        };
        let tmp = dir.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
        std::fs::write(&tmp, serde_json::to_vec_pretty(&stored)?)?;
        std::fs::rename(&tmp, &target)?;

        let next = Arc::new(stored.snapshot);
        cache.insert(candidate.dataset, next.clone());
        Ok(next)
    }

    async fn history(&self, dataset: &str) -> StrataResult<Vec<u64>> {
        self.scan_versions(dataset)
    }
}

fn parse_version_file_name(name: &str) -> Option<u64> {
    name.strip_prefix("version.")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}
