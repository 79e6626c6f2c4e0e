//! On-disk layout and lifecycle of load packages.
//!
//! Packages live under two sibling directories: `loading/` holds packages
//! that are built or in flight, `loaded/` holds fully committed ones. A
//! package moves between them with a single atomic rename, so a crash can
//! never leave a package visible in both states. Manifests and schema
//! updates are written to a temporary file first and renamed into place for
//! the same reason.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::bail;
use crate::error::{ErrorKind, StrataResult};
use crate::package::load_id::parse_load_id;
use crate::package::manifest::{MANIFEST_FILE, PackageManifest, SCHEMA_UPDATE_FILE, TableManifest};
use crate::schema::{SchemaDiff, TableSchema};
use crate::types::Row;

const LOADING_DIR: &str = "loading";
const LOADED_DIR: &str = "loaded";

/// Filesystem store for load packages.
#[derive(Debug, Clone)]
pub struct PackageStorage {
    root: PathBuf,
}

impl PackageStorage {
    /// Opens package storage rooted at `root`, creating the layout if needed.
    pub fn new(root: impl Into<PathBuf>) -> StrataResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(LOADING_DIR))?;
        fs::create_dir_all(root.join(LOADED_DIR))?;
        Ok(Self { root })
    }

    /// Directory of an in-flight package.
    pub fn package_dir(&self, load_id: &str) -> PathBuf {
        self.root.join(LOADING_DIR).join(load_id)
    }

    /// Directory of an archived package.
    pub fn loaded_dir(&self, load_id: &str) -> PathBuf {
        self.root.join(LOADED_DIR).join(load_id)
    }

    /// Creates the directory for a new package.
    pub fn create_package(&self, load_id: &str) -> StrataResult<PathBuf> {
        let dir = self.package_dir(load_id);
        if dir.exists() || self.loaded_dir(load_id).exists() {
            bail!(
                ErrorKind::InvalidState,
                "A package with this load id already exists",
                load_id
            );
        }
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Writes the manifest, sealing the package for loading.
    pub fn write_manifest(&self, manifest: &PackageManifest) -> StrataResult<()> {
        self.write_atomic(
            &self.package_dir(&manifest.load_id),
            MANIFEST_FILE,
            &serde_json::to_vec_pretty(manifest)?,
        )
    }

    pub fn read_manifest(&self, load_id: &str) -> StrataResult<PackageManifest> {
        let path = self.package_dir(load_id).join(MANIFEST_FILE);
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Persists the schema diff the package was normalized with.
    pub fn write_schema_update(&self, load_id: &str, diff: &SchemaDiff) -> StrataResult<()> {
        self.write_atomic(
            &self.package_dir(load_id),
            SCHEMA_UPDATE_FILE,
            &serde_json::to_vec_pretty(diff)?,
        )
    }

    pub fn read_schema_update(&self, load_id: &str) -> StrataResult<SchemaDiff> {
        let path = self.package_dir(load_id).join(SCHEMA_UPDATE_FILE);
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Lists resumable in-flight packages in load id order.
    ///
    /// Entries that do not parse as load ids are skipped, as are package
    /// directories without a manifest: a crash between package creation and
    /// sealing leaves no manifest behind, and such remains must not wedge
    /// later resume runs.
    pub fn list_pending(&self) -> StrataResult<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join(LOADING_DIR))? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if parse_load_id(&name).is_none() {
                continue;
            }
            if !self.package_dir(&name).join(MANIFEST_FILE).exists() {
                warn!(load_id = %name, "skipping unsealed package left by an interrupted run");
                continue;
            }
            ids.push(name);
        }
        ids.sort_by_key(|id| parse_load_id(id));
        Ok(ids)
    }

    /// Reads a table's rows back from its package row file.
    pub fn read_table_rows(
        &self,
        load_id: &str,
        schema: &TableSchema,
        table: &TableManifest,
    ) -> StrataResult<Vec<Row>> {
        let path = self.package_dir(load_id).join(&table.file_name);
        let reader = BufReader::new(File::open(&path)?);

        let mut rows = Vec::with_capacity(table.row_count as usize);
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let record: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&line)?;
            rows.push(Row::from_record(schema, record)?);
        }
        Ok(rows)
    }

    /// Recomputes a row file's content hash and compares it against the
    /// manifest. Used before re-committing a staged table on resume.
    pub fn verify_table(&self, load_id: &str, table: &TableManifest) -> StrataResult<bool> {
        let path = self.package_dir(load_id).join(&table.file_name);
        if !path.exists() {
            return Ok(false);
        }
        let mut hasher = Sha256::new();
        hasher.update(fs::read(&path)?);
        Ok(hex::encode(hasher.finalize()) == table.content_hash)
    }

    /// Moves a fully committed package from `loading/` to `loaded/`.
    pub fn archive(&self, load_id: &str) -> StrataResult<()> {
        let from = self.package_dir(load_id);
        let to = self.loaded_dir(load_id);
        fs::rename(&from, &to)?;
        debug!(load_id, "archived load package");
        Ok(())
    }

    /// Whether the package has been fully committed and archived.
    pub fn is_archived(&self, load_id: &str) -> bool {
        self.loaded_dir(load_id).exists()
    }

    fn write_atomic(&self, dir: &Path, file_name: &str, contents: &[u8]) -> StrataResult<()> {
        let tmp = dir.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, dir.join(file_name))?;
        Ok(())
    }
}
