//! The package manifest: what a load package contains and how to verify it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Manifest file name inside a package directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Schema update file name inside a package directory.
pub const SCHEMA_UPDATE_FILE: &str = "schema_update.json";

/// Describes one table's row file within a package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableManifest {
    /// Row file name relative to the package directory.
    pub file_name: String,
    /// Number of rows in the file.
    pub row_count: u64,
    /// Hex SHA-256 of the file contents, used by resumed runs to verify a
    /// staged file before re-committing it.
    pub content_hash: String,
}

/// Describes a complete load package.
///
/// Written once when the package is sealed; a package without a manifest is
/// still being built and must not be loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Load id of the package.
    pub load_id: String,
    /// Dataset the package belongs to.
    pub dataset: String,
    /// Schema version the rows were normalized against.
    pub schema_version: u64,
    /// Per-table row files, keyed by table name.
    pub tables: BTreeMap<String, TableManifest>,
}

impl PackageManifest {
    /// Total number of rows across all tables.
    pub fn row_count(&self) -> u64 {
        self.tables.values().map(|table| table.row_count).sum()
    }
}
