//! Builds load packages by buffering rows per table and spilling them into
//! package row files.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use sha2::{Digest, Sha256};
use strata_config::shared::BatchConfig;
use tracing::debug;

use crate::error::StrataResult;
use crate::normalize::UnpackedDocument;
use crate::package::manifest::{PackageManifest, TableManifest};
use crate::package::storage::PackageStorage;
use crate::types::Row;

/// Accumulates the rows of one package and writes them to disk.
///
/// Rows are buffered per table and flushed to the table's row file whenever
/// the configured row-count or byte-size threshold is reached, bounding
/// memory use for large packages. [`PackageBuilder::finalize`] flushes the
/// remainder and seals the package with its manifest.
pub struct PackageBuilder {
    load_id: String,
    dataset: String,
    dir: PathBuf,
    batch: BatchConfig,
    tables: BTreeMap<String, TableFile>,
}

struct TableFile {
    file_name: String,
    buffered: Vec<Row>,
    buffered_bytes: usize,
    row_count: u64,
    hasher: Sha256,
    writer: BufWriter<File>,
}

impl PackageBuilder {
    /// Opens a new package in `storage` and returns a builder for it.
    pub fn new(
        storage: &PackageStorage,
        load_id: impl Into<String>,
        dataset: impl Into<String>,
        batch: BatchConfig,
    ) -> StrataResult<Self> {
        let load_id = load_id.into();
        let dir = storage.create_package(&load_id)?;
        Ok(Self {
            load_id,
            dataset: dataset.into(),
            dir,
            batch,
            tables: BTreeMap::new(),
        })
    }

    pub fn load_id(&self) -> &str {
        &self.load_id
    }

    /// Buffers one row for `table`, spilling to disk when a threshold trips.
    pub fn push(&mut self, table: &str, row: Row) -> StrataResult<()> {
        let file = match self.tables.get_mut(table) {
            Some(file) => file,
            None => {
                let file_name = format!("{}.{}.jsonl", table, uuid::Uuid::new_v4().simple());
                let writer = BufWriter::new(File::create(self.dir.join(&file_name))?);
                self.tables.entry(table.to_string()).or_insert(TableFile {
                    file_name,
                    buffered: Vec::new(),
                    buffered_bytes: 0,
                    row_count: 0,
                    hasher: Sha256::new(),
                    writer,
                })
            }
        };

        file.buffered_bytes += row.size_hint();
        file.buffered.push(row);
        if file.buffered.len() >= self.batch.max_rows || file.buffered_bytes >= self.batch.max_bytes
        {
            file.flush()?;
        }
        Ok(())
    }

    /// Buffers every row of an unpacked document set.
    pub fn push_unpacked(&mut self, unpacked: UnpackedDocument) -> StrataResult<()> {
        for (table, rows) in unpacked.rows {
            for row in rows {
                self.push(&table, row)?;
            }
        }
        Ok(())
    }

    /// Flushes all buffers, writes the manifest and seals the package.
    pub fn finalize(
        mut self,
        storage: &PackageStorage,
        schema_version: u64,
    ) -> StrataResult<PackageManifest> {
        let mut tables = BTreeMap::new();
        for (name, mut file) in std::mem::take(&mut self.tables) {
            file.flush()?;
            file.writer.flush()?;
            tables.insert(
                name,
                TableManifest {
                    file_name: file.file_name,
                    row_count: file.row_count,
                    content_hash: hex::encode(file.hasher.finalize()),
                },
            );
        }

        let manifest = PackageManifest {
            load_id: self.load_id,
            dataset: self.dataset,
            schema_version,
            tables,
        };
        storage.write_manifest(&manifest)?;
        debug!(
            load_id = %manifest.load_id,
            tables = manifest.tables.len(),
            rows = manifest.row_count(),
            "sealed load package"
        );
        Ok(manifest)
    }
}

impl TableFile {
    /// Writes the buffered rows as newline-delimited records.
    fn flush(&mut self) -> StrataResult<()> {
        for row in self.buffered.drain(..) {
            let line = serde_json::to_string(&serde_json::Value::Object(row.to_record()))?;
            self.writer.write_all(line.as_bytes())?;
            self.writer.write_all(b"\n")?;
            self.hasher.update(line.as_bytes());
            self.hasher.update(b"\n");
            self.row_count += 1;
        }
        self.buffered_bytes = 0;
        Ok(())
    }
}
