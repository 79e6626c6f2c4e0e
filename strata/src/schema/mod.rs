//! Dataset schemas: the type lattice, table and column definitions, diffs,
//! immutable versions, and the versioned store that evolves them.

pub mod column;
pub mod diff;
pub mod lattice;
pub mod store;
pub mod table;
pub mod version;

pub use column::ColumnSchema;
pub use diff::{ColumnTypeChange, SchemaDiff, TableDiff};
pub use lattice::{widen, DataType};
pub use store::{CandidateVersion, FsSchemaStore, MemorySchemaStore, SchemaStore};
pub use table::{TableSchema, WriteDisposition};
pub use version::SchemaVersion;
