//! Column schemas inferred from document values.

use serde::{Deserialize, Serialize};

use crate::schema::lattice::DataType;

/// Schema of a single column within a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Normalized column name, unique within its table.
    pub name: String,
    /// Inferred data type per the type lattice.
    pub data_type: DataType,
    /// Whether the column accepts nulls.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Set when the column was split off an existing column because a field
    /// legitimately carries more than one incompatible shape.
    #[serde(default, skip_serializing_if = "is_false")]
    pub variant: bool,
}

impl ColumnSchema {
    /// Creates a regular, non-variant column.
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
            variant: false,
        }
    }

    /// Creates a variant column holding values split off `name`'s base column.
    pub fn variant(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            variant: true,
        }
    }
}

fn default_nullable() -> bool {
    true
}

fn is_false(value: &bool) -> bool {
    !value
}
