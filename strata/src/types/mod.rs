//! Core data types flowing through the pipeline.

mod document;
mod row;
mod value;

pub use document::{Document, DocumentBatch};
pub use row::{
    ID_COLUMN, LIST_IDX_COLUMN, LOAD_ID_COLUMN, PARENT_ID_COLUMN, Row, RowId, VALUE_COLUMN,
};
pub use value::Value;
