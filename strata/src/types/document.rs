//! Raw input documents as produced by extraction connectors.

use serde::{Deserialize, Serialize};

use crate::schema::table::WriteDisposition;

/// One raw nested input record.
///
/// A [`Document`] is opaque to the pipeline until it reaches the unpacker: an
/// arbitrarily nested JSON value plus a hint naming the root table it should
/// be normalized into. Documents are immutable and produced externally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    root_table: String,
    body: serde_json::Value,
}

impl Document {
    /// Creates a document destined for the given root table.
    pub fn new(root_table: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            root_table: root_table.into(),
            body,
        }
    }

    /// Returns the raw root table hint, before name normalization.
    pub fn root_table(&self) -> &str {
        &self.root_table
    }

    /// Returns the nested document body.
    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }
}

/// A batch of documents tagged with load policy, the unit the pipeline pulls
/// from its upstream feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentBatch {
    /// Documents to normalize, independent of each other.
    pub documents: Vec<Document>,
    /// Write disposition applied to root tables first seen in this batch.
    pub write_disposition: WriteDisposition,
    /// Merge key recorded on new root tables when the disposition is
    /// [`WriteDisposition::Merge`].
    pub merge_key: Option<String>,
}

impl DocumentBatch {
    /// Creates an append-disposition batch, the common case.
    pub fn append(documents: Vec<Document>) -> Self {
        Self {
            documents,
            write_disposition: WriteDisposition::Append,
            merge_key: None,
        }
    }
}
