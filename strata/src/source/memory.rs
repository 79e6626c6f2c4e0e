//! In-memory document source, used in tests and for replaying fixed batches.

use std::collections::VecDeque;

use crate::error::StrataResult;
use crate::source::base::DocumentSource;
use crate::types::DocumentBatch;

/// A source that yields a fixed sequence of batches, then drains.
#[derive(Debug, Default)]
pub struct MemorySource {
    batches: VecDeque<DocumentBatch>,
}

impl MemorySource {
    pub fn new(batches: impl IntoIterator<Item = DocumentBatch>) -> Self {
        Self {
            batches: batches.into_iter().collect(),
        }
    }
}

impl DocumentSource for MemorySource {
    fn name() -> &'static str {
        "memory"
    }

    async fn next_batch(&mut self) -> StrataResult<Option<DocumentBatch>> {
        Ok(self.batches.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Document, DocumentBatch};
    use serde_json::json;

    #[tokio::test]
    async fn a_drained_source_keeps_returning_none() {
        let batch = DocumentBatch::append(vec![Document::new("events", json!({"id": 1}))]);
        let mut source = MemorySource::new([batch]);

        assert!(source.next_batch().await.unwrap().is_some());
        assert!(source.next_batch().await.unwrap().is_none());
        assert!(source.next_batch().await.unwrap().is_none());
    }
}
