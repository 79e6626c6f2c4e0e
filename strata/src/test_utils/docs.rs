//! Document builders used across tests.

use serde_json::json;

use crate::types::{Document, DocumentBatch};

/// One event document with a scalar list, the shape most tests start from.
pub fn sample_event(id: i64, tags: &[&str]) -> Document {
    Document::new(
        "events",
        json!({
            "id": id,
            "tags": tags,
        }),
    )
}

/// An append batch of event documents with nested user objects.
pub fn sample_events_batch(count: i64) -> DocumentBatch {
    let documents = (1..=count)
        .map(|id| {
            Document::new(
                "events",
                json!({
                    "id": id,
                    "name": format!("event-{id}"),
                    "user": {"id": id * 10, "active": true},
                    "tags": [format!("t{id}"), "common".to_string()],
                }),
            )
        })
        .collect();
    DocumentBatch::append(documents)
}
