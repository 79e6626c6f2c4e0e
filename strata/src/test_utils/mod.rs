//! Testing utilities for pipelines and destinations.
//!
//! The utilities here are shared between the crate's own tests and downstream
//! crates testing their backends (enable the `test-utils` feature). The
//! central piece is [`FlakyDestination`], a wrapper that injects classified
//! failures into an inner destination to exercise retry, resume and
//! partial-load behavior deterministically.

pub mod docs;
pub mod flaky_destination;

pub use docs::{sample_event, sample_events_batch};
pub use flaky_destination::FlakyDestination;
