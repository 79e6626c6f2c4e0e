//! Per-(package, table) load state, persisted so that interrupted runs can
//! resume without re-committing finished tables.

pub mod store;

pub use store::{FsStateStore, MemoryStateStore, StateStore, TableLoadState};
