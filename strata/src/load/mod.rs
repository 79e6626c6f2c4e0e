//! Package loading: retrying destination calls and driving tables through
//! their load state machine.

pub mod loader;
pub mod retry;

pub use loader::{LoadReport, Loader};
pub use retry::run_with_retry;
