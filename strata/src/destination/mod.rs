//! Destination backends and the capability contract they implement.

pub mod base;
pub mod memory;

pub use base::{Destination, TableLoadRequest};
pub use memory::MemoryDestination;
