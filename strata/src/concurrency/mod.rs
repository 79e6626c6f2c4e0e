//! Coordination primitives shared by pipeline workers.

pub mod shutdown;

pub use shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel, is_shutdown};
