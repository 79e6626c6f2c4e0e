//! Configuration types shared across the strata pipeline crates.

pub mod shared;
