//! Load packages: the unit of atomic, resumable application of normalized
//! rows to a destination.

pub mod builder;
pub mod load_id;
pub mod manifest;
pub mod storage;

pub use builder::PackageBuilder;
pub use load_id::{LoadIdGenerator, parse_load_id};
pub use manifest::{PackageManifest, TableManifest};
pub use storage::PackageStorage;
