pub mod concurrency;
pub mod destination;
pub mod error;
pub mod hooks;
pub mod load;
pub mod macros;
pub mod normalize;
pub mod package;
pub mod pipeline;
pub mod schema;
pub mod source;
pub mod state;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
