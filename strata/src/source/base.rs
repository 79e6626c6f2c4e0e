use std::future::Future;

use crate::error::StrataResult;
use crate::types::DocumentBatch;

/// Trait for systems the pipeline pulls document batches from.
///
/// A [`DocumentSource`] is a capability contract with a single operation:
/// produce the next batch, or `None` once the source is drained. The
/// pipeline turns every batch into exactly one load package, so sources
/// control package granularity by how they cut batches.
pub trait DocumentSource {
    /// Returns the name of the source backend.
    fn name() -> &'static str;

    /// Pulls the next document batch, or `None` when the source is drained.
    ///
    /// Batches must carry documents in the order they should be normalized;
    /// row identifiers of root rows depend on the package they land in, not
    /// on this order.
    fn next_batch(&mut self) -> impl Future<Output = StrataResult<Option<DocumentBatch>>> + Send;
}
