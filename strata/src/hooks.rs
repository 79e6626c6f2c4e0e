//! Post-load hooks.

use futures::future::BoxFuture;

use crate::error::StrataResult;

/// Callback invoked after every table of a package reached `Committed` and
/// the package was archived.
///
/// Typical implementations kick off downstream transformations that must only
/// see complete loads. The hook is object-safe so the loader can hold any
/// number of implementations behind one pointer; use
/// [`futures::FutureExt::boxed`] to adapt an `async` block.
pub trait PostLoadHook: Send + Sync {
    fn on_package_loaded<'a>(&'a self, load_id: &'a str) -> BoxFuture<'a, StrataResult<()>>;
}

/// Hook that does nothing, the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpHook;

impl PostLoadHook for NoOpHook {
    fn on_package_loaded<'a>(&'a self, _load_id: &'a str) -> BoxFuture<'a, StrataResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
