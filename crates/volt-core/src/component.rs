use std::future::Future;
use std::pin::Pin;

use crate::error::Result;

/// Boxed future returned by component lifecycle methods.
pub type ComponentFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// A long-running subsystem that can be suspended and resumed.
///
/// `start` must be callable again after `stop`; the overwatch supervisor
/// cycles every registered component through stop/start around store outages.
pub trait Component: Send + Sync + 'static {
    /// Stable name used in logs.
    fn identify(&self) -> &str;

    /// Launch the component's background tasks.
    fn start(&self) -> ComponentFuture<'_>;

    /// Cancel the component's background tasks.
    fn stop(&self) -> ComponentFuture<'_>;
}
