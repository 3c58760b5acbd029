//! Resource factory trait

use crate::error::Result;
use async_trait::async_trait;

/// Creates and disposes of pooled resources
///
/// One factory is injected per pool. `create` may fail; the pool logs and
/// counts failures without surfacing them from health passes.
#[async_trait]
pub trait ResourceFactory<R>: Send + Sync + 'static {
    /// Open a new resource
    async fn create(&self) -> Result<R>;

    /// Dispose of a resource removed from the pool. Errors are logged and
    /// otherwise ignored by the pool.
    fn close(&self, resource: R) -> Result<()> {
        drop(resource);
        Ok(())
    }

    /// Short name used in logs
    fn name(&self) -> &str {
        "resource"
    }
}
