//! Storage and remote health checks

use anyhow::Result;
use async_trait::async_trait;
use opendal::Operator;

/// Anything whose reachability can be probed: the local operator, the
/// central store.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> Result<()>;
}

/// Verify the storage endpoint is reachable by listing the root
pub async fn check_health(op: &Operator) -> Result<()> {
    op.list("/")
        .await
        .map(|_| ())
        .map_err(|e| anyhow::anyhow!("storage health check failed: {e}"))
}

#[async_trait]
impl HealthCheck for Operator {
    async fn check(&self) -> Result<()> {
        check_health(self).await
    }
}
