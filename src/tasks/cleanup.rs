//! TTL Cleanup Task
//!
//! Background task that periodically removes expired cache entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::ShardedCache;

/// Spawns a background task that periodically sweeps expired entries.
///
/// Each pass locks one shard at a time, so it never blocks the whole cache.
/// The task exits when `shutdown` is cancelled.
///
/// # Example
/// ```ignore
/// let token = CancellationToken::new();
/// let handle = spawn_cleanup_task(cache.clone(), 1, token.clone());
/// // Later, during shutdown:
/// token.cancel();
/// handle.await?;
/// ```
pub fn spawn_cleanup_task(
    cache: Arc<ShardedCache>,
    cleanup_interval_secs: u64,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting TTL cleanup task with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let removed = cache.cleanup_expired();
            if removed > 0 {
                info!("TTL cleanup: removed {} expired entries", removed);
            } else {
                debug!("TTL cleanup: no expired entries found");
            }
        }

        info!("TTL cleanup task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StoreLimits;
    use bytes::Bytes;

    fn test_cache() -> Arc<ShardedCache> {
        Arc::new(ShardedCache::new(2, StoreLimits::default()))
    }

    #[tokio::test]
    async fn test_cleanup_task_removes_expired_entries() {
        let cache = test_cache();
        cache
            .set(Bytes::from_static(b"expire_soon"), Bytes::from_static(b"value"), 0, 1)
            .unwrap();

        let token = CancellationToken::new();
        let handle = spawn_cleanup_task(cache.clone(), 1, token.clone());

        tokio::time::sleep(Duration::from_millis(2500)).await;

        // Swept by the task, not by a lazy lookup
        assert_eq!(cache.len(), 0, "Expired entry should have been cleaned up");
        assert!(cache.stats().expirations >= 1);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_task_preserves_valid_entries() {
        let cache = test_cache();
        cache
            .set(Bytes::from_static(b"long_lived"), Bytes::from_static(b"value"), 0, 3600)
            .unwrap();

        let token = CancellationToken::new();
        let handle = spawn_cleanup_task(cache.clone(), 1, token.clone());

        tokio::time::sleep(Duration::from_millis(1500)).await;

        let entry = cache.get(b"long_lived").unwrap();
        assert!(entry.is_some(), "Valid entry should not be removed");
        assert_eq!(&entry.unwrap().value[..], b"value");

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_task_stops_on_cancel() {
        let token = CancellationToken::new();
        let handle = spawn_cleanup_task(test_cache(), 60, token.clone());

        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "Task should finish promptly after cancel");
    }
}
