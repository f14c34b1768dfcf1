//! Client-side artifact fetch with in-flight deduplication and a content
//! cache.
//!
//! A burst of near-simultaneous requests for one placed instance must cost
//! at most one network round trip: concurrent calls with an identical
//! (package, instance, version) key share a single transport call through a
//! per-key `OnceCell`. Resolved sets stay cached under their key until
//! evicted; failed attempts are never cached, so a later call retries the
//! wire.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use crate::artifacts::ArtifactSet;
use crate::error::{PipelineError, Result};

/// The wire. Implemented over HTTP by the host page; tests use an
/// in-memory fake.
pub trait ArtifactTransport: Send + Sync + 'static {
    fn fetch(
        &self,
        package: &str,
        instance: Option<&str>,
    ) -> impl Future<Output = Result<ArtifactSet>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchKey {
    pub package: String,
    pub instance: Option<String>,
    pub version: u64,
}

type Cell = Arc<OnceCell<Arc<ArtifactSet>>>;

pub struct FetchCache<T> {
    transport: Arc<T>,
    entries: Mutex<HashMap<FetchKey, Cell>>,
}

impl<T: ArtifactTransport> FetchCache<T> {
    pub fn new(transport: T) -> Self {
        FetchCache {
            transport: Arc::new(transport),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the artifact set for one placed instance. Concurrent callers
    /// with the same key resolve from one transport call.
    pub async fn fetch(
        &self,
        package: &str,
        instance: Option<&str>,
        version: u64,
    ) -> Result<Arc<ArtifactSet>> {
        let key = FetchKey {
            package: package.to_string(),
            instance: instance.map(str::to_string),
            version,
        };

        let cell = {
            let mut entries = self.entries.lock().await;
            entries.entry(key.clone()).or_default().clone()
        };

        let transport = self.transport.clone();
        let package_owned = key.package.clone();
        let instance_owned = key.instance.clone();
        let result = cell
            .get_or_try_init(|| async move {
                debug!(package = %package_owned, "artifact fetch over the wire");
                let set = transport
                    .fetch(&package_owned, instance_owned.as_deref())
                    .await?;
                validate_set(&set)?;
                Ok::<_, PipelineError>(Arc::new(set))
            })
            .await;

        match result {
            Ok(set) => Ok(set.clone()),
            Err(e) => {
                // Do not cache failures; the next caller gets a fresh try.
                self.forget_failed(&key, &cell).await;
                Err(e)
            }
        }
    }

    /// Drop the map entry for a failed fetch, but only if it still holds the
    /// cell our attempt ran on. Another caller may have replaced it with a
    /// fresh cell that is mid-initialization; that one must stay.
    async fn forget_failed(&self, key: &FetchKey, cell: &Cell) {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(key) {
            if Arc::ptr_eq(existing, cell) && existing.get().is_none() {
                entries.remove(key);
            }
        }
    }

    /// Drop one cached resolution.
    pub async fn evict(&self, package: &str, instance: Option<&str>, version: u64) {
        let key = FetchKey {
            package: package.to_string(),
            instance: instance.map(str::to_string),
            version,
        };
        self.entries.lock().await.remove(&key);
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

/// An artifact set with nothing usable, or with no script artifact, is
/// unrecoverable for the instance; the lifecycle's retry policy applies,
/// never an internal retry.
fn validate_set(set: &ArtifactSet) -> Result<()> {
    if set.valid_count() == 0 {
        return Err(PipelineError::Compile {
            package: set.package.clone(),
            message: "no valid artifacts were returned".to_string(),
        });
    }
    if set.script().is_none() {
        return Err(PipelineError::Compile {
            package: set.package.clone(),
            message: "no script artifact is present".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{ArtifactDescriptor, ArtifactKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn script_set(package: &str) -> ArtifactSet {
        ArtifactSet {
            package: package.to_string(),
            namespace_prefix: format!("{}_1_x", package),
            artifacts: vec![ArtifactDescriptor {
                file_name: "index.js".to_string(),
                kind: ArtifactKind::Script,
                content: Some("export const main = () => null;".to_string()),
                url: None,
                namespace_prefix: format!("{}_1_x", package),
                message: None,
            }],
        }
    }

    struct CountingTransport {
        calls: AtomicUsize,
        fail_first: usize,
        empty: bool,
    }

    impl CountingTransport {
        fn new() -> Self {
            CountingTransport {
                calls: AtomicUsize::new(0),
                fail_first: 0,
                empty: false,
            }
        }
    }

    impl ArtifactTransport for CountingTransport {
        async fn fetch(&self, package: &str, _instance: Option<&str>) -> Result<ArtifactSet> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            if call < self.fail_first {
                return Err(PipelineError::NotFound(package.to_string()));
            }
            if self.empty {
                return Ok(ArtifactSet {
                    package: package.to_string(),
                    namespace_prefix: "p".to_string(),
                    artifacts: vec![],
                });
            }
            Ok(script_set(package))
        }
    }

    #[tokio::test]
    async fn test_concurrent_fetches_share_one_call() {
        let cache = Arc::new(FetchCache::new(CountingTransport::new()));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.fetch("Leaderboard", Some("tab1"), 1).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(cache.transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_versions_fetch_separately() {
        let cache = FetchCache::new(CountingTransport::new());
        cache.fetch("Leaderboard", None, 1).await.unwrap();
        cache.fetch("Leaderboard", None, 2).await.unwrap();
        assert_eq!(cache.transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_resolved_set_is_content_cached() {
        let cache = FetchCache::new(CountingTransport::new());
        let a = cache.fetch("Leaderboard", None, 1).await.unwrap();
        let b = cache.fetch("Leaderboard", None, 1).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let transport = CountingTransport {
            calls: AtomicUsize::new(0),
            fail_first: 1,
            empty: false,
        };
        let cache = FetchCache::new(transport);
        assert!(cache.fetch("Leaderboard", None, 1).await.is_err());
        assert!(cache.fetch("Leaderboard", None, 1).await.is_ok());
        assert_eq!(cache.transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_cleanup_leaves_newer_cell_alone() {
        let cache = FetchCache::new(CountingTransport::new());
        let key = FetchKey {
            package: "Leaderboard".to_string(),
            instance: None,
            version: 1,
        };

        // A newer caller's cell sits in the map, still initializing.
        let newer: Cell = Arc::default();
        cache.entries.lock().await.insert(key.clone(), newer.clone());

        // Cleanup for an older attempt's cell must not touch it.
        let stale: Cell = Arc::default();
        cache.forget_failed(&key, &stale).await;
        {
            let entries = cache.entries.lock().await;
            assert!(entries.get(&key).is_some_and(|c| Arc::ptr_eq(c, &newer)));
        }

        // Cleanup for the cell that actually failed does remove it.
        cache.forget_failed(&key, &newer).await;
        assert!(cache.entries.lock().await.get(&key).is_none());
    }

    #[tokio::test]
    async fn test_empty_artifact_set_is_descriptive_error() {
        let transport = CountingTransport {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            empty: true,
        };
        let cache = FetchCache::new(transport);
        let err = cache.fetch("Leaderboard", None, 1).await.unwrap_err();
        assert!(err.to_string().contains("no valid artifacts"));
    }

    #[tokio::test]
    async fn test_evict_forces_refetch() {
        let cache = FetchCache::new(CountingTransport::new());
        cache.fetch("Leaderboard", None, 1).await.unwrap();
        cache.evict("Leaderboard", None, 1).await;
        cache.fetch("Leaderboard", None, 1).await.unwrap();
        assert_eq!(cache.transport.calls.load(Ordering::SeqCst), 2);
    }
}
