//! Compiled-component cache with counter-based invalidation.
//!
//! Memoizes the fully assembled compiled component per placed instance,
//! keyed by the composite version (viewport mode + version stamp +
//! configuration fingerprint) folded with two monotonic counters: a
//! per-instance epoch bumped by `invalidate`, and a global epoch bumped by
//! `invalidate_all` (bulk operations like a project import). Bumping a
//! counter changes every future key for the affected scope, forcing exactly
//! one recomputation on next access without walking or diffing anything.
//!
//! At most one live entry exists per placed-instance id; entries are only
//! ever replaced whole, never mutated in place, so last-writer-wins per key
//! is the entire locking discipline.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::component::{CompiledComponent, CompositeVersion};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FullKey {
    version: CompositeVersion,
    instance_epoch: u64,
    global_epoch: u64,
}

struct CacheSlot {
    key: FullKey,
    component: Arc<CompiledComponent>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, CacheSlot>,
    instance_epochs: HashMap<String, u64>,
    global_epoch: u64,
}

#[derive(Default)]
pub struct ComponentCache {
    inner: Mutex<Inner>,
}

impl ComponentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached component for the instance, if the key still matches.
    pub fn get(&self, instance_id: &str, version: &CompositeVersion) -> Option<Arc<CompiledComponent>> {
        let inner = self.inner.lock();
        let key = inner.full_key(instance_id, version);
        inner
            .entries
            .get(instance_id)
            .filter(|slot| slot.key == key)
            .map(|slot| slot.component.clone())
    }

    /// Look up, recomputing through the pipeline on a miss. A stale
    /// computation (the instance was invalidated while `compute` ran) is
    /// returned to the caller but not stored, so the next access
    /// recomputes under the new epoch.
    pub fn get_or_compute<F>(
        &self,
        instance_id: &str,
        version: &CompositeVersion,
        compute: F,
    ) -> Result<Arc<CompiledComponent>>
    where
        F: FnOnce() -> Result<CompiledComponent>,
    {
        let key = {
            let inner = self.inner.lock();
            if let Some(slot) = inner.entries.get(instance_id) {
                let key = inner.full_key(instance_id, version);
                if slot.key == key {
                    return Ok(slot.component.clone());
                }
            }
            inner.full_key(instance_id, version)
        };

        let component = Arc::new(compute()?);

        let mut inner = self.inner.lock();
        let current_key = inner.full_key(instance_id, version);
        if current_key == key {
            debug!(instance_id, "caching compiled component");
            inner.entries.insert(
                instance_id.to_string(),
                CacheSlot {
                    key,
                    component: component.clone(),
                },
            );
        } else {
            debug!(instance_id, "discarding stale compilation result");
        }
        Ok(component)
    }

    /// Bump the instance's epoch and drop its entry. The next access is
    /// guaranteed to recompute and to return a different object even if
    /// recomputation yields equal values.
    pub fn invalidate(&self, instance_id: &str) {
        let mut inner = self.inner.lock();
        *inner
            .instance_epochs
            .entry(instance_id.to_string())
            .or_insert(0) += 1;
        inner.entries.remove(instance_id);
        debug!(instance_id, "cache invalidated");
    }

    /// Bump the global epoch, invalidating every instance at once.
    pub fn invalidate_all(&self) {
        let mut inner = self.inner.lock();
        inner.global_epoch += 1;
        inner.entries.clear();
        debug!("cache fully invalidated");
    }

    /// Forget a destroyed placed instance entirely.
    pub fn remove(&self, instance_id: &str) {
        let mut inner = self.inner.lock();
        inner.entries.remove(instance_id);
        inner.instance_epochs.remove(instance_id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    fn full_key(&self, instance_id: &str, version: &CompositeVersion) -> FullKey {
        FullKey {
            version: version.clone(),
            instance_epoch: self.instance_epochs.get(instance_id).copied().unwrap_or(0),
            global_epoch: self.global_epoch,
        }
    }
}
