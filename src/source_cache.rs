// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory mirror of the Compute API Server LoadBalancers.
//!
//! [`SourceCache::run`] keeps the mirror in sync through a [`ListerWatcher`]
//! and emits the key of every object that changed. Reconcilers read it with
//! [`SourceCache::get`] and never call the remote service in the hot path.

use crate::constants::{RELIST_INITIAL_BACKOFF, RELIST_MAX_BACKOFF};
use crate::crd::Loadbalancer;
use crate::lister_watcher::{ListerWatcher, WatchEvent};
use crate::metrics;
use kube::ResourceExt;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Namespace/name key shared by both mirrors and the work queue.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a Kubernetes object, `None` for cluster-scoped or unnamed objects.
    pub fn of<K: kube::Resource>(obj: &K) -> Option<Self> {
        let meta = obj.meta();
        Some(Self::new(meta.namespace.clone()?, meta.name.clone()?))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Default)]
struct Inner {
    items: HashMap<ObjectKey, Arc<Loadbalancer>>,
    resource_version: String,
}

/// Keyed mirror of the source behind a read/write lock.
#[derive(Default)]
pub struct SourceCache {
    inner: RwLock<Inner>,
}

impl SourceCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &ObjectKey) -> Option<Arc<Loadbalancer>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.items.get(key).cloned()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<ObjectKey> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<_> = inner.items.keys().cloned().collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last resource version seen from a snapshot or an event.
    #[must_use]
    pub fn resource_version(&self) -> String {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .resource_version
            .clone()
    }

    /// Replace the whole view with a fresh snapshot.
    ///
    /// Returns the keys that were added, changed or removed, sorted.
    pub fn replace(&self, items: Vec<Loadbalancer>, resource_version: String) -> Vec<ObjectKey> {
        let mut fresh = HashMap::with_capacity(items.len());
        for lb in items {
            if let Some(key) = ObjectKey::of(&lb) {
                fresh.insert(key, Arc::new(lb));
            }
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut changed: Vec<ObjectKey> = inner
            .items
            .keys()
            .filter(|key| !fresh.contains_key(*key))
            .cloned()
            .collect();
        changed.extend(
            fresh
                .iter()
                .filter(|(key, lb)| inner.items.get(*key) != Some(*lb))
                .map(|(key, _)| key.clone()),
        );
        changed.sort();

        inner.items = fresh;
        inner.resource_version = resource_version;
        changed
    }

    /// Apply one watch event, returning the affected key.
    ///
    /// Bookmarks only advance the resource version.
    pub fn apply(&self, event: WatchEvent) -> Option<ObjectKey> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match event {
            WatchEvent::Modified(lb) => {
                let key = ObjectKey::of(&lb)?;
                if let Some(rv) = lb.resource_version() {
                    inner.resource_version = rv;
                }
                inner.items.insert(key.clone(), Arc::new(lb));
                Some(key)
            }
            WatchEvent::Deleted(lb) => {
                let key = ObjectKey::of(&lb)?;
                if let Some(rv) = lb.resource_version() {
                    inner.resource_version = rv;
                }
                inner.items.remove(&key);
                Some(key)
            }
            WatchEvent::Bookmark(rv) => {
                inner.resource_version = rv;
                None
            }
            WatchEvent::Error(_) => None,
        }
    }

    /// Keep the cache synchronized until `shutdown` fires or the trigger
    /// receiver is dropped.
    ///
    /// List, replace, then watch from the snapshot version. A watch error
    /// forces a fresh list; a clean watch close resumes from the last seen
    /// version, bookmarks included; a failed list backs off before retrying.
    pub async fn run(
        &self,
        lister_watcher: ListerWatcher,
        triggers: mpsc::Sender<ObjectKey>,
        shutdown: CancellationToken,
    ) {
        let mut backoff = RELIST_INITIAL_BACKOFF;
        'relist: loop {
            let snapshot = tokio::select! {
                () = shutdown.cancelled() => return,
                result = lister_watcher.list() => result,
            };
            let snapshot = match snapshot {
                Ok(snapshot) => {
                    backoff = RELIST_INITIAL_BACKOFF;
                    snapshot
                }
                Err(e) => {
                    warn!(error = %e, "Failed to list load balancers, retrying in {:?}", backoff);
                    tokio::select! {
                        () = shutdown.cancelled() => return,
                        () = tokio::time::sleep(backoff) => {}
                    }
                    backoff = next_backoff(backoff);
                    continue;
                }
            };

            info!(
                "Synchronized {} load balancers at resource version {}",
                snapshot.items.len(),
                snapshot.resource_version
            );
            for key in self.replace(snapshot.items, snapshot.resource_version) {
                if triggers.send(key).await.is_err() {
                    return;
                }
            }

            loop {
                let mut events = lister_watcher.watch(self.resource_version());
                loop {
                    let event = tokio::select! {
                        () = shutdown.cancelled() => return,
                        event = events.recv() => event,
                    };
                    match event {
                        None => {
                            debug!("Watch closed, resuming from {}", self.resource_version());
                            break;
                        }
                        Some(WatchEvent::Error(e)) => {
                            warn!(error = %e, "Watch failed, resynchronizing");
                            metrics::record_watch_restart();
                            continue 'relist;
                        }
                        Some(event) => {
                            if let Some(key) = self.apply(event) {
                                if triggers.send(key).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(RELIST_MAX_BACKOFF)
}

/// Time of the last message received on the watch stream.
#[derive(Debug)]
pub struct WatchHealth {
    last: Mutex<Instant>,
}

impl Default for WatchHealth {
    fn default() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }
}

impl WatchHealth {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    #[must_use]
    pub fn since_reset(&self) -> Duration {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    #[must_use]
    pub fn is_healthy(&self, threshold: Duration) -> bool {
        self.since_reset() <= threshold
    }
}

#[cfg(test)]
#[path = "source_cache_tests.rs"]
mod source_cache_tests;
