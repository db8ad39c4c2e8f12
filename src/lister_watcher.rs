// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! List and Watch over the Compute API Server delta streams.
//!
//! `list` drains `SearchStreamPrivate` into a [`Snapshot`]; `watch` forwards
//! `Watch` deltas as [`WatchEvent`]s on a bounded channel. Both arm an idle
//! timer that is rearmed by every received message, bookmarks included. When
//! it fires the stream is abandoned and reported as
//! [`ListerWatcherError::IdleTimeout`].

use crate::constants::WATCH_EVENT_CHANNEL_CAPACITY;
use crate::convert::LoadBalancerConverter;
use crate::crd::Loadbalancer;
use crate::errors::ListerWatcherError;
use crate::pb::{
    LoadBalancerSearchStreamPrivateRequest, LoadBalancerWatchRequest, LoadBalancerWatchResponse,
    WatchDeltaType,
};
use crate::source::{DeltaStream, LoadBalancerSource};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Result of a full listing.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub items: Vec<Loadbalancer>,
    /// Version carried by the trailing bookmark, the resume point for `watch`.
    pub resource_version: String,
}

/// Event forwarded by [`ListerWatcher::watch`].
///
/// `Error` is always the last event before the channel closes.
#[derive(Debug)]
pub enum WatchEvent {
    Modified(Loadbalancer),
    Deleted(Loadbalancer),
    /// Resource version the source has reached with no object change.
    Bookmark(String),
    Error(ListerWatcherError),
}

/// Cancels itself after `timeout` without a [`IdleTimer::reset`].
struct IdleTimer {
    expired: CancellationToken,
    rearm: Arc<Notify>,
    task: JoinHandle<()>,
}

impl IdleTimer {
    fn start(timeout: Duration) -> Self {
        let expired = CancellationToken::new();
        let rearm = Arc::new(Notify::new());
        let task = {
            let expired = expired.clone();
            let rearm = rearm.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = tokio::time::sleep(timeout) => {
                            expired.cancel();
                            return;
                        }
                        () = rearm.notified() => {}
                    }
                }
            })
        };
        Self {
            expired,
            rearm,
            task,
        }
    }

    fn reset(&self) {
        self.rearm.notify_one();
    }

    async fn expired(&self) {
        self.expired.cancelled().await;
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Receive the next delta, or fail when the idle timer fires first.
async fn next_delta(
    stream: &mut DeltaStream,
    timer: &IdleTimer,
    idle_timeout: Duration,
) -> Result<Option<LoadBalancerWatchResponse>, ListerWatcherError> {
    tokio::select! {
        biased;
        () = timer.expired() => Err(ListerWatcherError::IdleTimeout(idle_timeout)),
        next = stream.next() => match next {
            None => Ok(None),
            Some(Err(status)) => Err(status.into()),
            Some(Ok(delta)) => {
                timer.reset();
                Ok(Some(delta))
            }
        },
    }
}

fn delta_type(delta: &LoadBalancerWatchResponse) -> Option<WatchDeltaType> {
    let kind = WatchDeltaType::try_from(delta.r#type).ok();
    if kind.is_none() {
        warn!("Ignoring delta with unknown type {}", delta.r#type);
    }
    kind
}

fn bookmark_version(delta: &LoadBalancerWatchResponse) -> String {
    delta
        .object
        .as_ref()
        .and_then(|o| o.metadata.as_ref())
        .map(|m| m.resource_version.clone())
        .unwrap_or_default()
}

/// List/Watch adapter over a [`LoadBalancerSource`].
#[derive(Clone)]
pub struct ListerWatcher {
    source: Arc<dyn LoadBalancerSource>,
    converter: LoadBalancerConverter,
    idle_timeout: Duration,
    on_watch_success: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl ListerWatcher {
    #[must_use]
    pub fn new(
        source: Arc<dyn LoadBalancerSource>,
        converter: LoadBalancerConverter,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            source,
            converter,
            idle_timeout,
            on_watch_success: None,
        }
    }

    /// Hook run on every message received by `watch`.
    #[must_use]
    pub fn with_watch_success_hook(mut self, hook: Arc<dyn Fn() + Send + Sync>) -> Self {
        self.on_watch_success = Some(hook);
        self
    }

    fn convert(&self, delta: &LoadBalancerWatchResponse) -> Option<Loadbalancer> {
        let object = delta.object.as_ref()?;
        match self.converter.pb_to_k8s(object) {
            Ok(lb) => Some(lb),
            Err(e) => {
                warn!(error = %e, "Dropping load balancer that cannot be converted");
                None
            }
        }
    }

    /// Full listing: every `Updated` delta up to the trailing bookmark.
    ///
    /// # Errors
    ///
    /// Returns the RPC error, [`ListerWatcherError::IdleTimeout`], or
    /// [`ListerWatcherError::MissingBookmark`] when the stream ends without
    /// a resume version.
    pub async fn list(&self) -> Result<Snapshot, ListerWatcherError> {
        let request = LoadBalancerSearchStreamPrivateRequest {
            resource_version: String::new(),
            availability_zone: self.converter.availability_zone_id().to_string(),
        };
        let timer = IdleTimer::start(self.idle_timeout);
        let mut stream = self.source.search_stream_private(request).await?;

        let mut items = Vec::new();
        let mut resource_version = None;
        while let Some(delta) = next_delta(&mut stream, &timer, self.idle_timeout).await? {
            match delta_type(&delta) {
                Some(WatchDeltaType::Updated) => items.extend(self.convert(&delta)),
                Some(WatchDeltaType::Bookmark) => resource_version = Some(bookmark_version(&delta)),
                Some(WatchDeltaType::Deleted) => {
                    debug!("Ignoring Deleted delta in list stream");
                }
                None => {}
            }
        }

        let resource_version = resource_version.ok_or(ListerWatcherError::MissingBookmark)?;
        debug!(
            "Listed {} load balancers at resource version {}",
            items.len(),
            resource_version
        );
        Ok(Snapshot {
            items,
            resource_version,
        })
    }

    /// Watch changes after `resource_version`.
    ///
    /// A stream error, including the idle timeout, is delivered as one
    /// [`WatchEvent::Error`] after which the channel closes. A clean end of
    /// stream closes the channel without an error.
    #[must_use]
    pub fn watch(&self, resource_version: String) -> mpsc::Receiver<WatchEvent> {
        let (tx, rx) = mpsc::channel(WATCH_EVENT_CHANNEL_CAPACITY);
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.forward(resource_version, &tx).await {
                // The receiver may already be gone; nothing left to notify.
                let _ = tx.send(WatchEvent::Error(e)).await;
            }
        });
        rx
    }

    async fn forward(
        &self,
        resource_version: String,
        tx: &mpsc::Sender<WatchEvent>,
    ) -> Result<(), ListerWatcherError> {
        let request = LoadBalancerWatchRequest {
            resource_version,
            availability_zone: self.converter.availability_zone_id().to_string(),
        };
        let timer = IdleTimer::start(self.idle_timeout);
        let mut stream = self.source.watch(request).await?;

        while let Some(delta) = next_delta(&mut stream, &timer, self.idle_timeout).await? {
            if let Some(hook) = &self.on_watch_success {
                hook();
            }
            let event = match delta_type(&delta) {
                Some(WatchDeltaType::Updated) => self.convert(&delta).map(WatchEvent::Modified),
                Some(WatchDeltaType::Deleted) => self.convert(&delta).map(WatchEvent::Deleted),
                Some(WatchDeltaType::Bookmark) => Some(bookmark_version(&delta))
                    .filter(|rv| !rv.is_empty())
                    .map(WatchEvent::Bookmark),
                None => None,
            };
            if let Some(event) = event {
                if tx.send(event).await.is_err() {
                    debug!("Watch receiver dropped, stopping");
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "lister_watcher_tests.rs"]
mod lister_watcher_tests;
