// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The Compute API Server as a replication source.
//!
//! [`LoadBalancerSource`] is the seam between the replicator and the remote
//! service. [`GrpcSource`] implements it over the tonic client; tests supply
//! scripted fakes.

use crate::metrics;
use crate::pb::{
    LoadBalancerPrivateServiceClient, LoadBalancerRemoveFinalizerRequest,
    LoadBalancerSearchStreamPrivateRequest, LoadBalancerUpdateStatusRequest,
    LoadBalancerWatchRequest, LoadBalancerWatchResponse,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

/// Stream of deltas from the source.
pub type DeltaStream = BoxStream<'static, Result<LoadBalancerWatchResponse, tonic::Status>>;

#[async_trait]
pub trait LoadBalancerSource: Send + Sync {
    /// Full listing: `Updated` deltas then a `Bookmark` carrying the snapshot version.
    async fn search_stream_private(
        &self,
        request: LoadBalancerSearchStreamPrivateRequest,
    ) -> Result<DeltaStream, tonic::Status>;

    /// Incremental changes after `request.resource_version`.
    async fn watch(&self, request: LoadBalancerWatchRequest) -> Result<DeltaStream, tonic::Status>;

    /// Push status back; `NotFound` when the resource is gone upstream.
    async fn update_status(
        &self,
        request: LoadBalancerUpdateStatusRequest,
    ) -> Result<(), tonic::Status>;

    /// Release the upstream finalizer so the source can complete deletion.
    async fn remove_finalizer(
        &self,
        request: LoadBalancerRemoveFinalizerRequest,
    ) -> Result<(), tonic::Status>;
}

/// [`LoadBalancerSource`] over gRPC.
#[derive(Clone)]
pub struct GrpcSource {
    client: LoadBalancerPrivateServiceClient,
}

impl GrpcSource {
    #[must_use]
    pub fn new(client: LoadBalancerPrivateServiceClient) -> Self {
        Self { client }
    }
}

fn record<T>(method: &str, result: &Result<T, tonic::Status>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(_) => "error",
    };
    metrics::record_rpc_call(method, outcome);
}

#[async_trait]
impl LoadBalancerSource for GrpcSource {
    async fn search_stream_private(
        &self,
        request: LoadBalancerSearchStreamPrivateRequest,
    ) -> Result<DeltaStream, tonic::Status> {
        let result = self.client.clone().search_stream_private(request).await;
        record("SearchStreamPrivate", &result);
        Ok(result?.into_inner().boxed())
    }

    async fn watch(&self, request: LoadBalancerWatchRequest) -> Result<DeltaStream, tonic::Status> {
        let result = self.client.clone().watch(request).await;
        record("Watch", &result);
        Ok(result?.into_inner().boxed())
    }

    async fn update_status(
        &self,
        request: LoadBalancerUpdateStatusRequest,
    ) -> Result<(), tonic::Status> {
        let result = self.client.clone().update_status(request).await;
        record("UpdateStatus", &result);
        result.map(|_| ())
    }

    async fn remove_finalizer(
        &self,
        request: LoadBalancerRemoveFinalizerRequest,
    ) -> Result<(), tonic::Status> {
        let result = self.client.clone().remove_finalizer(request).await;
        record("RemoveFinalizer", &result);
        result.map(|_| ())
    }
}
