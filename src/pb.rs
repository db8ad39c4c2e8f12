// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Protobuf messages and client for `proto.LoadBalancerPrivateService`.
//!
//! Messages are declared with `prost` derives and the client is written
//! directly against [`tonic::client::Grpc`], so building the crate does not
//! need `protoc`.

use std::collections::HashMap;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoadBalancerMetadataPrivate {
    #[prost(string, tag = "1")]
    pub cloud_account_id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub resource_id: String,
    #[prost(string, tag = "4")]
    pub resource_version: String,
    #[prost(map = "string, string", tag = "5")]
    pub labels: HashMap<String, String>,
    #[prost(message, optional, tag = "6")]
    pub creation_timestamp: Option<prost_types::Timestamp>,
    #[prost(message, optional, tag = "7")]
    pub deletion_timestamp: Option<prost_types::Timestamp>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoadBalancerPool {
    #[prost(int32, tag = "1")]
    pub port: i32,
    #[prost(string, tag = "2")]
    pub monitor: String,
    #[prost(string, tag = "3")]
    pub load_balancing_mode: String,
    #[prost(map = "string, string", tag = "4")]
    pub instance_selectors: HashMap<String, String>,
    #[prost(string, repeated, tag = "5")]
    pub instance_resource_ids: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoadBalancerListener {
    #[prost(int32, tag = "1")]
    pub port: i32,
    #[prost(message, optional, tag = "2")]
    pub pool: Option<LoadBalancerPool>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoadBalancerSecurity {
    #[prost(string, repeated, tag = "1")]
    pub sourceips: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoadBalancerSpecPrivate {
    #[prost(message, repeated, tag = "1")]
    pub listeners: Vec<LoadBalancerListener>,
    #[prost(message, optional, tag = "2")]
    pub security: Option<LoadBalancerSecurity>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoadBalancerConditionsListenerStatus {
    #[prost(int32, tag = "1")]
    pub port: i32,
    #[prost(bool, tag = "2")]
    pub pool_created: bool,
    #[prost(bool, tag = "3")]
    pub vip_created: bool,
    #[prost(bool, tag = "4")]
    pub vip_pool_linked: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoadBalancerConditionsStatus {
    #[prost(message, repeated, tag = "1")]
    pub listeners: Vec<LoadBalancerConditionsListenerStatus>,
    #[prost(bool, tag = "2")]
    pub firewall_rule_created: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoadBalancerPoolStatusMember {
    #[prost(string, tag = "1")]
    pub instance_ref: String,
    #[prost(string, tag = "2")]
    pub ip_address: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoadBalancerListenerStatus {
    #[prost(int32, tag = "1")]
    pub port: i32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(int32, tag = "3")]
    pub vip_id: i32,
    #[prost(int32, tag = "4")]
    pub pool_id: i32,
    #[prost(string, tag = "5")]
    pub state: String,
    #[prost(string, tag = "6")]
    pub message: String,
    #[prost(message, repeated, tag = "7")]
    pub pool_members: Vec<LoadBalancerPoolStatusMember>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoadBalancerStatusPrivate {
    #[prost(message, optional, tag = "1")]
    pub conditions: Option<LoadBalancerConditionsStatus>,
    #[prost(message, repeated, tag = "2")]
    pub listeners: Vec<LoadBalancerListenerStatus>,
    #[prost(string, tag = "3")]
    pub state: String,
    #[prost(string, tag = "4")]
    pub vip: String,
    #[prost(string, tag = "5")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoadBalancerPrivate {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<LoadBalancerMetadataPrivate>,
    #[prost(message, optional, tag = "2")]
    pub spec: Option<LoadBalancerSpecPrivate>,
    #[prost(message, optional, tag = "3")]
    pub status: Option<LoadBalancerStatusPrivate>,
}

/// Kind of change carried by a [`LoadBalancerWatchResponse`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum WatchDeltaType {
    Updated = 0,
    Deleted = 1,
    /// Carries only `metadata.resourceVersion`.
    Bookmark = 2,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoadBalancerWatchResponse {
    #[prost(enumeration = "WatchDeltaType", tag = "1")]
    pub r#type: i32,
    #[prost(message, optional, tag = "2")]
    pub object: Option<LoadBalancerPrivate>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoadBalancerSearchStreamPrivateRequest {
    #[prost(string, tag = "1")]
    pub resource_version: String,
    #[prost(string, tag = "2")]
    pub availability_zone: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoadBalancerWatchRequest {
    #[prost(string, tag = "1")]
    pub resource_version: String,
    #[prost(string, tag = "2")]
    pub availability_zone: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoadBalancerIdReference {
    #[prost(string, tag = "1")]
    pub cloud_account_id: String,
    #[prost(string, tag = "2")]
    pub resource_id: String,
    #[prost(string, tag = "3")]
    pub resource_version: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoadBalancerUpdateStatusRequest {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<LoadBalancerIdReference>,
    #[prost(message, optional, tag = "2")]
    pub status: Option<LoadBalancerStatusPrivate>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoadBalancerRemoveFinalizerRequest {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<LoadBalancerIdReference>,
}

/// `google.protobuf.Empty`
#[derive(Clone, PartialEq, prost::Message)]
pub struct Empty {}

const SEARCH_STREAM_PRIVATE: &str = "/proto.LoadBalancerPrivateService/SearchStreamPrivate";
const WATCH: &str = "/proto.LoadBalancerPrivateService/Watch";
const UPDATE_STATUS: &str = "/proto.LoadBalancerPrivateService/UpdateStatus";
const REMOVE_FINALIZER: &str = "/proto.LoadBalancerPrivateService/RemoveFinalizer";

/// Client for `proto.LoadBalancerPrivateService`.
#[derive(Clone, Debug)]
pub struct LoadBalancerPrivateServiceClient {
    inner: tonic::client::Grpc<Channel>,
}

impl LoadBalancerPrivateServiceClient {
    #[must_use]
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    /// Connect to `addr` (e.g. `http://compute-api-server:30001`).
    ///
    /// # Errors
    ///
    /// Returns a transport error when the address is invalid or the
    /// connection cannot be established.
    pub async fn connect(addr: String) -> Result<Self, tonic::transport::Error> {
        let channel = Endpoint::from_shared(addr)?.connect().await?;
        Ok(Self::new(channel))
    }

    async fn ready(&mut self) -> Result<(), tonic::Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unavailable(format!("Service was not ready: {e}")))
    }

    /// Stream every LoadBalancer as `Updated` deltas followed by a `Bookmark`.
    ///
    /// # Errors
    ///
    /// Returns the RPC status when the call cannot be started.
    pub async fn search_stream_private(
        &mut self,
        request: LoadBalancerSearchStreamPrivateRequest,
    ) -> Result<tonic::Response<tonic::Streaming<LoadBalancerWatchResponse>>, tonic::Status> {
        self.ready().await?;
        let codec = tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static(SEARCH_STREAM_PRIVATE);
        self.inner
            .server_streaming(tonic::Request::new(request), path, codec)
            .await
    }

    /// Stream changes after `request.resource_version`.
    ///
    /// # Errors
    ///
    /// Returns the RPC status when the call cannot be started.
    pub async fn watch(
        &mut self,
        request: LoadBalancerWatchRequest,
    ) -> Result<tonic::Response<tonic::Streaming<LoadBalancerWatchResponse>>, tonic::Status> {
        self.ready().await?;
        let codec = tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static(WATCH);
        self.inner
            .server_streaming(tonic::Request::new(request), path, codec)
            .await
    }

    /// # Errors
    ///
    /// Returns `NotFound` when the LoadBalancer no longer exists upstream.
    pub async fn update_status(
        &mut self,
        request: LoadBalancerUpdateStatusRequest,
    ) -> Result<tonic::Response<Empty>, tonic::Status> {
        self.ready().await?;
        let codec = tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static(UPDATE_STATUS);
        self.inner
            .unary(tonic::Request::new(request), path, codec)
            .await
    }

    /// # Errors
    ///
    /// Returns the RPC status on failure.
    pub async fn remove_finalizer(
        &mut self,
        request: LoadBalancerRemoveFinalizerRequest,
    ) -> Result<tonic::Response<Empty>, tonic::Status> {
        self.ready().await?;
        let codec = tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static(REMOVE_FINALIZER);
        self.inner
            .unary(tonic::Request::new(request), path, codec)
            .await
    }
}
