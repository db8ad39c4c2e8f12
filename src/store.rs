// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Target store abstraction.
//!
//! Reconcilers talk to the Kubernetes API through [`ObjectStore`] so that the
//! read-modify-write cycles (finalizers, status, replication) can be exercised
//! against an in-memory store with the same optimistic-concurrency semantics.
//!
//! [`KubeStore`] is the production implementation. Every call goes through
//! [`retry_api_call`], so transient API failures (429, 5xx, connection errors)
//! are retried with backoff while "not found", "conflict" and "already exists"
//! surface immediately as distinguishable [`StoreError`] variants.

use crate::reconcilers::retry::retry_api_call;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fmt::Debug;
use std::marker::PhantomData;
use thiserror::Error;
use tracing::debug;

#[cfg(test)]
pub mod memory;

/// Errors returned by an [`ObjectStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    /// Object does not exist (HTTP 404)
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// Stale resourceVersion on write (HTTP 409)
    #[error("conflict writing {kind} {namespace}/{name}: {message}")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
        message: String,
    },

    /// Create of an object that already exists (HTTP 409, reason `AlreadyExists`)
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    /// Object could not be encoded for a status write
    #[error("failed to encode {kind}: {source}")]
    Serialization {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    /// Any other Kubernetes API failure
    #[error("Kubernetes API error: {0}")]
    Api(#[source] kube::Error),

    /// Failure in a non-Kubernetes backing store
    #[error("store error: {0}")]
    Other(String),
}

impl StoreError {
    /// Classify a result from the Kubernetes API for the given object.
    #[must_use]
    pub fn from_api(err: kube::Error, kind: &str, namespace: &str, name: &str) -> Self {
        let response = match err {
            kube::Error::Api(response) => response,
            other => return Self::Api(other),
        };
        let reason = response.reason.clone();
        match (response.code, reason.as_str()) {
            (404, _) => Self::NotFound {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            (409, "AlreadyExists") => Self::AlreadyExists {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            (409, _) => Self::Conflict {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
                message: response.message,
            },
            _ => Self::Api(kube::Error::Api(response)),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// Namespaced object store with Kubernetes semantics.
///
/// - `get` returns `Ok(None)` when the object does not exist.
/// - `replace` writes metadata and spec, leaving status untouched, and fails
///   with [`StoreError::Conflict`] when `metadata.resourceVersion` is stale.
/// - `replace_status` writes only the status subresource.
/// - `delete` of an object holding finalizers only marks it deleting.
#[async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Clone + Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError>;

    async fn list(&self, namespace: &str) -> Result<Vec<K>, StoreError>;

    async fn create(&self, obj: &K) -> Result<K, StoreError>;

    async fn replace(&self, obj: &K) -> Result<K, StoreError>;

    async fn replace_status(&self, obj: &K) -> Result<K, StoreError>;

    /// Write only `metadata.finalizers`, guarded by `resource_version` when given.
    ///
    /// Leaves every other field untouched, including fields `K` does not model.
    async fn replace_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
        resource_version: Option<&str>,
    ) -> Result<K, StoreError>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

/// Creates namespaces on demand.
#[async_trait]
pub trait Namespaces: Send + Sync {
    /// Create the namespace if it does not exist. Idempotent.
    async fn ensure(&self, name: &str) -> Result<(), StoreError>;
}

/// [`ObjectStore`] backed by the Kubernetes API server.
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K> KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn object_key<K: Resource<DynamicType = ()>>(obj: &K) -> (String, String) {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        let api = self.api(namespace);
        let operation = format!("get {} {namespace}/{name}", K::kind(&()));
        retry_api_call(|| api.get_opt(name), &operation)
            .await
            .map_err(|e| StoreError::from_api(e, &K::kind(&()), namespace, name))
    }

    async fn list(&self, namespace: &str) -> Result<Vec<K>, StoreError> {
        let api = self.api(namespace);
        let operation = format!("list {} in {namespace}", K::kind(&()));
        let params = ListParams::default();
        let list = retry_api_call(|| api.list(&params), &operation)
            .await
            .map_err(|e| StoreError::from_api(e, &K::kind(&()), namespace, ""))?;
        Ok(list.items)
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let (namespace, name) = object_key(obj);
        let api = self.api(&namespace);
        let operation = format!("create {} {namespace}/{name}", K::kind(&()));
        debug!(namespace = %namespace, name = %name, kind = %K::kind(&()), "Creating object");
        let params = PostParams::default();
        retry_api_call(|| api.create(&params, obj), &operation)
            .await
            .map_err(|e| StoreError::from_api(e, &K::kind(&()), &namespace, &name))
    }

    async fn replace(&self, obj: &K) -> Result<K, StoreError> {
        let (namespace, name) = object_key(obj);
        let api = self.api(&namespace);
        let operation = format!("replace {} {namespace}/{name}", K::kind(&()));
        let params = PostParams::default();
        retry_api_call(|| api.replace(&name, &params, obj), &operation)
            .await
            .map_err(|e| StoreError::from_api(e, &K::kind(&()), &namespace, &name))
    }

    async fn replace_status(&self, obj: &K) -> Result<K, StoreError> {
        let (namespace, name) = object_key(obj);
        let api = self.api(&namespace);
        serde_json::to_vec(obj).map_err(|source| StoreError::Serialization {
            kind: K::kind(&()).to_string(),
            source,
        })?;
        let operation = format!("replace status {} {namespace}/{name}", K::kind(&()));
        let params = PostParams::default();
        retry_api_call(|| api.replace_status(&name, &params, obj), &operation)
            .await
            .map_err(|e| StoreError::from_api(e, &K::kind(&()), &namespace, &name))
    }

    async fn replace_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
        resource_version: Option<&str>,
    ) -> Result<K, StoreError> {
        let api = self.api(namespace);
        let patch = Patch::Merge(json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": resource_version,
            }
        }));
        let params = PatchParams::default();
        let operation = format!("patch finalizers {} {namespace}/{name}", K::kind(&()));
        retry_api_call(|| api.patch(name, &params, &patch), &operation)
            .await
            .map_err(|e| StoreError::from_api(e, &K::kind(&()), namespace, name))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let api = self.api(namespace);
        let operation = format!("delete {} {namespace}/{name}", K::kind(&()));
        let params = DeleteParams::default();
        retry_api_call(|| api.delete(name, &params), &operation)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_api(e, &K::kind(&()), namespace, name))
    }
}

/// [`Namespaces`] backed by the Kubernetes API server.
pub struct KubeNamespaces {
    client: Client,
}

impl KubeNamespaces {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Namespaces for KubeNamespaces {
    async fn ensure(&self, name: &str) -> Result<(), StoreError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let operation = format!("create namespace {name}");
        let params = PostParams::default();
        match retry_api_call(|| api.create(&params, &namespace), &operation)
            .await
            .map_err(|e| StoreError::from_api(e, "Namespace", "", name))
        {
            Ok(_) => {
                debug!(namespace = %name, "Created namespace");
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod store_tests;
