// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory [`ObjectStore`] with API-server write semantics.
//!
//! Objects are held as JSON so that spec and status can be written
//! independently, exactly like the API server's main resource and status
//! subresource.

use super::{Namespaces, ObjectStore, StoreError};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct State {
    objects: BTreeMap<(String, String), Value>,
    next_resource_version: u64,
    injected_conflicts: usize,
    writes: usize,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_resource_version += 1;
        self.next_resource_version.to_string()
    }
}

pub struct MemoryStore<K> {
    state: Mutex<State>,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            _kind: PhantomData,
        }
    }
}

fn resource_version_of(value: &Value) -> Option<&str> {
    value
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
}

fn has_finalizers(value: &Value) -> bool {
    value
        .pointer("/metadata/finalizers")
        .and_then(Value::as_array)
        .is_some_and(|f| !f.is_empty())
}

fn is_deleting(value: &Value) -> bool {
    value
        .pointer("/metadata/deletionTimestamp")
        .is_some_and(|t| !t.is_null())
}

fn set_metadata(value: &mut Value, field: &str, new: Value) {
    if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.insert(field.to_string(), new);
    }
}

impl<K> MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key(obj: &K) -> (String, String) {
        (obj.namespace().unwrap_or_default(), obj.name_any())
    }

    fn encode(obj: &K) -> Result<Value, StoreError> {
        serde_json::to_value(obj).map_err(|source| StoreError::Serialization {
            kind: K::kind(&()).to_string(),
            source,
        })
    }

    fn decode(value: &Value) -> Result<K, StoreError> {
        serde_json::from_value(value.clone()).map_err(|source| StoreError::Serialization {
            kind: K::kind(&()).to_string(),
            source,
        })
    }

    fn not_found(namespace: &str, name: &str) -> StoreError {
        StoreError::NotFound {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    fn conflict(namespace: &str, name: &str, message: &str) -> StoreError {
        StoreError::Conflict {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            message: message.to_string(),
        }
    }

    /// Insert or overwrite an object, including status, bypassing all checks.
    pub fn seed(&self, obj: &K) -> K {
        let mut state = self.lock();
        let mut value = Self::encode(obj).unwrap_or(Value::Null);
        let rv = state.bump();
        set_metadata(&mut value, "resourceVersion", Value::String(rv));
        state.objects.insert(Self::key(obj), value.clone());
        Self::decode(&value).unwrap_or_else(|_| obj.clone())
    }

    /// Current stored copy, if any.
    #[must_use]
    pub fn peek(&self, namespace: &str, name: &str) -> Option<K> {
        let state = self.lock();
        state
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .and_then(|v| Self::decode(v).ok())
    }

    /// All stored objects across namespaces.
    #[must_use]
    pub fn all(&self) -> Vec<K> {
        let state = self.lock();
        state
            .objects
            .values()
            .filter_map(|v| Self::decode(v).ok())
            .collect()
    }

    /// Make the next `n` writes fail with a conflict.
    pub fn inject_conflicts(&self, n: usize) {
        self.lock().injected_conflicts = n;
    }

    /// Number of successful writes (create, replace, status, delete).
    #[must_use]
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    fn check_write(state: &mut State, stored: &Value, obj: &K) -> Result<(), StoreError> {
        let (namespace, name) = Self::key(obj);
        if state.injected_conflicts > 0 {
            state.injected_conflicts -= 1;
            return Err(Self::conflict(&namespace, &name, "injected conflict"));
        }
        match obj.resource_version() {
            Some(rv) if Some(rv.as_str()) != resource_version_of(stored) => Err(Self::conflict(
                &namespace,
                &name,
                "the object has been modified; please apply your changes to the latest version",
            )),
            _ => Ok(()),
        }
    }

    /// Store `value`, or drop it when a deleting object lost its last finalizer.
    fn commit(state: &mut State, key: (String, String), mut value: Value) -> Result<K, StoreError> {
        state.writes += 1;
        let rv = state.bump();
        set_metadata(&mut value, "resourceVersion", Value::String(rv));
        let result = Self::decode(&value)?;
        if is_deleting(&value) && !has_finalizers(&value) {
            state.objects.remove(&key);
        } else {
            state.objects.insert(key, value);
        }
        Ok(result)
    }
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        let state = self.lock();
        state
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .map(Self::decode)
            .transpose()
    }

    async fn list(&self, namespace: &str) -> Result<Vec<K>, StoreError> {
        let state = self.lock();
        state
            .objects
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, v)| Self::decode(v))
            .collect()
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let key = Self::key(obj);
        let mut state = self.lock();
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: K::kind(&()).to_string(),
                namespace: key.0,
                name: key.1,
            });
        }
        if obj.resource_version().is_some() {
            return Err(StoreError::Other(
                "resourceVersion should not be set on objects to be created".to_string(),
            ));
        }
        let mut value = Self::encode(obj)?;
        let uid = format!("uid-{}-{}", key.0, key.1);
        set_metadata(&mut value, "uid", Value::String(uid));
        Self::commit(&mut state, key, value)
    }

    async fn replace(&self, obj: &K) -> Result<K, StoreError> {
        let key = Self::key(obj);
        let mut state = self.lock();
        let stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Self::not_found(&key.0, &key.1))?;
        Self::check_write(&mut state, &stored, obj)?;

        let mut value = Self::encode(obj)?;
        if let Some(object) = value.as_object_mut() {
            match stored.get("status") {
                Some(status) => object.insert("status".to_string(), status.clone()),
                None => object.remove("status"),
            };
        }
        // Deletion is driven by the store, never by the writer.
        let deletion = stored
            .pointer("/metadata/deletionTimestamp")
            .cloned()
            .unwrap_or(Value::Null);
        set_metadata(&mut value, "deletionTimestamp", deletion);
        Self::commit(&mut state, key, value)
    }

    async fn replace_status(&self, obj: &K) -> Result<K, StoreError> {
        let key = Self::key(obj);
        let mut state = self.lock();
        let mut stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Self::not_found(&key.0, &key.1))?;
        Self::check_write(&mut state, &stored, obj)?;

        let status = Self::encode(obj)?
            .get("status")
            .cloned()
            .unwrap_or(Value::Null);
        if let Some(object) = stored.as_object_mut() {
            object.insert("status".to_string(), status);
        }
        Self::commit(&mut state, key, stored)
    }

    async fn replace_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
        resource_version: Option<&str>,
    ) -> Result<K, StoreError> {
        let key = (namespace.to_string(), name.to_string());
        let mut state = self.lock();
        let mut stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Self::not_found(namespace, name))?;
        if state.injected_conflicts > 0 {
            state.injected_conflicts -= 1;
            return Err(Self::conflict(namespace, name, "injected conflict"));
        }
        if resource_version.is_some_and(|rv| Some(rv) != resource_version_of(&stored)) {
            return Err(Self::conflict(
                namespace,
                name,
                "the object has been modified; please apply your changes to the latest version",
            ));
        }
        set_metadata(&mut stored, "finalizers", serde_json::json!(finalizers));
        Self::commit(&mut state, key, stored)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let key = (namespace.to_string(), name.to_string());
        let mut state = self.lock();
        let mut stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Self::not_found(namespace, name))?;
        if !has_finalizers(&stored) {
            state.writes += 1;
            state.objects.remove(&key);
            return Ok(());
        }
        if !is_deleting(&stored) {
            let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
            set_metadata(&mut stored, "deletionTimestamp", Value::String(now));
            Self::commit(&mut state, key, stored)?;
        }
        Ok(())
    }
}

/// In-memory [`Namespaces`] recording every ensured namespace.
#[derive(Default)]
pub struct MemoryNamespaces {
    created: Mutex<BTreeSet<String>>,
}

impl MemoryNamespaces {
    #[must_use]
    pub fn names(&self) -> BTreeSet<String> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Namespaces for MemoryNamespaces {
    async fn ensure(&self, name: &str) -> Result<(), StoreError> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
        Ok(())
    }
}
