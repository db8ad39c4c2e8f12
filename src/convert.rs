// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Mapping between Compute API Server LoadBalancer messages and `Loadbalancer`
//! objects.
//!
//! Identity: namespace = cloud account id, name = resource id. The converter
//! also stamps the region and availability zone it serves as labels on every
//! Kubernetes object it produces.

use crate::constants::{
    ANNOTATION_DISPLAY_NAME, LABEL_AVAILABILITY_ZONE, LABEL_CLOUD_ACCOUNT_ID, LABEL_REGION,
};
use crate::crd::{
    ConditionsListenerStatus, ListenerStatus, Loadbalancer, LoadbalancerConditions,
    LoadbalancerListener, LoadbalancerSecurity, LoadbalancerSpec, LoadbalancerStatus,
    PoolMemberRef, PoolSpec, PoolStatusMember, VipSpec,
};
use crate::errors::ConvertError;
use crate::pb;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use k8s_openapi::jiff::Timestamp;
use std::collections::BTreeMap;

const MAX_PORT: i32 = 65535;

/// Converts LoadBalancer records for one region and availability zone.
#[derive(Clone, Debug)]
pub struct LoadBalancerConverter {
    region_id: String,
    availability_zone_id: String,
}

impl LoadBalancerConverter {
    #[must_use]
    pub fn new(region_id: impl Into<String>, availability_zone_id: impl Into<String>) -> Self {
        Self {
            region_id: region_id.into(),
            availability_zone_id: availability_zone_id.into(),
        }
    }

    #[must_use]
    pub fn availability_zone_id(&self) -> &str {
        &self.availability_zone_id
    }

    /// Wire message to `Loadbalancer`.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError`] when metadata or identity is missing, a
    /// listener port is outside `1..=65535`, or a timestamp is out of range.
    pub fn pb_to_k8s(
        &self,
        message: &pb::LoadBalancerPrivate,
    ) -> Result<Loadbalancer, ConvertError> {
        let metadata = message.metadata.as_ref().ok_or(ConvertError::MissingMetadata)?;
        if metadata.cloud_account_id.is_empty() {
            return Err(ConvertError::MissingField {
                field: "cloudAccountId",
            });
        }
        if metadata.resource_id.is_empty() {
            return Err(ConvertError::MissingField { field: "resourceId" });
        }

        let mut labels = BTreeMap::new();
        labels.insert(
            LABEL_CLOUD_ACCOUNT_ID.to_string(),
            metadata.cloud_account_id.clone(),
        );
        labels.insert(LABEL_REGION.to_string(), self.region_id.clone());
        labels.insert(
            LABEL_AVAILABILITY_ZONE.to_string(),
            self.availability_zone_id.clone(),
        );

        let annotations = (!metadata.name.is_empty()).then(|| {
            BTreeMap::from([(ANNOTATION_DISPLAY_NAME.to_string(), metadata.name.clone())])
        });

        let object_meta = ObjectMeta {
            name: Some(metadata.resource_id.clone()),
            namespace: Some(metadata.cloud_account_id.clone()),
            resource_version: non_empty(&metadata.resource_version),
            labels: Some(labels),
            annotations,
            creation_timestamp: metadata
                .creation_timestamp
                .as_ref()
                .map(|t| time_from_pb(t, "creationTimestamp"))
                .transpose()?,
            deletion_timestamp: metadata
                .deletion_timestamp
                .as_ref()
                .map(|t| time_from_pb(t, "deletionTimestamp"))
                .transpose()?,
            ..Default::default()
        };

        let spec = message.spec.clone().unwrap_or_default();
        let listeners = spec
            .listeners
            .iter()
            .map(|l| listener_from_pb(l, &metadata.resource_id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Loadbalancer {
            metadata: object_meta,
            spec: LoadbalancerSpec {
                listeners,
                security: LoadbalancerSecurity {
                    sourceips: spec.security.map(|s| s.sourceips).unwrap_or_default(),
                },
                labels: metadata
                    .labels
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            },
            status: message.status.as_ref().map(status_from_pb),
        })
    }

    /// `Loadbalancer` to wire message.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::MissingField`] when namespace or name is unset.
    pub fn k8s_to_pb(&self, lb: &Loadbalancer) -> Result<pb::LoadBalancerPrivate, ConvertError> {
        let cloud_account_id = lb.metadata.namespace.clone().ok_or(ConvertError::MissingField {
            field: "namespace",
        })?;
        let resource_id = lb
            .metadata
            .name
            .clone()
            .ok_or(ConvertError::MissingField { field: "name" })?;

        let metadata = pb::LoadBalancerMetadataPrivate {
            cloud_account_id,
            name: lb
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(ANNOTATION_DISPLAY_NAME))
                .cloned()
                .unwrap_or_default(),
            resource_id,
            resource_version: lb.metadata.resource_version.clone().unwrap_or_default(),
            labels: lb
                .spec
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            creation_timestamp: lb.metadata.creation_timestamp.as_ref().map(time_to_pb),
            deletion_timestamp: lb.metadata.deletion_timestamp.as_ref().map(time_to_pb),
        };

        let spec = pb::LoadBalancerSpecPrivate {
            listeners: lb.spec.listeners.iter().map(listener_to_pb).collect(),
            security: Some(pb::LoadBalancerSecurity {
                sourceips: lb.spec.security.sourceips.clone(),
            }),
        };

        Ok(pb::LoadBalancerPrivate {
            metadata: Some(metadata),
            spec: Some(spec),
            status: lb.status.as_ref().map(status_to_pb),
        })
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn time_from_pb(ts: &prost_types::Timestamp, field: &'static str) -> Result<Time, ConvertError> {
    let nanos = u32::try_from(ts.nanos).map_err(|_| ConvertError::InvalidTimestamp {
        field,
        reason: format!("negative nanos {}", ts.nanos),
    })?;
    Timestamp::new(ts.seconds, nanos as i32)
        .ok()
        .map(Time)
        .ok_or_else(|| ConvertError::InvalidTimestamp {
            field,
            reason: format!("{} seconds out of range", ts.seconds),
        })
}

fn time_to_pb(time: &Time) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: time.0.as_second(),
        nanos: time.0.subsec_nanosecond(),
    }
}

fn listener_from_pb(
    listener: &pb::LoadBalancerListener,
    resource_id: &str,
) -> Result<LoadbalancerListener, ConvertError> {
    if !(1..=MAX_PORT).contains(&listener.port) {
        return Err(ConvertError::InvalidPort {
            port: listener.port,
            resource_id: resource_id.to_string(),
        });
    }
    let pool = listener.pool.clone().unwrap_or_default();
    Ok(LoadbalancerListener {
        vip: VipSpec {
            port: listener.port,
            ..Default::default()
        },
        pool: PoolSpec {
            port: pool.port,
            monitor: pool.monitor,
            load_balancing_mode: pool.load_balancing_mode,
            instance_selectors: pool.instance_selectors.into_iter().collect(),
            members: pool
                .instance_resource_ids
                .into_iter()
                .map(|instance_resource_id| PoolMemberRef {
                    instance_resource_id,
                })
                .collect(),
            ..Default::default()
        },
        ..Default::default()
    })
}

fn listener_to_pb(listener: &LoadbalancerListener) -> pb::LoadBalancerListener {
    pb::LoadBalancerListener {
        port: listener.vip.port,
        pool: Some(pb::LoadBalancerPool {
            port: listener.pool.port,
            monitor: listener.pool.monitor.clone(),
            load_balancing_mode: listener.pool.load_balancing_mode.clone(),
            instance_selectors: listener
                .pool
                .instance_selectors
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            instance_resource_ids: listener
                .pool
                .members
                .iter()
                .map(|m| m.instance_resource_id.clone())
                .collect(),
        }),
    }
}

fn status_from_pb(status: &pb::LoadBalancerStatusPrivate) -> LoadbalancerStatus {
    let conditions = status.conditions.clone().unwrap_or_default();
    LoadbalancerStatus {
        conditions: LoadbalancerConditions {
            listeners: conditions
                .listeners
                .into_iter()
                .map(|c| ConditionsListenerStatus {
                    port: c.port,
                    pool_created: c.pool_created,
                    vip_created: c.vip_created,
                    vip_pool_linked: c.vip_pool_linked,
                })
                .collect(),
            firewall_rule_created: conditions.firewall_rule_created,
        },
        listeners: status
            .listeners
            .iter()
            .map(|l| ListenerStatus {
                port: l.port,
                name: l.name.clone(),
                vip_id: l.vip_id,
                pool_id: l.pool_id,
                state: l.state.clone(),
                message: l.message.clone(),
                pool_members: l
                    .pool_members
                    .iter()
                    .map(|m| PoolStatusMember {
                        instance_ref: m.instance_ref.clone(),
                        ip_address: m.ip_address.clone(),
                    })
                    .collect(),
            })
            .collect(),
        state: status.state.clone(),
        message: status.message.clone(),
        vip: status.vip.clone(),
    }
}

/// Status in wire form, as sent back with `UpdateStatus`.
#[must_use]
pub fn status_to_pb(status: &LoadbalancerStatus) -> pb::LoadBalancerStatusPrivate {
    pb::LoadBalancerStatusPrivate {
        conditions: Some(pb::LoadBalancerConditionsStatus {
            listeners: status
                .conditions
                .listeners
                .iter()
                .map(|c| pb::LoadBalancerConditionsListenerStatus {
                    port: c.port,
                    pool_created: c.pool_created,
                    vip_created: c.vip_created,
                    vip_pool_linked: c.vip_pool_linked,
                })
                .collect(),
            firewall_rule_created: status.conditions.firewall_rule_created,
        }),
        listeners: status
            .listeners
            .iter()
            .map(|l| pb::LoadBalancerListenerStatus {
                port: l.port,
                name: l.name.clone(),
                vip_id: l.vip_id,
                pool_id: l.pool_id,
                state: l.state.clone(),
                message: l.message.clone(),
                pool_members: l
                    .pool_members
                    .iter()
                    .map(|m| pb::LoadBalancerPoolStatusMember {
                        instance_ref: m.instance_ref.clone(),
                        ip_address: m.ip_address.clone(),
                    })
                    .collect(),
            })
            .collect(),
        state: status.state.clone(),
        vip: status.vip.clone(),
        message: status.message.clone(),
    }
}

#[cfg(test)]
#[path = "convert_tests.rs"]
mod convert_tests;
