// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `listener.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::{LoadbalancerStatus, PoolStatusMember};
    use crate::lbprovider::{operator_message, LoadbalancerProvider};
    use crate::testing::{
        instance, loadbalancer, selector_listener, OperatorHarness, ACCOUNT, FAKE_PUBLIC_VIP,
    };

    fn flags(
        vip_created: bool,
        pool_created: bool,
        vip_pool_linked: bool,
    ) -> ConditionsListenerStatus {
        ConditionsListenerStatus {
            port: 9090,
            vip_created,
            pool_created,
            vip_pool_linked,
        }
    }

    fn web() -> Loadbalancer {
        let listeners = vec![selector_listener(9090, &[("external-lb", "true")])];
        let mut lb = loadbalancer(ACCOUNT, "web", listeners);
        let mut status = LoadbalancerStatus::default();
        status.seed_listener(9090);
        lb.status = Some(status);
        lb
    }

    fn listener_status() -> ListenerStatus {
        ListenerStatus {
            port: 9090,
            ..Default::default()
        }
    }

    fn member(name: &str, ip: &str) -> Instance {
        instance(ACCOUNT, name, &[("external-lb", "true")], ip, true)
    }

    #[test]
    fn test_next_step_follows_flags() {
        let cases = [
            (flags(false, false, false), true, ListenerStep::CreateVirtualServer),
            (flags(false, true, true), true, ListenerStep::CreateVirtualServer),
            (flags(true, false, false), true, ListenerStep::CreatePool),
            (flags(true, false, false), false, ListenerStep::ReconcileMembers),
            (flags(true, true, false), false, ListenerStep::LinkPool),
            (flags(true, true, true), true, ListenerStep::ReconcileMembers),
        ];
        for (conditions, has_members, expected) in cases {
            assert_eq!(
                ListenerStep::next(&conditions, has_members),
                expected,
                "{conditions:?} with members={has_members}"
            );
        }
    }

    #[tokio::test]
    async fn test_first_virtual_server_gets_a_public_vip() {
        let h = OperatorHarness::new();
        let lb = web();
        let (mut conditions, mut status) = (flags(false, false, false), listener_status());

        let progress = process_listener(
            &h.ctx,
            &lb,
            &lb.spec.listeners[0],
            &[],
            false,
            &mut conditions,
            &mut status,
        )
        .await
        .unwrap();

        assert_eq!(progress, ListenerProgress::Advanced);
        assert!(conditions.vip_created);
        assert_eq!(status.state, STATE_PENDING);
        let servers = h.provider.servers();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].ip, FAKE_PUBLIC_VIP);
        assert_eq!(servers[0].ip_type, "public");
    }

    #[tokio::test]
    async fn test_later_virtual_servers_reuse_the_primary_vip() {
        let h = OperatorHarness::new();
        let mut lb = web();
        if let Some(status) = lb.status.as_mut() {
            status.vip = "146.152.227.99".to_string();
        }
        let (mut conditions, mut status) = (flags(false, false, false), listener_status());

        process_listener(
            &h.ctx,
            &lb,
            &lb.spec.listeners[0],
            &[],
            true,
            &mut conditions,
            &mut status,
        )
        .await
        .unwrap();

        let servers = h.provider.servers();
        assert_eq!(servers[0].ip, "146.152.227.99");
        assert_eq!(servers[0].ip_type, "existing");
    }

    #[tokio::test]
    async fn test_pool_creation_holds_members_first() {
        let h = OperatorHarness::new();
        let lb = web();
        let instances = vec![h.instances.seed(&member("vm-1", "10.0.0.1"))];
        let (mut conditions, mut status) = (flags(true, false, false), listener_status());

        let progress = process_listener(
            &h.ctx,
            &lb,
            &lb.spec.listeners[0],
            &instances,
            true,
            &mut conditions,
            &mut status,
        )
        .await
        .unwrap();

        assert_eq!(progress, ListenerProgress::Advanced);
        assert!(conditions.pool_created);
        assert_eq!(
            status.pool_members,
            vec![PoolStatusMember {
                instance_ref: "vm-1".to_string(),
                ip_address: "10.0.0.1".to_string(),
            }]
        );
        assert!(has_finalizer(&h.instance("vm-1"), LOADBALANCER_FINALIZER));
        let pools = h.provider.pools();
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].members[0].ip, "10.0.0.1");
        assert_eq!(pools[0].members[0].port, "8080");
    }

    #[tokio::test]
    async fn test_no_ready_members_defers_the_pool() {
        let h = OperatorHarness::new();
        let lb = web();
        let instances = vec![h
            .instances
            .seed(&instance(ACCOUNT, "vm-1", &[("external-lb", "true")], "10.0.0.1", false))];
        let (mut conditions, mut status) = (flags(true, false, false), listener_status());

        let progress = process_listener(
            &h.ctx,
            &lb,
            &lb.spec.listeners[0],
            &instances,
            true,
            &mut conditions,
            &mut status,
        )
        .await
        .unwrap();

        assert_eq!(progress, ListenerProgress::Waiting);
        assert!(!conditions.pool_created);
        assert!(h.provider.pools().is_empty());
        assert!(!has_finalizer(&h.instance("vm-1"), LOADBALANCER_FINALIZER));
    }

    #[tokio::test]
    async fn test_link_waits_for_discovered_ids() {
        let h = OperatorHarness::new();
        let lb = web();
        let (mut conditions, mut status) = (flags(true, true, false), listener_status());
        status.vip_id = 4;

        let progress = process_listener(
            &h.ctx,
            &lb,
            &lb.spec.listeners[0],
            &[],
            true,
            &mut conditions,
            &mut status,
        )
        .await
        .unwrap();

        assert_eq!(progress, ListenerProgress::Waiting);
        assert!(!conditions.vip_pool_linked);
        assert!(!h.provider.calls().contains(&"link_vs_to_pool".to_string()));
    }

    #[tokio::test]
    async fn test_provider_failure_lands_in_listener_status() {
        let h = OperatorHarness::new();
        let lb = web();
        let (mut conditions, mut status) = (flags(false, false, false), listener_status());
        h.provider
            .fail_next("create_virtual_server", 409, "Conflict: Object already exists");

        let result = process_listener(
            &h.ctx,
            &lb,
            &lb.spec.listeners[0],
            &[],
            false,
            &mut conditions,
            &mut status,
        )
        .await;

        assert!(result.is_err());
        assert!(!conditions.vip_created);
        assert_eq!(status.state, STATE_ERROR);
        assert_eq!(status.message, operator_message(409, "Conflict: Object already exists"));
    }

    #[tokio::test]
    async fn test_linked_listener_follows_membership() {
        let h = OperatorHarness::new();
        let lb = web();
        let listener = &lb.spec.listeners[0];
        let old = PoolStatusMember {
            instance_ref: "vm-1".to_string(),
            ip_address: "10.0.0.1".to_string(),
        };
        h.provider.create_pool(&lb, listener, &[old]).await.unwrap();
        let instances = vec![h.instances.seed(&member("vm-2", "10.0.0.2"))];
        let (mut conditions, mut status) = (flags(true, true, true), listener_status());
        status.pool_id = h.provider.pools()[0].id;

        let progress = process_listener(
            &h.ctx,
            &lb,
            listener,
            &instances,
            true,
            &mut conditions,
            &mut status,
        )
        .await
        .unwrap();

        assert_eq!(progress, ListenerProgress::Settled);
        assert_eq!(status.pool_members[0].ip_address, "10.0.0.2");
        assert_eq!(h.provider.pools()[0].members[0].ip, "10.0.0.2");
        assert!(has_finalizer(&h.instance("vm-2"), LOADBALANCER_FINALIZER));
    }
}
