// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `store.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{FirewallRule, FirewallRuleStatus};
    use crate::store::memory::MemoryStore;
    use crate::store::{ObjectStore, StoreError};
    use crate::testing::{api_error, firewall_rule, ACCOUNT};

    fn classify(code: u16, reason: &str) -> StoreError {
        StoreError::from_api(api_error(code, reason), "FirewallRule", ACCOUNT, "web-9090")
    }

    #[test]
    fn test_from_api_classifies_not_found() {
        assert!(classify(404, "NotFound").is_not_found());
    }

    #[test]
    fn test_from_api_separates_conflict_from_already_exists() {
        assert!(classify(409, "Conflict").is_conflict());
        assert!(classify(409, "AlreadyExists").is_already_exists());
        assert!(!classify(409, "AlreadyExists").is_conflict());
    }

    #[test]
    fn test_from_api_keeps_other_errors() {
        let err = classify(500, "InternalError");
        assert!(matches!(err, StoreError::Api(_)));
        assert!(!err.is_not_found() && !err.is_conflict());
    }

    #[tokio::test]
    async fn test_memory_store_rejects_duplicate_create() {
        let store = MemoryStore::<FirewallRule>::new();
        let rule = firewall_rule(ACCOUNT, "web-9090", "146.152.227.10", "9090", &["10.0.0.1"]);

        store.create(&rule).await.unwrap();
        let err = store.create(&rule).await.unwrap_err();

        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_memory_store_detects_stale_resource_version() {
        let store = MemoryStore::<FirewallRule>::new();
        let rule = firewall_rule(ACCOUNT, "web-9090", "146.152.227.10", "9090", &["10.0.0.1"]);
        let first = store.create(&rule).await.unwrap();

        let mut winner = first.clone();
        winner.spec.port = "9091".to_string();
        store.replace(&winner).await.unwrap();

        let mut loser = first;
        loser.spec.port = "9092".to_string();
        assert!(store.replace(&loser).await.unwrap_err().is_conflict());
        assert_eq!(store.peek(ACCOUNT, "web-9090").unwrap().spec.port, "9091");
    }

    #[tokio::test]
    async fn test_memory_store_separates_status_from_spec() {
        let store = MemoryStore::<FirewallRule>::new();
        let rule = firewall_rule(ACCOUNT, "web-9090", "146.152.227.10", "9090", &["10.0.0.1"]);
        let mut current = store.create(&rule).await.unwrap();

        current.status = Some(FirewallRuleStatus {
            state: "Active".to_string(),
            ..Default::default()
        });
        current.spec.port = "1".to_string();
        let current = store.replace_status(&current).await.unwrap();

        assert_eq!(current.spec.port, "9090", "status write must not touch spec");
        assert_eq!(current.status.as_ref().unwrap().state, "Active");

        let mut next = current.clone();
        next.status = None;
        let next = store.replace(&next).await.unwrap();
        assert_eq!(
            next.status.unwrap().state,
            "Active",
            "spec write must not touch status"
        );
    }

    #[tokio::test]
    async fn test_memory_store_finalizers_gate_deletion() {
        let store = MemoryStore::<FirewallRule>::new();
        let mut rule = firewall_rule(ACCOUNT, "web-9090", "146.152.227.10", "9090", &["10.0.0.1"]);
        rule.metadata.finalizers = Some(vec!["private.cloud.io/firewallOperator".to_string()]);
        store.create(&rule).await.unwrap();

        store.delete(ACCOUNT, "web-9090").await.unwrap();
        let deleting = store.peek(ACCOUNT, "web-9090").unwrap();
        assert!(deleting.metadata.deletion_timestamp.is_some());

        store
            .replace_finalizers(
                ACCOUNT,
                "web-9090",
                &[],
                deleting.metadata.resource_version.as_deref(),
            )
            .await
            .unwrap();
        assert!(store.peek(ACCOUNT, "web-9090").is_none());
    }

    #[tokio::test]
    async fn test_memory_store_delete_missing_is_not_found() {
        let store = MemoryStore::<FirewallRule>::new();
        let err = store.delete(ACCOUNT, "missing").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
