// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `diff.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::testing::{firewall_rule, ACCOUNT, OTHER_ACCOUNT};

    const VIP: &str = "146.152.227.10";

    fn rule(source: &str, port: &str) -> Rule {
        Rule::new(source, VIP, "TCP", port, ACCOUNT)
    }

    fn key(port: &str, customer: &str) -> RuleKey {
        RuleKey {
            dest_ip: VIP.to_string(),
            port: port.to_string(),
            protocol: "TCP".to_string(),
            customer_id: customer.to_string(),
        }
    }

    fn entry(sources: &[&str], dests: &[&str], ports: &[&str], customer: &str) -> AccessEntry {
        AccessEntry {
            customer_id: customer.to_string(),
            source_address: sources.iter().map(|s| (*s).to_string()).collect(),
            dest_address: dests.iter().map(|s| (*s).to_string()).collect(),
            ports: ports.iter().map(|s| (*s).to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_identical_sets_produce_no_delta() {
        let rules = vec![
            rule("10.0.0.1", "9090"),
            rule("10.0.0.2", "9090"),
            rule("10.0.0.1", "9091"),
        ];
        assert!(reconcile_desired(&rules, &rules, ACCOUNT).is_empty());
    }

    #[test]
    fn test_missing_rules_grouped_by_key() {
        let desired = vec![
            rule("10.0.0.2", "9090"),
            rule("10.0.0.1", "9090"),
            rule("10.0.0.3", "9091"),
        ];
        let delta = reconcile_desired(&desired, &[], ACCOUNT);

        assert_eq!(delta.to_add[&key("9090", ACCOUNT)], vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(delta.to_add[&key("9091", ACCOUNT)], vec!["10.0.0.3"]);
        assert!(delta.to_remove.is_empty());
    }

    #[test]
    fn test_leftover_rules_removed_under_their_own_customer() {
        let desired = vec![rule("10.0.0.1", "9090")];
        let existing = vec![
            rule("10.0.0.1", "9090"),
            Rule::new("192.168.1.1", VIP, "TCP", "9090", OTHER_ACCOUNT),
        ];

        let delta = reconcile_desired(&desired, &existing, ACCOUNT);

        assert!(delta.to_add.is_empty());
        assert_eq!(
            delta.to_remove[&key("9090", OTHER_ACCOUNT)],
            vec!["192.168.1.1"]
        );
    }

    #[test]
    fn test_protocol_match_is_case_insensitive() {
        let desired = vec![rule("10.0.0.1", "9090")];
        let existing = vec![Rule::new("10.0.0.1", VIP, "tcp", "9090", ACCOUNT)];
        assert!(reconcile_desired(&desired, &existing, ACCOUNT).is_empty());
    }

    #[test]
    fn test_applied_host_suffix_is_normalized_but_other_prefixes_are_not() {
        let desired = vec![rule("134.134.137.85", "9090"), rule("10.0.0.0", "9090")];
        let applied = [entry(
            &["134.134.137.85/32", "10.0.0.0/24"],
            &[VIP],
            &["TCP_9090"],
            ACCOUNT,
        )];
        let existing = flatten_existing(&applied, VIP);

        let delta = reconcile_desired(&desired, &existing, ACCOUNT);

        assert_eq!(delta.to_add[&key("9090", ACCOUNT)], vec!["10.0.0.0"]);
        assert_eq!(delta.to_remove[&key("9090", ACCOUNT)], vec!["10.0.0.0/24"]);
    }

    #[test]
    fn test_desired_host_suffix_is_compared_as_written() {
        let desired = vec![rule("10.0.0.1/32", "9090")];
        let applied = [entry(&["10.0.0.1/32"], &[VIP], &["TCP_9090"], ACCOUNT)];
        let existing = flatten_existing(&applied, VIP);
        assert_eq!(existing, vec![rule("10.0.0.1", "9090")]);

        let delta = reconcile_desired(&desired, &existing, ACCOUNT);

        assert_eq!(delta.to_add[&key("9090", ACCOUNT)], vec!["10.0.0.1/32"]);
        assert_eq!(delta.to_remove[&key("9090", ACCOUNT)], vec!["10.0.0.1"]);
    }

    #[test]
    fn test_each_existing_rule_absorbs_one_desired_rule() {
        let desired = vec![rule("10.0.0.1", "9090"), rule("10.0.0.1", "9090")];
        let existing = vec![rule("10.0.0.1", "9090")];

        let delta = reconcile_desired(&desired, &existing, ACCOUNT);

        assert_eq!(delta.to_add[&key("9090", ACCOUNT)], vec!["10.0.0.1"]);
        assert!(delta.to_remove.is_empty());
    }

    #[test]
    fn test_result_is_independent_of_input_order() {
        let desired = vec![
            rule("10.0.0.1", "9090"),
            rule("10.0.0.2", "9090"),
            rule("10.0.0.3", "9091"),
        ];
        let existing = vec![
            rule("10.0.0.2", "9090"),
            rule("10.0.0.9", "9090"),
            rule("10.0.0.8", "9090"),
        ];
        let mut desired_rev = desired.clone();
        desired_rev.reverse();
        let mut existing_rev = existing.clone();
        existing_rev.reverse();

        assert_eq!(
            reconcile_desired(&desired, &existing, ACCOUNT),
            reconcile_desired(&desired_rev, &existing_rev, ACCOUNT)
        );
    }

    #[test]
    fn test_no_rule_is_both_added_and_removed() {
        let desired = vec![rule("10.0.0.1", "9090"), rule("10.0.0.5", "9091")];
        let existing = vec![rule("10.0.0.1", "9091"), rule("10.0.0.5", "9091")];

        let delta = reconcile_desired(&desired, &existing, ACCOUNT);

        assert_eq!(delta.to_add[&key("9090", ACCOUNT)], vec!["10.0.0.1"]);
        assert_eq!(delta.to_remove[&key("9091", ACCOUNT)], vec!["10.0.0.1"]);
        assert_eq!(delta.to_add.len() + delta.to_remove.len(), 2);
    }

    #[test]
    fn test_split_protocol_port() {
        assert_eq!(split_protocol_port("TCP_443"), Some(("TCP", "443")));
        assert_eq!(split_protocol_port("TCP"), None);
        assert_eq!(split_protocol_port("TCP_443_extra"), None);
    }

    #[test]
    fn test_flatten_existing_filters_groups_other_vips_and_bad_ports() {
        let entries = vec![
            entry(
                &["10.0.0.1/32", "h_jumphosts", "10.0.0.0/24"],
                &[VIP, "n_internal", "1.1.1.1"],
                &["TCP_9090", "bogus"],
                ACCOUNT,
            ),
            entry(&["192.168.1.1"], &[VIP], &["UDP_53"], OTHER_ACCOUNT),
        ];

        let rules = flatten_existing(&entries, VIP);

        assert_eq!(
            rules,
            vec![
                Rule::new("10.0.0.1", VIP, "TCP", "9090", ACCOUNT),
                Rule::new("10.0.0.0/24", VIP, "TCP", "9090", ACCOUNT),
                Rule::new("192.168.1.1", VIP, "UDP", "53", OTHER_ACCOUNT),
            ]
        );
    }

    #[test]
    fn test_flatten_desired_one_rule_per_source() {
        let rules = vec![
            firewall_rule(ACCOUNT, "lb-9090", VIP, "9090", &["10.0.0.1", "10.0.0.2"]),
            firewall_rule(ACCOUNT, "lb-9091", VIP, "9091", &["10.0.0.1"]),
        ];

        let flat = flatten_desired(&rules, ACCOUNT);

        assert_eq!(flat.len(), 3);
        assert_eq!(flat[2], rule("10.0.0.1", "9091"));
    }
}
