// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `errors.rs`

#[cfg(test)]
mod tests {
    use crate::errors::{ConvertError, FirewallError, ListerWatcherError, ProviderError};
    use std::time::Duration;

    #[test]
    fn test_convert_error_messages() {
        let err = ConvertError::InvalidPort {
            port: 70000,
            resource_id: "web".to_string(),
        };
        assert_eq!(err.to_string(), "invalid port 70000 in listener of web");
        assert_eq!(
            ConvertError::MissingField {
                field: "cloudAccountId"
            }
            .to_string(),
            "load balancer message is missing cloudAccountId"
        );
    }

    #[test]
    fn test_lister_watcher_error_from_status() {
        let err: ListerWatcherError = tonic::Status::unavailable("server going away").into();
        assert!(matches!(err, ListerWatcherError::Rpc(_)));
        assert!(ListerWatcherError::IdleTimeout(Duration::from_secs(60))
            .to_string()
            .contains("60s"));
    }

    #[test]
    fn test_missing_desired_rules_message() {
        assert_eq!(
            FirewallError::MissingDesiredRules.to_string(),
            "missing desired rules"
        );
    }

    #[test]
    fn test_provider_status_retryability() {
        let unavailable = ProviderError::Status {
            operation: "create pool".to_string(),
            status: 503,
            message: "{}".to_string(),
        };
        let conflict = ProviderError::Status {
            operation: "create pool".to_string(),
            status: 409,
            message: "{}".to_string(),
        };
        assert!(unavailable.is_retryable());
        assert!(!conflict.is_retryable());
        assert!(!ProviderError::Login("bad credentials".to_string()).is_retryable());
    }
}
