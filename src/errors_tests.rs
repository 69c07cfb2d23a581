// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for reconciliation error types.

#[cfg(test)]
mod tests {
    use crate::avi::AviError;
    use crate::errors::ReconcileError;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(
            kube::error::Status::failure(&format!("status {code}"), "Test")
                .with_code(code)
                .boxed(),
        )
    }

    #[test]
    fn test_from_kube_maps_404_to_retryable_not_found() {
        let err = ReconcileError::from_kube(api_error(404), "Service", "default/wc-control-plane");
        assert!(matches!(err, ReconcileError::NotFound { retryable: true, .. }));
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Service 'default/wc-control-plane' not found");
    }

    #[test]
    fn test_from_kube_maps_409_to_conflict() {
        let err = ReconcileError::from_kube(api_error(409), "Cluster", "default/wc");
        assert!(err.is_conflict());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_from_kube_maps_other_codes_to_transport() {
        let err = ReconcileError::from_kube(api_error(503), "Cluster", "default/wc");
        assert!(matches!(err, ReconcileError::Transport { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_from_kube_maps_422_to_validation() {
        let err = ReconcileError::from_kube(api_error(422), "Service", "default/wc");
        assert!(matches!(err, ReconcileError::Validation { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_terminal_not_found_is_not_retryable() {
        let err = ReconcileError::NotFound {
            kind: "Secret".into(),
            name: "x".into(),
            retryable: false,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_cluster_wrapper_keeps_identity_and_classification() {
        let err = ReconcileError::from_kube(api_error(409), "Cluster", "default/wc")
            .for_cluster("default/wc");
        assert!(err.to_string().starts_with("Cluster default/wc: "));
        assert!(err.is_conflict());
        assert_eq!(err.status_reason(), "Conflict");
        assert_eq!(err.metric_label(), "conflict");
    }

    #[test]
    fn test_aggregate_is_retryable_if_any_member_is() {
        let agg = ReconcileError::Aggregate(vec![
            ReconcileError::Serialization("bad".into()).for_cluster("ns/a"),
            ReconcileError::Transport {
                target: "avi".into(),
                reason: "refused".into(),
            }
            .for_cluster("ns/b"),
        ]);
        assert!(agg.is_retryable());
        assert!(agg.to_string().starts_with("2 cluster(s) failed: "));
        assert!(agg.to_string().contains("ns/a"));
        assert!(agg.to_string().contains("ns/b"));

        let terminal = ReconcileError::Aggregate(vec![ReconcileError::Serialization("bad".into())]);
        assert!(!terminal.is_retryable());
    }

    #[test]
    fn test_avi_errors_follow_avi_classification() {
        let err: ReconcileError = AviError::Transport("connection refused".into()).into();
        assert!(err.is_retryable());
        let err: ReconcileError = AviError::Authentication("bad password".into()).into();
        assert!(!err.is_retryable());
    }
}
