// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `status.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{AKODeploymentConfig, AKODeploymentConfigSpec, AKODeploymentConfigStatus};
    use crate::reconcilers::status::{
        condition_changed, conditions_equal, create_condition, find_condition,
        update_condition_in_memory, AKODeploymentConfigStatusUpdater,
    };
    use crate::status_reasons::{
        CONDITION_TYPE_CLUSTERS_RECONCILED, CONDITION_TYPE_READY, REASON_ALL_CLUSTERS_RECONCILED,
        REASON_PARTIAL_FAILURE,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    const STATUS_TRUE: &str = "True";
    const STATUS_FALSE: &str = "False";

    fn create_test_config(status: Option<AKODeploymentConfigStatus>) -> AKODeploymentConfig {
        AKODeploymentConfig {
            metadata: ObjectMeta {
                name: Some("custom".to_string()),
                generation: Some(2),
                ..Default::default()
            },
            spec: AKODeploymentConfigSpec::default(),
            status,
        }
    }

    #[test]
    fn test_create_condition_basic() {
        let condition = create_condition(
            CONDITION_TYPE_READY,
            STATUS_TRUE,
            REASON_ALL_CLUSTERS_RECONCILED,
            "2 cluster(s) reconciled",
        );

        assert_eq!(condition.r#type, CONDITION_TYPE_READY);
        assert_eq!(condition.status, STATUS_TRUE);
        assert_eq!(condition.reason.as_deref(), Some(REASON_ALL_CLUSTERS_RECONCILED));
        let timestamp = condition.last_transition_time.unwrap();
        assert!(timestamp.contains('T'));
    }

    #[test]
    fn test_condition_changed() {
        let existing = Some(create_condition("Ready", STATUS_TRUE, "A", "msg"));

        assert!(condition_changed(&existing, &create_condition("Ready", STATUS_FALSE, "A", "msg")));
        assert!(condition_changed(
            &existing,
            &create_condition("Ready", STATUS_TRUE, "A", "other")
        ));
        assert!(!condition_changed(&existing, &create_condition("Ready", STATUS_TRUE, "B", "msg")));
        assert!(condition_changed(&None, &create_condition("Ready", STATUS_TRUE, "A", "msg")));
    }

    #[test]
    fn test_find_condition() {
        let conditions = vec![
            create_condition(CONDITION_TYPE_READY, STATUS_TRUE, "A", ""),
            create_condition(CONDITION_TYPE_CLUSTERS_RECONCILED, STATUS_FALSE, "B", ""),
        ];
        let found = find_condition(&conditions, CONDITION_TYPE_CLUSTERS_RECONCILED).unwrap();
        assert_eq!(found.status, STATUS_FALSE);
        assert!(find_condition(&conditions, "Degraded").is_none());
    }

    #[test]
    fn test_update_condition_preserves_transition_time_when_status_unchanged() {
        let mut conditions = vec![create_condition("Ready", STATUS_TRUE, "A", "one")];
        conditions[0].last_transition_time = Some("2024-01-01T00:00:00+00:00".to_string());

        update_condition_in_memory(&mut conditions, "Ready", STATUS_TRUE, "A", "two");
        assert_eq!(
            conditions[0].last_transition_time.as_deref(),
            Some("2024-01-01T00:00:00+00:00")
        );
        assert_eq!(conditions[0].message.as_deref(), Some("two"));

        update_condition_in_memory(&mut conditions, "Ready", STATUS_FALSE, "B", "three");
        assert_ne!(
            conditions[0].last_transition_time.as_deref(),
            Some("2024-01-01T00:00:00+00:00")
        );
    }

    #[test]
    fn test_conditions_equal_ignores_timestamps() {
        let mut a = create_condition("Ready", STATUS_TRUE, "A", "m");
        let b = create_condition("Ready", STATUS_TRUE, "A", "m");
        a.last_transition_time = Some("earlier".to_string());
        assert!(conditions_equal(&[a.clone()], &[b]));
        assert!(!conditions_equal(&[a], &[]));
    }

    #[test]
    fn test_status_updater_first_write_has_changes() {
        let updater = AKODeploymentConfigStatusUpdater::new(&create_test_config(None));
        assert!(updater.has_changes());
    }

    #[test]
    fn test_status_updater_detects_no_semantic_change() {
        let status = AKODeploymentConfigStatus {
            observed_generation: Some(2),
            conditions: vec![create_condition(
                CONDITION_TYPE_READY,
                STATUS_TRUE,
                REASON_ALL_CLUSTERS_RECONCILED,
                "1 cluster(s) reconciled",
            )],
        };
        let mut updater = AKODeploymentConfigStatusUpdater::new(&create_test_config(Some(status)));
        updater.set_observed_generation(Some(2));
        updater.set_condition(
            CONDITION_TYPE_READY,
            STATUS_TRUE,
            REASON_ALL_CLUSTERS_RECONCILED,
            "1 cluster(s) reconciled",
        );
        assert!(!updater.has_changes());

        updater.set_condition(
            CONDITION_TYPE_READY,
            STATUS_FALSE,
            REASON_PARTIAL_FAILURE,
            "1 cluster(s) failed",
        );
        assert!(updater.has_changes());
        assert_eq!(updater.conditions().len(), 1);
    }

    #[test]
    fn test_status_updater_tracks_generation() {
        let status = AKODeploymentConfigStatus {
            observed_generation: Some(1),
            conditions: vec![],
        };
        let mut updater = AKODeploymentConfigStatusUpdater::new(&create_test_config(Some(status)));
        assert!(!updater.has_changes());
        updater.set_observed_generation(Some(2));
        assert!(updater.has_changes());
    }
}
