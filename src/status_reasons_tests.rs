// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `status_reasons` module

#[cfg(test)]
mod tests {
    use crate::status_reasons::*;

    #[test]
    fn test_condition_types() {
        assert_eq!(CONDITION_TYPE_READY, "Ready");
        assert_eq!(CONDITION_TYPE_CLUSTERS_RECONCILED, "ClustersReconciled");
    }

    #[test]
    fn test_reasons_are_camel_case() {
        let reasons = [
            REASON_ALL_CLUSTERS_RECONCILED,
            REASON_PARTIAL_FAILURE,
            REASON_NO_CLUSTERS,
            REASON_PROGRESSING,
            REASON_RELEASING_CLUSTERS,
            REASON_CONFIGURATION_INVALID,
        ];
        for reason in reasons {
            assert!(reason.chars().next().is_some_and(|c| c.is_ascii_uppercase()));
            assert!(reason.chars().all(|c| c.is_ascii_alphanumeric()), "{reason}");
        }
    }

    #[test]
    fn test_reasons_are_distinct() {
        let mut reasons = vec![
            REASON_ALL_CLUSTERS_RECONCILED,
            REASON_PARTIAL_FAILURE,
            REASON_NO_CLUSTERS,
            REASON_PROGRESSING,
            REASON_RELEASING_CLUSTERS,
            REASON_CONFIGURATION_INVALID,
        ];
        reasons.sort_unstable();
        reasons.dedup();
        assert_eq!(reasons.len(), 6);
    }
}
