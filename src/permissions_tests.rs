// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for privilege-set reconciliation.

#[cfg(test)]
mod tests {
    use crate::avi::{Permission, Role};
    use crate::permissions::*;
    use std::collections::BTreeSet;

    fn extras(n: usize) -> Vec<Permission> {
        (0..n)
            .map(|i| {
                Permission::new(
                    &format!("ADDITIONAL_PERMISSION_{i}"),
                    &format!("ADDITIONAL_TYPE_{i}"),
                )
            })
            .collect()
    }

    /// Deterministic shuffle: interleave from both ends.
    fn scramble(mut v: Vec<Permission>) -> Vec<Permission> {
        let mut out = Vec::with_capacity(v.len());
        while !v.is_empty() {
            out.push(v.remove(v.len() - 1));
            if !v.is_empty() {
                out.push(v.remove(0));
            }
        }
        out
    }

    fn assert_covers(result: &[Permission], desired: &[Permission], actual: &[Permission]) {
        for d in desired {
            let matching: Vec<_> = result.iter().filter(|p| p.resource == d.resource).collect();
            assert_eq!(matching.len(), 1, "{} must appear exactly once", d.resource);
            assert_eq!(matching[0].permission_type, d.permission_type);
        }
        for a in actual {
            if !desired.iter().any(|d| d.resource == a.resource) {
                assert!(result.contains(a), "extra privilege {a:?} must be preserved");
            }
        }
    }

    #[test]
    fn test_empty_role_gets_full_baseline() {
        let mut role = Role::default();
        assert!(sync_role(&mut role));
        assert_eq!(role.privileges, ako_role_permissions());
    }

    #[test]
    fn test_incorrect_types_are_corrected_in_place() {
        let desired = ako_role_permissions();
        let mut actual = desired.clone();
        for (i, p) in actual.iter_mut().enumerate() {
            if i % 3 == 0 {
                p.permission_type = "INCORRECT_TYPE".to_string();
            }
        }

        let (updated, changed) = reconcile_privileges(&desired, &actual);
        assert!(changed);
        assert_eq!(updated, desired, "positions are kept when correcting types");
    }

    #[test]
    fn test_missing_privileges_are_appended_in_desired_order() {
        let desired = ako_role_permissions();
        let actual: Vec<_> = desired
            .iter()
            .enumerate()
            .filter(|(i, _)| i % 5 != 0)
            .map(|(_, p)| p.clone())
            .collect();

        let (updated, changed) = reconcile_privileges(&desired, &actual);
        assert!(changed);
        assert_eq!(updated.len(), desired.len());
        assert_eq!(&updated[..actual.len()], &actual[..]);
        let appended: Vec<_> = desired.iter().step_by(5).cloned().collect();
        assert_eq!(&updated[actual.len()..], &appended[..]);
    }

    #[test]
    fn test_only_extra_privileges_reports_unchanged() {
        let desired = ako_role_permissions();
        let additional = extras(10);
        let mut actual = desired.clone();
        actual.extend(additional.clone());
        let actual = scramble(actual);

        let mut role = Role {
            privileges: actual.clone(),
            ..Default::default()
        };
        assert!(!sync_role(&mut role));
        assert_eq!(role.privileges, actual, "unchanged role is left untouched");
        assert_eq!(role.privileges.len(), desired.len() + additional.len());
    }

    #[test]
    fn test_mixed_missing_incorrect_and_extra() {
        let desired = ako_role_permissions();
        let mut actual = Vec::new();
        for (i, p) in desired.iter().enumerate() {
            if i % 7 == 0 {
                continue;
            }
            let mut p = p.clone();
            if i % 9 == 0 {
                p.permission_type = "INCORRECT_TYPE".to_string();
            }
            actual.push(p);
        }
        let additional = extras(10);
        actual.extend(additional.clone());
        let actual = scramble(actual);

        let (updated, changed) = reconcile_privileges(&desired, &actual);
        assert!(changed);
        assert_eq!(updated.len(), desired.len() + additional.len());
        assert_covers(&updated, &desired, &actual);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let desired = ako_role_permissions();
        let mut actual = extras(3);
        actual.push(Permission::new("PERMISSION_POOL", "READ_ACCESS"));
        actual.push(Permission::new("PERMISSION_CLOUD", "WRITE_ACCESS"));

        let (first, changed) = reconcile_privileges(&desired, &actual);
        assert!(changed);
        let (second, changed_again) = reconcile_privileges(&desired, &first);
        assert!(!changed_again);
        assert_eq!(first, second);
    }

    #[test]
    fn test_duplicate_desired_resource_collapses_without_change() {
        let desired = vec![Permission::new("PERMISSION_POOL", "WRITE_ACCESS")];
        let actual = vec![
            Permission::new("PERMISSION_POOL", "WRITE_ACCESS"),
            Permission::new("PERMISSION_POOL", "WRITE_ACCESS"),
        ];
        let (updated, changed) = reconcile_privileges(&desired, &actual);
        assert!(!changed, "set comparison ignores duplicate representation");
        assert_eq!(updated, vec![Permission::new("PERMISSION_POOL", "WRITE_ACCESS")]);
    }

    #[test]
    fn test_conflicting_duplicates_are_resolved_to_desired_type() {
        let desired = vec![Permission::new("PERMISSION_POOL", "WRITE_ACCESS")];
        let actual = vec![
            Permission::new("PERMISSION_POOL", "READ_ACCESS"),
            Permission::new("PERMISSION_POOL", "WRITE_ACCESS"),
        ];
        let (updated, changed) = reconcile_privileges(&desired, &actual);
        assert!(changed);
        assert_eq!(updated, desired);
    }

    #[test]
    fn test_extra_duplicates_are_preserved_verbatim() {
        let desired = vec![Permission::new("PERMISSION_POOL", "WRITE_ACCESS")];
        let extra = Permission::new("CUSTOM", "READ_ACCESS");
        let actual = vec![extra.clone(), extra.clone()];
        let (updated, _) = reconcile_privileges(&desired, &actual);
        assert_eq!(updated, vec![extra.clone(), extra, desired[0].clone()]);
    }

    #[test]
    fn test_coverage_over_generated_inputs() {
        let desired = ako_role_permissions();
        let types = ["READ_ACCESS", "WRITE_ACCESS", "NO_ACCESS"];
        for seed in 0..25usize {
            let mut actual = Vec::new();
            for (i, p) in desired.iter().enumerate() {
                match (i + seed) % 4 {
                    0 => {}
                    1 => actual.push(p.clone()),
                    _ => actual.push(Permission::new(&p.resource, types[(i * seed) % types.len()])),
                }
            }
            actual.extend(extras(seed % 4));

            let (updated, _) = reconcile_privileges(&desired, &actual);
            assert_covers(&updated, &desired, &actual);

            let (_, changed) = reconcile_privileges(&desired, &updated);
            assert!(!changed, "seed {seed} not idempotent");
        }
    }

    #[test]
    fn test_baseline_has_unique_resources() {
        let resources: BTreeSet<_> = AKO_ROLE_PERMISSIONS.iter().map(|(r, _)| *r).collect();
        assert_eq!(resources.len(), AKO_ROLE_PERMISSIONS.len());
        let role = baseline_role("ako-essential-role");
        assert_eq!(role.name, "ako-essential-role");
        assert_eq!(role.privileges.len(), AKO_ROLE_PERMISSIONS.len());
    }
}
