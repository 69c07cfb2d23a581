// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Privilege-set reconciliation for the Avi role bound to AKO users.
//!
//! The role may be edited out-of-band: operators add privileges for their own
//! tooling, and upgrades of the baseline change permission types. Reconciliation
//! therefore corrects and completes the baseline without ever dropping entries it
//! does not own.

use crate::avi::{Permission, Role};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Baseline privileges AKO needs, as `(resource, type)` pairs.
pub const AKO_ROLE_PERMISSIONS: &[(&str, &str)] = &[
    ("PERMISSION_VIRTUALSERVICE", "WRITE_ACCESS"),
    ("PERMISSION_POOL", "WRITE_ACCESS"),
    ("PERMISSION_POOLGROUP", "WRITE_ACCESS"),
    ("PERMISSION_HTTPPOLICYSET", "WRITE_ACCESS"),
    ("PERMISSION_NETWORKSECURITYPOLICY", "WRITE_ACCESS"),
    ("PERMISSION_AUTOSCALE", "WRITE_ACCESS"),
    ("PERMISSION_DNSPOLICY", "WRITE_ACCESS"),
    ("PERMISSION_NETWORKPROFILE", "WRITE_ACCESS"),
    ("PERMISSION_APPLICATIONPROFILE", "WRITE_ACCESS"),
    ("PERMISSION_APPLICATIONPERSISTENCEPROFILE", "WRITE_ACCESS"),
    ("PERMISSION_HEALTHMONITOR", "WRITE_ACCESS"),
    ("PERMISSION_ANALYTICSPROFILE", "WRITE_ACCESS"),
    ("PERMISSION_IPAMDNSPROVIDERPROFILE", "WRITE_ACCESS"),
    ("PERMISSION_SSLPROFILE", "WRITE_ACCESS"),
    ("PERMISSION_SSLKEYANDCERTIFICATE", "WRITE_ACCESS"),
    ("PERMISSION_PKIPROFILE", "WRITE_ACCESS"),
    ("PERMISSION_STRINGGROUP", "WRITE_ACCESS"),
    ("PERMISSION_VSDATASCRIPTSET", "WRITE_ACCESS"),
    ("PERMISSION_L4POLICYSET", "WRITE_ACCESS"),
    ("PERMISSION_IPADDRGROUP", "WRITE_ACCESS"),
    ("PERMISSION_VSVIP", "WRITE_ACCESS"),
    ("PERMISSION_VRFCONTEXT", "WRITE_ACCESS"),
    ("PERMISSION_NETWORK", "WRITE_ACCESS"),
    ("PERMISSION_SERVICEENGINEGROUP", "WRITE_ACCESS"),
    ("PERMISSION_SERVICEENGINE", "READ_ACCESS"),
    ("PERMISSION_CLOUD", "READ_ACCESS"),
    ("PERMISSION_TENANT", "READ_ACCESS"),
    ("PERMISSION_CONTROLLER", "READ_ACCESS"),
    ("PERMISSION_SYSTEMCONFIGURATION", "READ_ACCESS"),
    ("PERMISSION_ROLE", "READ_ACCESS"),
    ("PERMISSION_WAFPOLICY", "WRITE_ACCESS"),
    ("PERMISSION_WAFPROFILE", "WRITE_ACCESS"),
    ("PERMISSION_ERRORPAGEPROFILE", "WRITE_ACCESS"),
    ("PERMISSION_ERRORPAGEBODY", "WRITE_ACCESS"),
];

/// The baseline as owned [`Permission`]s, in declaration order.
#[must_use]
pub fn ako_role_permissions() -> Vec<Permission> {
    AKO_ROLE_PERMISSIONS
        .iter()
        .map(|(resource, kind)| Permission::new(resource, kind))
        .collect()
}

/// Merges `desired` into `actual`.
///
/// The result holds every desired resource exactly once with its desired type,
/// placed where it first appeared in `actual` (or appended in desired order when
/// missing), and every `actual` entry whose resource is not desired, verbatim.
/// `changed` compares input and output as sets, so reordering or collapsing a
/// duplicated baseline entry does not count as a change.
#[must_use]
pub fn reconcile_privileges(
    desired: &[Permission],
    actual: &[Permission],
) -> (Vec<Permission>, bool) {
    let mut desired_types: HashMap<&str, &str> = HashMap::with_capacity(desired.len());
    for p in desired {
        desired_types
            .entry(p.resource.as_str())
            .or_insert(p.permission_type.as_str());
    }

    let mut placed: HashSet<&str> = HashSet::with_capacity(desired.len());
    let mut updated = Vec::with_capacity(actual.len().max(desired.len()));

    for p in actual {
        match desired_types.get(p.resource.as_str()) {
            Some(kind) => {
                if placed.insert(p.resource.as_str()) {
                    updated.push(Permission::new(&p.resource, kind));
                }
            }
            None => updated.push(p.clone()),
        }
    }

    for p in desired {
        if placed.insert(p.resource.as_str()) {
            updated.push(p.clone());
        }
    }

    let before: BTreeSet<&Permission> = actual.iter().collect();
    let after: BTreeSet<&Permission> = updated.iter().collect();
    let changed = before != after;

    (updated, changed)
}

/// Applies the AKO baseline to `role` in place. Returns true if the caller must
/// push the role back to Avi.
pub fn sync_role(role: &mut Role) -> bool {
    let (privileges, changed) = reconcile_privileges(&ako_role_permissions(), &role.privileges);
    if changed {
        role.privileges = privileges;
    }
    changed
}

/// A fresh role carrying exactly the baseline.
#[must_use]
pub fn baseline_role(name: &str) -> Role {
    Role {
        uuid: None,
        name: name.to_string(),
        privileges: ako_role_permissions(),
        tenant_ref: None,
    }
}
