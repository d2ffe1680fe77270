//! Policy set algebra
//!
//! Pure operations used to merge, subtract, diff and compare policy
//! fragments. Mutations ([`crate::change::PolicyChange`]) and the
//! convergence check are both expressed in terms of these.

pub mod audit;
pub mod bindings;

pub use audit::{
    audit_configs_from_map, audit_configs_map, compare_audit_configs, debug_print_audit_configs,
    merge_audit_configs, remove_audit_configs_for_service, AuditConfigsMap,
};
pub use bindings::{
    bindings_from_map, bindings_map, compare_bindings, debug_print_bindings, filter_bindings,
    merge_bindings, missing_bindings, missing_bindings_map, subtract_bindings, BindingKey,
    BindingsMap,
};

use crate::types::Policy;
use tracing::debug;

/// Full policy equality: version token, schema version, bindings and audit configs
pub fn compare_policies(a: &Policy, b: &Policy) -> bool {
    if a.etag != b.etag {
        debug!(a = %a.etag, b = %b.etag, "policies etag differ");
        return false;
    }
    if a.version != b.version {
        debug!(a = a.version, b = b.version, "policies version differ");
        return false;
    }
    if !compare_bindings(&a.bindings, &b.bindings) {
        debug!(
            a = %debug_print_bindings(&a.bindings),
            b = %debug_print_bindings(&b.bindings),
            "policies bindings differ"
        );
        return false;
    }
    if !compare_audit_configs(&a.audit_configs, &b.audit_configs) {
        debug!(
            a = %debug_print_audit_configs(&a.audit_configs),
            b = %debug_print_audit_configs(&b.audit_configs),
            "policies audit configs differ"
        );
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AuditConfig, AuditLogConfig, Binding};

    fn sample() -> Policy {
        Policy::new("v1")
            .with_version(1)
            .with_binding(Binding::new("roles/viewer", ["user:a@x.com", "user:b@x.com"]))
            .with_audit_config(AuditConfig::new(
                "allServices",
                vec![AuditLogConfig::new("DATA_READ", ["user:a@x.com"])],
            ))
    }

    #[test]
    fn test_compare_policies_semantic() {
        let a = sample();
        let mut b = sample();
        b.bindings = vec![
            Binding::new("roles/viewer", ["user:B@x.com"]),
            Binding::new("roles/viewer", ["user:a@x.com"]),
        ];
        assert!(compare_policies(&a, &b));
    }

    #[test]
    fn test_compare_policies_detects_differences() {
        let a = sample();

        let mut b = sample();
        b.etag = "v2".into();
        assert!(!compare_policies(&a, &b));

        let mut b = sample();
        b.version = 3;
        assert!(!compare_policies(&a, &b));

        let mut b = sample();
        b.bindings.push(Binding::new("roles/owner", ["user:c@x.com"]));
        assert!(!compare_policies(&a, &b));

        let mut b = sample();
        b.audit_configs.clear();
        assert!(!compare_policies(&a, &b));
    }
}
