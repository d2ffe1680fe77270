//! Set algebra over audit configs
//!
//! Audit configs collapse into service → log type → exempted members.
//! Services without log configs are dropped; a log type with no exempted
//! members is kept but serialized without the member list.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{normalize_member, AuditConfig, AuditLogConfig};

/// service → log type → exempted members
pub type AuditConfigsMap = BTreeMap<String, BTreeMap<String, BTreeSet<String>>>;

pub fn audit_configs_map(audit_configs: &[AuditConfig]) -> AuditConfigsMap {
    let mut map = AuditConfigsMap::new();
    for config in audit_configs {
        let log_configs = map.entry(config.service.clone()).or_default();
        for log_config in &config.audit_log_configs {
            log_configs
                .entry(log_config.log_type.clone())
                .or_default()
                .extend(log_config.exempted_members.iter().map(|m| normalize_member(m)));
        }
    }
    map.retain(|_, log_configs| !log_configs.is_empty());
    map
}

pub fn audit_configs_from_map(map: AuditConfigsMap) -> Vec<AuditConfig> {
    map.into_iter()
        .filter(|(_, log_configs)| !log_configs.is_empty())
        .map(|(service, log_configs)| AuditConfig {
            service,
            audit_log_configs: log_configs
                .into_iter()
                .map(|(log_type, exempted_members)| AuditLogConfig {
                    log_type,
                    exempted_members,
                })
                .collect(),
        })
        .collect()
}

/// One config per service, one log config per log type, members unioned
pub fn merge_audit_configs(audit_configs: &[AuditConfig]) -> Vec<AuditConfig> {
    audit_configs_from_map(audit_configs_map(audit_configs))
}

/// Drop every audit config for `service`
pub fn remove_audit_configs_for_service(
    audit_configs: &[AuditConfig],
    service: &str,
) -> Vec<AuditConfig> {
    let mut map = audit_configs_map(audit_configs);
    map.remove(service);
    audit_configs_from_map(map)
}

pub fn compare_audit_configs(a: &[AuditConfig], b: &[AuditConfig]) -> bool {
    audit_configs_map(a) == audit_configs_map(b)
}

pub fn debug_print_audit_configs(audit_configs: &[AuditConfig]) -> String {
    serde_json::to_string_pretty(audit_configs).unwrap_or_else(|_| format!("{audit_configs:?}"))
}
