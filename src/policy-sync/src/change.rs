//! Policy mutations as replayable values
//!
//! Every change is idempotent: applying it to a policy that already reflects
//! it leaves the bindings and audit configs unchanged. The convergence check
//! depends on this to decide whether a write has become visible.

use serde::{Deserialize, Serialize};

use crate::policy::{
    compare_audit_configs, compare_bindings, filter_bindings, merge_audit_configs,
    merge_bindings, remove_audit_configs_for_service, subtract_bindings,
};
use crate::types::{AuditConfig, AuditLogConfig, Binding, Condition, Policy, IAM_POLICY_VERSION};

/// What to change in a policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyChange {
    /// Grant `role` to additional members
    AddMembers {
        role: String,
        members: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<Condition>,
    },

    /// Revoke `role` from the given members
    RemoveMembers {
        role: String,
        members: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<Condition>,
    },

    /// Make `members` the exact member set of (role, condition)
    SetBinding {
        role: String,
        members: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<Condition>,
    },

    /// Remove the (role, condition) binding entirely
    RemoveBinding {
        role: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<Condition>,
    },

    /// Make `audit_log_configs` the exact audit config of `service`
    SetAuditConfig {
        service: String,
        audit_log_configs: Vec<AuditLogConfig>,
    },

    /// Remove all audit configs of `service`
    RemoveAuditConfig { service: String },

    /// Replace every binding and audit config
    SetPolicy {
        bindings: Vec<Binding>,
        #[serde(default)]
        audit_configs: Vec<AuditConfig>,
    },

    /// Apply changes in order on the same policy
    Sequence { changes: Vec<PolicyChange> },
}

impl PolicyChange {
    pub fn add_member(role: impl Into<String>, member: impl Into<String>) -> Self {
        Self::AddMembers {
            role: role.into(),
            members: vec![member.into()],
            condition: None,
        }
    }

    pub fn remove_member(role: impl Into<String>, member: impl Into<String>) -> Self {
        Self::RemoveMembers {
            role: role.into(),
            members: vec![member.into()],
            condition: None,
        }
    }

    pub fn set_binding<I, S>(role: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::SetBinding {
            role: role.into(),
            members: members.into_iter().map(Into::into).collect(),
            condition: None,
        }
    }

    pub fn remove_binding(role: impl Into<String>) -> Self {
        Self::RemoveBinding {
            role: role.into(),
            condition: None,
        }
    }

    /// Scope a binding-level change by a condition; other changes are returned as is
    pub fn with_condition(self, new_condition: Condition) -> Self {
        match self {
            Self::AddMembers { role, members, .. } => Self::AddMembers {
                role,
                members,
                condition: Some(new_condition),
            },
            Self::RemoveMembers { role, members, .. } => Self::RemoveMembers {
                role,
                members,
                condition: Some(new_condition),
            },
            Self::SetBinding { role, members, .. } => Self::SetBinding {
                role,
                members,
                condition: Some(new_condition),
            },
            Self::RemoveBinding { role, .. } => Self::RemoveBinding {
                role,
                condition: Some(new_condition),
            },
            other => other,
        }
    }

    /// Compose changes; later ones observe the effects of earlier ones
    pub fn sequence(changes: Vec<PolicyChange>) -> Self {
        Self::Sequence { changes }
    }

    /// Apply the change in place
    pub fn apply(&self, policy: &mut Policy) {
        match self {
            Self::AddMembers {
                role,
                members,
                condition,
            } => {
                let mut bindings = std::mem::take(&mut policy.bindings);
                bindings.push(binding(role, members, condition));
                policy.bindings = merge_bindings(&bindings);
            }
            Self::RemoveMembers {
                role,
                members,
                condition,
            } => {
                policy.bindings =
                    subtract_bindings(&policy.bindings, &[binding(role, members, condition)]);
            }
            Self::SetBinding {
                role,
                members,
                condition,
            } => {
                let mut bindings = filter_bindings(&policy.bindings, role, condition.as_ref());
                bindings.push(binding(role, members, condition));
                policy.bindings = merge_bindings(&bindings);
            }
            Self::RemoveBinding { role, condition } => {
                policy.bindings = filter_bindings(&policy.bindings, role, condition.as_ref());
            }
            Self::SetAuditConfig {
                service,
                audit_log_configs,
            } => {
                let mut configs = remove_audit_configs_for_service(&policy.audit_configs, service);
                configs.push(AuditConfig::new(service.clone(), audit_log_configs.clone()));
                policy.audit_configs = merge_audit_configs(&configs);
            }
            Self::RemoveAuditConfig { service } => {
                policy.audit_configs =
                    remove_audit_configs_for_service(&policy.audit_configs, service);
            }
            Self::SetPolicy {
                bindings,
                audit_configs,
            } => {
                policy.bindings = merge_bindings(bindings);
                policy.audit_configs = merge_audit_configs(audit_configs);
            }
            Self::Sequence { changes } => {
                for change in changes {
                    change.apply(policy);
                }
            }
        }

        if policy.has_conditions() && policy.version < IAM_POLICY_VERSION {
            policy.version = IAM_POLICY_VERSION;
        }
    }

    /// Apply the change to a copy
    pub fn applied_to(&self, policy: &Policy) -> Policy {
        let mut modified = policy.clone();
        self.apply(&mut modified);
        modified
    }

    /// Whether `policy` already reflects this change
    ///
    /// Compares bindings, audit configs and schema version semantically; the
    /// version token is left out since no change touches it.
    pub fn is_reflected_in(&self, policy: &Policy) -> bool {
        let modified = self.applied_to(policy);
        modified.version == policy.version
            && compare_bindings(&modified.bindings, &policy.bindings)
            && compare_audit_configs(&modified.audit_configs, &policy.audit_configs)
    }

    /// Number of leaf changes, counting through sequences
    pub fn len(&self) -> usize {
        match self {
            Self::Sequence { changes } => changes.iter().map(PolicyChange::len).sum(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn binding(role: &str, members: &[String], condition: &Option<Condition>) -> Binding {
    Binding {
        role: role.to_string(),
        members: members.iter().cloned().collect(),
        condition: condition.clone(),
    }
}
