//! Core IAM policy types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Schema version required for policies carrying conditional bindings
pub const IAM_POLICY_VERSION: i32 = 3;

const DELETED_PREFIX: &str = "deleted:";

/// Member values that keep their casing
const CASE_SENSITIVE_IDENTIFIERS: &[&str] = &["allUsers", "allAuthenticatedUsers"];

/// Member types whose values keep their casing
const CASE_SENSITIVE_PREFIXES: &[&str] = &["principal:", "principalSet:", "principalHierarchy:"];

fn member_is_case_sensitive(member: &str) -> bool {
    CASE_SENSITIVE_IDENTIFIERS.iter().any(|id| member.contains(id))
        || CASE_SENSITIVE_PREFIXES.iter().any(|p| member.starts_with(p))
}

/// Normalize the casing of a `<type>:<value>` member string.
///
/// The type segment is kept verbatim. The value is lower-cased unless the
/// member is one of the case-sensitive identities. Members prefixed with
/// `deleted:` are handled on the part after the prefix.
///
/// ```
/// use iam_policy_sync::normalize_member;
///
/// assert_eq!(normalize_member("user:Alice@EXAMPLE.com"), "user:alice@example.com");
/// assert_eq!(normalize_member("principalSet:Foo/Bar"), "principalSet:Foo/Bar");
/// ```
pub fn normalize_member(member: &str) -> String {
    if let Some(rest) = member.strip_prefix(DELETED_PREFIX) {
        if member_is_case_sensitive(rest) {
            return member.to_string();
        }
        return match rest.split_once(':') {
            Some((kind, value)) => format!("{DELETED_PREFIX}{kind}:{}", value.to_lowercase()),
            None => member.to_string(),
        };
    }

    if member_is_case_sensitive(member) {
        return member.to_string();
    }
    match member.split_once(':') {
        Some((kind, value)) => format!("{kind}:{}", value.to_lowercase()),
        None => member.to_string(),
    }
}

/// Condition scoping a binding
///
/// Two conditions are the same iff all three fields match.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Condition {
    pub title: String,

    #[serde(default)]
    pub description: String,

    pub expression: String,
}

impl Condition {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            expression: expression.into(),
        }
    }

    /// An all-empty condition is equivalent to no condition at all
    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.description.is_empty() && self.expression.is_empty()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.title, self.description, self.expression)
    }
}

/// Association of a role with a set of members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    /// Role granted (e.g., "roles/viewer")
    pub role: String,

    /// Members holding the role (e.g., "user:alice@example.com")
    #[serde(default)]
    pub members: BTreeSet<String>,

    /// Optional condition narrowing when the binding applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl Binding {
    /// Create an unconditional binding
    pub fn new<I, S>(role: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            role: role.into(),
            members: members.into_iter().map(Into::into).collect(),
            condition: None,
        }
    }

    /// Scope the binding by a condition
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// Per-log-type audit setting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogConfig {
    /// Log type (e.g., "DATA_READ", "ADMIN_READ")
    pub log_type: String,

    /// Members exempted from this log type
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub exempted_members: BTreeSet<String>,
}

impl AuditLogConfig {
    pub fn new<I, S>(log_type: impl Into<String>, exempted_members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            log_type: log_type.into(),
            exempted_members: exempted_members.into_iter().map(Into::into).collect(),
        }
    }
}

/// Audit configuration for one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Service name (e.g., "storage.googleapis.com", or "allServices")
    pub service: String,

    #[serde(default)]
    pub audit_log_configs: Vec<AuditLogConfig>,
}

impl AuditConfig {
    pub fn new(service: impl Into<String>, audit_log_configs: Vec<AuditLogConfig>) -> Self {
        Self {
            service: service.into(),
            audit_log_configs,
        }
    }
}

/// Versioned authorization policy attached to a remote resource
///
/// A policy is produced fresh by every fetch and replaced wholesale on every
/// write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Opaque version token used for optimistic concurrency
    #[serde(default)]
    pub etag: String,

    /// Schema version of the policy format
    #[serde(default)]
    pub version: i32,

    #[serde(default)]
    pub bindings: Vec<Binding>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audit_configs: Vec<AuditConfig>,
}

impl Policy {
    /// Create an empty policy carrying the given version token
    pub fn new(etag: impl Into<String>) -> Self {
        Self {
            etag: etag.into(),
            ..Default::default()
        }
    }

    pub fn with_binding(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn with_audit_config(mut self, audit_config: AuditConfig) -> Self {
        self.audit_configs.push(audit_config);
        self
    }

    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    /// Whether any binding is scoped by a non-empty condition
    pub fn has_conditions(&self) -> bool {
        self.bindings
            .iter()
            .any(|b| b.condition.as_ref().is_some_and(|c| !c.is_empty()))
    }
}
