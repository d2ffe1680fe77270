//! Set algebra over role bindings
//!
//! Every operation first collapses its input into a [`BindingsMap`]: one entry
//! per (role, condition) with the normalized union of members. Groups that
//! end up with no members are dropped, and results are emitted in a stable
//! order (role, then the condition's string form) so equal inputs always
//! produce identical output.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{normalize_member, Binding, Condition};

/// Grouping key for bindings
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingKey {
    pub role: String,
    /// `None` for unconditional bindings; empty conditions collapse to `None`
    pub condition: Option<Condition>,
}

impl BindingKey {
    pub fn new(role: impl Into<String>, condition: Option<&Condition>) -> Self {
        Self {
            role: role.into(),
            condition: condition.filter(|c| !c.is_empty()).cloned(),
        }
    }

    fn of(binding: &Binding) -> Self {
        Self::new(binding.role.clone(), binding.condition.as_ref())
    }

    fn condition_string(&self) -> String {
        self.condition
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "//".to_string())
    }
}

impl Ord for BindingKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.role
            .cmp(&other.role)
            .then_with(|| self.condition_string().cmp(&other.condition_string()))
            .then_with(|| self.condition.cmp(&other.condition))
    }
}

impl PartialOrd for BindingKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// (role, condition) → normalized member set
pub type BindingsMap = BTreeMap<BindingKey, BTreeSet<String>>;

/// Collapse bindings into a map, normalizing members and dropping empty groups
pub fn bindings_map(bindings: &[Binding]) -> BindingsMap {
    let mut map = BindingsMap::new();
    for binding in bindings {
        let members = map.entry(BindingKey::of(binding)).or_default();
        members.extend(binding.members.iter().map(|m| normalize_member(m)));
    }
    map.retain(|_, members| !members.is_empty());
    map
}

/// Expand a map back into a sorted list of bindings
pub fn bindings_from_map(map: BindingsMap) -> Vec<Binding> {
    map.into_iter()
        .filter(|(_, members)| !members.is_empty())
        .map(|(key, members)| Binding {
            role: key.role,
            members,
            condition: key.condition,
        })
        .collect()
}

/// Flatten bindings so each (role, condition) appears once with combined members
pub fn merge_bindings(bindings: &[Binding]) -> Vec<Binding> {
    bindings_from_map(bindings_map(bindings))
}

/// Remove `to_remove`'s members from `bindings`, key by key
///
/// Keys only present in `to_remove` are ignored; keys left without members
/// disappear.
pub fn subtract_bindings(bindings: &[Binding], to_remove: &[Binding]) -> Vec<Binding> {
    let mut current = bindings_map(bindings);
    for (key, remove) in bindings_map(to_remove) {
        if let Some(members) = current.get_mut(&key) {
            members.retain(|m| !remove.contains(m));
            if members.is_empty() {
                current.remove(&key);
            }
        }
    }
    bindings_from_map(current)
}

/// Drop exactly one (role, condition) group
pub fn filter_bindings(
    bindings: &[Binding],
    role: &str,
    condition: Option<&Condition>,
) -> Vec<Binding> {
    let mut map = bindings_map(bindings);
    map.remove(&BindingKey::new(role, condition));
    bindings_from_map(map)
}

/// Map-level symmetric difference used by [`missing_bindings`]
pub fn missing_bindings_map(a: &BindingsMap, b: &BindingsMap) -> BindingsMap {
    let mut results = BindingsMap::new();
    for (key, a_members) in a {
        match b.get(key) {
            Some(b_members) => {
                let diff: BTreeSet<String> = a_members
                    .symmetric_difference(b_members)
                    .cloned()
                    .collect();
                if !diff.is_empty() {
                    results.insert(key.clone(), diff);
                }
            }
            None => {
                results.insert(key.clone(), a_members.clone());
            }
        }
    }
    for (key, b_members) in b {
        if !a.contains_key(key) {
            results.insert(key.clone(), b_members.clone());
        }
    }
    results
}

/// Members present on exactly one side, per (role, condition)
pub fn missing_bindings(a: &[Binding], b: &[Binding]) -> Vec<Binding> {
    bindings_from_map(missing_bindings_map(&bindings_map(a), &bindings_map(b)))
}

/// Order-independent equality after merging both sides
pub fn compare_bindings(a: &[Binding], b: &[Binding]) -> bool {
    bindings_map(a) == bindings_map(b)
}

/// Pretty JSON rendering for diagnostics
pub fn debug_print_bindings(bindings: &[Binding]) -> String {
    serde_json::to_string_pretty(bindings).unwrap_or_else(|_| format!("{bindings:?}"))
}
