//! Group decision states, the ordered group table, and the persisted
//! snapshot of an interrupted request.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::store::PermissionGroup;

/// Namespace prefix for persisted decision keys
const SNAPSHOT_KEY_PREFIX: &str = "grantflow.decision.";

/// Decision state of one permission group within a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Not decided yet; the group still needs the user
    #[default]
    Unknown,

    /// Granted, by the user, device policy, or external promotion
    Allowed,

    /// Denied, by the user or device policy
    Denied,

    /// Decided before the flow ever presented it; invisible to the user
    Skipped,
}

impl Decision {
    /// Persisted integer code
    pub const fn code(self) -> u8 {
        match self {
            Decision::Unknown => 0,
            Decision::Allowed => 1,
            Decision::Denied => 2,
            Decision::Skipped => 3,
        }
    }

    /// Decision from a persisted code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Decision::Unknown),
            1 => Some(Decision::Allowed),
            2 => Some(Decision::Denied),
            3 => Some(Decision::Skipped),
            _ => None,
        }
    }

    /// Whether the group still awaits a decision
    pub const fn is_pending(self) -> bool {
        matches!(self, Decision::Unknown)
    }

    /// Whether the group counts toward the user-visible prompt total
    pub const fn is_visible(self) -> bool {
        !matches!(self, Decision::Skipped)
    }
}

/// Group identity captured when its state is created.
///
/// Declaration data never changes mid-request; `user_set` is the flag as
/// it stood before this request began (a group is prompted at most once
/// per request, so the pre-request value is the one prompts need).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    /// Group name
    pub name: String,

    /// Display label, already resolved with the name as fallback
    pub label: String,

    /// Member permissions of the group
    pub members: Vec<String>,

    /// Whether the user had decided on this group before this request
    pub user_set: bool,
}

impl GroupInfo {
    fn from_group(group: &PermissionGroup) -> Self {
        Self {
            name: group.name.clone(),
            label: group.display_label().to_string(),
            members: group.permissions.clone(),
            user_set: group.user_set,
        }
    }
}

/// Per-group state tracked by the flow
#[derive(Debug, Clone)]
pub struct GroupState {
    /// Identity at creation time
    pub group: GroupInfo,

    /// Current decision
    pub decision: Decision,

    affected: Vec<String>,
}

impl GroupState {
    fn new(group: &PermissionGroup) -> Self {
        Self {
            group: GroupInfo::from_group(group),
            decision: Decision::Unknown,
            affected: Vec::new(),
        }
    }

    /// Append an affected permission, suppressing duplicates. Order of
    /// first appearance is preserved.
    pub fn add_affected(&mut self, permission: impl Into<String>) {
        let permission = permission.into();
        if !self.affected.contains(&permission) {
            self.affected.push(permission);
        }
    }

    /// Affected permissions in first-seen order
    pub fn affected(&self) -> &[String] {
        &self.affected
    }

    /// Whether the group ever learned its affected permissions
    pub fn has_affected(&self) -> bool {
        !self.affected.is_empty()
    }
}

/// Insertion-ordered table of group states
///
/// Iteration order is creation order is request order; a resumed request
/// rebuilds the same table from the same request. Groups are never
/// removed once created.
#[derive(Debug, Default)]
pub struct GroupStateTable {
    states: IndexMap<String, GroupState>,
}

impl GroupStateTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a group state, creating it on first sight. Creation
    /// captures the group's identity; later calls return the existing
    /// state untouched.
    pub fn get_or_create(&mut self, group: &PermissionGroup) -> &mut GroupState {
        self.states
            .entry(group.name.clone())
            .or_insert_with(|| GroupState::new(group))
    }

    /// State of a group, if one was created
    pub fn get(&self, name: &str) -> Option<&GroupState> {
        self.states.get(name)
    }

    /// Mutable state of a group, if one was created
    pub fn get_mut(&mut self, name: &str) -> Option<&mut GroupState> {
        self.states.get_mut(name)
    }

    /// Iterate states in creation order
    pub fn iter(&self) -> impl Iterator<Item = &GroupState> {
        self.states.values()
    }

    /// Iterate states mutably in creation order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut GroupState> {
        self.states.values_mut()
    }

    /// Group names in creation order (already distinct)
    pub fn group_names(&self) -> Vec<String> {
        self.states.keys().cloned().collect()
    }

    /// Whether any group still awaits a decision
    pub fn any_pending(&self) -> bool {
        self.states.values().any(|s| s.decision.is_pending())
    }

    /// Number of groups ever created
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether no group was ever created
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Persisted decisions of an interrupted request
///
/// One integer decision code per group that had moved past `Unknown`,
/// keyed by a namespace prefix plus the group name. Pending groups are
/// omitted, so a restore can never regress a decision back to `Unknown`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSnapshot {
    #[serde(default)]
    entries: BTreeMap<String, u8>,
}

impl FlowSnapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture every decided group of a table
    pub fn capture(table: &GroupStateTable) -> Self {
        let mut snapshot = Self::new();
        for state in table.iter() {
            snapshot.record(&state.group.name, state.decision);
        }
        snapshot
    }

    /// Record a group's decision; `Unknown` is not persisted
    pub fn record(&mut self, group: &str, decision: Decision) {
        if decision != Decision::Unknown {
            self.entries
                .insert(format!("{SNAPSHOT_KEY_PREFIX}{group}"), decision.code());
        }
    }

    /// Persisted decision for a group, if any
    pub fn decision_for(&self, group: &str) -> Option<Decision> {
        self.entries
            .get(&format!("{SNAPSHOT_KEY_PREFIX}{group}"))
            .and_then(|code| Decision::from_code(*code))
    }

    /// Overwrite table decisions with the persisted ones. Groups without
    /// an entry keep their freshly computed state.
    pub fn restore_into(&self, table: &mut GroupStateTable) {
        for state in table.iter_mut() {
            if let Some(decision) = self.decision_for(&state.group.name) {
                state.decision = decision;
            }
        }
    }

    /// Number of persisted entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was persisted
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
