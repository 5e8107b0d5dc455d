//! Grant-state storage for a requester's permission groups
//!
//! Provides the trait seam the flow engine talks to, plus in-memory and
//! file-backed implementations. A store instance is scoped to a single
//! requester: it answers which groups that requester declares, which
//! permissions are currently granted, and applies grant/revoke mutations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

/// Error type for grant-state store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read grant state: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse grant state: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Unknown requester: {0}")]
    UnknownRequester(String),

    #[error("Unknown permission group: {0}")]
    UnknownGroup(String),
}

/// Snapshot of one permission group as declared for a requester.
///
/// `name`, `label` and `permissions` are declaration data and never
/// change; the flag fields reflect grant state at the time the snapshot
/// was taken and go stale once the store mutates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGroup {
    /// Group name, e.g. "contacts"
    pub name: String,

    /// Human-readable label shown in prompts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Member permissions of this group
    #[serde(default)]
    pub permissions: Vec<String>,

    /// Whether the group may be granted interactively at all
    #[serde(default = "default_true")]
    pub granting_allowed: bool,

    /// User denied with do-not-ask-again
    #[serde(default)]
    pub user_fixed: bool,

    /// Device policy pinned this group
    #[serde(default)]
    pub policy_fixed: bool,

    /// User decided on this group at least once before
    #[serde(default)]
    pub user_set: bool,
}

fn default_true() -> bool {
    true
}

impl PermissionGroup {
    /// Create a group that allows granting and carries no flags
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            permissions: Vec::new(),
            granting_allowed: true,
            user_fixed: false,
            policy_fixed: false,
            user_set: false,
        }
    }

    /// Set the display label
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Add a member permission
    pub fn permission(mut self, name: impl Into<String>) -> Self {
        self.permissions.push(name.into());
        self
    }

    /// Forbid interactive granting for this group
    pub fn granting_forbidden(mut self) -> Self {
        self.granting_allowed = false;
        self
    }

    /// Mark the group user-fixed (denied with do-not-ask-again)
    pub fn user_fixed(mut self) -> Self {
        self.user_fixed = true;
        self
    }

    /// Mark the group pinned by device policy
    pub fn policy_fixed(mut self) -> Self {
        self.policy_fixed = true;
        self
    }

    /// Mark the group as previously decided by the user
    pub fn user_set(mut self) -> Self {
        self.user_set = true;
        self
    }

    /// Whether a permission name is a member of this group
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    /// Whether the group may appear in an interactive flow at all
    pub fn eligible_for_flow(&self) -> bool {
        self.granting_allowed && !self.user_fixed && !self.policy_fixed
    }

    /// Label to display, falling back to the group name
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

/// Trait for requester-scoped grant-state storage
///
/// Hosts implement this to bridge the platform's package and permission
/// database. All mutation methods take `&self`; implementations guard
/// their state internally.
pub trait PermissionStore: Send + Sync {
    /// All permission groups the requester declares, in declaration order
    fn groups(&self) -> Result<Vec<PermissionGroup>, StoreError>;

    /// Fresh snapshot of a single group
    fn group(&self, name: &str) -> Result<Option<PermissionGroup>, StoreError>;

    /// Whether one permission is currently granted
    fn is_granted(&self, permission: &str) -> Result<bool, StoreError>;

    /// Grant member permissions of `group`. Names that are not members
    /// of the group are ignored. `fixed` additionally pins the group as
    /// user-fixed; the interactive flow always grants with `false`.
    fn grant(&self, group: &str, permissions: &[String], fixed: bool) -> Result<(), StoreError>;

    /// Revoke member permissions of `group`. `fixed` marks the group
    /// user-fixed (a do-not-ask-again denial).
    fn revoke(&self, group: &str, permissions: &[String], fixed: bool) -> Result<(), StoreError>;

    /// Pin a group as decided by device policy
    fn set_policy_fixed(&self, group: &str) -> Result<(), StoreError>;

    /// Resolve the group a permission belongs to
    fn group_of(&self, permission: &str) -> Result<Option<PermissionGroup>, StoreError> {
        Ok(self
            .groups()?
            .into_iter()
            .find(|g| g.has_permission(permission)))
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    requester: String,
    groups: Vec<PermissionGroup>,
    granted: BTreeSet<String>,
    removed: bool,
}

/// In-memory grant-state store for tests and session-only hosts
pub struct MemoryPermissionStore {
    state: RwLock<MemoryState>,
}

impl MemoryPermissionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::for_requester("app")
    }

    /// Create an empty store labelled with a requester package name
    pub fn for_requester(package: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(MemoryState {
                requester: package.into(),
                ..MemoryState::default()
            }),
        }
    }

    /// Declare a permission group for the requester
    pub fn add_group(&self, group: PermissionGroup) {
        self.state.write().unwrap().groups.push(group);
    }

    /// Mark a permission granted outside any flow (platform sync,
    /// another session, test seeding)
    pub fn pre_grant(&self, permission: impl Into<String>) {
        self.state.write().unwrap().granted.insert(permission.into());
    }

    /// Revoke a permission outside any flow
    pub fn external_revoke(&self, permission: &str) {
        self.state.write().unwrap().granted.remove(permission);
    }

    /// Simulate the requester being uninstalled
    pub fn set_removed(&self, removed: bool) {
        self.state.write().unwrap().removed = removed;
    }

    fn with_group<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut MemoryState, usize) -> T,
    ) -> Result<T, StoreError> {
        let mut state = self.state.write().unwrap();
        match state.groups.iter().position(|g| g.name == name) {
            Some(idx) => Ok(f(&mut state, idx)),
            None => Err(StoreError::UnknownGroup(name.to_string())),
        }
    }
}

impl Default for MemoryPermissionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionStore for MemoryPermissionStore {
    fn groups(&self) -> Result<Vec<PermissionGroup>, StoreError> {
        let state = self.state.read().unwrap();
        if state.removed {
            return Err(StoreError::UnknownRequester(state.requester.clone()));
        }
        Ok(state.groups.clone())
    }

    fn group(&self, name: &str) -> Result<Option<PermissionGroup>, StoreError> {
        let state = self.state.read().unwrap();
        Ok(state.groups.iter().find(|g| g.name == name).cloned())
    }

    fn is_granted(&self, permission: &str) -> Result<bool, StoreError> {
        Ok(self.state.read().unwrap().granted.contains(permission))
    }

    fn grant(&self, group: &str, permissions: &[String], fixed: bool) -> Result<(), StoreError> {
        self.with_group(group, |state, idx| {
            let members: Vec<String> = permissions
                .iter()
                .filter(|p| state.groups[idx].has_permission(p))
                .cloned()
                .collect();
            state.granted.extend(members);
            state.groups[idx].user_set = true;
            if fixed {
                state.groups[idx].user_fixed = true;
            }
        })
    }

    fn revoke(&self, group: &str, permissions: &[String], fixed: bool) -> Result<(), StoreError> {
        self.with_group(group, |state, idx| {
            for permission in permissions {
                if state.groups[idx].has_permission(permission) {
                    state.granted.remove(permission);
                }
            }
            state.groups[idx].user_set = true;
            if fixed {
                state.groups[idx].user_fixed = true;
            }
        })
    }

    fn set_policy_fixed(&self, group: &str) -> Result<(), StoreError> {
        self.with_group(group, |state, idx| {
            state.groups[idx].policy_fixed = true;
        })
    }
}

impl std::fmt::Debug for MemoryPermissionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().unwrap();
        f.debug_struct("MemoryPermissionStore")
            .field("requester", &state.requester)
            .field("groups", &state.groups.len())
            .field("granted", &state.granted.len())
            .finish()
    }
}

// ============================================================================
// File-backed Store
// ============================================================================

/// Persistent grant-state file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GrantFileData {
    version: u32,

    #[serde(default)]
    granted: BTreeSet<String>,

    #[serde(default)]
    user_set: BTreeSet<String>,

    #[serde(default)]
    user_fixed: BTreeSet<String>,

    #[serde(default)]
    policy_fixed: BTreeSet<String>,
}

impl GrantFileData {
    fn new() -> Self {
        Self {
            version: 1,
            ..Self::default()
        }
    }
}

/// File-backed grant-state store
///
/// Group declarations are supplied at construction (they belong to the
/// requester's manifest, not to grant state); granted permissions and
/// group flags persist as pretty-printed JSON, so a do-not-ask-again
/// denial survives into later independent requests.
///
/// Default location: `~/.config/<app>/grants/<package>.json`
pub struct FilePermissionStore {
    path: PathBuf,
    requester: String,
    declared: Vec<PermissionGroup>,
    data: RwLock<GrantFileData>,
}

impl FilePermissionStore {
    /// Open or create a store at the given path
    pub fn new(
        path: impl AsRef<Path>,
        requester: impl Into<String>,
        declared: Vec<PermissionGroup>,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let data = if path.exists() {
            let file = File::open(&path)?;
            let reader = BufReader::new(file);
            serde_json::from_reader(reader)?
        } else {
            GrantFileData::new()
        };

        Ok(Self {
            path,
            requester: requester.into(),
            declared,
            data: RwLock::new(data),
        })
    }

    /// Open a store in the default location for an application
    pub fn default_for_requester(
        app_name: &str,
        requester: impl Into<String>,
        declared: Vec<PermissionGroup>,
    ) -> Result<Self, StoreError> {
        let requester = requester.into();
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        let path = config_dir
            .join(app_name)
            .join("grants")
            .join(format!("{}.json", requester));
        Self::new(path, requester, declared)
    }

    /// The store file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overlay persisted flags onto a declared group
    fn materialize(&self, template: &PermissionGroup, data: &GrantFileData) -> PermissionGroup {
        let mut group = template.clone();
        group.user_set |= data.user_set.contains(&group.name);
        group.user_fixed |= data.user_fixed.contains(&group.name);
        group.policy_fixed |= data.policy_fixed.contains(&group.name);
        group
    }

    fn save(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = self.data.read().unwrap();
        let file = File::create(&self.path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &*data)?;
        Ok(())
    }

    fn mutate(
        &self,
        group: &str,
        f: impl FnOnce(&PermissionGroup, &mut GrantFileData),
    ) -> Result<(), StoreError> {
        let template = self
            .declared
            .iter()
            .find(|g| g.name == group)
            .ok_or_else(|| StoreError::UnknownGroup(group.to_string()))?;
        {
            let mut data = self.data.write().unwrap();
            f(template, &mut data);
        }
        self.save()
    }
}

impl PermissionStore for FilePermissionStore {
    fn groups(&self) -> Result<Vec<PermissionGroup>, StoreError> {
        if self.declared.is_empty() {
            return Err(StoreError::UnknownRequester(self.requester.clone()));
        }
        let data = self.data.read().unwrap();
        Ok(self
            .declared
            .iter()
            .map(|g| self.materialize(g, &data))
            .collect())
    }

    fn group(&self, name: &str) -> Result<Option<PermissionGroup>, StoreError> {
        let data = self.data.read().unwrap();
        Ok(self
            .declared
            .iter()
            .find(|g| g.name == name)
            .map(|g| self.materialize(g, &data)))
    }

    fn is_granted(&self, permission: &str) -> Result<bool, StoreError> {
        Ok(self.data.read().unwrap().granted.contains(permission))
    }

    fn grant(&self, group: &str, permissions: &[String], fixed: bool) -> Result<(), StoreError> {
        self.mutate(group, |template, data| {
            for permission in permissions {
                if template.has_permission(permission) {
                    data.granted.insert(permission.clone());
                }
            }
            data.user_set.insert(template.name.clone());
            if fixed {
                data.user_fixed.insert(template.name.clone());
            }
        })
    }

    fn revoke(&self, group: &str, permissions: &[String], fixed: bool) -> Result<(), StoreError> {
        self.mutate(group, |template, data| {
            for permission in permissions {
                if template.has_permission(permission) {
                    data.granted.remove(permission);
                }
            }
            data.user_set.insert(template.name.clone());
            if fixed {
                data.user_fixed.insert(template.name.clone());
            }
        })
    }

    fn set_policy_fixed(&self, group: &str) -> Result<(), StoreError> {
        self.mutate(group, |template, data| {
            data.policy_fixed.insert(template.name.clone());
        })
    }
}

impl std::fmt::Debug for FilePermissionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePermissionStore")
            .field("path", &self.path)
            .field("requester", &self.requester)
            .field("declared", &self.declared.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contacts_group() -> PermissionGroup {
        PermissionGroup::new("contacts")
            .label("Contacts")
            .permission("contacts.read")
            .permission("contacts.write")
    }

    #[test]
    fn test_memory_grant_and_revoke() {
        let store = MemoryPermissionStore::new();
        store.add_group(contacts_group());

        store
            .grant("contacts", &["contacts.read".into()], false)
            .unwrap();
        assert!(store.is_granted("contacts.read").unwrap());
        assert!(!store.is_granted("contacts.write").unwrap());

        let group = store.group("contacts").unwrap().unwrap();
        assert!(group.user_set);
        assert!(!group.user_fixed);

        store
            .revoke("contacts", &["contacts.read".into()], true)
            .unwrap();
        assert!(!store.is_granted("contacts.read").unwrap());
        assert!(store.group("contacts").unwrap().unwrap().user_fixed);
    }

    #[test]
    fn test_memory_grant_ignores_non_members() {
        let store = MemoryPermissionStore::new();
        store.add_group(contacts_group());

        store
            .grant("contacts", &["camera.capture".into()], false)
            .unwrap();
        assert!(!store.is_granted("camera.capture").unwrap());
    }

    #[test]
    fn test_memory_unknown_group() {
        let store = MemoryPermissionStore::new();
        let err = store.grant("nope", &[], false).unwrap_err();
        assert!(matches!(err, StoreError::UnknownGroup(name) if name == "nope"));
    }

    #[test]
    fn test_memory_removed_requester() {
        let store = MemoryPermissionStore::for_requester("com.example.gone");
        store.add_group(contacts_group());
        store.set_removed(true);

        let err = store.groups().unwrap_err();
        assert!(matches!(err, StoreError::UnknownRequester(p) if p == "com.example.gone"));
    }

    #[test]
    fn test_group_of_default_method() {
        let store = MemoryPermissionStore::new();
        store.add_group(contacts_group());
        store.add_group(PermissionGroup::new("camera").permission("camera.capture"));

        let group = store.group_of("camera.capture").unwrap().unwrap();
        assert_eq!(group.name, "camera");
        assert!(store.group_of("location.fine").unwrap().is_none());
    }

    #[test]
    fn test_eligibility_and_label_fallback() {
        let group = PermissionGroup::new("sensors").permission("sensors.body");
        assert!(group.eligible_for_flow());
        assert_eq!(group.display_label(), "sensors");

        assert!(!group.clone().user_fixed().eligible_for_flow());
        assert!(!group.clone().policy_fixed().eligible_for_flow());
        assert!(!group.clone().granting_forbidden().eligible_for_flow());
        assert_eq!(group.label("Body sensors").display_label(), "Body sensors");
    }

    #[test]
    fn test_file_store_persists_grants_and_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grants").join("com.example.notes.json");

        let store =
            FilePermissionStore::new(&path, "com.example.notes", vec![contacts_group()]).unwrap();
        store
            .grant("contacts", &["contacts.read".into()], false)
            .unwrap();
        store
            .revoke("contacts", &["contacts.write".into()], true)
            .unwrap();
        assert!(path.exists());

        let reopened =
            FilePermissionStore::new(&path, "com.example.notes", vec![contacts_group()]).unwrap();
        assert!(reopened.is_granted("contacts.read").unwrap());
        let group = reopened.group("contacts").unwrap().unwrap();
        assert!(group.user_fixed);
        assert!(group.user_set);
        assert!(!group.eligible_for_flow());
    }

    #[test]
    fn test_file_store_without_declared_groups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");

        let store = FilePermissionStore::new(&path, "com.example.ghost", vec![]).unwrap();
        let err = store.groups().unwrap_err();
        assert!(matches!(err, StoreError::UnknownRequester(p) if p == "com.example.ghost"));
    }
}
