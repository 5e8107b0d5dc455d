//! Device policy source and per-permission policy resolution
//!
//! A managed device can decide permission requests without asking the
//! user. The `PolicyEngine` seam reports the device-wide policy; the
//! `PolicyResolver` applies it to one (group, affected permission) pair
//! at a time during flow initialization.

use crate::flow::state::{Decision, GroupState};
use crate::store::{PermissionGroup, PermissionStore, StoreError};

/// Device-wide permission policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePolicy {
    /// No policy: ask the user (default)
    #[default]
    Prompt,

    /// Grant every requested permission without asking
    AutoGrant,

    /// Deny every requested permission without asking
    AutoDeny,
}

/// Source of the device-wide permission policy
///
/// # Example
///
/// ```rust
/// use grantflow_host::policy::{DevicePolicy, PolicyEngine};
///
/// struct ManagedProfile {
///     locked_down: bool,
/// }
///
/// impl PolicyEngine for ManagedProfile {
///     fn permission_policy(&self) -> DevicePolicy {
///         if self.locked_down {
///             DevicePolicy::AutoDeny
///         } else {
///             DevicePolicy::Prompt
///         }
///     }
/// }
/// ```
pub trait PolicyEngine: Send + Sync {
    /// Current policy for runtime permission requests
    fn permission_policy(&self) -> DevicePolicy;
}

/// Policy engine that always reports the same policy
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedPolicy {
    policy: DevicePolicy,
}

impl FixedPolicy {
    /// Create an engine with the given fixed policy
    pub fn new(policy: DevicePolicy) -> Self {
        Self { policy }
    }

    /// The unmanaged default: always ask the user
    pub fn prompt() -> Self {
        Self::new(DevicePolicy::Prompt)
    }

    /// Grant everything silently
    pub fn auto_grant() -> Self {
        Self::new(DevicePolicy::AutoGrant)
    }

    /// Deny everything silently
    pub fn auto_deny() -> Self {
        Self::new(DevicePolicy::AutoDeny)
    }
}

impl PolicyEngine for FixedPolicy {
    fn permission_policy(&self) -> DevicePolicy {
        self.policy
    }
}

/// Applies device policy to one (group, affected permission) pair
///
/// Borrowed by the flow during initialization; pairs are resolved in
/// request order, one at a time.
pub struct PolicyResolver<'a> {
    store: &'a dyn PermissionStore,
    policy: &'a dyn PolicyEngine,
}

impl<'a> PolicyResolver<'a> {
    /// Create a resolver over the given seams
    pub fn new(store: &'a dyn PermissionStore, policy: &'a dyn PolicyEngine) -> Self {
        Self { store, policy }
    }

    /// Resolve one pair. Mutates the group state when policy decides,
    /// and returns whether the pair asks for the group to be skipped.
    ///
    /// Auto-grant and auto-deny also pin the group as policy-fixed, so
    /// later requests never reach the user for it. Without a policy, an
    /// already-granted permission is re-affirmed (the grant call has no
    /// visible effect) and the group skips ahead as allowed.
    pub fn resolve(
        &self,
        group: &PermissionGroup,
        permission: &str,
        state: &mut GroupState,
    ) -> Result<bool, StoreError> {
        let affected = [permission.to_string()];

        match self.policy.permission_policy() {
            DevicePolicy::AutoGrant => {
                if !self.store.is_granted(permission)? {
                    self.store.grant(&group.name, &affected, false)?;
                }
                state.decision = Decision::Allowed;
                self.store.set_policy_fixed(&group.name)?;
                tracing::debug!(
                    group = %group.name,
                    permission = %permission,
                    "auto-granted by device policy"
                );
                Ok(true)
            }

            DevicePolicy::AutoDeny => {
                if self.store.is_granted(permission)? {
                    self.store.revoke(&group.name, &affected, false)?;
                }
                state.decision = Decision::Denied;
                self.store.set_policy_fixed(&group.name)?;
                tracing::debug!(
                    group = %group.name,
                    permission = %permission,
                    "auto-denied by device policy"
                );
                Ok(true)
            }

            DevicePolicy::Prompt => {
                if self.store.is_granted(permission)? {
                    self.store.grant(&group.name, &affected, false)?;
                    state.decision = Decision::Allowed;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::state::GroupStateTable;
    use crate::store::MemoryPermissionStore;

    fn seeded_store() -> MemoryPermissionStore {
        let store = MemoryPermissionStore::new();
        store.add_group(
            PermissionGroup::new("contacts")
                .permission("contacts.read")
                .permission("contacts.write"),
        );
        store
    }

    fn state_for(table: &mut GroupStateTable, store: &MemoryPermissionStore) -> GroupState {
        let group = store.group("contacts").unwrap().unwrap();
        table.get_or_create(&group).clone()
    }

    #[test]
    fn test_auto_grant_grants_and_pins() {
        let store = seeded_store();
        let policy = FixedPolicy::auto_grant();
        let mut table = GroupStateTable::new();
        let mut state = state_for(&mut table, &store);

        let group = store.group("contacts").unwrap().unwrap();
        let resolver = PolicyResolver::new(&store, &policy);
        let skip = resolver.resolve(&group, "contacts.read", &mut state).unwrap();

        assert!(skip);
        assert_eq!(state.decision, Decision::Allowed);
        assert!(store.is_granted("contacts.read").unwrap());
        assert!(store.group("contacts").unwrap().unwrap().policy_fixed);
    }

    #[test]
    fn test_auto_deny_revokes_and_pins() {
        let store = seeded_store();
        store.pre_grant("contacts.read");
        let policy = FixedPolicy::auto_deny();
        let mut table = GroupStateTable::new();
        let mut state = state_for(&mut table, &store);

        let group = store.group("contacts").unwrap().unwrap();
        let resolver = PolicyResolver::new(&store, &policy);
        let skip = resolver.resolve(&group, "contacts.read", &mut state).unwrap();

        assert!(skip);
        assert_eq!(state.decision, Decision::Denied);
        assert!(!store.is_granted("contacts.read").unwrap());
        assert!(store.group("contacts").unwrap().unwrap().policy_fixed);
    }

    #[test]
    fn test_prompt_policy_skips_already_granted() {
        let store = seeded_store();
        store.pre_grant("contacts.read");
        let policy = FixedPolicy::prompt();
        let mut table = GroupStateTable::new();
        let mut state = state_for(&mut table, &store);

        let group = store.group("contacts").unwrap().unwrap();
        let resolver = PolicyResolver::new(&store, &policy);
        let skip = resolver.resolve(&group, "contacts.read", &mut state).unwrap();

        assert!(skip);
        assert_eq!(state.decision, Decision::Allowed);
        // Re-affirmation must not pin the group.
        assert!(!store.group("contacts").unwrap().unwrap().policy_fixed);
    }

    #[test]
    fn test_prompt_policy_leaves_ungranted_pending() {
        let store = seeded_store();
        let policy = FixedPolicy::prompt();
        let mut table = GroupStateTable::new();
        let mut state = state_for(&mut table, &store);

        let group = store.group("contacts").unwrap().unwrap();
        let resolver = PolicyResolver::new(&store, &policy);
        let skip = resolver.resolve(&group, "contacts.read", &mut state).unwrap();

        assert!(!skip);
        assert_eq!(state.decision, Decision::Unknown);
        assert!(!store.is_granted("contacts.read").unwrap());
    }
}
