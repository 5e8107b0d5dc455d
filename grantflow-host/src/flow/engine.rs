//! The grant flow state machine
//!
//! One `GrantFlow` drives one request from a requester: expansion of the
//! requested permissions, policy resolution, then one group prompt at a
//! time until every group is decided and the result can be assembled.
//! The flow itself is synchronous and single-threaded; the session layer
//! serializes events onto it.

use std::fmt;
use std::sync::Arc;

use grantflow_api::{GrantRequest, GrantResult, GrantStatus};

use crate::audit::{self, AuditSink};
use crate::config::FlowConfig;
use crate::expand::PermissionExpander;
use crate::flow::state::{Decision, FlowSnapshot, GroupStateTable};
use crate::policy::PolicyResolver;
use crate::presenter::{GroupPrompt, PromptDecision};
use crate::store::{PermissionStore, StoreError};

/// Outcome of starting a flow
#[derive(Debug)]
pub enum GrantStart {
    /// Groups may remain to decide; drive the flow to completion
    Pending(GrantFlow),

    /// The request finished during initialization
    Finished(GrantResult),
}

/// State machine for one permission request
///
/// Created by [`GrantFlow::begin`]; the host then cycles
/// [`advance`](GrantFlow::advance) / [`resolve`](GrantFlow::resolve)
/// (with [`reconcile`](GrantFlow::reconcile) on external changes) until
/// `advance` returns `None`, and finishes with
/// [`finalize`](GrantFlow::finalize).
pub struct GrantFlow {
    request: GrantRequest,
    store: Arc<dyn PermissionStore>,
    audit: Arc<dyn AuditSink>,
    table: GroupStateTable,
}

impl GrantFlow {
    /// Initialize a flow for a request.
    ///
    /// Expands every requested permission, applies device policy pair by
    /// pair, and restores any persisted decisions before the first
    /// `advance`. Passing a snapshot marks this as a resumed pass:
    /// policy-resolved groups then keep their visible decision instead
    /// of being skipped, so the group count the user saw cannot change.
    ///
    /// Requests that cannot run (requester gone, or its declared target
    /// predates runtime grants) finish immediately with a cancellation
    /// result; an empty request finishes immediately with an empty
    /// result, which callers cannot tell apart from a cancellation.
    pub fn begin(
        config: &FlowConfig,
        request: GrantRequest,
        snapshot: Option<&FlowSnapshot>,
    ) -> Result<GrantStart, StoreError> {
        let first_pass = snapshot.is_none();

        if request.permissions.is_empty() {
            return Ok(GrantStart::Finished(GrantResult::new(
                Vec::new(),
                Vec::new(),
            )));
        }

        if let Err(err) = config.store.groups() {
            return match err {
                StoreError::UnknownRequester(package) => {
                    tracing::warn!(package = %package, "requester is gone; cancelling request");
                    Ok(GrantStart::Finished(GrantResult::cancelled()))
                }
                other => Err(other),
            };
        }

        if request.requester.predates_runtime_grants() {
            tracing::debug!(
                package = %request.requester.package,
                target_level = request.requester.target_level,
                "target level predates runtime grants; cancelling request"
            );
            return Ok(GrantStart::Finished(GrantResult::cancelled()));
        }

        let expander = PermissionExpander::new(config.splits.as_ref());
        let resolver = PolicyResolver::new(config.store.as_ref(), config.policy.as_ref());
        let mut table = GroupStateTable::new();

        for permission in &request.permissions {
            let group = match config.store.group_of(permission)? {
                Some(group) => group,
                None => {
                    tracing::debug!(permission = %permission, "no group declares this permission");
                    continue;
                }
            };

            let affected = expander.expand(request.requester.target_level, &group, permission);
            for affected_permission in &affected {
                Self::add_requested_permission(
                    config.store.as_ref(),
                    &resolver,
                    &mut table,
                    &group.name,
                    affected_permission,
                    first_pass,
                )?;
            }
        }

        if let Some(snapshot) = snapshot {
            snapshot.restore_into(&mut table);
        }

        let flow = GrantFlow {
            request,
            store: Arc::clone(&config.store),
            audit: Arc::clone(&config.audit),
            table,
        };

        if first_pass && flow.table.any_pending() {
            for permission in &flow.request.permissions {
                flow.record(audit::permission_requested(
                    &flow.request.requester.package,
                    permission,
                ));
            }
        }

        Ok(GrantStart::Pending(flow))
    }

    /// Process one (group, affected permission) pair.
    ///
    /// The group is re-fetched so each pair sees live flags: policy
    /// pinning a group on one pair makes its later pairs ineligible.
    fn add_requested_permission(
        store: &dyn PermissionStore,
        resolver: &PolicyResolver<'_>,
        table: &mut GroupStateTable,
        group_name: &str,
        permission: &str,
        first_pass: bool,
    ) -> Result<(), StoreError> {
        let group = match store.group(group_name)? {
            Some(group) => group,
            None => return Ok(()),
        };

        if !group.eligible_for_flow() {
            tracing::debug!(
                group = %group.name,
                permission = %permission,
                "group is fixed or not grantable; excluded"
            );
            return Ok(());
        }

        let state = table.get_or_create(&group);
        state.add_affected(permission);

        let skip = resolver.resolve(&group, permission, state)?;
        if skip && first_pass {
            // Skipping is only allowed the first time the table is
            // built; a resumed pass keeps the decision visible so the
            // group count matches what the user already saw.
            state.decision = Decision::Skipped;
        }
        Ok(())
    }

    /// Select the next group to present.
    ///
    /// Scans in table order for the first undecided group; the count and
    /// index ignore skipped groups. Returns `None` when every group is
    /// decided and the request should finalize.
    pub fn advance(&self) -> Option<GroupPrompt> {
        let total = self
            .table
            .iter()
            .filter(|state| state.decision.is_visible())
            .count();

        let mut index = 0;
        for state in self.table.iter() {
            if state.decision.is_pending() {
                return Some(GroupPrompt {
                    group: state.group.name.clone(),
                    label: state.group.label.clone(),
                    total,
                    index,
                    user_set: state.group.user_set,
                });
            }
            if state.decision.is_visible() {
                index += 1;
            }
        }
        None
    }

    /// Apply a user decision to a group.
    ///
    /// Grants or revokes the group's affected permissions as a unit; a
    /// do-not-ask-again denial also pins the group as user-fixed, which
    /// excludes it from later independent requests. Decisions for groups
    /// that are not part of this request are ignored.
    pub fn resolve(&mut self, group: &str, decision: PromptDecision) -> Result<(), StoreError> {
        let state = match self.table.get_mut(group) {
            Some(state) => state,
            None => {
                tracing::warn!(group = %group, "decision for a group outside this request; ignored");
                return Ok(());
            }
        };

        if decision.is_allowed() {
            self.store.grant(&state.group.name, state.affected(), false)?;
            state.decision = Decision::Allowed;
            tracing::info!(group = %state.group.name, "group allowed by user");
            return Ok(());
        }

        self.store
            .revoke(&state.group.name, state.affected(), decision.pins_group())?;
        state.decision = Decision::Denied;
        tracing::info!(
            group = %state.group.name,
            do_not_ask = decision.pins_group(),
            "group denied by user"
        );
        let group = state.group.clone();

        // Denials are recorded for the originally requested names only,
        // never for expansion artifacts.
        for permission in &self.request.permissions {
            if group.members.iter().any(|m| m == permission) {
                self.record(audit::permission_denied(
                    &self.request.requester.package,
                    permission,
                    &group.name,
                ));
            }
        }
        Ok(())
    }

    /// Promote undecided groups whose affected permissions were all
    /// granted out-of-band.
    ///
    /// Scans in table order and stops at the first undecided group that
    /// is not fully granted: groups behind it keep waiting regardless of
    /// their own status, so the presentation order never changes. A
    /// group that never learned its affected permissions is never
    /// promoted. Returns how many groups were promoted.
    pub fn reconcile(&mut self) -> Result<usize, StoreError> {
        let mut promoted = 0;

        for state in self.table.iter_mut() {
            if !state.decision.is_pending() {
                continue;
            }
            if !state.has_affected() {
                break;
            }

            let mut satisfied = true;
            for permission in state.affected() {
                if !self.store.is_granted(permission)? {
                    satisfied = false;
                    break;
                }
            }
            if !satisfied {
                break;
            }

            state.decision = Decision::Allowed;
            promoted += 1;
            tracing::info!(group = %state.group.name, "group granted externally");
        }

        Ok(promoted)
    }

    /// Capture the decisions made so far for a later resume
    pub fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot::capture(&self.table)
    }

    /// Whether every group has been decided
    pub fn is_exhausted(&self) -> bool {
        !self.table.any_pending()
    }

    /// The request this flow is driving
    pub fn request(&self) -> &GrantRequest {
        &self.request
    }

    /// Assemble the final result and end the request.
    ///
    /// Statuses are queried live from the store for every originally
    /// requested permission; the per-group decisions are not consulted,
    /// since a group may have resolved through a different affected
    /// permission than the one named in the request.
    pub fn finalize(self) -> Result<GrantResult, StoreError> {
        self.record_request_completed();

        let mut statuses = Vec::with_capacity(self.request.permissions.len());
        for permission in &self.request.permissions {
            let granted = self.store.is_granted(permission)?;
            statuses.push(GrantStatus::from_granted(granted));
        }

        tracing::info!(
            package = %self.request.requester.package,
            permissions = self.request.permissions.len(),
            "request finalized"
        );
        Ok(GrantResult::new(self.request.permissions, statuses))
    }

    /// End the request without results (requester uninstalled, host
    /// teardown). Grants and revocations already applied stay applied.
    pub fn abandon(self) -> GrantResult {
        self.record_request_completed();
        tracing::warn!(package = %self.request.requester.package, "request abandoned");
        GrantResult::cancelled()
    }

    /// One completion event per request, listing every group it touched.
    /// Requests that never created a group state stay silent.
    fn record_request_completed(&self) {
        if self.table.is_empty() {
            return;
        }
        self.record(audit::request_completed(
            &self.request.requester.package,
            self.table.group_names(),
        ));
    }

    fn record(&self, event: audit::AuditEvent) {
        if let Err(err) = self.audit.record(event) {
            tracing::warn!(error = %err, "failed to record audit event");
        }
    }
}

impl fmt::Debug for GrantFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrantFlow")
            .field("package", &self.request.requester.package)
            .field("groups", &self.table.len())
            .field("exhausted", &self.is_exhausted())
            .finish_non_exhaustive()
    }
}
