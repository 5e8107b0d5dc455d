//! grantflow-api: Shared types for the grantflow permission engine
//!
//! This crate defines the protocol between a requesting application and
//! the grant-flow host: who is asking, which permissions are asked for,
//! and the per-permission status codes handed back when the flow ends.

use serde::{Deserialize, Serialize};

/// Platform API level a requester declares it targets.
pub type ApiLevel = u32;

/// First API level at which runtime permission grants exist.
///
/// Requesters targeting anything below this level received all their
/// permissions at install time; a runtime request from such an
/// application is cancelled as a whole.
pub const MIN_RUNTIME_LEVEL: ApiLevel = 23;

/// Highest API level with whole-group grant semantics.
///
/// Requesters targeting this level or below are granted entire
/// permission groups at once: asking for one member permission affects
/// every permission in its group.
pub const LEGACY_GROUP_LEVEL: ApiLevel = 25;

/// Status code for a granted permission.
pub const STATUS_GRANTED: i32 = 0;

/// Status code for a denied permission.
pub const STATUS_DENIED: i32 = -1;

/// Identity of the application asking for permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    /// Package name, e.g. "com.example.dialer"
    pub package: String,

    /// Numeric id the host uses to match grant-change notifications
    pub uid: u32,

    /// API level the requester declares it targets
    pub target_level: ApiLevel,
}

/// A runtime permission request as received from an application.
///
/// Permission order is significant: group states are created in the
/// order their first member permission appears here, and the final
/// result keeps this exact order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRequest {
    /// Who is asking
    pub requester: Requester,

    /// Requested permission names, in request order
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Outcome for a single permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    /// Permission is granted at the time the flow ended
    Granted,

    /// Permission is not granted
    Denied,
}

/// Final outcome of a grant flow.
///
/// `statuses` is parallel to `permissions`. Both arrays empty signals a
/// cancelled request: the requester never learns individual outcomes and
/// may ask again later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantResult {
    /// The originally requested permissions, order unchanged
    #[serde(default)]
    pub permissions: Vec<String>,

    /// One status per requested permission
    #[serde(default)]
    pub statuses: Vec<GrantStatus>,
}

impl Requester {
    /// Create a requester identity
    pub fn new(package: impl Into<String>, uid: u32, target_level: ApiLevel) -> Self {
        Self {
            package: package.into(),
            uid,
            target_level,
        }
    }

    /// Whether the requester predates runtime permission grants
    pub fn predates_runtime_grants(&self) -> bool {
        self.target_level < MIN_RUNTIME_LEVEL
    }

    /// Whether grants for this requester operate on whole groups
    pub fn uses_group_grants(&self) -> bool {
        self.target_level <= LEGACY_GROUP_LEVEL
    }
}

impl GrantRequest {
    /// Create a request with no permissions yet
    pub fn new(requester: Requester) -> Self {
        Self {
            requester,
            permissions: Vec::new(),
        }
    }

    /// Add a requested permission
    pub fn permission(mut self, name: impl Into<String>) -> Self {
        self.permissions.push(name.into());
        self
    }

    /// Add several requested permissions at once
    pub fn permissions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions.extend(names.into_iter().map(Into::into));
        self
    }
}

impl GrantStatus {
    /// Platform status code (granted = 0, denied = -1)
    pub const fn as_code(self) -> i32 {
        match self {
            GrantStatus::Granted => STATUS_GRANTED,
            GrantStatus::Denied => STATUS_DENIED,
        }
    }

    /// Whether this status means the permission is held
    pub const fn is_granted(self) -> bool {
        matches!(self, GrantStatus::Granted)
    }

    /// Status from a boolean grant check
    pub fn from_granted(granted: bool) -> Self {
        if granted {
            GrantStatus::Granted
        } else {
            GrantStatus::Denied
        }
    }
}

impl GrantResult {
    /// Create a result from parallel permission and status arrays
    pub fn new(permissions: Vec<String>, statuses: Vec<GrantStatus>) -> Self {
        debug_assert_eq!(permissions.len(), statuses.len());
        Self {
            permissions,
            statuses,
        }
    }

    /// The cancellation result: both arrays empty
    pub fn cancelled() -> Self {
        Self {
            permissions: Vec::new(),
            statuses: Vec::new(),
        }
    }

    /// Whether this result signals cancellation
    pub fn is_cancelled(&self) -> bool {
        self.permissions.is_empty()
    }

    /// Status of one permission, if it was part of the request
    pub fn status_of(&self, permission: &str) -> Option<GrantStatus> {
        self.permissions
            .iter()
            .position(|p| p == permission)
            .and_then(|i| self.statuses.get(i).copied())
    }

    /// Platform status codes, parallel to `permissions`
    pub fn codes(&self) -> Vec<i32> {
        self.statuses.iter().map(|s| s.as_code()).collect()
    }

    /// Iterate (permission, status) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, GrantStatus)> {
        self.permissions
            .iter()
            .map(String::as_str)
            .zip(self.statuses.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = GrantRequest::new(Requester::new("com.example.dialer", 10042, 30))
            .permission("contacts.read")
            .permissions(["call_log.read", "microphone.record"]);

        assert_eq!(req.requester.package, "com.example.dialer");
        assert_eq!(
            req.permissions,
            vec!["contacts.read", "call_log.read", "microphone.record"]
        );
    }

    #[test]
    fn test_requester_level_checks() {
        assert!(Requester::new("a", 1, 22).predates_runtime_grants());
        assert!(!Requester::new("a", 1, 23).predates_runtime_grants());
        assert!(Requester::new("a", 1, 25).uses_group_grants());
        assert!(!Requester::new("a", 1, 26).uses_group_grants());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(GrantStatus::Granted.as_code(), 0);
        assert_eq!(GrantStatus::Denied.as_code(), -1);
        assert!(GrantStatus::from_granted(true).is_granted());
        assert!(!GrantStatus::from_granted(false).is_granted());
    }

    #[test]
    fn test_result_lookup_and_codes() {
        let result = GrantResult::new(
            vec!["contacts.read".into(), "sms.send".into()],
            vec![GrantStatus::Granted, GrantStatus::Denied],
        );

        assert!(!result.is_cancelled());
        assert_eq!(result.status_of("sms.send"), Some(GrantStatus::Denied));
        assert_eq!(result.status_of("camera.capture"), None);
        assert_eq!(result.codes(), vec![0, -1]);
        assert_eq!(result.iter().count(), 2);
    }

    #[test]
    fn test_cancelled_result_is_empty() {
        let result = GrantResult::cancelled();
        assert!(result.is_cancelled());
        assert!(result.permissions.is_empty());
        assert!(result.statuses.is_empty());
    }

    #[test]
    fn test_request_serialization() {
        let req = GrantRequest::new(Requester::new("com.example.notes", 10007, 28))
            .permission("storage.read");

        let json = serde_json::to_string(&req).unwrap();
        let decoded: GrantRequest = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded, req);
        assert!(json.contains("com.example.notes"));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&GrantStatus::Granted).unwrap();
        assert_eq!(json, "\"granted\"");
    }
}
