//! Expansion of a requested permission into the permissions it affects
//!
//! Granting is not one-to-one. Requesters targeting old API levels are
//! granted whole groups at once, and permissions that were later split
//! into several drag their split-off siblings along for requesters that
//! predate the split.

use grantflow_api::{ApiLevel, LEGACY_GROUP_LEVEL};
use serde::{Deserialize, Serialize};

use crate::store::PermissionGroup;

/// One platform split-permission rule.
///
/// At `introduced_in`, `root` was split and the permissions in `splits`
/// became separately grantable. Requesters targeting an older level
/// still expect the root to cover them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRule {
    /// Permission that was split
    pub root: String,

    /// API level the split happened at
    pub introduced_in: ApiLevel,

    /// Permissions split off the root
    #[serde(default)]
    pub splits: Vec<String>,
}

impl SplitRule {
    /// Create a rule with no split permissions yet
    pub fn new(root: impl Into<String>, introduced_in: ApiLevel) -> Self {
        Self {
            root: root.into(),
            introduced_in,
            splits: Vec::new(),
        }
    }

    /// Add a split-off permission
    pub fn split(mut self, name: impl Into<String>) -> Self {
        self.splits.push(name.into());
        self
    }

    /// Whether this rule contributes for a requester target level.
    /// Splits that predate split-aware grant handling never apply.
    fn applies(&self, target: ApiLevel, permission: &str) -> bool {
        self.introduced_in > LEGACY_GROUP_LEVEL
            && target < self.introduced_in
            && permission == self.root
    }
}

/// The platform's split-rule table.
///
/// Versioned data supplied by the host, typically shipped as JSON next
/// to the platform image. An empty table is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRules {
    #[serde(default)]
    rules: Vec<SplitRule>,
}

impl SplitRules {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule
    pub fn rule(mut self, rule: SplitRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Iterate the rules in table order
    pub fn iter(&self) -> impl Iterator<Item = &SplitRule> {
        self.rules.iter()
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the table holds no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Expands one requested permission into its affected set
pub struct PermissionExpander<'a> {
    rules: &'a SplitRules,
}

impl<'a> PermissionExpander<'a> {
    /// Create an expander over a rule table
    pub fn new(rules: &'a SplitRules) -> Self {
        Self { rules }
    }

    /// Affected permissions for one requested permission.
    ///
    /// Legacy requesters (target at or below the whole-group level) get
    /// every member of the owning group. Everyone else gets the
    /// permission itself plus the split-off permissions of every
    /// applicable rule, duplicates suppressed in first-seen order.
    pub fn expand(
        &self,
        target: ApiLevel,
        group: &PermissionGroup,
        permission: &str,
    ) -> Vec<String> {
        if target <= LEGACY_GROUP_LEVEL {
            return group.permissions.clone();
        }

        let mut affected = vec![permission.to_string()];
        for rule in self.rules.iter() {
            if !rule.applies(target, permission) {
                continue;
            }
            tracing::debug!(
                root = %rule.root,
                introduced_in = rule.introduced_in,
                "split rule applies"
            );
            for split in &rule.splits {
                if !affected.contains(split) {
                    affected.push(split.clone());
                }
            }
        }
        affected
    }
}
