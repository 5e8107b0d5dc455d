//! Pre-wired flow configurations for common embedders
//!
//! Bundles the four seams (store, policy, presenter, audit) plus the
//! split-rule table into one value the flow and session consume.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::audit::{AuditSink, FileAuditSink, MemoryAuditSink, NullAuditSink};
use crate::expand::SplitRules;
use crate::policy::{DevicePolicy, FixedPolicy, PolicyEngine};
use crate::presenter::{AutoPresenter, ChannelPresenter, GroupPrompt, Presenter};
use crate::store::{FilePermissionStore, PermissionGroup, PermissionStore};

/// Complete grant-flow configuration bundle
pub struct FlowConfig {
    /// Requester-scoped grant-state storage
    pub store: Arc<dyn PermissionStore>,
    /// Device policy source
    pub policy: Arc<dyn PolicyEngine>,
    /// Prompt destination
    pub presenter: Arc<dyn Presenter>,
    /// Audit sink
    pub audit: Arc<dyn AuditSink>,
    /// Permission split rules
    pub splits: Arc<SplitRules>,
}

impl std::fmt::Debug for FlowConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowConfig")
            .field("split_rules", &self.splits.len())
            .finish_non_exhaustive()
    }
}

impl Clone for FlowConfig {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy: Arc::clone(&self.policy),
            presenter: Arc::clone(&self.presenter),
            audit: Arc::clone(&self.audit),
            splits: Arc::clone(&self.splits),
        }
    }
}

impl FlowConfig {
    /// Create a new configuration with custom components
    pub fn new(
        store: impl PermissionStore + 'static,
        policy: impl PolicyEngine + 'static,
        presenter: impl Presenter + 'static,
        audit: impl AuditSink + 'static,
        splits: SplitRules,
    ) -> Self {
        Self {
            store: Arc::new(store),
            policy: Arc::new(policy),
            presenter: Arc::new(presenter),
            audit: Arc::new(audit),
            splits: Arc::new(splits),
        }
    }

    /// Start building a configuration
    pub fn builder() -> FlowConfigBuilder {
        FlowConfigBuilder::new()
    }
}

/// Builder for flow configurations
///
/// The store is the one component without a sensible default; everything
/// else falls back to the unmanaged, headless setup (prompt policy,
/// deny-all presenter, no audit, no split rules).
pub struct FlowConfigBuilder {
    store: Option<Arc<dyn PermissionStore>>,
    policy: Option<Arc<dyn PolicyEngine>>,
    presenter: Option<Arc<dyn Presenter>>,
    audit: Option<Arc<dyn AuditSink>>,
    splits: SplitRules,
}

impl FlowConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            store: None,
            policy: None,
            presenter: None,
            audit: None,
            splits: SplitRules::new(),
        }
    }

    /// Set the permission store
    pub fn store(mut self, store: impl PermissionStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Set the device policy engine
    pub fn policy(mut self, policy: impl PolicyEngine + 'static) -> Self {
        self.policy = Some(Arc::new(policy));
        self
    }

    /// Set the presenter
    pub fn presenter(mut self, presenter: impl Presenter + 'static) -> Self {
        self.presenter = Some(Arc::new(presenter));
        self
    }

    /// Set the audit sink
    pub fn audit(mut self, audit: impl AuditSink + 'static) -> Self {
        self.audit = Some(Arc::new(audit));
        self
    }

    /// Set the split rule table
    pub fn splits(mut self, splits: SplitRules) -> Self {
        self.splits = splits;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<FlowConfig, ConfigError> {
        let store = self.store.ok_or(ConfigError::MissingStore)?;

        Ok(FlowConfig {
            store,
            policy: self
                .policy
                .unwrap_or_else(|| Arc::new(FixedPolicy::prompt())),
            presenter: self
                .presenter
                .unwrap_or_else(|| Arc::new(AutoPresenter::deny_all())),
            audit: self.audit.unwrap_or_else(|| Arc::new(NullAuditSink)),
            splits: Arc::new(self.splits),
        })
    }
}

impl Default for FlowConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Error type for configuration building
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No permission store configured")]
    MissingStore,

    #[error("Failed to initialize store: {0}")]
    StoreInit(String),

    #[error("Failed to initialize audit: {0}")]
    AuditInit(String),
}

// ============================================================================
// Preset Configurations
// ============================================================================

/// Preset configurations for common use cases
pub struct FlowPresets;

impl FlowPresets {
    /// Interactive mode for a real UI
    ///
    /// - File-backed grant storage under the platform config directory
    /// - Prompt policy (the user decides)
    /// - Channel presenter; prompts arrive on the returned receiver
    /// - File-based audit log under the platform data directory
    ///
    /// A prompt may be superseded before it is decided (reconciliation
    /// can resolve the pending group); the latest prompt wins.
    pub fn interactive(
        app_name: &str,
        requester: impl Into<String>,
        declared: Vec<PermissionGroup>,
        splits: SplitRules,
    ) -> Result<(FlowConfig, mpsc::Receiver<GroupPrompt>), ConfigError> {
        let store = FilePermissionStore::default_for_requester(app_name, requester, declared)
            .map_err(|e| ConfigError::StoreInit(e.to_string()))?;

        let audit = FileAuditSink::default_for_app(app_name)
            .map_err(|e| ConfigError::AuditInit(e.to_string()))?;

        let (presenter, prompts) = ChannelPresenter::pair(4);

        let config = FlowConfig::new(store, FixedPolicy::prompt(), presenter, audit, splits);
        Ok((config, prompts))
    }

    /// Prompt policy without a UI: every group the user would see is
    /// denied, without pinning anything for later requests.
    pub fn headless(store: impl PermissionStore + 'static) -> FlowConfig {
        FlowConfig::new(
            store,
            FixedPolicy::prompt(),
            AutoPresenter::deny_all(),
            NullAuditSink,
            SplitRules::new(),
        )
    }

    /// Managed mode: device policy decides everything, no UI
    ///
    /// Pair with [`DevicePolicy::AutoGrant`] or [`DevicePolicy::AutoDeny`];
    /// the presenter is never reached when policy covers every group.
    pub fn managed(store: impl PermissionStore + 'static, policy: DevicePolicy) -> FlowConfig {
        FlowConfig::new(
            store,
            FixedPolicy::new(policy),
            AutoPresenter::deny_all(),
            NullAuditSink,
            SplitRules::new(),
        )
    }

    /// Testing mode (in-memory audit, every prompt allowed)
    pub fn testing(store: impl PermissionStore + 'static) -> FlowConfig {
        FlowConfig::new(
            store,
            FixedPolicy::prompt(),
            AutoPresenter::allow_all(),
            MemoryAuditSink::new(),
            SplitRules::new(),
        )
    }

    /// Testing mode against a shared, pre-built store
    pub fn testing_shared(store: Arc<dyn PermissionStore>) -> FlowConfig {
        FlowConfig {
            store,
            policy: Arc::new(FixedPolicy::prompt()),
            presenter: Arc::new(AutoPresenter::allow_all()),
            audit: Arc::new(MemoryAuditSink::new()),
            splits: Arc::new(SplitRules::new()),
        }
    }
}
