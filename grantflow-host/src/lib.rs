//! grantflow-host: runtime permission grant flows
//!
//! This crate drives the decision flow by which a host mediates an
//! application's request for runtime permissions: each requested
//! permission is expanded into everything it implies, device policy
//! resolves what it can, and the remaining permission groups are
//! presented one at a time until a grant/deny result can be handed back
//! to the requester. The flow survives suspension, replays with the
//! exact group order and count the user already saw, and reconciles
//! grants that happen behind its back.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          GrantSession                            │
//! │     one task per request; decisions, external grant changes,     │
//! │     requester removal and suspension arrive as events            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                           GrantFlow                              │
//! │     expansion → policy → group table → advance / resolve /       │
//! │     reconcile → final result                                     │
//! ├────────────────┬───────────────┬───────────────┬─────────────────┤
//! │     Store      │    Policy     │   Presenter   │     Audit       │
//! │                │               │               │                 │
//! │  - File        │  - Fixed      │  - Channel    │  - File (JSONL) │
//! │  - Memory      │               │  - Auto       │  - Memory       │
//! │                │               │  - Recording  │  - Null         │
//! │                │               │               │  - Composite    │
//! └────────────────┴───────────────┴───────────────┴─────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use grantflow_host::config::FlowPresets;
//! use grantflow_host::presenter::PromptDecision;
//! use grantflow_host::session::GrantSession;
//! use grantflow_host::{GrantRequest, Requester};
//!
//! let (config, mut prompts) =
//!     FlowPresets::interactive("myhost", "com.example.app", declared_groups, split_rules)?;
//!
//! let requester = Requester::new("com.example.app", 10_061, 29);
//! let request = GrantRequest::new(requester)
//!     .permission("contacts.read")
//!     .permission("camera.capture");
//!
//! let session = GrantSession::spawn(config, request, None);
//!
//! while let Some(prompt) = prompts.recv().await {
//!     // Render "Allow {prompt.label}? ({index+1} of {total})", then:
//!     session.decide(&prompt.group, PromptDecision::Allowed).await?;
//! }
//!
//! let result = session.wait().await?;
//! ```
//!
//! # Seams
//!
//! Four traits connect the flow to its host, each with ready-made
//! implementations:
//!
//! - [`store::PermissionStore`]: the platform's grant database.
//!   `FilePermissionStore` persists as JSON, `MemoryPermissionStore`
//!   lives for one session.
//! - [`policy::PolicyEngine`]: device policy (prompt, auto-grant,
//!   auto-deny). `FixedPolicy` reports a constant.
//! - [`presenter::Presenter`]: where prompts go. `ChannelPresenter`
//!   forwards to a UI task, `AutoPresenter` answers on the spot,
//!   `RecordingPresenter` captures for tests.
//! - [`audit::AuditSink`]: where request/denial/completion events go.

pub mod audit;
pub mod config;
pub mod expand;
pub mod flow;
pub mod policy;
pub mod presenter;
pub mod session;
pub mod store;

// Re-exports for convenience
pub use config::{ConfigError, FlowConfig, FlowConfigBuilder, FlowPresets};
pub use expand::{PermissionExpander, SplitRule, SplitRules};
pub use flow::{Decision, FlowSnapshot, GrantFlow, GrantStart, GroupState, GroupStateTable};
pub use policy::{DevicePolicy, FixedPolicy, PolicyEngine, PolicyResolver};
pub use presenter::{AutoPresenter, ChannelPresenter, GroupPrompt, Presenter, PromptDecision};
pub use session::{GrantSession, SessionError, SessionEvent};
pub use store::{
    FilePermissionStore, MemoryPermissionStore, PermissionGroup, PermissionStore, StoreError,
};

pub use grantflow_api::{
    ApiLevel, GrantRequest, GrantResult, GrantStatus, Requester, LEGACY_GROUP_LEVEL,
    MIN_RUNTIME_LEVEL,
};
