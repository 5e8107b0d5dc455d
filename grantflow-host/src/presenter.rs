//! Presentation seam between the flow and whatever renders prompts
//!
//! The flow never renders anything itself. It pushes one `GroupPrompt`
//! at a time through the `Presenter` trait; the answer either comes back
//! immediately (automated environments, tests) or arrives later as a
//! decision event on the session channel.

use tokio::sync::mpsc;

/// What the user is asked about: one permission group, with enough
/// context to render "group X of Y".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPrompt {
    /// Group name
    pub group: String,

    /// Display label, falling back to the group name
    pub label: String,

    /// Number of groups the user will be asked about in this request
    pub total: usize,

    /// Zero-based position of this group among them
    pub index: usize,

    /// Whether the user had already decided on this group once before
    /// this request began
    pub user_set: bool,
}

/// A user's answer to a group prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptDecision {
    /// Grant the group's affected permissions
    Allowed,

    /// Deny them, but allow asking again later
    Denied,

    /// Deny them and never ask again
    DeniedDoNotAsk,
}

impl PromptDecision {
    /// Whether this answer grants the group
    pub const fn is_allowed(self) -> bool {
        matches!(self, PromptDecision::Allowed)
    }

    /// Whether this answer denies the group
    pub const fn is_denied(self) -> bool {
        !self.is_allowed()
    }

    /// Whether this answer pins the group against future prompts
    pub const fn pins_group(self) -> bool {
        matches!(self, PromptDecision::DeniedDoNotAsk)
    }
}

/// Receives prompts from the flow.
///
/// `present` must return quickly and never block on the user: a real UI
/// forwards the prompt somewhere and returns `None`, delivering the
/// decision later through the session; automated presenters answer on
/// the spot by returning `Some`.
pub trait Presenter: Send + Sync {
    /// Show one group prompt. `Some` answers it immediately.
    fn present(&self, prompt: &GroupPrompt) -> Option<PromptDecision>;
}

// ============================================================================
// Channel Presenter
// ============================================================================

/// Forwards prompts onto a channel for an out-of-task UI
///
/// Decisions travel back through the session's event channel, never
/// through this presenter.
#[derive(Debug, Clone)]
pub struct ChannelPresenter {
    tx: mpsc::Sender<GroupPrompt>,
}

impl ChannelPresenter {
    /// Wrap an existing sender
    pub fn new(tx: mpsc::Sender<GroupPrompt>) -> Self {
        Self { tx }
    }

    /// Create a presenter and the receiving end for the UI
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<GroupPrompt>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl Presenter for ChannelPresenter {
    fn present(&self, prompt: &GroupPrompt) -> Option<PromptDecision> {
        if let Err(err) = self.tx.try_send(prompt.clone()) {
            tracing::warn!(group = %prompt.group, error = %err, "prompt receiver unavailable");
        }
        None
    }
}

// ============================================================================
// Auto Presenter
// ============================================================================

/// Answers every prompt with a fixed decision, without user interaction
///
/// The deny-all variant is the safe default for headless embedders:
/// anything that cannot be shown is denied, and may be asked again in a
/// later request.
#[derive(Debug, Clone, Copy)]
pub struct AutoPresenter {
    decision: PromptDecision,
}

impl AutoPresenter {
    /// Allow every group
    pub fn allow_all() -> Self {
        Self {
            decision: PromptDecision::Allowed,
        }
    }

    /// Deny every group (without do-not-ask-again)
    pub fn deny_all() -> Self {
        Self {
            decision: PromptDecision::Denied,
        }
    }

    /// Answer every group with the given decision
    pub fn with_decision(decision: PromptDecision) -> Self {
        Self { decision }
    }
}

impl Presenter for AutoPresenter {
    fn present(&self, prompt: &GroupPrompt) -> Option<PromptDecision> {
        tracing::debug!(
            group = %prompt.group,
            decision = ?self.decision,
            "auto-answering prompt"
        );
        Some(self.decision)
    }
}

// ============================================================================
// Recording Presenter
// ============================================================================

/// Records every prompt it sees; answers with a canned decision if one
/// was configured, otherwise defers. For tests.
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    prompts: std::sync::Mutex<Vec<GroupPrompt>>,
    answer: Option<PromptDecision>,
}

impl RecordingPresenter {
    /// Record prompts and defer every answer
    pub fn new() -> Self {
        Self::default()
    }

    /// Record prompts and answer each with `decision`
    pub fn with_answer(decision: PromptDecision) -> Self {
        Self {
            prompts: std::sync::Mutex::new(Vec::new()),
            answer: Some(decision),
        }
    }

    /// Everything presented so far
    pub fn prompts(&self) -> Vec<GroupPrompt> {
        self.prompts.lock().unwrap().clone()
    }

    /// Number of prompts presented
    pub fn count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    /// The most recent prompt, if any
    pub fn last(&self) -> Option<GroupPrompt> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

impl Presenter for RecordingPresenter {
    fn present(&self, prompt: &GroupPrompt) -> Option<PromptDecision> {
        self.prompts.lock().unwrap().push(prompt.clone());
        self.answer
    }
}
