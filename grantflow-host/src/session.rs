//! Async session wrapper around one grant flow
//!
//! The flow itself is synchronous and must never be mutated from two
//! places at once. A session owns the flow on a dedicated task and
//! funnels everything that can touch it (user decisions, external
//! grant changes, requester removal, suspension) through one event
//! channel, so all mutation is serialized without locks.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use grantflow_api::{GrantRequest, GrantResult};

use crate::config::FlowConfig;
use crate::flow::engine::{GrantFlow, GrantStart};
use crate::flow::state::FlowSnapshot;
use crate::presenter::{Presenter, PromptDecision};
use crate::store::StoreError;

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Events a session accepts while its flow is pending
#[derive(Debug)]
pub enum SessionEvent {
    /// The user decided on a group
    Decision {
        group: String,
        decision: PromptDecision,
    },

    /// Some permissions of a uid changed outside the flow
    PermissionsChanged { uid: u32 },

    /// A requesting package was removed from the system
    RequesterRemoved { package: String },

    /// Suspend the session, replying with a snapshot to resume from
    Suspend { reply: oneshot::Sender<FlowSnapshot> },
}

/// Error type for session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session is no longer running")]
    Closed,

    #[error("Store failure aborted the request: {0}")]
    Store(#[from] StoreError),
}

/// Handle to a grant flow running on its own task
///
/// Dropping every handle (and every cloned [`sender`](GrantSession::sender))
/// abandons the request.
#[derive(Debug)]
pub struct GrantSession {
    events: mpsc::Sender<SessionEvent>,
    result: oneshot::Receiver<Result<GrantResult, StoreError>>,
}

impl GrantSession {
    /// Start a request on a new task.
    ///
    /// Pass the snapshot of a suspended session to resume it; the
    /// request must be the same one the snapshot was taken from,
    /// otherwise the restored decisions will not line up with the
    /// rebuilt groups.
    pub fn spawn(
        config: FlowConfig,
        request: GrantRequest,
        snapshot: Option<FlowSnapshot>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (result_tx, result_rx) = oneshot::channel();

        tokio::spawn(run(config, request, snapshot, event_rx, result_tx));

        Self {
            events: event_tx,
            result: result_rx,
        }
    }

    /// Deliver a user decision for a group
    pub async fn decide(
        &self,
        group: impl Into<String>,
        decision: PromptDecision,
    ) -> Result<(), SessionError> {
        self.send(SessionEvent::Decision {
            group: group.into(),
            decision,
        })
        .await
    }

    /// Report that the grant state of a uid changed out-of-band
    pub async fn permissions_changed(&self, uid: u32) -> Result<(), SessionError> {
        self.send(SessionEvent::PermissionsChanged { uid }).await
    }

    /// Report that a package was removed from the system
    pub async fn requester_removed(&self, package: impl Into<String>) -> Result<(), SessionError> {
        self.send(SessionEvent::RequesterRemoved {
            package: package.into(),
        })
        .await
    }

    /// Suspend the session and capture its decisions.
    ///
    /// The session ends without a result; resume it later by spawning a
    /// new session with the returned snapshot. Returns `Closed` when the
    /// flow already finished before the suspend event was seen; in that
    /// case [`wait`](GrantSession::wait) still delivers the result.
    pub async fn suspend(&self) -> Result<FlowSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionEvent::Suspend { reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Wait for the final result of the request
    pub async fn wait(self) -> Result<GrantResult, SessionError> {
        // Keep the event sender alive while waiting; dropping it would
        // abandon the very flow we are waiting on.
        let GrantSession { events, result } = self;
        let outcome = result.await;
        drop(events);

        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(SessionError::Store(err)),
            Err(_) => Err(SessionError::Closed),
        }
    }

    /// A sender for feeding events from elsewhere (package monitors,
    /// permission-change listeners)
    pub fn sender(&self) -> mpsc::Sender<SessionEvent> {
        self.events.clone()
    }

    async fn send(&self, event: SessionEvent) -> Result<(), SessionError> {
        self.events
            .send(event)
            .await
            .map_err(|_| SessionError::Closed)
    }
}

async fn run(
    config: FlowConfig,
    request: GrantRequest,
    snapshot: Option<FlowSnapshot>,
    mut events: mpsc::Receiver<SessionEvent>,
    result: oneshot::Sender<Result<GrantResult, StoreError>>,
) {
    let package = request.requester.package.clone();

    match drive(config, request, snapshot, &mut events).await {
        Ok(Some(outcome)) => {
            if result.send(Ok(outcome)).is_err() {
                tracing::debug!(package = %package, "request result discarded");
            }
        }
        Ok(None) => {
            // Suspended or abandoned without a caller; nothing to send.
        }
        Err(err) => {
            tracing::error!(package = %package, error = %err, "store failure aborted the request");
            let _ = result.send(Err(err));
        }
    }
}

/// Own the flow from begin to its end.
///
/// Returns `Ok(None)` when the session ends without a result (suspend,
/// or every handle dropped).
async fn drive(
    config: FlowConfig,
    request: GrantRequest,
    snapshot: Option<FlowSnapshot>,
    events: &mut mpsc::Receiver<SessionEvent>,
) -> Result<Option<GrantResult>, StoreError> {
    let resumed = snapshot.is_some();

    let mut flow = match GrantFlow::begin(&config, request, snapshot.as_ref())? {
        GrantStart::Finished(result) => return Ok(Some(result)),
        GrantStart::Pending(flow) => flow,
    };

    let presenter = config.presenter.as_ref();

    if pump(&mut flow, presenter)? {
        return Ok(Some(flow.finalize()?));
    }

    // A resumed session reconciles once before waiting: the grant state
    // may have moved while it was suspended.
    if resumed {
        let promoted = flow.reconcile()?;
        if promoted > 0 && pump(&mut flow, presenter)? {
            return Ok(Some(flow.finalize()?));
        }
    }

    loop {
        let event = match events.recv().await {
            Some(event) => event,
            None => {
                tracing::warn!(
                    package = %flow.request().requester.package,
                    "all session handles dropped; abandoning request"
                );
                flow.abandon();
                return Ok(None);
            }
        };

        match event {
            SessionEvent::Decision { group, decision } => {
                flow.resolve(&group, decision)?;
                if pump(&mut flow, presenter)? {
                    return Ok(Some(flow.finalize()?));
                }
            }

            SessionEvent::PermissionsChanged { uid } => {
                if uid != flow.request().requester.uid {
                    continue;
                }
                let promoted = flow.reconcile()?;
                if promoted > 0 && pump(&mut flow, presenter)? {
                    return Ok(Some(flow.finalize()?));
                }
            }

            SessionEvent::RequesterRemoved { package } => {
                if package == flow.request().requester.package {
                    return Ok(Some(flow.abandon()));
                }
            }

            SessionEvent::Suspend { reply } => {
                if reply.send(flow.snapshot()).is_err() {
                    tracing::warn!("suspend caller went away; session ends anyway");
                }
                return Ok(None);
            }
        }
    }
}

/// Present groups until one goes unanswered or none remain.
///
/// Returns whether the flow is exhausted and should finalize.
fn pump(flow: &mut GrantFlow, presenter: &dyn Presenter) -> Result<bool, StoreError> {
    loop {
        let prompt = match flow.advance() {
            Some(prompt) => prompt,
            None => return Ok(true),
        };

        match presenter.present(&prompt) {
            Some(decision) => flow.resolve(&prompt.group, decision)?,
            None => return Ok(false),
        }
    }
}
