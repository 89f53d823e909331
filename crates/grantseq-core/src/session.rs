//! Session - one orchestration run over a submitted node tree
//!
//! A session walks its check queue one task at a time:
//!
//! ```text
//! Draining ──already granted──────────────────────────▶ Draining
//!    │ ──rationale advised──▶ AwaitingRationale ──no──▶ Draining
//!    │                               │ yes
//!    └──request────────────────▶ Suspended(code) ──result──▶ Draining
//! Draining ──queue empty──▶ Finished
//! ```
//!
//! The session lives in its own tokio task and owns all of its state. Host
//! results and rationale answers arrive as events on the task's channel, so
//! at most one step runs at a time for a given session.

use crate::code::{CodeAllocator, CorrelationCode};
use crate::config::GrantConfig;
use crate::host::{GrantRequest, GrantStatus, HostAdapter, RationalePresenter, RationalePrompt, RationaleReply};
use crate::node::{CapabilityNode, NodePath, Rationale};
use crate::registry::SessionRegistry;
use crate::results::GrantResults;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use ulid::Ulid;

/// Unique session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Ulid);

impl SessionId {
    /// Generate new session ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Overall outcome callback; exactly one method fires per finished session
pub trait OutcomeCallback: Send + Sync {
    /// Every critical capability ended up granted
    fn on_success(&self);
    /// At least one critical capability was not granted
    fn on_fail(&self);
}

/// Progress callback
pub trait UpdateCallback: Send + Sync {
    /// Fired at every drain step, even when nothing changed
    fn on_update(&self, results: &GrantResults);
    /// Fired once when the queue is empty, before the outcome callback
    fn on_final_result(&self, results: &GrantResults);
}

/// Externally observable session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Still walking the tree or waiting on the host
    Running,
    /// Finished with every critical capability granted
    Succeeded,
    /// Finished with a critical capability missing
    Failed,
    /// Abandoned through `cancel`
    Cancelled,
}

impl SessionStatus {
    /// Check if the session is over
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Messages consumed by the session task
#[derive(Debug)]
pub(crate) enum SessionEvent {
    /// User answered a rationale prompt
    RationaleAnswered { prompt: u64, proceed: bool },
    /// Host delivered the result for an issued code
    Delivered {
        code: CorrelationCode,
        capabilities: Vec<String>,
        statuses: Vec<GrantStatus>,
    },
    /// Abandon the session
    Cancel,
}

/// Client handle to a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    events: mpsc::UnboundedSender<SessionEvent>,
    cancelled: Arc<AtomicBool>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    /// Session ID
    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Abandon the session without firing any further callback
    ///
    /// Idempotent. Not a general-purpose operation: the host keeps routing
    /// results to the session's channel, and a request already issued stays
    /// outstanding on the host side.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            tracing::debug!(session = %self.id, "cancel requested");
            // session may have finished already
            let _ = self.events.send(SessionEvent::Cancel);
        }
    }

    /// Check if `cancel` was called
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Current status
    #[inline]
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Wait until the session finishes or is cancelled
    pub async fn wait(&self) -> SessionStatus {
        let mut status = self.status.clone();
        loop {
            let current = *status.borrow_and_update();
            if current.is_terminal() {
                return current;
            }
            if status.changed().await.is_err() {
                return *status.borrow();
            }
        }
    }
}

/// Everything a session needs, assembled by the orchestrator
pub(crate) struct SessionSetup {
    pub(crate) id: SessionId,
    pub(crate) roots: Vec<CapabilityNode>,
    pub(crate) host: Arc<dyn HostAdapter>,
    pub(crate) presenter: Option<Arc<dyn RationalePresenter>>,
    pub(crate) allocator: Arc<CodeAllocator>,
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) config: GrantConfig,
    pub(crate) outcome: Arc<dyn OutcomeCallback>,
    pub(crate) updates: Option<Arc<dyn UpdateCallback>>,
    pub(crate) events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionSetup {
    /// Spawn the session task on `runtime` and register its handle
    pub(crate) fn spawn(
        self,
        runtime: &tokio::runtime::Handle,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> SessionHandle {
        let (status_tx, status_rx) = watch::channel(SessionStatus::Running);
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = SessionHandle {
            id: self.id,
            events: self.events.clone(),
            cancelled: Arc::clone(&cancelled),
            status: status_rx,
        };
        self.registry.register(handle.clone());

        let pending = (0..self.roots.len())
            .map(|i| CheckTask {
                path: NodePath::root(i),
                inherited: None,
            })
            .collect();

        let session = Session {
            id: self.id,
            roots: self.roots,
            pending,
            correlation: HashMap::new(),
            results: GrantResults::new(),
            state: SessionState::Draining,
            host: self.host,
            presenter: self.presenter,
            allocator: self.allocator,
            registry: self.registry,
            config: self.config,
            outcome: Some(self.outcome),
            updates: self.updates,
            events: self.events,
            cancelled,
            status: status_tx,
            next_prompt: 0,
            drain_steps: 0,
        };
        runtime.spawn(session.run(events));
        handle
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionState {
    Draining,
    AwaitingRationale { prompt: u64, path: NodePath },
    Suspended(CorrelationCode),
    Finished,
    Cancelled,
}

/// Check one node; `inherited` is the rationale of the nearest enclosing
/// group that carries explicit text
#[derive(Debug, Clone)]
struct CheckTask {
    path: NodePath,
    inherited: Option<Rationale>,
}

enum Flow {
    Continue,
    Suspend,
}

struct Session {
    id: SessionId,
    roots: Vec<CapabilityNode>,
    pending: VecDeque<CheckTask>,
    correlation: HashMap<CorrelationCode, NodePath>,
    results: GrantResults,
    state: SessionState,
    host: Arc<dyn HostAdapter>,
    presenter: Option<Arc<dyn RationalePresenter>>,
    allocator: Arc<CodeAllocator>,
    registry: Arc<SessionRegistry>,
    config: GrantConfig,
    outcome: Option<Arc<dyn OutcomeCallback>>,
    updates: Option<Arc<dyn UpdateCallback>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    cancelled: Arc<AtomicBool>,
    status: watch::Sender<SessionStatus>,
    next_prompt: u64,
    drain_steps: u64,
}

impl Session {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        tracing::info!(session = %self.id, roots = self.roots.len(), "session started");
        self.drain().await;

        while !matches!(self.state, SessionState::Finished | SessionState::Cancelled) {
            let Some(event) = events.recv().await else {
                break;
            };
            if self.is_cancelled() {
                self.teardown_cancelled();
                break;
            }
            match event {
                SessionEvent::RationaleAnswered { prompt, proceed } => self.on_rationale(prompt, proceed).await,
                SessionEvent::Delivered {
                    code,
                    capabilities,
                    statuses,
                } => self.on_result(code, &capabilities, &statuses).await,
                SessionEvent::Cancel => {
                    self.teardown_cancelled();
                    break;
                }
            }
        }
    }

    #[inline]
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// One iteration per drain step: report progress, then run at most one
    /// task. Stops at the first suspension.
    async fn drain(&mut self) {
        loop {
            self.drain_steps += 1;
            self.state = SessionState::Draining;
            if self.is_cancelled() {
                return;
            }
            if let Some(updates) = &self.updates {
                updates.on_update(&self.results);
            }

            let Some(task) = self.pending.pop_front() else {
                self.finish();
                return;
            };
            match self.check(task).await {
                Flow::Continue => continue,
                Flow::Suspend => return,
            }
        }
    }

    async fn check(&mut self, task: CheckTask) -> Flow {
        let Some(node) = CapabilityNode::at(&self.roots, &task.path) else {
            tracing::error!(session = %self.id, path = ?task.path, "check task points outside the tree");
            return Flow::Continue;
        };

        let CapabilityNode::Group(group) = node else {
            return self.check_leaf(task).await;
        };

        let inherited = match node.explicit_rationale() {
            (None, None) => task.inherited,
            _ => Some(node.flatten_label(self.host.as_ref())),
        };
        for i in (0..group.children.len()).rev() {
            self.pending.push_front(CheckTask {
                path: task.path.child(i),
                inherited: inherited.clone(),
            });
        }
        tracing::debug!(session = %self.id, group = %node, "expanded group into per-capability checks");
        Flow::Continue
    }

    async fn check_leaf(&mut self, task: CheckTask) -> Flow {
        let Some(CapabilityNode::Leaf(leaf)) = CapabilityNode::at(&self.roots, &task.path) else {
            return Flow::Continue;
        };
        let name = leaf.name.clone();
        let may_prompt = leaf.show_rationale && self.config.honor_rationale_advice;

        let granted = self.host.is_granted(&name).await;
        if let Some(CapabilityNode::Leaf(leaf)) = CapabilityNode::at_mut(&mut self.roots, &task.path) {
            leaf.set_granted(granted);
        }
        if granted {
            tracing::debug!(session = %self.id, capability = %name, "already granted");
            self.results.update(&name, true);
            return Flow::Continue;
        }
        tracing::debug!(session = %self.id, capability = %name, "not granted yet");

        if may_prompt && self.host.should_show_rationale(&name).await {
            let rationale = self.leaf_rationale(&task);
            if !rationale.is_empty() {
                if self.is_cancelled() {
                    return Flow::Suspend;
                }
                self.present(task.path, rationale, vec![name]);
                return Flow::Suspend;
            }
        }
        tracing::debug!(session = %self.id, capability = %name, "no rationale needed, requesting directly");
        self.issue(task.path).await;
        Flow::Suspend
    }

    /// Leaf text first, then the shared group text, then host metadata
    fn leaf_rationale(&self, task: &CheckTask) -> Rationale {
        let Some(node) = CapabilityNode::at(&self.roots, &task.path) else {
            return Rationale::default();
        };
        match task.inherited.clone() {
            Some(Rationale { title, message }) => {
                let (own_title, own_message) = node.explicit_rationale();
                Rationale {
                    title: own_title.map_or(title, str::to_owned),
                    message: own_message.map_or(message, str::to_owned),
                }
            }
            None => node.flatten_label(self.host.as_ref()),
        }
    }

    fn present(&mut self, path: NodePath, rationale: Rationale, capabilities: Vec<String>) {
        self.next_prompt += 1;
        let prompt = self.next_prompt;
        tracing::debug!(session = %self.id, ?capabilities, title = %rationale.title, "showing rationale");
        self.state = SessionState::AwaitingRationale { prompt, path };

        let request = RationalePrompt {
            session: self.id,
            title: rationale.title,
            message: rationale.message,
            capabilities,
        };
        let reply = RationaleReply::new(prompt, self.events.clone());
        match &self.presenter {
            Some(presenter) => presenter.present(request, reply),
            None => self.host.present_rationale(request, reply),
        }
    }

    async fn issue(&mut self, path: NodePath) {
        if self.is_cancelled() {
            tracing::debug!(session = %self.id, "cancelled before the request went out");
            return;
        }
        let Some(node) = CapabilityNode::at(&self.roots, &path) else {
            return;
        };
        let capabilities: Vec<String> = node.capability_names().into_iter().map(str::to_owned).collect();
        debug_assert!(
            !self.correlation.values().any(|p| *p == path),
            "node already has a request in flight"
        );

        let code = self.allocator.next_within(self.config.code_ceiling);
        tracing::debug!(session = %self.id, %code, ?capabilities, "requesting");
        self.correlation.insert(code, path);
        self.state = SessionState::Suspended(code);
        self.host
            .issue_request(GrantRequest {
                session: self.id,
                code,
                capabilities,
            })
            .await;
    }

    async fn on_rationale(&mut self, prompt: u64, proceed: bool) {
        let path = match &self.state {
            SessionState::AwaitingRationale { prompt: expected, path } if *expected == prompt => path.clone(),
            state => {
                tracing::warn!(session = %self.id, prompt, ?state, "stale rationale answer ignored");
                return;
            }
        };

        if proceed {
            self.issue(path).await;
            return;
        }

        tracing::debug!(session = %self.id, path = ?path, "rationale declined, capability left ungranted");
        if self.config.record_declined {
            if let Some(node) = CapabilityNode::at(&self.roots, &path) {
                for name in node.capability_names() {
                    self.results.update(name, false);
                }
            }
        }
        self.drain().await;
    }

    async fn on_result(&mut self, code: CorrelationCode, capabilities: &[String], statuses: &[GrantStatus]) {
        let Some(path) = self.correlation.remove(&code) else {
            tracing::error!(session = %self.id, %code, "result for unknown correlation code dropped");
            return;
        };
        if self.state != SessionState::Suspended(code) {
            tracing::warn!(session = %self.id, %code, state = ?self.state, "result arrived outside its suspension");
        }

        let session = self.id;
        let results = &mut self.results;
        if let Some(node) = CapabilityNode::at_mut(&mut self.roots, &path) {
            node.apply_grants(capabilities, statuses, &mut |name: &str, granted: bool| {
                tracing::info!(%session, capability = %name, granted, "grant result");
                results.update(name, granted);
            });
        }
        self.drain().await;
    }

    fn finish(&mut self) {
        self.state = SessionState::Finished;
        self.host.deregister_result_channel(self.id);

        if let Some(updates) = self.updates.take() {
            if !self.is_cancelled() {
                updates.on_final_result(&self.results);
            }
        }

        let satisfied = self.roots.iter().all(CapabilityNode::is_satisfied);
        if let Some(outcome) = self.outcome.take() {
            if !self.is_cancelled() {
                if satisfied {
                    tracing::info!(session = %self.id, results = %self.results, steps = self.drain_steps, "succeeded");
                    outcome.on_success();
                } else {
                    tracing::info!(session = %self.id, results = %self.results, steps = self.drain_steps, "failed");
                    outcome.on_fail();
                }
            }
        }

        self.registry.unregister(self.id);
        let _ = self.status.send(final_status(satisfied, self.is_cancelled()));
    }

    fn teardown_cancelled(&mut self) {
        tracing::warn!(
            session = %self.id,
            in_flight = self.correlation.len(),
            "session cancelled; outstanding host requests are abandoned"
        );
        self.outcome = None;
        self.updates = None;
        self.pending.clear();
        self.correlation.clear();
        self.results.clear();
        self.roots.clear();
        self.state = SessionState::Cancelled;
        self.registry.unregister(self.id);
        let _ = self.status.send(SessionStatus::Cancelled);
    }
}

/// Status published when the walk completes
fn final_status(satisfied: bool, cancelled: bool) -> SessionStatus {
    match (cancelled, satisfied) {
        (true, _) => SessionStatus::Cancelled,
        (false, true) => SessionStatus::Succeeded,
        (false, false) => SessionStatus::Failed,
    }
}
