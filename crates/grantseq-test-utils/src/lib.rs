//! Testing utilities for grantseq workspace
//!
//! Shared fixtures, a presenter that holds rationale prompts until the test
//! answers them, and timeout-guarded waits.

#![allow(missing_docs)]

use grantseq_core::simulator::{CapabilityProfile, SessionRecorder, SimulatedHost};
use grantseq_core::{
    CapabilityNode, GrantConfig, GrantOrchestrator, RationalePresenter, RationalePrompt, RationaleReply,
    SessionHandle, SessionRegistry, SessionStatus, UpdateCallback,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub use grantseq_core::simulator::{RationaleAnswer, RecordedEvent, UserDecision};

/// Upper bound for any wait in tests
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Orchestrator with its own registry, so tests never see each other's sessions
pub fn isolated_orchestrator(host: Arc<SimulatedHost>) -> GrantOrchestrator {
    isolated_orchestrator_with(host, GrantConfig::default())
}

pub fn isolated_orchestrator_with(host: Arc<SimulatedHost>, config: GrantConfig) -> GrantOrchestrator {
    GrantOrchestrator::with_config(host, config)
        .unwrap()
        .with_registry(Arc::new(SessionRegistry::new()))
}

pub fn automatic_host(profiles: impl IntoIterator<Item = CapabilityProfile>) -> Arc<SimulatedHost> {
    Arc::new(SimulatedHost::new(profiles))
}

pub fn manual_host(profiles: impl IntoIterator<Item = CapabilityProfile>) -> Arc<SimulatedHost> {
    Arc::new(SimulatedHost::new(profiles).manual())
}

/// Start a session reporting into a fresh recorder
pub fn start_recorded(
    orchestrator: &GrantOrchestrator,
    nodes: Vec<CapabilityNode>,
) -> (SessionHandle, Arc<SessionRecorder>) {
    let recorder = SessionRecorder::new();
    let handle = orchestrator
        .request(nodes, recorder.clone(), Some(recorder.clone() as Arc<dyn UpdateCallback>))
        .unwrap();
    (handle, recorder)
}

/// Wait for the session to end, panicking after [`TEST_TIMEOUT`]
pub async fn wait_finished(handle: &SessionHandle) -> SessionStatus {
    tokio::time::timeout(TEST_TIMEOUT, handle.wait())
        .await
        .expect("session did not finish in time")
}

/// Let spawned tasks run until nothing is left to do
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Presenter that keeps prompts pending until the test answers them
#[derive(Debug, Default)]
pub struct HeldPresenter {
    pending: Mutex<Vec<(RationalePrompt, RationaleReply)>>,
    shown: Mutex<Vec<RationalePrompt>>,
    arrived: Notify,
}

impl HeldPresenter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wait for the next prompt, panicking after [`TEST_TIMEOUT`]
    pub async fn next_prompt(&self) -> (RationalePrompt, RationaleReply) {
        tokio::time::timeout(TEST_TIMEOUT, async {
            loop {
                let notified = self.arrived.notified();
                if let Some(entry) = self.take() {
                    return entry;
                }
                notified.await;
            }
        })
        .await
        .expect("no rationale prompt shown in time")
    }

    /// Every prompt shown so far
    pub fn shown(&self) -> Vec<RationalePrompt> {
        self.shown.lock().clone()
    }

    fn take(&self) -> Option<(RationalePrompt, RationaleReply)> {
        let mut pending = self.pending.lock();
        (!pending.is_empty()).then(|| pending.remove(0))
    }
}

impl RationalePresenter for HeldPresenter {
    fn present(&self, prompt: RationalePrompt, reply: RationaleReply) {
        self.shown.lock().push(prompt.clone());
        self.pending.lock().push((prompt, reply));
        self.arrived.notify_one();
    }
}
