//! Simulated host and scenario runner
//!
//! [`SimulatedHost`] plays both the platform and the user: each capability
//! has a [`CapabilityProfile`] saying whether it is already granted, whether
//! a rationale is advised, how the user answers the rationale and what they
//! decide on the system request. Every call the engine makes is recorded.
//!
//! [`Scenario`] bundles profiles, configuration and the request tree into a
//! TOML document that [`run_scenario`] drives end to end.

use crate::code::CorrelationCode;
use crate::config::GrantConfig;
use crate::error::{ConfigError, GrantError, HostError};
use crate::host::{
    GrantRequest, GrantStatus, HostAdapter, LabelLookup, RationalePresenter, RationalePrompt, RationaleReply, ResultRouter,
    ResultSink,
};
use crate::node::{group, leaf, leaf_with_rationale, CapabilityNode};
use crate::orchestrator::GrantOrchestrator;
use crate::registry::SessionRegistry;
use crate::results::GrantResults;
use crate::session::{OutcomeCallback, SessionId, SessionStatus, UpdateCallback};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// What the simulated user does with a system grant dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserDecision {
    /// Allow
    #[default]
    Grant,
    /// Deny
    Deny,
    /// Walk away; no result is ever delivered
    Ignore,
}

/// What the simulated user does with a rationale prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RationaleAnswer {
    /// Continue to the request
    #[default]
    Proceed,
    /// Explicitly decline
    Decline,
    /// Close the prompt without answering
    Dismiss,
}

/// Simulated state and behavior of one capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityProfile {
    /// Capability identifier
    pub name: String,
    /// Already granted before any request
    #[serde(default)]
    pub granted: bool,
    /// Host advises showing a rationale
    #[serde(default)]
    pub advise_rationale: bool,
    /// Human-readable label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Answer to the system request
    #[serde(default)]
    pub decision: UserDecision,
    /// Answer to the rationale prompt
    #[serde(default)]
    pub rationale_answer: RationaleAnswer,
}

impl CapabilityProfile {
    /// Ungranted capability the user will grant
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            granted: false,
            advise_rationale: false,
            label: None,
            description: None,
            decision: UserDecision::Grant,
            rationale_answer: RationaleAnswer::Proceed,
        }
    }

    /// Already granted
    #[inline]
    #[must_use]
    pub fn granted(mut self) -> Self {
        self.granted = true;
        self
    }

    /// Host advises a rationale
    #[inline]
    #[must_use]
    pub fn advise_rationale(mut self) -> Self {
        self.advise_rationale = true;
        self
    }

    /// With label and description metadata
    #[inline]
    #[must_use]
    pub fn labelled(mut self, label: impl Into<String>, description: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self.description = Some(description.into());
        self
    }

    /// With system dialog decision
    #[inline]
    #[must_use]
    pub fn decision(mut self, decision: UserDecision) -> Self {
        self.decision = decision;
        self
    }

    /// With rationale answer
    #[inline]
    #[must_use]
    pub fn rationale_answer(mut self, answer: RationaleAnswer) -> Self {
        self.rationale_answer = answer;
        self
    }
}

/// How issued requests are answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Answer from the profiles as soon as the request is issued
    #[default]
    Automatic,
    /// Queue requests; the caller answers them
    Manual,
}

/// One recorded host interaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum HostCall {
    /// `register_result_channel`
    Register { session: SessionId },
    /// `deregister_result_channel`
    Deregister { session: SessionId },
    /// `is_granted`
    IsGranted { capability: String },
    /// `should_show_rationale`
    ShouldShowRationale { capability: String },
    /// `present_rationale`
    Prompt(RationalePrompt),
    /// `issue_request`
    Issue(GrantRequest),
}

/// In-process host driven by capability profiles
#[derive(Debug)]
pub struct SimulatedHost {
    profiles: RwLock<HashMap<String, CapabilityProfile>>,
    router: ResultRouter,
    mode: DeliveryMode,
    supports_results: bool,
    calls: Mutex<Vec<HostCall>>,
    issued_tx: mpsc::UnboundedSender<GrantRequest>,
    issued_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<GrantRequest>>,
    settings_opened: AtomicUsize,
}

impl SimulatedHost {
    /// Host answering automatically from `profiles`
    #[must_use]
    pub fn new(profiles: impl IntoIterator<Item = CapabilityProfile>) -> Self {
        let (issued_tx, issued_rx) = mpsc::unbounded_channel();
        Self {
            profiles: RwLock::new(profiles.into_iter().map(|p| (p.name.clone(), p)).collect()),
            router: ResultRouter::new(),
            mode: DeliveryMode::Automatic,
            supports_results: true,
            calls: Mutex::new(Vec::new()),
            issued_tx,
            issued_rx: tokio::sync::Mutex::new(issued_rx),
            settings_opened: AtomicUsize::new(0),
        }
    }

    /// Queue issued requests instead of answering them
    #[inline]
    #[must_use]
    pub fn manual(mut self) -> Self {
        self.mode = DeliveryMode::Manual;
        self
    }

    /// Refuse result-channel registration
    #[inline]
    #[must_use]
    pub fn without_result_channel(mut self) -> Self {
        self.supports_results = false;
        self
    }

    /// Replace or add a profile
    pub fn set_profile(&self, profile: CapabilityProfile) {
        self.profiles.write().insert(profile.name.clone(), profile);
    }

    /// Current profile of a capability
    #[must_use]
    pub fn profile(&self, capability: &str) -> CapabilityProfile {
        self.profiles
            .read()
            .get(capability)
            .cloned()
            .unwrap_or_else(|| CapabilityProfile::new(capability))
    }

    /// Every call so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().clone()
    }

    /// Requests issued so far
    #[must_use]
    pub fn issued(&self) -> Vec<GrantRequest> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                HostCall::Issue(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    /// Rationale prompts shown so far
    #[must_use]
    pub fn prompts(&self) -> Vec<RationalePrompt> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                HostCall::Prompt(prompt) => Some(prompt.clone()),
                _ => None,
            })
            .collect()
    }

    /// Capabilities whose grant state was queried, in order
    #[must_use]
    pub fn checked(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                HostCall::IsGranted { capability } => Some(capability.clone()),
                _ => None,
            })
            .collect()
    }

    /// How often the settings screen was opened
    #[inline]
    #[must_use]
    pub fn settings_opened(&self) -> usize {
        self.settings_opened.load(Ordering::Relaxed)
    }

    /// Number of sessions currently registered for results
    #[inline]
    #[must_use]
    pub fn registered_sessions(&self) -> usize {
        self.router.len()
    }

    /// Next queued request in manual mode
    pub async fn next_request(&self) -> Option<GrantRequest> {
        self.issued_rx.lock().await.recv().await
    }

    /// Answer `request` from the profiles; returns sessions reached
    pub fn respond(&self, request: &GrantRequest) -> usize {
        let mut capabilities = Vec::new();
        let mut statuses = Vec::new();
        {
            let mut profiles = self.profiles.write();
            for name in &request.capabilities {
                let profile = profiles
                    .entry(name.clone())
                    .or_insert_with(|| CapabilityProfile::new(name.clone()));
                let granted = match profile.decision {
                    UserDecision::Grant => true,
                    UserDecision::Deny => false,
                    UserDecision::Ignore => continue,
                };
                profile.granted = granted;
                capabilities.push(name.clone());
                statuses.push(GrantStatus::from(granted));
            }
        }

        if capabilities.is_empty() {
            tracing::debug!(code = %request.code, "user ignored the request");
            return 0;
        }
        self.deliver(request.code, &capabilities, &statuses)
    }

    /// Deliver an arbitrary result; returns sessions reached
    pub fn deliver(&self, code: CorrelationCode, capabilities: &[String], statuses: &[GrantStatus]) -> usize {
        self.router.deliver(code, capabilities, statuses)
    }

    fn record(&self, call: HostCall) {
        self.calls.lock().push(call);
    }
}

impl LabelLookup for SimulatedHost {
    fn lookup_label(&self, capability: &str) -> Result<String, HostError> {
        self.profiles
            .read()
            .get(capability)
            .and_then(|p| p.label.clone())
            .ok_or_else(|| HostError::LookupFailed {
                capability: capability.to_string(),
            })
    }

    fn lookup_description(&self, capability: &str) -> Result<String, HostError> {
        self.profiles
            .read()
            .get(capability)
            .and_then(|p| p.description.clone())
            .ok_or_else(|| HostError::LookupFailed {
                capability: capability.to_string(),
            })
    }
}

#[async_trait]
impl HostAdapter for SimulatedHost {
    async fn is_granted(&self, capability: &str) -> bool {
        self.record(HostCall::IsGranted {
            capability: capability.to_string(),
        });
        self.profile(capability).granted
    }

    async fn should_show_rationale(&self, capability: &str) -> bool {
        self.record(HostCall::ShouldShowRationale {
            capability: capability.to_string(),
        });
        self.profile(capability).advise_rationale
    }

    async fn issue_request(&self, request: GrantRequest) {
        self.record(HostCall::Issue(request.clone()));
        self.router.track(&request);
        match self.mode {
            DeliveryMode::Automatic => {
                self.respond(&request);
            }
            DeliveryMode::Manual => {
                let _ = self.issued_tx.send(request);
            }
        }
    }

    fn register_result_channel(&self, sink: ResultSink) -> Result<(), HostError> {
        if !self.supports_results {
            return Err(HostError::ResultChannelUnsupported);
        }
        self.record(HostCall::Register { session: sink.session() });
        self.router.register(sink);
        Ok(())
    }

    fn deregister_result_channel(&self, session: SessionId) -> bool {
        self.record(HostCall::Deregister { session });
        self.router.deregister(session)
    }

    fn present_rationale(&self, prompt: RationalePrompt, reply: RationaleReply) {
        let answer = prompt
            .capabilities
            .first()
            .map(|name| self.profile(name).rationale_answer)
            .unwrap_or_default();
        self.record(HostCall::Prompt(prompt));
        match answer {
            RationaleAnswer::Proceed => reply.proceed(),
            RationaleAnswer::Decline => reply.decline(),
            RationaleAnswer::Dismiss => drop(reply),
        }
    }

    async fn open_system_settings(&self) -> Result<(), HostError> {
        self.settings_opened.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// One callback invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "results", rename_all = "snake_case")]
pub enum RecordedEvent {
    /// `on_update`
    Update(GrantResults),
    /// `on_final_result`
    Final(GrantResults),
    /// `on_success`
    Success,
    /// `on_fail`
    Fail,
}

/// Callback implementation that records every invocation
#[derive(Debug, Default)]
pub struct SessionRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl SessionRecorder {
    /// Create new recorder
    #[inline]
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every invocation so far
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Number of `on_update` calls
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, RecordedEvent::Update(_)))
            .count()
    }

    /// Map passed to `on_final_result`
    #[must_use]
    pub fn final_results(&self) -> Option<GrantResults> {
        self.events.lock().iter().find_map(|e| match e {
            RecordedEvent::Final(results) => Some(results.clone()),
            _ => None,
        })
    }

    /// Map passed to the most recent `on_update`
    #[must_use]
    pub fn last_update(&self) -> Option<GrantResults> {
        self.events.lock().iter().rev().find_map(|e| match e {
            RecordedEvent::Update(results) => Some(results.clone()),
            _ => None,
        })
    }

    /// `Some(true)` after `on_success`, `Some(false)` after `on_fail`
    #[must_use]
    pub fn outcome(&self) -> Option<bool> {
        self.events.lock().iter().find_map(|e| match e {
            RecordedEvent::Success => Some(true),
            RecordedEvent::Fail => Some(false),
            _ => None,
        })
    }

    fn push(&self, event: RecordedEvent) {
        self.events.lock().push(event);
    }
}

impl OutcomeCallback for SessionRecorder {
    fn on_success(&self) {
        self.push(RecordedEvent::Success);
    }

    fn on_fail(&self) {
        self.push(RecordedEvent::Fail);
    }
}

impl UpdateCallback for SessionRecorder {
    fn on_update(&self, results: &GrantResults) {
        self.push(RecordedEvent::Update(results.snapshot()));
    }

    fn on_final_result(&self, results: &GrantResults) {
        self.push(RecordedEvent::Final(results.snapshot()));
    }
}

const fn default_settle_ms() -> u64 {
    1_000
}

/// Capability profiles, configuration and request tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Engine configuration
    #[serde(default)]
    pub config: GrantConfig,
    /// Give up waiting after this many milliseconds
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Simulated capabilities
    #[serde(default, rename = "capability")]
    pub capabilities: Vec<CapabilityProfile>,
    /// Root nodes submitted in one request
    #[serde(default, rename = "request")]
    pub requests: Vec<CapabilityNode>,
}

impl Scenario {
    /// Parse from TOML text
    ///
    /// # Errors
    /// `ConfigError::Parse` on malformed TOML or an invalid config section
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let scenario: Self = toml::from_str(text)?;
        scenario.config.validate()?;
        Ok(scenario)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io` if unreadable, otherwise as [`Self::from_toml_str`]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// A critical contacts request with its own rationale, followed by two
    /// optional groups sharing rationales
    #[must_use]
    pub fn demo() -> Self {
        Self {
            config: GrantConfig::default(),
            settle_ms: default_settle_ms(),
            capabilities: vec![
                CapabilityProfile::new("contacts.read")
                    .labelled("Read contacts", "Read the contacts stored on this device")
                    .advise_rationale(),
                CapabilityProfile::new("sms.read").granted(),
                CapabilityProfile::new("calendar.read").decision(UserDecision::Deny),
                CapabilityProfile::new("phone.call")
                    .advise_rationale()
                    .rationale_answer(RationaleAnswer::Decline),
                CapabilityProfile::new("sensors.body"),
            ],
            requests: vec![
                leaf_with_rationale(
                    "contacts.read",
                    true,
                    "Capability required: Read contacts",
                    "Contacts are needed to find your friends",
                ),
                group(
                    "Messages and calendar",
                    "Used to suggest meeting times",
                    [leaf("sms.read", false), leaf("calendar.read", false), leaf("contacts.read", false)],
                ),
                group(
                    "Calls and body sensors",
                    "Used for emergency calls",
                    [leaf("phone.call", false), leaf("sensors.body", false), leaf("sms.read", false)],
                ),
            ],
        }
    }
}

/// Outcome of one scenario run
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    /// Final session status
    pub status: SessionStatus,
    /// Last result map reported
    pub results: GrantResults,
    /// Number of `on_update` calls
    pub updates: usize,
    /// Requests the host received
    pub requests: Vec<GrantRequest>,
    /// Rationale prompts the host showed
    pub prompts: Vec<RationalePrompt>,
    /// Session did not finish within the settle time and was cancelled
    pub stalled: bool,
}

impl ScenarioReport {
    /// Check if every critical capability was granted
    #[inline]
    #[must_use]
    pub fn passed(&self) -> bool {
        self.status == SessionStatus::Succeeded
    }

    /// Generate text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();

        report.push_str("=== grantseq Scenario Report ===\n\n");
        report.push_str(&format!("Status: {:?}\n", self.status));
        report.push_str(&format!("Stalled: {}\n", self.stalled));
        report.push_str(&format!("Updates: {}\n", self.updates));
        report.push_str(&format!("Requests Issued: {}\n", self.requests.len()));
        report.push_str(&format!("Rationales Shown: {}\n", self.prompts.len()));
        report.push_str("\nResults:\n");
        for (name, granted) in self.results.iter() {
            let mark = if granted { "granted" } else { "denied" };
            report.push_str(&format!("  {name}: {mark}\n"));
        }
        for prompt in &self.prompts {
            report.push_str(&format!("\nRationale \"{}\": {}\n", prompt.title, prompt.message));
        }

        report
    }
}

/// Run `scenario` against a fresh [`SimulatedHost`]
///
/// # Errors
/// Whatever `request` reports for the scenario's tree or configuration
pub async fn run_scenario(scenario: Scenario) -> Result<ScenarioReport, GrantError> {
    run_scenario_with_presenter(scenario, None).await
}

/// As [`run_scenario`], showing rationales through `presenter` instead of
/// answering them from the profiles
///
/// # Errors
/// Whatever `request` reports for the scenario's tree or configuration
pub async fn run_scenario_with_presenter(
    scenario: Scenario,
    presenter: Option<Arc<dyn RationalePresenter>>,
) -> Result<ScenarioReport, GrantError> {
    let host = Arc::new(SimulatedHost::new(scenario.capabilities));
    let mut orchestrator =
        GrantOrchestrator::with_config(Arc::clone(&host) as Arc<dyn HostAdapter>, scenario.config)?
            .with_registry(Arc::new(SessionRegistry::new()));
    if let Some(presenter) = presenter {
        orchestrator = orchestrator.with_presenter(presenter);
    }

    let recorder = SessionRecorder::new();
    let handle = orchestrator.request(scenario.requests, recorder.clone(), Some(recorder.clone() as Arc<dyn UpdateCallback>))?;

    let (status, stalled) = match tokio::time::timeout(Duration::from_millis(scenario.settle_ms), handle.wait()).await {
        Ok(status) => (status, false),
        Err(_) => {
            tracing::warn!(session = %handle.id(), "scenario did not settle, cancelling");
            handle.cancel();
            (handle.wait().await, true)
        }
    };

    Ok(ScenarioReport {
        status,
        results: recorder
            .final_results()
            .or_else(|| recorder.last_update())
            .unwrap_or_default(),
        updates: recorder.update_count(),
        requests: host.issued(),
        prompts: host.prompts(),
        stalled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_builder() {
        let profile = CapabilityProfile::new("a")
            .granted()
            .advise_rationale()
            .decision(UserDecision::Deny)
            .rationale_answer(RationaleAnswer::Dismiss);
        assert!(profile.granted && profile.advise_rationale);
        assert_eq!(profile.decision, UserDecision::Deny);
        assert_eq!(profile.rationale_answer, RationaleAnswer::Dismiss);
    }

    #[test]
    fn unknown_capability_gets_default_profile_and_failed_lookup() {
        let host = SimulatedHost::new([]);
        assert_eq!(host.profile("x"), CapabilityProfile::new("x"));
        assert!(host.lookup_label("x").is_err());
    }

    #[test]
    fn demo_scenario_is_valid() {
        let scenario = Scenario::demo();
        assert_eq!(scenario.requests.len(), 3);
        assert!(scenario.requests.iter().all(|n| n.validate().is_ok()));
    }

    #[test]
    fn scenario_parses_from_toml() {
        let scenario = Scenario::from_toml_str(
            r#"
            settle_ms = 50

            [config]
            record_declined = true

            [[capability]]
            name = "camera"
            advise_rationale = true
            decision = "deny"

            [[request]]
            kind = "leaf"
            name = "camera"
            title = "Camera"
            message = "Scan documents"
            "#,
        )
        .unwrap();

        assert_eq!(scenario.settle_ms, 50);
        assert!(scenario.config.record_declined);
        assert_eq!(scenario.capabilities[0].decision, UserDecision::Deny);
        assert_eq!(scenario.requests, vec![leaf_with_rationale("camera", true, "Camera", "Scan documents")]);
    }

    #[test]
    fn scenario_rejects_bad_config() {
        assert!(Scenario::from_toml_str("[config]\ncode_ceiling = 0").is_err());
    }

    #[test]
    fn report_text_lists_results() {
        let report = ScenarioReport {
            status: SessionStatus::Failed,
            results: [("a", true), ("b", false)].into_iter().collect(),
            updates: 3,
            requests: vec![],
            prompts: vec![],
            stalled: false,
        };
        let text = report.generate_text();
        assert!(text.contains("a: granted"));
        assert!(text.contains("b: denied"));
        assert!(!report.passed());
    }
}
