//! Grant orchestrator
//!
//! The client-facing entry point. Owns the host adapter and the pieces shared
//! across sessions (code allocator, registry), and starts one session per
//! `request` call.

use crate::code::CodeAllocator;
use crate::config::GrantConfig;
use crate::error::{GrantError, HostError};
use crate::host::{HostAdapter, RationalePresenter, ResultSink};
use crate::node::CapabilityNode;
use crate::registry::SessionRegistry;
use crate::session::{OutcomeCallback, SessionHandle, SessionId, SessionSetup, UpdateCallback};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Starts and tracks grant sessions against one host
#[derive(Clone)]
pub struct GrantOrchestrator {
    /// Configuration
    config: GrantConfig,
    /// Host environment
    host: Arc<dyn HostAdapter>,
    /// Replaces the host's rationale dialog when set
    presenter: Option<Arc<dyn RationalePresenter>>,
    /// Correlation codes, shared by every session on this host
    allocator: Arc<CodeAllocator>,
    /// Live sessions
    registry: Arc<SessionRegistry>,
}

impl std::fmt::Debug for GrantOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantOrchestrator")
            .field("config", &self.config)
            .field("custom_presenter", &self.presenter.is_some())
            .field("live_sessions", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl GrantOrchestrator {
    /// Orchestrator with default configuration, the process-wide code
    /// allocator and the process-wide registry
    #[must_use]
    pub fn new(host: Arc<dyn HostAdapter>) -> Self {
        Self {
            config: GrantConfig::default(),
            host,
            presenter: None,
            allocator: CodeAllocator::shared(),
            registry: SessionRegistry::global(),
        }
    }

    /// Orchestrator using `config`
    ///
    /// Codes still come from the process-wide allocator; `code_ceiling` only
    /// bounds the codes this orchestrator draws from it.
    ///
    /// # Errors
    /// `GrantError::InvalidConfig` if `config` fails validation
    pub fn with_config(host: Arc<dyn HostAdapter>, config: GrantConfig) -> Result<Self, GrantError> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new(host)
        })
    }

    /// Draw codes from `allocator` instead of the process-wide one
    ///
    /// Every orchestrator talking to the same host must use the same
    /// allocator, or their codes overlap.
    #[inline]
    #[must_use]
    pub fn with_allocator(mut self, allocator: Arc<CodeAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Track sessions in `registry` instead of the global one
    #[inline]
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Show rationales through `presenter` instead of the host dialog
    #[inline]
    #[must_use]
    pub fn with_presenter(mut self, presenter: Arc<dyn RationalePresenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    /// Check, prompt for and request every capability in `nodes`
    ///
    /// Root nodes are processed strictly in order. `outcome` fires exactly
    /// once when the walk completes; `updates` sees every drain step.
    ///
    /// # Errors
    /// - `GrantError::InvalidNode` for empty groups or blank names
    /// - `GrantError::NoRuntime` outside a tokio runtime
    /// - `GrantError::Configuration` / `GrantError::HostRegistration` when the
    ///   host cannot route results back; no session is registered then
    pub fn request(
        &self,
        nodes: Vec<CapabilityNode>,
        outcome: Arc<dyn OutcomeCallback>,
        updates: Option<Arc<dyn UpdateCallback>>,
    ) -> Result<SessionHandle, GrantError> {
        nodes.iter().try_for_each(CapabilityNode::validate)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| GrantError::NoRuntime)?;

        let id = SessionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        self.host
            .register_result_channel(ResultSink::new(id, tx.clone()))
            .map_err(|e| match e {
                HostError::ResultChannelUnsupported => {
                    tracing::error!(session = %id, "host cannot deliver grant results");
                    GrantError::Configuration("host must support result-delivery registration".to_string())
                }
                other => GrantError::HostRegistration(other),
            })?;

        tracing::debug!(session = %id, nodes = nodes.len(), "submitting request");
        let setup = SessionSetup {
            id,
            roots: nodes,
            host: Arc::clone(&self.host),
            presenter: self.presenter.clone(),
            allocator: Arc::clone(&self.allocator),
            registry: Arc::clone(&self.registry),
            config: self.config.clone(),
            outcome,
            updates,
            events: tx,
        };
        Ok(setup.spawn(&runtime, rx))
    }

    /// Direct pass-through query, no sequencing
    pub async fn has_capability(&self, capability: &str) -> bool {
        has_capability(self.host.as_ref(), capability).await
    }

    /// Send the user to the system settings screen
    ///
    /// # Errors
    /// Whatever the host reports, `HostError::Unsupported` by default
    pub async fn open_system_settings(&self) -> Result<(), HostError> {
        open_system_settings(self.host.as_ref()).await
    }

    /// Cancel every session in this orchestrator's registry
    pub fn cancel_all(&self) -> usize {
        self.registry.cancel_all()
    }

    /// Get configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &GrantConfig {
        &self.config
    }

    /// Get registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}

/// Is `capability` currently granted on `host`
pub async fn has_capability<H: HostAdapter + ?Sized>(host: &H, capability: &str) -> bool {
    host.is_granted(capability).await
}

/// Navigate to the host's settings screen for this application
///
/// # Errors
/// Whatever the host reports, `HostError::Unsupported` by default
pub async fn open_system_settings<H: HostAdapter + ?Sized>(host: &H) -> Result<(), HostError> {
    host.open_system_settings().await
}
