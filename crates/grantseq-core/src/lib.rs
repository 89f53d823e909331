//! grantseq - capability grant sequencing
//!
//! Walks a tree of capability requests against a host environment:
//! - Checks which capabilities are already granted
//! - Shows a rationale before asking when the host advises one
//! - Issues requests one at a time and correlates the delivered results
//! - Reports progress and an overall success or failure
//!
//! # Example
//!
//! ```rust,ignore
//! use grantseq_core::prelude::*;
//! use grantseq_core::simulator::{CapabilityProfile, SessionRecorder, SimulatedHost};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), GrantError> {
//! let host = Arc::new(SimulatedHost::new([CapabilityProfile::new("camera")]));
//! let orchestrator = GrantOrchestrator::new(host);
//!
//! let recorder = SessionRecorder::new();
//! let handle = orchestrator.request(
//!     vec![leaf_with_rationale("camera", true, "Camera", "Needed to scan documents")],
//!     recorder.clone(),
//!     None,
//! )?;
//!
//! assert_eq!(handle.wait().await, SessionStatus::Succeeded);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod code;
pub mod config;
pub mod error;
pub mod host;
pub mod node;
pub mod orchestrator;
pub mod registry;
pub mod results;
pub mod session;
pub mod simulator;

// Re-exports for convenience
pub use code::{CodeAllocator, CorrelationCode, MAX_CODE_CEILING};
pub use config::GrantConfig;
pub use error::{ConfigError, GrantError, HostError};
pub use host::{
    GrantRequest, GrantStatus, HostAdapter, LabelLookup, RationalePresenter, RationalePrompt, RationaleReply,
    ResultRouter, ResultSink,
};
pub use node::{group, leaf, leaf_with_rationale, untitled_group, CapabilityNode, Group, Leaf, Rationale};
pub use orchestrator::{has_capability, open_system_settings, GrantOrchestrator};
pub use registry::SessionRegistry;
pub use results::GrantResults;
pub use session::{OutcomeCallback, SessionHandle, SessionId, SessionStatus, UpdateCallback};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with grantseq
    pub use crate::{
        group, leaf, leaf_with_rationale, untitled_group, CapabilityNode, GrantConfig, GrantError, GrantOrchestrator,
        GrantResults, HostAdapter, OutcomeCallback, SessionHandle, SessionStatus, UpdateCallback,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
