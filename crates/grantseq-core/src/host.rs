//! Host adapter contract
//!
//! The engine never talks to a platform directly. Everything it needs from
//! the environment goes through [`HostAdapter`]:
//! - query whether a capability is granted
//! - ask whether a rationale should be shown first
//! - issue a grant request whose result arrives later via a [`ResultSink`]
//! - present a rationale and report the user's choice through a [`RationaleReply`]

use crate::code::CorrelationCode;
use crate::error::HostError;
use crate::session::{SessionEvent, SessionId};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Per-capability outcome reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    /// Capability granted
    Granted,
    /// Capability denied
    Denied,
}

impl GrantStatus {
    /// Check if granted
    #[inline]
    #[must_use]
    pub fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

impl From<bool> for GrantStatus {
    fn from(granted: bool) -> Self {
        if granted {
            Self::Granted
        } else {
            Self::Denied
        }
    }
}

/// A grant request handed to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRequest {
    /// Issuing session
    pub session: SessionId,
    /// Code the result must carry back
    pub code: CorrelationCode,
    /// Capabilities requested together
    pub capabilities: Vec<String>,
}

/// Rationale dialog contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RationalePrompt {
    /// Session asking
    pub session: SessionId,
    /// Dialog title
    pub title: String,
    /// Dialog body
    pub message: String,
    /// Capabilities the request would cover
    pub capabilities: Vec<String>,
}

/// Human-readable capability metadata
pub trait LabelLookup {
    /// Short label for a capability
    ///
    /// # Errors
    /// `HostError::LookupFailed` when the host knows nothing about it
    fn lookup_label(&self, capability: &str) -> Result<String, HostError>;

    /// Longer description for a capability
    ///
    /// # Errors
    /// `HostError::LookupFailed` when the host knows nothing about it
    fn lookup_description(&self, capability: &str) -> Result<String, HostError>;
}

/// Shows a rationale and reports the user's decision
pub trait RationalePresenter: Send + Sync {
    /// Present `prompt`; answer through `reply` exactly once, eventually
    fn present(&self, prompt: RationalePrompt, reply: RationaleReply);
}

/// Everything the engine consumes from the host environment
#[async_trait]
pub trait HostAdapter: LabelLookup + Send + Sync {
    /// Is the capability currently granted
    async fn is_granted(&self, capability: &str) -> bool;

    /// Does the host advise showing a rationale before requesting
    async fn should_show_rationale(&self, capability: &str) -> bool;

    /// Fire-and-forget request; the result comes back through the sink
    /// registered for `request.session`, tagged with `request.code`
    async fn issue_request(&self, request: GrantRequest);

    /// Route future results for `sink.session()` into `sink`
    ///
    /// # Errors
    /// `HostError::ResultChannelUnsupported` when results cannot be routed
    fn register_result_channel(&self, sink: ResultSink) -> Result<(), HostError>;

    /// Stop routing results to `session`; returns whether it was registered
    fn deregister_result_channel(&self, session: SessionId) -> bool;

    /// Default confirm/deny prompt: "yes" requests, "no" skips that capability
    fn present_rationale(&self, prompt: RationalePrompt, reply: RationaleReply);

    /// Navigate the user to the system settings for this application
    ///
    /// # Errors
    /// `HostError::Unsupported` unless the host overrides it
    async fn open_system_settings(&self) -> Result<(), HostError> {
        Err(HostError::Unsupported("open_system_settings"))
    }
}

/// Delivery endpoint of one session
#[derive(Debug, Clone)]
pub struct ResultSink {
    session: SessionId,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl ResultSink {
    pub(crate) fn new(session: SessionId, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { session, events }
    }

    /// Session this sink feeds
    #[inline]
    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Hand a grant result to the session; each issued code is delivered once
    ///
    /// # Errors
    /// `HostError::ChannelClosed` once the session has finished or been cancelled
    pub fn deliver(
        &self,
        code: CorrelationCode,
        capabilities: Vec<String>,
        statuses: Vec<GrantStatus>,
    ) -> Result<(), HostError> {
        self.events
            .send(SessionEvent::Delivered {
                code,
                capabilities,
                statuses,
            })
            .map_err(|_| HostError::ChannelClosed)
    }

    /// Check if the session can still receive results
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

/// Continuation for a rationale prompt
///
/// Dropping it unanswered counts as declining.
#[derive(Debug)]
pub struct RationaleReply {
    prompt: u64,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl RationaleReply {
    pub(crate) fn new(prompt: u64, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            prompt,
            events: Some(events),
        }
    }

    /// Report the decision
    pub fn answer(mut self, proceed: bool) {
        self.send(proceed);
    }

    /// User agreed; issue the request
    #[inline]
    pub fn proceed(self) {
        self.answer(true);
    }

    /// User declined; skip this capability
    #[inline]
    pub fn decline(self) {
        self.answer(false);
    }

    fn send(&mut self, proceed: bool) {
        if let Some(events) = self.events.take() {
            // session may be gone already
            let _ = events.send(SessionEvent::RationaleAnswered {
                prompt: self.prompt,
                proceed,
            });
        }
    }
}

impl Drop for RationaleReply {
    fn drop(&mut self) {
        self.send(false);
    }
}

/// Host-side fan-in of grant results
///
/// Tracks the sink of every registered session and which session issued
/// which code. A result for a code tracked by exactly one session goes to
/// that session only. A code tracked by several sessions is ambiguous and
/// the result is dropped. An unknown code is broadcast so every session
/// can flag it.
#[derive(Debug, Default)]
pub struct ResultRouter {
    sinks: DashMap<SessionId, ResultSink>,
    owners: DashSet<(CorrelationCode, SessionId)>,
}

impl ResultRouter {
    /// Create empty router
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session sink
    pub fn register(&self, sink: ResultSink) {
        self.sinks.insert(sink.session(), sink);
    }

    /// Remove a session sink and its outstanding codes
    pub fn deregister(&self, session: SessionId) -> bool {
        self.owners.retain(|(_, owner)| *owner != session);
        self.sinks.remove(&session).is_some()
    }

    /// Remember who issued `request`
    pub fn track(&self, request: &GrantRequest) {
        if let Some(other) = self.owners_of(request.code).into_iter().find(|s| *s != request.session) {
            tracing::error!(
                code = %request.code,
                session = %request.session,
                other = %other,
                "code already in flight for another session"
            );
        }
        self.owners.insert((request.code, request.session));
    }

    fn owners_of(&self, code: CorrelationCode) -> Vec<SessionId> {
        self.owners
            .iter()
            .filter(|entry| entry.key().0 == code)
            .map(|entry| entry.key().1)
            .collect()
    }

    /// Number of registered sessions
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Check if no sessions are registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Route a result; returns how many sessions accepted it
    pub fn deliver(&self, code: CorrelationCode, capabilities: &[String], statuses: &[GrantStatus]) -> usize {
        match self.owners_of(code).as_slice() {
            [] => {
                let sinks: Vec<ResultSink> = self.sinks.iter().map(|entry| entry.value().clone()).collect();
                sinks
                    .iter()
                    .filter(|sink| sink.deliver(code, capabilities.to_vec(), statuses.to_vec()).is_ok())
                    .count()
            }
            [owner] => {
                self.owners.remove(&(code, *owner));
                let Some(sink) = self.sinks.get(owner).map(|s| s.clone()) else {
                    tracing::debug!(%code, session = %owner, "owner of result no longer registered");
                    return 0;
                };
                usize::from(sink.deliver(code, capabilities.to_vec(), statuses.to_vec()).is_ok())
            }
            owners => {
                tracing::error!(%code, owners = owners.len(), "result for a code issued by several sessions dropped");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (ResultSink, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ResultSink::new(SessionId::new(), tx), rx)
    }

    #[test]
    fn grant_status_from_bool() {
        assert_eq!(GrantStatus::from(true), GrantStatus::Granted);
        assert!(!GrantStatus::from(false).is_granted());
    }

    #[test]
    fn sink_delivers_until_closed() {
        let (sink, mut rx) = sink();
        sink.deliver(CorrelationCode(4), vec!["a".into()], vec![GrantStatus::Granted])
            .unwrap();
        assert!(matches!(
            rx.try_recv(),
            Ok(SessionEvent::Delivered { code: CorrelationCode(4), .. })
        ));

        drop(rx);
        assert!(sink.is_closed());
        assert_eq!(sink.deliver(CorrelationCode(5), vec![], vec![]), Err(HostError::ChannelClosed));
    }

    #[test]
    fn reply_answers_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        RationaleReply::new(9, tx).proceed();
        assert!(matches!(
            rx.try_recv(),
            Ok(SessionEvent::RationaleAnswered { prompt: 9, proceed: true })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_reply_declines() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        drop(RationaleReply::new(3, tx));
        assert!(matches!(
            rx.try_recv(),
            Ok(SessionEvent::RationaleAnswered { prompt: 3, proceed: false })
        ));
    }

    #[test]
    fn router_routes_tracked_codes_to_owner() {
        let router = ResultRouter::new();
        let (a, mut rx_a) = sink();
        let (b, mut rx_b) = sink();
        let owner = a.session();
        router.register(a);
        router.register(b);

        router.track(&GrantRequest {
            session: owner,
            code: CorrelationCode(1),
            capabilities: vec!["x".into()],
        });

        assert_eq!(router.deliver(CorrelationCode(1), &["x".into()], &[GrantStatus::Granted]), 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn router_broadcasts_unknown_codes() {
        let router = ResultRouter::new();
        let (a, _rx_a) = sink();
        let (b, _rx_b) = sink();
        router.register(a);
        router.register(b);

        assert_eq!(router.deliver(CorrelationCode(77), &[], &[]), 2);
    }

    #[test]
    fn router_never_hands_a_shared_code_to_the_wrong_session() {
        let router = ResultRouter::new();
        let (a, mut rx_a) = sink();
        let (b, mut rx_b) = sink();
        let (first, second) = (a.session(), b.session());
        router.register(a);
        router.register(b);

        for session in [first, second] {
            router.track(&GrantRequest {
                session,
                code: CorrelationCode(1),
                capabilities: vec!["x".into()],
            });
        }

        assert_eq!(router.deliver(CorrelationCode(1), &["x".into()], &[GrantStatus::Granted]), 0);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());

        // once one side is gone the code is unambiguous again
        router.deregister(first);
        assert_eq!(router.deliver(CorrelationCode(1), &["x".into()], &[GrantStatus::Granted]), 1);
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn router_deregister_forgets_codes() {
        let router = ResultRouter::new();
        let (a, _rx) = sink();
        let session = a.session();
        router.register(a);
        router.track(&GrantRequest {
            session,
            code: CorrelationCode(2),
            capabilities: vec![],
        });

        assert!(router.deregister(session));
        assert!(router.is_empty());
        assert_eq!(router.deliver(CorrelationCode(2), &[], &[]), 0);
    }
}
