use grantseq_core::simulator::{CapabilityProfile, SimulatedHost};
use grantseq_core::{has_capability, leaf, open_system_settings, GrantOrchestrator, HostError, SessionStatus};
use grantseq_test_utils::{automatic_host, isolated_orchestrator, manual_host, start_recorded, wait_finished};
use std::sync::Arc;

#[tokio::test]
async fn test_session_registered_while_running() {
    let host = manual_host([CapabilityProfile::new("a")]);
    let orchestrator = isolated_orchestrator(host.clone());

    let (handle, _recorder) = start_recorded(&orchestrator, vec![leaf("a", true)]);
    let request = host.next_request().await.unwrap();
    assert!(orchestrator.registry().contains(handle.id()));
    assert_eq!(host.registered_sessions(), 1);

    host.respond(&request);
    wait_finished(&handle).await;
    assert!(!orchestrator.registry().contains(handle.id()));
    assert_eq!(host.registered_sessions(), 0);
}

#[tokio::test]
async fn test_cancel_all() {
    let host = manual_host([CapabilityProfile::new("a"), CapabilityProfile::new("b")]);
    let orchestrator = isolated_orchestrator(host.clone());

    let (first, first_recorder) = start_recorded(&orchestrator, vec![leaf("a", true)]);
    let (second, second_recorder) = start_recorded(&orchestrator, vec![leaf("b", true)]);
    host.next_request().await.unwrap();
    host.next_request().await.unwrap();
    assert_eq!(orchestrator.registry().len(), 2);

    assert_eq!(orchestrator.cancel_all(), 2);
    assert_eq!(wait_finished(&first).await, SessionStatus::Cancelled);
    assert_eq!(wait_finished(&second).await, SessionStatus::Cancelled);
    assert!(orchestrator.registry().is_empty());
    assert_eq!(first_recorder.outcome(), None);
    assert_eq!(second_recorder.outcome(), None);

    // nothing left to cancel
    assert_eq!(orchestrator.registry().cancel_all(), 0);
}

#[tokio::test]
async fn test_finished_sessions_leave_registry() {
    let host = automatic_host([CapabilityProfile::new("a").granted()]);
    let orchestrator = isolated_orchestrator(host);

    let handles: Vec<_> = (0..8)
        .map(|_| start_recorded(&orchestrator, vec![leaf("a", true)]).0)
        .collect();
    for handle in &handles {
        assert_eq!(wait_finished(handle).await, SessionStatus::Succeeded);
    }
    assert!(orchestrator.registry().is_empty());
}

#[tokio::test]
async fn test_capability_query_and_settings() {
    let host = automatic_host([CapabilityProfile::new("a").granted()]);
    let orchestrator = isolated_orchestrator(host.clone());

    assert!(orchestrator.has_capability("a").await);
    assert!(!orchestrator.has_capability("b").await);
    assert!(has_capability(host.as_ref(), "a").await);
    assert!(host.issued().is_empty());

    orchestrator.open_system_settings().await.unwrap();
    open_system_settings(host.as_ref()).await.unwrap();
    assert_eq!(host.settings_opened(), 2);
}

mod bare {
    use async_trait::async_trait;
    use grantseq_core::{GrantRequest, HostAdapter, HostError, LabelLookup, RationalePrompt, RationaleReply, ResultSink, SessionId};

    /// Host with nothing but the required methods
    pub(super) struct BareHost;

    impl LabelLookup for BareHost {
        fn lookup_label(&self, capability: &str) -> Result<String, HostError> {
            Err(HostError::LookupFailed {
                capability: capability.to_string(),
            })
        }

        fn lookup_description(&self, capability: &str) -> Result<String, HostError> {
            self.lookup_label(capability)
        }
    }

    #[async_trait]
    impl HostAdapter for BareHost {
        async fn is_granted(&self, _capability: &str) -> bool {
            false
        }

        async fn should_show_rationale(&self, _capability: &str) -> bool {
            false
        }

        async fn issue_request(&self, _request: GrantRequest) {}

        fn register_result_channel(&self, _sink: ResultSink) -> Result<(), HostError> {
            Ok(())
        }

        fn deregister_result_channel(&self, _session: SessionId) -> bool {
            false
        }

        fn present_rationale(&self, _prompt: RationalePrompt, reply: RationaleReply) {
            reply.decline();
        }
    }
}

#[tokio::test]
async fn test_settings_unsupported_by_default() {
    let orchestrator = GrantOrchestrator::new(Arc::new(bare::BareHost));
    assert_eq!(
        orchestrator.open_system_settings().await,
        Err(HostError::Unsupported("open_system_settings"))
    );
}

#[tokio::test]
async fn test_global_registry_shared_by_default() {
    let host = Arc::new(SimulatedHost::new([CapabilityProfile::new("a")]).manual());
    let first = GrantOrchestrator::new(host.clone());
    let second = GrantOrchestrator::new(host.clone());
    assert!(Arc::ptr_eq(first.registry(), second.registry()));

    let (handle, _recorder) = start_recorded(&first, vec![leaf("a", true)]);
    let request = host.next_request().await.unwrap();
    assert!(second.registry().contains(handle.id()));

    host.respond(&request);
    wait_finished(&handle).await;
    assert!(!second.registry().contains(handle.id()));
}
