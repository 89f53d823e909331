//! Session registry
//!
//! Provides [`SessionRegistry`], the process-wide list of live sessions used
//! for best-effort bulk cancellation. Correctness never depends on it.

use crate::session::{SessionHandle, SessionId};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::Arc;

static GLOBAL: Lazy<Arc<SessionRegistry>> = Lazy::new(|| Arc::new(SessionRegistry::new()));

/// Live sessions in creation order
///
/// Sessions register on creation and unregister themselves on teardown.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<IndexMap<SessionId, SessionHandle>>,
}

impl SessionRegistry {
    /// Create new empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Register a session
    pub fn register(&self, handle: SessionHandle) {
        self.sessions.lock().insert(handle.id(), handle);
    }

    /// Remove a session; returns whether it was present
    pub fn unregister(&self, id: SessionId) -> bool {
        self.sessions.lock().shift_remove(&id).is_some()
    }

    /// Check if a session is registered
    #[inline]
    #[must_use]
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.lock().contains_key(&id)
    }

    /// Get number of live sessions
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Handles of all live sessions
    #[must_use]
    pub fn snapshot(&self) -> Vec<SessionHandle> {
        self.sessions.lock().values().cloned().collect()
    }

    /// Cancel every live session; returns how many were cancelled
    ///
    /// Works on a snapshot, so sessions unregistering concurrently are fine.
    /// Shares the caveats of [`SessionHandle::cancel`].
    pub fn cancel_all(&self) -> usize {
        let sessions = self.snapshot();
        tracing::info!(count = sessions.len(), "cancelling all sessions");
        sessions
            .iter()
            .filter(|handle| !handle.is_cancelled())
            .inspect(|handle| handle.cancel())
            .count()
    }
}
