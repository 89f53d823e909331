//! Correlation code allocation
//!
//! Every request issued to the host carries a [`CorrelationCode`]. The host
//! hands the code back with the grant result, which is how a result finds
//! the node that triggered it.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Largest code handed out; the range above is reserved by hosts.
pub const MAX_CODE_CEILING: u32 = 0x00FF_FFFF;

static SHARED: Lazy<Arc<CodeAllocator>> = Lazy::new(|| Arc::new(CodeAllocator::new()));

/// Opaque token linking an issued request to its asynchronous result
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationCode(pub u32);

impl CorrelationCode {
    /// Raw integer value
    #[inline]
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for CorrelationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cycling allocator shared by every session talking to one host
///
/// Codes start at 1 and wrap back to 1 after `ceiling`. Collisions after a
/// wrap are not detected; the ceiling is far above any realistic number of
/// requests in flight at once.
#[derive(Debug)]
pub struct CodeAllocator {
    next: AtomicU32,
    ceiling: u32,
}

impl CodeAllocator {
    /// Allocator with the default ceiling
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_ceiling(MAX_CODE_CEILING)
    }

    /// Allocator wrapping after `ceiling` (clamped to `1..=MAX_CODE_CEILING`)
    #[inline]
    #[must_use]
    pub fn with_ceiling(ceiling: u32) -> Self {
        Self {
            next: AtomicU32::new(1),
            ceiling: ceiling.clamp(1, MAX_CODE_CEILING),
        }
    }

    /// Process-wide allocator
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::clone(&SHARED)
    }

    /// Ceiling after which codes wrap
    #[inline]
    #[must_use]
    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Next code; safe to call from any thread
    pub fn next(&self) -> CorrelationCode {
        self.next_within(self.ceiling)
    }

    /// Next code, wrapping to 1 once `ceiling` would be exceeded
    ///
    /// Lets orchestrators configured with different ceilings draw from one
    /// counter, so their codes never overlap short of a wrap. `ceiling` is
    /// clamped to `1..=self.ceiling()`.
    pub fn next_within(&self, ceiling: u32) -> CorrelationCode {
        let ceiling = ceiling.clamp(1, self.ceiling);
        let previous = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(if current >= ceiling { 1 } else { current + 1 })
            })
            .unwrap_or_else(|current| current);
        if previous > ceiling {
            // counter was advanced past this ceiling by a larger one
            return self.next_within(ceiling);
        }
        CorrelationCode(previous)
    }
}

impl Default for CodeAllocator {
    fn default() -> Self {
        Self::new()
    }
}
