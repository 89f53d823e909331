//! Result aggregation
//!
//! Provides [`GrantResults`], the insertion-ordered capability → granted map
//! handed to clients after every drain step and at finish.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered per-capability grant outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrantResults {
    entries: IndexMap<String, bool>,
}

impl GrantResults {
    /// Create empty results
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite; a capability keeps its first-insertion position
    pub fn update(&mut self, capability: &str, granted: bool) {
        if let Some(slot) = self.entries.get_mut(capability) {
            *slot = granted;
        } else {
            self.entries.insert(capability.to_string(), granted);
        }
    }

    /// Owned copy for handing out
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Number of capabilities recorded
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing was recorded
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recorded outcome for `capability`
    #[inline]
    #[must_use]
    pub fn get(&self, capability: &str) -> Option<bool> {
        self.entries.get(capability).copied()
    }

    /// Iterate in first-insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<S: Into<String>> FromIterator<(S, bool)> for GrantResults {
    fn from_iter<I: IntoIterator<Item = (S, bool)>>(iter: I) -> Self {
        let mut results = Self::new();
        for (name, granted) in iter {
            results.update(&name.into(), granted);
        }
        results
    }
}

impl std::fmt::Display for GrantResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (name, granted)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {granted}")?;
        }
        write!(f, "}}")
    }
}
