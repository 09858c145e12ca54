//! Scoped diagnostics
//!
//! Warnings that would repeat on every persistence pass are logged once per
//! context string at `warn`, then at `debug`.

use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Once-per-context warning state, owned by a management context
#[derive(Debug, Default)]
pub struct Diagnostics {
    warned: Mutex<HashSet<String>>,
}

impl Diagnostics {
    /// Create empty diagnostics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Log a warning the first time `context` is seen, debug afterwards
    ///
    /// Returns true if this was the first occurrence.
    pub fn warn_once(&self, context: &str, message: &str) -> bool {
        let first = self.warned.lock().insert(context.to_string());
        if first {
            warn!(context, "{message}");
        } else {
            debug!(context, "{message}");
        }
        first
    }

    /// Whether a warning was already logged for `context`
    #[must_use]
    pub fn has_warned(&self, context: &str) -> bool {
        self.warned.lock().contains(context)
    }

    /// Forget all contexts
    pub fn clear(&self) {
        self.warned.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warns_once_per_context() {
        let diagnostics = Diagnostics::new();
        assert!(diagnostics.warn_once("app:key", "task not done"));
        assert!(!diagnostics.warn_once("app:key", "task not done"));
        assert!(diagnostics.warn_once("app:other", "task not done"));
        assert!(diagnostics.has_warned("app:key"));
        diagnostics.clear();
        assert!(!diagnostics.has_warned("app:key"));
    }
}
