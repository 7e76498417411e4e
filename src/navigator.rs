//! Client-side navigation abstraction.
//!
//! The gating core affects the visible route through exactly one channel:
//! `Navigator::go`. Gating redirects always pass `replace = true` so the
//! back button never loops between login/onboarding/protected locations.

use serde::Serialize;
use std::fmt;
use std::sync::Mutex;

/// A route path, e.g. `/login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target(String);

impl Target {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Target {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Options for a navigation call.
#[derive(Debug, Clone, Copy, Default)]
pub struct NavigateOptions {
    /// When true, the navigation does not create a new history entry.
    pub replace: bool,
}

/// Framework-level navigation failure. Logged by the guard, never retried.
#[derive(Debug, thiserror::Error)]
pub enum NavigateError {
    #[error("router rejected navigation to {0}")]
    Rejected(String),
}

/// Performs client-side redirects.
///
/// `go` is idempotent with respect to the current location: navigating to
/// the location already shown is a no-op and creates no history entry.
pub trait Navigator: Send + Sync {
    fn current_location(&self) -> Target;

    fn go(&self, target: &Target, opts: NavigateOptions) -> Result<(), NavigateError>;
}

// ─── History navigator ───────────────────────────────────────────────────────

/// In-memory history stack. `replace = true` swaps the top entry,
/// `replace = false` pushes a new one.
pub struct HistoryNavigator {
    entries: Mutex<Vec<Target>>,
}

impl HistoryNavigator {
    pub fn new(initial: Target) -> Self {
        Self {
            entries: Mutex::new(vec![initial]),
        }
    }

    /// Full history, oldest first. Mainly useful for diagnostics and tests.
    pub fn history(&self) -> Vec<Target> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Target>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Navigator for HistoryNavigator {
    fn current_location(&self) -> Target {
        let entries = self.lock();
        entries
            .last()
            .cloned()
            .unwrap_or_else(|| Target::new("/"))
    }

    fn go(&self, target: &Target, opts: NavigateOptions) -> Result<(), NavigateError> {
        let mut entries = self.lock();
        if entries.last() == Some(target) {
            return Ok(()); // Already there — no history entry either.
        }
        if opts.replace {
            if let Some(last) = entries.last_mut() {
                *last = target.clone();
                return Ok(());
            }
        }
        entries.push(target.clone());
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn go_is_idempotent_for_current_location() {
        let nav = HistoryNavigator::new(Target::new("/login"));
        nav.go(&Target::new("/login"), NavigateOptions { replace: false })
            .unwrap();
        assert_eq!(nav.history().len(), 1);
    }

    #[test]
    fn replace_swaps_the_top_entry() {
        let nav = HistoryNavigator::new(Target::new("/company-overview"));
        nav.go(&Target::new("/login"), NavigateOptions { replace: true })
            .unwrap();
        assert_eq!(nav.history(), vec![Target::new("/login")]);
        assert_eq!(nav.current_location(), Target::new("/login"));
    }

    #[test]
    fn push_appends_a_history_entry() {
        let nav = HistoryNavigator::new(Target::new("/login"));
        nav.go(
            &Target::new("/company-overview"),
            NavigateOptions { replace: false },
        )
        .unwrap();
        assert_eq!(nav.history().len(), 2);
    }
}
