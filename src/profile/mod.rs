//! Onboarding profile source.
//!
//! One question, asked per identity: has this user finished the required
//! onboarding profile? Failures and missing rows are both consumed as
//! "incomplete" by the resolver (fail-closed).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Profile backend failures. All of them are consumed fail-closed:
/// the resolver maps any of these to "onboarding incomplete".
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile backend unreachable: {0}")]
    Unavailable(String),
    #[error("no profile row for identity {0}")]
    NotFound(String),
    #[error("profile lookup timed out")]
    Timeout,
}

/// Source of per-identity onboarding completeness.
#[async_trait]
pub trait ProfileSource: Send + Sync + 'static {
    /// Returns whether the identity's onboarding profile is complete.
    async fn is_profile_complete(&self, identity_id: &str) -> Result<bool, ProfileError>;
}

// ─── In-memory source ────────────────────────────────────────────────────────

/// In-process profile store used by the demo binary and the test suite.
#[derive(Default)]
pub struct MemoryProfileSource {
    rows: Mutex<HashMap<String, bool>>,
    fail_next: Mutex<bool>,
}

impl MemoryProfileSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the completeness flag for an identity.
    pub fn upsert(&self, identity_id: &str, complete: bool) {
        self.lock_rows().insert(identity_id.to_string(), complete);
    }

    /// Mark an identity's profile as complete.
    pub fn mark_complete(&self, identity_id: &str) {
        self.upsert(identity_id, true);
    }

    /// Make the next `is_profile_complete` call fail with `Unavailable`.
    pub fn fail_next_lookup(&self) {
        *self
            .fail_next
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = true;
    }

    fn lock_rows(&self) -> std::sync::MutexGuard<'_, HashMap<String, bool>> {
        self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl ProfileSource for MemoryProfileSource {
    async fn is_profile_complete(&self, identity_id: &str) -> Result<bool, ProfileError> {
        {
            let mut fail = self
                .fail_next
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if *fail {
                *fail = false;
                return Err(ProfileError::Unavailable(
                    "injected backend failure".to_string(),
                ));
            }
        }
        match self.lock_rows().get(identity_id) {
            Some(complete) => Ok(*complete),
            None => Err(ProfileError::NotFound(identity_id.to_string())),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_row_is_not_found() {
        let source = MemoryProfileSource::new();
        assert!(matches!(
            source.is_profile_complete("u1").await,
            Err(ProfileError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn upsert_then_mark_complete() {
        let source = MemoryProfileSource::new();
        source.upsert("u1", false);
        assert_eq!(source.is_profile_complete("u1").await.unwrap(), false);
        source.mark_complete("u1");
        assert_eq!(source.is_profile_complete("u1").await.unwrap(), true);
    }

    #[tokio::test]
    async fn injected_failure_fails_exactly_once() {
        let source = MemoryProfileSource::new();
        source.upsert("u1", true);
        source.fail_next_lookup();
        assert!(matches!(
            source.is_profile_complete("u1").await,
            Err(ProfileError::Unavailable(_))
        ));
        assert_eq!(source.is_profile_complete("u1").await.unwrap(), true);
    }
}
