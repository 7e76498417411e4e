//! Identity session source.
//!
//! Abstracts the auth provider behind a small trait: one read for the
//! current session's identity and one subscription for change notifications.
//! The provider's event kinds are kept as-is here; normalizing them into
//! present/absent is the bridge's job (`gate::bridge`).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

/// How long a demo session stays valid before `expires_at` lapses.
const SESSION_TTL_HOURS: i64 = 1;

/// The authenticated principal for the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// Opaque provider-assigned id.
    pub id: String,
    pub email: String,
}

/// Identity backend failures. All of them are consumed fail-closed:
/// the resolver maps any of these to "signed out".
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity provider unreachable: {0}")]
    Unavailable(String),
    #[error("identity lookup timed out")]
    Timeout,
}

/// Provider-shaped change notification.
///
/// Mirrors the event kinds the hosted auth backend emits. Consumers must
/// treat any kind they do not recognize as a sign-out.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    SignedIn(Identity),
    SignedOut,
    TokenRefreshed(Identity),
    UserUpdated(Identity),
    SessionExpired,
    /// Forward-compatibility: an event kind this client does not know.
    Unknown,
}

/// Source of the current identity and of identity-change notifications.
#[async_trait]
pub trait IdentitySource: Send + Sync + 'static {
    /// Returns the identity for the current session, or `None` when signed out.
    async fn current_identity(&self) -> Result<Option<Identity>, IdentityError>;

    /// Subscribe to provider change notifications.
    fn subscribe_changes(&self) -> broadcast::Receiver<AuthEvent>;
}

// ─── In-memory source ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SessionInner {
    identity: Option<Identity>,
    signed_in_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    /// When set, the next `current_identity` call fails once.
    fail_next: bool,
}

/// In-process identity source used by the demo binary and the test suite.
///
/// Sessions carry a `signed_in_at`/`expires_at` pair; a lapsed expiry reads
/// back as signed out, the same way a real provider drops a stale session.
pub struct MemoryIdentitySource {
    inner: Mutex<SessionInner>,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for MemoryIdentitySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIdentitySource {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            inner: Mutex::new(SessionInner::default()),
            events,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn emit(&self, event: AuthEvent) {
        // Ignore errors — no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Start a session for `email` and emit `SignedIn`.
    pub fn sign_in(&self, email: &str) -> Identity {
        let identity = Identity {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
        };
        let now = Utc::now();
        {
            let mut inner = self.lock();
            inner.identity = Some(identity.clone());
            inner.signed_in_at = Some(now);
            inner.expires_at = Some(now + Duration::hours(SESSION_TTL_HOURS));
        }
        self.emit(AuthEvent::SignedIn(identity.clone()));
        identity
    }

    /// End the session and emit `SignedOut`.
    pub fn sign_out(&self) {
        self.clear_session();
        self.emit(AuthEvent::SignedOut);
    }

    /// Drop the session as if its expiry lapsed and emit `SessionExpired`.
    pub fn expire_session(&self) {
        self.clear_session();
        self.emit(AuthEvent::SessionExpired);
    }

    /// Re-emit the current identity as a `UserUpdated` event (profile edits,
    /// email changes). No-op when signed out.
    pub fn update_user(&self) {
        let identity = self.lock().identity.clone();
        if let Some(identity) = identity {
            self.emit(AuthEvent::UserUpdated(identity));
        }
    }

    /// Re-emit the current identity as a `TokenRefreshed` event. No-op when
    /// signed out.
    pub fn refresh_token(&self) {
        let identity = self.lock().identity.clone();
        if let Some(identity) = identity {
            self.emit(AuthEvent::TokenRefreshed(identity));
        }
    }

    /// Emit an event kind this client does not recognize.
    pub fn emit_unknown(&self) {
        self.emit(AuthEvent::Unknown);
    }

    /// Make the next `current_identity` call fail with `Unavailable`.
    pub fn fail_next_lookup(&self) {
        self.lock().fail_next = true;
    }

    fn clear_session(&self) {
        let mut inner = self.lock();
        inner.identity = None;
        inner.signed_in_at = None;
        inner.expires_at = None;
    }
}

#[async_trait]
impl IdentitySource for MemoryIdentitySource {
    async fn current_identity(&self) -> Result<Option<Identity>, IdentityError> {
        let mut inner = self.lock();
        if inner.fail_next {
            inner.fail_next = false;
            return Err(IdentityError::Unavailable(
                "injected backend failure".to_string(),
            ));
        }
        // A lapsed expiry reads back as signed out.
        if let Some(expires_at) = inner.expires_at {
            if expires_at <= Utc::now() {
                inner.identity = None;
                inner.signed_in_at = None;
                inner.expires_at = None;
                return Ok(None);
            }
        }
        Ok(inner.identity.clone())
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_in_then_out_round_trip() {
        let source = MemoryIdentitySource::new();
        assert_eq!(source.current_identity().await.unwrap(), None);

        let identity = source.sign_in("taylor@example.com");
        assert_eq!(
            source.current_identity().await.unwrap(),
            Some(identity.clone())
        );
        assert_eq!(identity.email, "taylor@example.com");

        source.sign_out();
        assert_eq!(source.current_identity().await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_session_reads_back_as_signed_out() {
        let source = MemoryIdentitySource::new();
        source.sign_in("taylor@example.com");
        // Force the expiry into the past.
        source.lock().expires_at = Some(Utc::now() - Duration::minutes(1));
        assert_eq!(source.current_identity().await.unwrap(), None);
    }

    #[tokio::test]
    async fn injected_failure_fails_exactly_once() {
        let source = MemoryIdentitySource::new();
        let identity = source.sign_in("taylor@example.com");
        source.fail_next_lookup();
        assert!(source.current_identity().await.is_err());
        assert_eq!(source.current_identity().await.unwrap(), Some(identity));
    }

    #[tokio::test]
    async fn sign_in_broadcasts_signed_in_event() {
        let source = MemoryIdentitySource::new();
        let mut rx = source.subscribe_changes();
        let identity = source.sign_in("taylor@example.com");
        match rx.recv().await.unwrap() {
            AuthEvent::SignedIn(seen) => assert_eq!(seen, identity),
            other => panic!("expected SignedIn, got {other:?}"),
        }
    }
}
