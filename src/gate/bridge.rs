//! Auth change bridge.
//!
//! Wraps the identity source's change notifications and normalizes every
//! provider event kind into exactly two cases: identity-present and
//! identity-absent. Unrecognized kinds normalize to absent (fail-closed).
//! The subscription has an explicit lifecycle: release it once on teardown;
//! releasing again is a no-op and the handler never fires after release.

use crate::identity::{AuthEvent, Identity, IdentitySource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::debug;

/// Collapse a provider event into present/absent.
fn normalize(event: AuthEvent) -> Option<Identity> {
    match event {
        AuthEvent::SignedIn(identity)
        | AuthEvent::TokenRefreshed(identity)
        | AuthEvent::UserUpdated(identity) => Some(identity),
        // Unknown kinds are treated as a sign-out: deny rather than guess.
        AuthEvent::SignedOut | AuthEvent::SessionExpired | AuthEvent::Unknown => None,
    }
}

/// Bridges provider change notifications into normalized identity changes.
pub struct AuthChangeBridge<I> {
    source: Arc<I>,
}

impl<I: IdentitySource> AuthChangeBridge<I> {
    pub fn new(source: Arc<I>) -> Self {
        Self { source }
    }

    /// Register `on_change` for normalized identity changes.
    ///
    /// Spawns a task that drains the provider's event stream for the life
    /// of the returned [`Subscription`].
    pub fn subscribe<F>(&self, on_change: F) -> Subscription
    where
        F: Fn(Option<Identity>) + Send + Sync + 'static,
    {
        let mut rx = self.source.subscribe_changes();
        let dead = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&dead);

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        // Guard against a release racing event delivery.
                        if flag.load(Ordering::SeqCst) {
                            break;
                        }
                        on_change(normalize(event));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Missed events are superseded by whatever arrives next.
                        debug!(skipped, "auth event stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Subscription { dead, task }
    }
}

/// Handle to an active bridge registration.
///
/// At most one per route guard instance. Dropping the handle releases it,
/// so early teardown during an in-flight resolution cannot leak the task.
pub struct Subscription {
    dead: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Unregister from the identity source.
    ///
    /// Idempotent: calling `release` more than once has no additional
    /// effect and raises no error. The handler is never invoked afterward.
    pub fn release(&self) {
        if !self.dead.swap(true, Ordering::SeqCst) {
            self.task.abort();
            debug!("auth change subscription released");
        }
    }

    pub fn is_released(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MemoryIdentitySource;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_handler() -> (Arc<AtomicUsize>, impl Fn(Option<Identity>) + Send + Sync + 'static)
    {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        (count, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn events_carrying_an_identity_normalize_to_present() {
        let user = Identity {
            id: "u1".to_string(),
            email: "u1@example.com".to_string(),
        };
        assert_eq!(
            normalize(AuthEvent::SignedIn(user.clone())),
            Some(user.clone())
        );
        assert_eq!(
            normalize(AuthEvent::TokenRefreshed(user.clone())),
            Some(user.clone())
        );
        assert_eq!(normalize(AuthEvent::UserUpdated(user.clone())), Some(user));
    }

    #[test]
    fn sign_out_expiry_and_unknown_normalize_to_absent() {
        assert_eq!(normalize(AuthEvent::SignedOut), None);
        assert_eq!(normalize(AuthEvent::SessionExpired), None);
        assert_eq!(normalize(AuthEvent::Unknown), None);
    }

    #[tokio::test]
    async fn handler_receives_normalized_changes() {
        let source = Arc::new(MemoryIdentitySource::new());
        let bridge = AuthChangeBridge::new(Arc::clone(&source));
        let (count, handler) = counting_handler();
        let sub = bridge.subscribe(handler);

        source.sign_in("taylor@example.com");
        source.sign_out();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
        sub.release();
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let source = Arc::new(MemoryIdentitySource::new());
        let bridge = AuthChangeBridge::new(Arc::clone(&source));
        let (_, handler) = counting_handler();
        let sub = bridge.subscribe(handler);

        sub.release();
        sub.release(); // Second call: no panic, no effect.
        assert!(sub.is_released());
    }

    #[tokio::test]
    async fn handler_never_fires_after_release() {
        let source = Arc::new(MemoryIdentitySource::new());
        let bridge = AuthChangeBridge::new(Arc::clone(&source));
        let (count, handler) = counting_handler();
        let sub = bridge.subscribe(handler);

        sub.release();
        source.sign_in("taylor@example.com");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dropping_the_subscription_releases_it() {
        let source = Arc::new(MemoryIdentitySource::new());
        let bridge = AuthChangeBridge::new(Arc::clone(&source));
        let (count, handler) = counting_handler();
        drop(bridge.subscribe(handler));

        source.sign_in("taylor@example.com");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
