//! Session resolution with staleness tokens.
//!
//! One resolution answers: "given the backends right now, what is the gate
//! state?" Two suspension points — the identity fetch and, when signed in,
//! the profile fetch. Both fail closed: an unreachable identity backend
//! reads as signed out, an unreachable (or empty) profile backend reads as
//! onboarding-incomplete. Results carry the token they were started with so
//! the guard can discard anything that is no longer the latest.

use crate::gate::{decide, GateState};
use crate::identity::IdentitySource;
use crate::profile::ProfileSource;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Freshness tag minted each time a resolution starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ResolutionToken(u64);

impl std::fmt::Display for ResolutionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared monotonic token counter.
///
/// Cheaply cloneable — all clones share the same counter via `Arc`. A
/// resolution result is applied only when its token is still the latest
/// minted one; there is no hard cancellation of in-flight calls.
#[derive(Debug, Clone, Default)]
pub struct TokenMint {
    counter: Arc<AtomicU64>,
}

impl TokenMint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint the next token. Every previously minted token becomes stale.
    pub fn mint(&self) -> ResolutionToken {
        ResolutionToken(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// The most recently minted token.
    pub fn latest(&self) -> ResolutionToken {
        ResolutionToken(self.counter.load(Ordering::SeqCst))
    }

    /// Whether `token` is still the latest minted one.
    pub fn is_current(&self, token: ResolutionToken) -> bool {
        token == self.latest()
    }

    /// Stale-out every outstanding token without handing the new one to
    /// anybody. Used on unmount so pending results become guaranteed no-ops.
    pub fn invalidate(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// A finished resolution: the token it was started with plus the state it
/// computed. The caller is responsible for discarding stale tokens.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub token: ResolutionToken,
    pub state: GateState,
}

/// Runs one end-to-end resolution: identity fetch, then (if signed in)
/// profile fetch, producing a gate decision.
pub struct SessionResolver<I, P> {
    identity: Arc<I>,
    profiles: Arc<P>,
    /// Optional per-call backend timeout. A timeout resolves into the same
    /// fail-closed outcomes as an error, never a stuck `Checking`.
    timeout: Option<Duration>,
}

impl<I, P> Clone for SessionResolver<I, P> {
    fn clone(&self) -> Self {
        Self {
            identity: Arc::clone(&self.identity),
            profiles: Arc::clone(&self.profiles),
            timeout: self.timeout,
        }
    }
}

impl<I: IdentitySource, P: ProfileSource> SessionResolver<I, P> {
    pub fn new(identity: Arc<I>, profiles: Arc<P>, timeout: Option<Duration>) -> Self {
        Self {
            identity,
            profiles,
            timeout,
        }
    }

    /// Resolve the current gate state under `token`.
    ///
    /// No side effects beyond the two backend reads.
    pub async fn resolve(&self, token: ResolutionToken) -> Resolution {
        let identity = match self.bounded(self.identity.current_identity()).await {
            Ok(Ok(identity)) => identity,
            Ok(Err(err)) => {
                warn!(token = %token, %err, "identity lookup failed — treating as signed out");
                None
            }
            Err(_) => {
                warn!(token = %token, "identity lookup timed out — treating as signed out");
                None
            }
        };

        let Some(identity) = identity else {
            return Resolution {
                token,
                state: GateState::Unauthenticated,
            };
        };

        let complete = match self.bounded(self.profiles.is_profile_complete(&identity.id)).await {
            Ok(Ok(complete)) => complete,
            Ok(Err(err)) => {
                warn!(
                    token = %token,
                    identity_id = %identity.id,
                    %err,
                    "profile lookup failed — treating as incomplete"
                );
                false
            }
            Err(_) => {
                warn!(
                    token = %token,
                    identity_id = %identity.id,
                    "profile lookup timed out — treating as incomplete"
                );
                false
            }
        };

        Resolution {
            token,
            state: decide(Some(identity), complete),
        }
    }

    /// Apply the configured timeout to a backend call, when one is set.
    async fn bounded<F, T>(&self, fut: F) -> Result<T, tokio::time::error::Elapsed>
    where
        F: Future<Output = T>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await,
            None => Ok(fut.await),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
