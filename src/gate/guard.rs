// SPDX-License-Identifier: MIT
//! Route guard state machine.
//!
//! Owns the current [`GateState`], starts resolutions on mount and on every
//! identity change, and applies only the most recently started resolution's
//! result (last-token-wins). Navigation is the guard's only outward side
//! effect, and only the non-authorized states trigger it.
//!
//! # State machine
//!
//! ```text
//!  mount ──► Checking ──(resolve T0)──► Unauthenticated
//!                │                       OnboardingIncomplete
//!                │                       Authorized
//!                │
//!  change event ─┴─► mint Tn: absent → Unauthenticated immediately,
//!                    present → resolve(Tn); stale results are discarded
//! ```
//!
//! The machine never halts while mounted — a new change event always
//! re-enters the cycle. Unmount invalidates every in-flight token and
//! releases the change subscription exactly once.

use crate::gate::bridge::{AuthChangeBridge, Subscription};
use crate::gate::resolver::{Resolution, ResolutionToken, SessionResolver, TokenMint};
use crate::gate::GateState;
use crate::identity::{Identity, IdentitySource};
use crate::navigator::{NavigateOptions, Navigator, Target};
use crate::profile::ProfileSource;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Where each non-authorized state redirects.
#[derive(Debug, Clone)]
pub struct GateTargets {
    pub login: Target,
    pub onboarding: Target,
}

impl GateTargets {
    pub fn new(login: Target, onboarding: Target) -> Self {
        Self { login, onboarding }
    }
}

/// Serializable view of the guard for logging and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct GateSnapshot {
    #[serde(flatten)]
    pub state: GateState,
    pub latest_token: ResolutionToken,
    pub mounted: bool,
}

// ─── Transition core ─────────────────────────────────────────────────────────

/// Synchronous transition core.
///
/// Every mutation of the gate state flows through this type, which keeps
/// the token bookkeeping and the navigation side effects in one place.
/// Deterministic and directly drivable in tests; the async plumbing lives
/// in [`RouteGuard`].
pub struct GateMachine {
    state: GateState,
    tokens: TokenMint,
    navigator: Arc<dyn Navigator>,
    targets: GateTargets,
    /// The redirect target last handed to the navigator. Compared before
    /// navigating again so repeated identical states redirect at most once.
    applied_target: Option<Target>,
    mounted: bool,
    state_tx: watch::Sender<GateState>,
}

impl GateMachine {
    pub fn new(navigator: Arc<dyn Navigator>, targets: GateTargets) -> Self {
        let (state_tx, _) = watch::channel(GateState::Checking);
        Self {
            state: GateState::Checking,
            tokens: TokenMint::new(),
            navigator,
            targets,
            applied_target: None,
            mounted: false,
            state_tx,
        }
    }

    /// Enter `Checking` and mint the initial token. The caller starts the
    /// matching resolution.
    pub fn mount(&mut self) -> ResolutionToken {
        self.mounted = true;
        self.state = GateState::Checking;
        self.applied_target = None;
        let _ = self.state_tx.send(self.state.clone());
        let token = self.tokens.mint();
        debug!(token = %token, "route guard mounted");
        token
    }

    /// Apply a finished resolution. Returns `false` when the result was
    /// discarded because it is stale or the guard is unmounted.
    pub fn apply(&mut self, resolution: Resolution) -> bool {
        if !self.mounted {
            debug!(token = %resolution.token, "resolution arrived after unmount — discarded");
            return false;
        }
        if !self.tokens.is_current(resolution.token) {
            debug!(
                token = %resolution.token,
                latest = %self.tokens.latest(),
                "stale resolution discarded"
            );
            return false;
        }
        self.transition(resolution.state);
        true
    }

    /// Feed a normalized identity change. Mints a fresh token, invalidating
    /// every in-flight resolution. An absent identity settles immediately;
    /// a present one returns the token the caller must resolve.
    pub fn on_change(&mut self, identity: Option<Identity>) -> Option<ResolutionToken> {
        if !self.mounted {
            return None;
        }
        let token = self.tokens.mint();
        match identity {
            None => {
                // Sign-out needs no profile lookup.
                self.transition(GateState::Unauthenticated);
                None
            }
            Some(identity) => {
                debug!(
                    token = %token,
                    identity_id = %identity.id,
                    "identity changed — resolving onboarding status"
                );
                // Keep the current state until the resolution lands; the
                // fresh token already protects against stale overwrites.
                Some(token)
            }
        }
    }

    /// Stop applying results. Pending resolutions become guaranteed no-ops.
    pub fn unmount(&mut self) {
        self.mounted = false;
        self.tokens.invalidate();
        debug!("route guard unmounted — in-flight resolutions invalidated");
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    pub fn subscribe_state(&self) -> watch::Receiver<GateState> {
        self.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> GateSnapshot {
        GateSnapshot {
            state: self.state.clone(),
            latest_token: self.tokens.latest(),
            mounted: self.mounted,
        }
    }

    fn transition(&mut self, next: GateState) {
        if next != self.state {
            info!(from = %self.state, to = %next, "gate state transition");
            self.state = next;
            let _ = self.state_tx.send(self.state.clone());
        }

        let target = match &self.state {
            GateState::Unauthenticated => Some(self.targets.login.clone()),
            GateState::OnboardingIncomplete(_) => Some(self.targets.onboarding.clone()),
            GateState::Checking | GateState::Authorized(_) => None,
        };
        let Some(target) = target else {
            // No redirect owed by this state; a later redirect must not be
            // suppressed by a target applied before we were authorized.
            self.applied_target = None;
            return;
        };

        if self.applied_target.as_ref() == Some(&target) {
            return; // Already redirected there for this run of states.
        }
        match self
            .navigator
            .go(&target, NavigateOptions { replace: true })
        {
            Ok(()) => {
                info!(target = %target, "gating redirect");
                self.applied_target = Some(target);
            }
            Err(err) => warn!(%err, target = %target, "navigation failed — not retried"),
        }
    }
}

// ─── Route guard ─────────────────────────────────────────────────────────────

fn lock(machine: &Mutex<GateMachine>) -> MutexGuard<'_, GateMachine> {
    machine.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Wraps protected content behind the gating state machine.
///
/// `mount` starts the initial resolution and opens the change subscription;
/// `render` yields the wrapped content only while `Authorized`; `unmount`
/// releases the subscription and invalidates in-flight work. One guard
/// instance owns one subscription and one gate state — nothing is shared
/// across instances.
pub struct RouteGuard<I: IdentitySource, P: ProfileSource> {
    machine: Arc<Mutex<GateMachine>>,
    resolver: SessionResolver<I, P>,
    bridge: AuthChangeBridge<I>,
    subscription: Option<Subscription>,
}

impl<I: IdentitySource, P: ProfileSource> RouteGuard<I, P> {
    pub fn new(
        identity: Arc<I>,
        profiles: Arc<P>,
        navigator: Arc<dyn Navigator>,
        targets: GateTargets,
        backend_timeout: Option<Duration>,
    ) -> Self {
        Self {
            machine: Arc::new(Mutex::new(GateMachine::new(navigator, targets))),
            resolver: SessionResolver::new(Arc::clone(&identity), profiles, backend_timeout),
            bridge: AuthChangeBridge::new(identity),
            subscription: None,
        }
    }

    /// Start gating: enter `Checking`, kick off the initial resolution, and
    /// open the change subscription. Mounting an already-mounted guard is a
    /// logged no-op.
    pub fn mount(&mut self) {
        if self.subscription.is_some() {
            warn!("route guard mounted twice — ignored");
            return;
        }

        let token = lock(&self.machine).mount();
        spawn_resolution(&self.machine, &self.resolver, token);

        let machine = Arc::clone(&self.machine);
        let resolver = self.resolver.clone();
        self.subscription = Some(self.bridge.subscribe(move |identity| {
            let next = lock(&machine).on_change(identity);
            if let Some(token) = next {
                spawn_resolution(&machine, &resolver, token);
            }
        }));
    }

    /// Stop gating: release the subscription (exactly once) and turn any
    /// still-pending resolution into a no-op.
    pub fn unmount(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.release();
        }
        lock(&self.machine).unmount();
    }

    pub fn state(&self) -> GateState {
        lock(&self.machine).state().clone()
    }

    /// Watch state transitions. Useful for `wait_for`-style assertions and
    /// for driving a surrounding render loop.
    pub fn state_changes(&self) -> watch::Receiver<GateState> {
        lock(&self.machine).subscribe_state()
    }

    /// Render the wrapped content — `Some` only while `Authorized`.
    pub fn render<R>(&self, content: impl FnOnce(&Identity) -> R) -> Option<R> {
        match lock(&self.machine).state() {
            GateState::Authorized(identity) => Some(content(identity)),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> GateSnapshot {
        lock(&self.machine).snapshot()
    }
}

impl<I: IdentitySource, P: ProfileSource> Drop for RouteGuard<I, P> {
    fn drop(&mut self) {
        self.unmount();
    }
}

fn spawn_resolution<I: IdentitySource, P: ProfileSource>(
    machine: &Arc<Mutex<GateMachine>>,
    resolver: &SessionResolver<I, P>,
    token: ResolutionToken,
) {
    let machine = Arc::clone(machine);
    let resolver = resolver.clone();
    tokio::spawn(async move {
        let resolution = resolver.resolve(token).await;
        lock(&machine).apply(resolution);
    });
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigator::NavigateError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every navigation that actually went through.
    #[derive(Default)]
    struct RecordingNavigator {
        calls: Mutex<Vec<Target>>,
        fail: AtomicUsize,
    }

    impl RecordingNavigator {
        fn calls(&self) -> Vec<Target> {
            self.calls.lock().unwrap().clone()
        }

        fn fail_next(&self) {
            self.fail.store(1, Ordering::SeqCst);
        }
    }

    impl Navigator for RecordingNavigator {
        fn current_location(&self) -> Target {
            self.calls
                .lock()
                .unwrap()
                .last()
                .cloned()
                .unwrap_or_else(|| Target::new("/"))
        }

        fn go(&self, target: &Target, _opts: NavigateOptions) -> Result<(), NavigateError> {
            if self.fail.swap(0, Ordering::SeqCst) == 1 {
                return Err(NavigateError::Rejected(target.as_str().to_string()));
            }
            self.calls.lock().unwrap().push(target.clone());
            Ok(())
        }
    }

    fn targets() -> GateTargets {
        GateTargets::new(Target::new("/login"), Target::new("/complete-profile"))
    }

    fn user(id: &str) -> Identity {
        Identity {
            id: id.to_string(),
            email: format!("{id}@example.com"),
        }
    }

    fn machine() -> (GateMachine, Arc<RecordingNavigator>) {
        let nav = Arc::new(RecordingNavigator::default());
        (GateMachine::new(Arc::clone(&nav) as _, targets()), nav)
    }

    #[test]
    fn mount_enters_checking_without_navigating() {
        let (mut m, nav) = machine();
        m.mount();
        assert_eq!(m.state(), &GateState::Checking);
        assert!(nav.calls().is_empty());
    }

    #[test]
    fn current_resolution_applies_and_redirects() {
        let (mut m, nav) = machine();
        let t0 = m.mount();
        assert!(m.apply(Resolution {
            token: t0,
            state: GateState::Unauthenticated,
        }));
        assert_eq!(m.state(), &GateState::Unauthenticated);
        assert_eq!(nav.calls(), vec![Target::new("/login")]);
    }

    #[test]
    fn stale_resolution_is_discarded() {
        // Scenario: mount starts a slow resolution; a sign-out event lands
        // first. The slow "authorized" answer must not win.
        let (mut m, nav) = machine();
        let t0 = m.mount();
        assert_eq!(m.on_change(None), None);
        assert_eq!(m.state(), &GateState::Unauthenticated);

        let applied = m.apply(Resolution {
            token: t0,
            state: GateState::Authorized(user("u1")),
        });
        assert!(!applied);
        assert_eq!(m.state(), &GateState::Unauthenticated);
        assert_eq!(nav.calls(), vec![Target::new("/login")]);
    }

    #[test]
    fn change_to_present_identity_mints_a_fresh_token() {
        let (mut m, _) = machine();
        let t0 = m.mount();
        let t1 = m.on_change(Some(user("u1"))).unwrap();
        assert!(t0 < t1);

        // The mount-time resolution is now stale.
        assert!(!m.apply(Resolution {
            token: t0,
            state: GateState::Unauthenticated,
        }));
        // The fresh one applies.
        assert!(m.apply(Resolution {
            token: t1,
            state: GateState::Authorized(user("u1")),
        }));
        assert!(m.state().is_authorized());
    }

    #[test]
    fn repeated_unauthenticated_navigates_once() {
        let (mut m, nav) = machine();
        let t0 = m.mount();
        m.apply(Resolution {
            token: t0,
            state: GateState::Unauthenticated,
        });
        // Another sign-out event while already on the login target.
        m.on_change(None);
        assert_eq!(nav.calls().len(), 1);
    }

    #[test]
    fn redirect_resumes_after_an_authorized_stretch() {
        let (mut m, nav) = machine();
        let t0 = m.mount();
        m.apply(Resolution {
            token: t0,
            state: GateState::Unauthenticated,
        });

        let t1 = m.on_change(Some(user("u1"))).unwrap();
        m.apply(Resolution {
            token: t1,
            state: GateState::Authorized(user("u1")),
        });

        // Sign out again: even though /login was applied earlier, the
        // authorized stretch cleared it, so the redirect happens again.
        m.on_change(None);
        assert_eq!(
            nav.calls(),
            vec![Target::new("/login"), Target::new("/login")]
        );
    }

    #[test]
    fn results_after_unmount_are_ignored() {
        let (mut m, nav) = machine();
        let t0 = m.mount();
        m.unmount();
        assert!(!m.apply(Resolution {
            token: t0,
            state: GateState::Authorized(user("u1")),
        }));
        assert!(nav.calls().is_empty());
        assert_eq!(m.on_change(Some(user("u1"))), None);
    }

    #[test]
    fn onboarding_incomplete_redirects_to_onboarding_target() {
        let (mut m, nav) = machine();
        let t0 = m.mount();
        m.apply(Resolution {
            token: t0,
            state: GateState::OnboardingIncomplete(user("u1")),
        });
        assert_eq!(nav.calls(), vec![Target::new("/complete-profile")]);
    }

    #[test]
    fn failed_navigation_is_absorbed() {
        let (mut m, nav) = machine();
        nav.fail_next();
        let t0 = m.mount();
        m.apply(Resolution {
            token: t0,
            state: GateState::Unauthenticated,
        });
        // The failure is logged, not propagated; state still transitioned.
        assert_eq!(m.state(), &GateState::Unauthenticated);
        assert!(nav.calls().is_empty());

        // The target was not recorded as applied, so the next sign-out
        // event retries the redirect.
        m.on_change(None);
        assert_eq!(nav.calls(), vec![Target::new("/login")]);
    }
}
