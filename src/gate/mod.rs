//! Access gating core.
//!
//! Everything that decides whether the signed-in user may see protected
//! views lives here: the pure decision function, the session resolver with
//! its staleness tokens, the auth-change bridge, and the route guard state
//! machine that ties them together.

pub mod bridge;
pub mod guard;
pub mod resolver;

use crate::identity::Identity;
use serde::Serialize;

/// What the route guard currently believes about access eligibility.
///
/// Exactly one `GateState` is current per guard instance. It changes only
/// through resolver results or an explicit sign-out event, never by direct
/// mutation from rendering code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GateState {
    /// A resolution is in flight — render nothing, navigate nowhere.
    Checking,
    /// No valid identity session.
    Unauthenticated,
    /// Signed in, but the onboarding profile is not finished.
    OnboardingIncomplete(Identity),
    /// Signed in with a complete profile — protected content may render.
    Authorized(Identity),
}

impl GateState {
    /// The identity this state was decided for, if any.
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            GateState::OnboardingIncomplete(identity) | GateState::Authorized(identity) => {
                Some(identity)
            }
            GateState::Checking | GateState::Unauthenticated => None,
        }
    }

    pub fn is_authorized(&self) -> bool {
        matches!(self, GateState::Authorized(_))
    }
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateState::Checking => write!(f, "checking"),
            GateState::Unauthenticated => write!(f, "unauthenticated"),
            GateState::OnboardingIncomplete(_) => write!(f, "onboarding_incomplete"),
            GateState::Authorized(_) => write!(f, "authorized"),
        }
    }
}

/// Pure gate decision — total over its domain, no I/O, no failure modes.
///
/// - no identity → `Unauthenticated`
/// - identity, incomplete profile → `OnboardingIncomplete`
/// - identity, complete profile → `Authorized`
pub fn decide(identity: Option<Identity>, profile_complete: bool) -> GateState {
    match identity {
        None => GateState::Unauthenticated,
        Some(identity) if profile_complete => GateState::Authorized(identity),
        Some(identity) => GateState::OnboardingIncomplete(identity),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn user(id: &str) -> Identity {
        Identity {
            id: id.to_string(),
            email: format!("{id}@example.com"),
        }
    }

    #[test]
    fn absent_identity_is_unauthenticated() {
        assert_eq!(decide(None, false), GateState::Unauthenticated);
        assert_eq!(decide(None, true), GateState::Unauthenticated);
    }

    #[test]
    fn incomplete_profile_gates_on_onboarding() {
        assert_eq!(
            decide(Some(user("u1")), false),
            GateState::OnboardingIncomplete(user("u1"))
        );
    }

    #[test]
    fn complete_profile_authorizes() {
        assert_eq!(
            decide(Some(user("u1")), true),
            GateState::Authorized(user("u1"))
        );
    }

    proptest! {
        // Totality: every input maps to exactly one non-Checking state.
        #[test]
        fn decide_is_total(identity in proptest::option::of(("[a-z0-9]{1,12}", "[a-z]{1,8}")), complete: bool) {
            let identity = identity.map(|(id, name)| Identity {
                id,
                email: format!("{name}@example.com"),
            });
            let state = decide(identity.clone(), complete);
            prop_assert_ne!(&state, &GateState::Checking);
            match (identity, complete) {
                (None, _) => prop_assert_eq!(state, GateState::Unauthenticated),
                (Some(i), true) => prop_assert_eq!(state, GateState::Authorized(i)),
                (Some(i), false) => prop_assert_eq!(state, GateState::OnboardingIncomplete(i)),
            }
        }
    }
}
