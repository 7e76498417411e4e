//! pmgate — session/profile gating core for the PM Planner client.
//!
//! On every mount and every identity-change notification the route guard
//! converges on exactly one of {unauthenticated, onboarding-incomplete,
//! authorized} and drives navigation accordingly. Resolutions are tagged
//! with monotonic tokens so a slow, stale check can never overwrite a newer
//! result; backend failures always fail closed.

pub mod config;
pub mod gate;
pub mod identity;
pub mod navigator;
pub mod profile;

pub use gate::guard::{GateSnapshot, GateTargets, RouteGuard};
pub use gate::{decide, GateState};
pub use identity::{Identity, IdentitySource};
pub use navigator::{Navigator, Target};
pub use profile::ProfileSource;
