//! Client configuration.
//!
//! Loaded from an optional `pmgate.toml`, then overridden by `PMGATE_*`
//! environment variables. Everything has a working default, so a missing
//! file is not an error.

use crate::gate::guard::GateTargets;
use crate::navigator::Target;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

const DEFAULT_LOGIN_TARGET: &str = "/login";
const DEFAULT_ONBOARDING_TARGET: &str = "/complete-profile";
const DEFAULT_HOME_TARGET: &str = "/company-overview";

// ─── TargetsConfig ───────────────────────────────────────────────────────────

/// Redirect targets (`[targets]` in pmgate.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TargetsConfig {
    /// Where unauthenticated visitors are sent.
    pub login: String,
    /// Where signed-in visitors with an unfinished profile are sent.
    pub onboarding: String,
    /// The default protected landing page (demo start location).
    pub home: String,
}

impl Default for TargetsConfig {
    fn default() -> Self {
        Self {
            login: DEFAULT_LOGIN_TARGET.to_string(),
            onboarding: DEFAULT_ONBOARDING_TARGET.to_string(),
            home: DEFAULT_HOME_TARGET.to_string(),
        }
    }
}

// ─── BackendConfig ───────────────────────────────────────────────────────────

/// Identity/profile backend tuning (`[backend]` in pmgate.toml).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Timeout applied to each identity/profile call, in milliseconds.
    /// A timed-out call fails closed like any other backend error.
    /// None = wait indefinitely.
    pub timeout_ms: Option<u64>,
}

// ─── GateConfig ──────────────────────────────────────────────────────────────

/// Top-level configuration for the gating client.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GateConfig {
    pub targets: TargetsConfig,
    pub backend: BackendConfig,
}

impl GateConfig {
    /// Load configuration: defaults ← TOML file (if given and present) ←
    /// `PMGATE_*` env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?
            }
            Some(path) => {
                warn!(path = %path.display(), "config file not found — using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Apply `PMGATE_*` environment variable overrides.
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("PMGATE_LOGIN_TARGET") {
            self.targets.login = v;
        }
        if let Ok(v) = std::env::var("PMGATE_ONBOARDING_TARGET") {
            self.targets.onboarding = v;
        }
        if let Ok(v) = std::env::var("PMGATE_HOME_TARGET") {
            self.targets.home = v;
        }
        if let Ok(v) = std::env::var("PMGATE_BACKEND_TIMEOUT_MS") {
            match v.parse::<u64>() {
                Ok(ms) => self.backend.timeout_ms = Some(ms),
                Err(_) => warn!(value = %v, "ignoring non-numeric PMGATE_BACKEND_TIMEOUT_MS"),
            }
        }
    }

    pub fn gate_targets(&self) -> GateTargets {
        GateTargets::new(
            Target::new(self.targets.login.clone()),
            Target::new(self.targets.onboarding.clone()),
        )
    }

    pub fn home_target(&self) -> Target {
        Target::new(self.targets.home.clone())
    }

    pub fn backend_timeout(&self) -> Option<Duration> {
        self.backend.timeout_ms.map(Duration::from_millis)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
