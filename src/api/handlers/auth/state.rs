//! Auth state and configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::cli::globals::GlobalArgs;

use super::rate_limit::{RateLimitPolicy, RateLimiter};
use super::tokens::TokenIssuer;

const DEFAULT_GLOBAL_POINTS: u32 = 10;
const DEFAULT_SENSITIVE_POINTS: u32 = 1;
const DEFAULT_WINDOW_SECONDS: u64 = 1;

/// Admission configuration. Token TTLs live on [`TokenIssuer`], which reads
/// them from `GlobalArgs`; this struct only carries the rate limit tiers.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    global_policy: RateLimitPolicy,
    sensitive_policy: RateLimitPolicy,
    // Paths that also consume the sensitive budget, matched exactly.
    sensitive_paths: Vec<String>,
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        let window = Duration::from_secs(DEFAULT_WINDOW_SECONDS);
        Self {
            global_policy: RateLimitPolicy::global(DEFAULT_GLOBAL_POINTS, window),
            sensitive_policy: RateLimitPolicy::sensitive(DEFAULT_SENSITIVE_POINTS, window),
            sensitive_paths: vec!["/register".to_string()],
        }
    }

    #[must_use]
    pub fn from_globals(globals: &GlobalArgs) -> Self {
        let window = Duration::from_secs(globals.rate_limit_window_seconds.max(1));
        Self {
            global_policy: RateLimitPolicy::global(globals.rate_limit_points, window),
            sensitive_policy: RateLimitPolicy::sensitive(
                globals.sensitive_rate_limit_points,
                window,
            ),
            ..Self::new()
        }
    }

    #[must_use]
    pub const fn global_policy(&self) -> &RateLimitPolicy {
        &self.global_policy
    }

    #[must_use]
    pub const fn sensitive_policy(&self) -> &RateLimitPolicy {
        &self.sensitive_policy
    }

    #[must_use]
    pub fn is_sensitive(&self, path: &str) -> bool {
        self.sensitive_paths.iter().any(|p| p == path)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared per-process auth wiring: configuration, the token issuer and the
/// admission limiter. Cheap to clone behind an `Arc` into every request.
pub struct AuthState {
    config: AuthConfig,
    issuer: TokenIssuer,
    limiter: Arc<dyn RateLimiter>,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig, issuer: TokenIssuer, limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            config,
            issuer,
            limiter,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub const fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    #[must_use]
    pub fn limiter(&self) -> &dyn RateLimiter {
        self.limiter.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    #[test]
    fn defaults_match_contract() {
        let config = AuthConfig::new();
        assert_eq!(config.global_policy().points, 10);
        assert_eq!(config.sensitive_policy().points, 1);
        assert_eq!(config.global_policy().window, Duration::from_secs(1));
        assert!(config.is_sensitive("/register"));
        assert!(!config.is_sensitive("/login"));
    }

    #[test]
    fn from_globals_overrides_budgets() {
        let mut globals = GlobalArgs::new(SecretString::from("sekret".to_string()));
        globals.rate_limit_points = 42;
        globals.sensitive_rate_limit_points = 3;
        globals.rate_limit_window_seconds = 5;

        let config = AuthConfig::from_globals(&globals);
        assert_eq!(config.global_policy().points, 42);
        assert_eq!(config.sensitive_policy().points, 3);
        assert_eq!(config.global_policy().window, Duration::from_secs(5));
        // sensitive paths keep their default
        assert!(config.is_sensitive("/register"));
    }
}
