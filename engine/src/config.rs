//! Engine configuration
//!
//! Env-driven knobs with compiled defaults. The config is built once and
//! passed explicitly into the services that need it; nothing reads ambient
//! state at call time.

use chrono::Duration;

/// Days a pending invitation stays answerable
pub const DEFAULT_INVITATION_TTL_DAYS: i64 = 5;

/// Seconds the settlement coordinator waits on a ledger call before
/// classifying the outcome as Pending
pub const DEFAULT_LEDGER_TIMEOUT_SECS: u64 = 30;

/// Runtime configuration for the lifecycle engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub invitation_ttl_days: i64,
    pub ledger_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            invitation_ttl_days: DEFAULT_INVITATION_TTL_DAYS,
            ledger_timeout_secs: DEFAULT_LEDGER_TIMEOUT_SECS,
        }
    }
}

impl EngineConfig {
    /// Load from environment, falling back to compiled defaults
    pub fn from_env() -> Self {
        Self {
            invitation_ttl_days: env_or("INVITATION_TTL_DAYS", DEFAULT_INVITATION_TTL_DAYS),
            ledger_timeout_secs: env_or("LEDGER_TIMEOUT_SECS", DEFAULT_LEDGER_TIMEOUT_SECS),
        }
    }

    pub fn invitation_ttl(&self) -> Duration {
        Duration::days(self.invitation_ttl_days)
    }

    pub fn ledger_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ledger_timeout_secs)
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_spec_deadlines() {
        let config = EngineConfig::default();
        assert_eq!(config.invitation_ttl_days, 5);
        assert_eq!(config.invitation_ttl(), Duration::days(5));
    }
}
