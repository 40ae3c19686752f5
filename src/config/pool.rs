//! Pool configuration structures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable prefix for [`TokenPoolConfig::from_env`].
const ENV_PREFIX: &str = "TOKEN_POOL_";

/// Token pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenPoolConfig {
    /// Keepalive timeout in milliseconds; `0` disables health expiry.
    pub keepalive_timeout_ms: u64,
    /// Interval between health sweep cycles, in milliseconds.
    pub sweep_interval_ms: u64,
    /// Default selection wait when a compatible but busy token exists.
    pub match_exists_timeout_ms: u64,
    /// Default selection wait when no compatible token is registered at all.
    pub no_match_exists_timeout_ms: u64,
}

impl Default for TokenPoolConfig {
    fn default() -> Self {
        Self {
            keepalive_timeout_ms: 0,
            sweep_interval_ms: 10_000,
            match_exists_timeout_ms: 60_000,
            no_match_exists_timeout_ms: 10_000,
        }
    }
}

impl TokenPoolConfig {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// A human-readable description of the first offending field.
    pub fn validate(&self) -> Result<(), String> {
        if self.sweep_interval_ms == 0 {
            return Err("sweep_interval_ms must be greater than 0".into());
        }
        if self.match_exists_timeout_ms == 0 {
            return Err("match_exists_timeout_ms must be greater than 0".into());
        }
        if self.no_match_exists_timeout_ms == 0 {
            return Err("no_match_exists_timeout_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse a configuration from a JSON string and validate it.
    ///
    /// # Errors
    ///
    /// A description of the parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a configuration from `TOKEN_POOL_*` environment variables,
    /// falling back to defaults for unset fields. Reads a `.env` file first
    /// if one is present.
    ///
    /// Recognized variables: `TOKEN_POOL_KEEPALIVE_TIMEOUT_MS`,
    /// `TOKEN_POOL_SWEEP_INTERVAL_MS`, `TOKEN_POOL_MATCH_EXISTS_TIMEOUT_MS`,
    /// `TOKEN_POOL_NO_MATCH_EXISTS_TIMEOUT_MS`.
    ///
    /// # Errors
    ///
    /// A description of the first unparsable variable, or a validation
    /// failure.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        for (field, target) in [
            ("KEEPALIVE_TIMEOUT_MS", &mut cfg.keepalive_timeout_ms),
            ("SWEEP_INTERVAL_MS", &mut cfg.sweep_interval_ms),
            ("MATCH_EXISTS_TIMEOUT_MS", &mut cfg.match_exists_timeout_ms),
            (
                "NO_MATCH_EXISTS_TIMEOUT_MS",
                &mut cfg.no_match_exists_timeout_ms,
            ),
        ] {
            let name = format!("{ENV_PREFIX}{field}");
            if let Ok(raw) = std::env::var(&name) {
                *target = raw
                    .parse()
                    .map_err(|e| format!("{name} is not a valid duration in ms: {e}"))?;
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Keepalive timeout as a `Duration`; `None` when expiry is disabled.
    #[must_use]
    pub const fn keepalive_timeout(&self) -> Option<Duration> {
        if self.keepalive_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.keepalive_timeout_ms))
        }
    }

    /// Sweep interval as a `Duration`.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Default match-exists selection timeout as a `Duration`.
    #[must_use]
    pub const fn match_exists_timeout(&self) -> Duration {
        Duration::from_millis(self.match_exists_timeout_ms)
    }

    /// Default no-match-exists selection timeout as a `Duration`.
    #[must_use]
    pub const fn no_match_exists_timeout(&self) -> Duration {
        Duration::from_millis(self.no_match_exists_timeout_ms)
    }
}
