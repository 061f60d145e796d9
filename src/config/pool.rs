//! Pool and manager configuration structures.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::PoolKey;

/// Environment variable prefix recognised by [`ManagerConfig::from_env`].
pub const ENV_PREFIX: &str = "LIFECYCLE_POOL_";

const DEFAULT_MAX_SIZE: usize = 16;
const DEFAULT_REFRESH_INTERVAL_MINUTES: u64 = 5;
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30_000;

/// What `acquire` does when a key is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ExhaustionPolicy {
    /// Wait for a release, failing with `PoolExhausted` after the timeout.
    BlockWithTimeout {
        /// Maximum wait in milliseconds.
        timeout_ms: u64,
    },
    /// Fail with `PoolExhausted` immediately.
    FailFast,
}

impl ExhaustionPolicy {
    /// How long `acquire` may wait, `None` meaning it must not wait.
    #[must_use]
    pub const fn wait(&self) -> Option<Duration> {
        match self {
            Self::BlockWithTimeout { timeout_ms } => Some(Duration::from_millis(*timeout_ms)),
            Self::FailFast => None,
        }
    }
}

impl Default for ExhaustionPolicy {
    fn default() -> Self {
        Self::BlockWithTimeout {
            timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
        }
    }
}

/// Per-key pool configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum live resources per key (free plus in use).
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// How long a free resource may idle before a sweep disposes it.
    #[serde(default = "default_refresh_interval_minutes")]
    pub refresh_interval_minutes: u64,
    /// Behaviour when the key is at capacity.
    #[serde(default)]
    pub exhaustion_policy: ExhaustionPolicy,
}

const fn default_max_size() -> usize {
    DEFAULT_MAX_SIZE
}

const fn default_refresh_interval_minutes() -> u64 {
    DEFAULT_REFRESH_INTERVAL_MINUTES
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            refresh_interval_minutes: DEFAULT_REFRESH_INTERVAL_MINUTES,
            exhaustion_policy: ExhaustionPolicy::default(),
        }
    }
}

impl PoolConfig {
    /// Config with the given cap and default refresh and exhaustion settings.
    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            max_size,
            ..Self::default()
        }
    }

    /// Set the refresh interval in minutes.
    #[must_use]
    pub const fn refresh_minutes(mut self, minutes: u64) -> Self {
        self.refresh_interval_minutes = minutes;
        self
    }

    /// Set the exhaustion policy.
    #[must_use]
    pub const fn exhaustion(mut self, policy: ExhaustionPolicy) -> Self {
        self.exhaustion_policy = policy;
        self
    }

    /// Refresh interval as a duration.
    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_minutes.saturating_mul(60))
    }

    /// Validate pool configuration values.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_size == 0 {
            return Err("max_size must be greater than 0".into());
        }
        if self.refresh_interval_minutes == 0 {
            return Err("refresh_interval_minutes must be greater than 0".into());
        }
        if let ExhaustionPolicy::BlockWithTimeout { timeout_ms: 0 } = self.exhaustion_policy {
            return Err("block_with_timeout requires timeout_ms greater than 0".into());
        }
        Ok(())
    }
}

/// Root configuration for a [`crate::runtime::PoolManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Settings applied to every key without an override.
    #[serde(default)]
    pub defaults: PoolConfig,
    /// Per-key overrides, keyed by `principal<key_separator>target`.
    #[serde(default)]
    pub keys: HashMap<String, PoolConfig>,
    /// Separator between principal and target in key strings.
    #[serde(default = "default_key_separator")]
    pub key_separator: String,
    /// Track resources in every registry even while it is deactivated.
    #[serde(default)]
    pub lifecycle_always_active: bool,
    /// Seconds between background sweeps; `None` or `0` disables the sweeper.
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
    /// Drop bookkeeping for keys with no live resources on each sweep.
    #[serde(default)]
    pub evict_inactive_keys: bool,
    /// Restrict key eviction to these targets; empty means every target.
    #[serde(default)]
    pub evictable_targets: Vec<String>,
}

fn default_key_separator() -> String {
    "@".into()
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            defaults: PoolConfig::default(),
            keys: HashMap::new(),
            key_separator: default_key_separator(),
            lifecycle_always_active: false,
            sweep_interval_secs: None,
            evict_inactive_keys: false,
            evictable_targets: Vec::new(),
        }
    }
}

impl ManagerConfig {
    /// Validate defaults and every override.
    ///
    /// # Errors
    ///
    /// Returns a message naming the invalid pool or field.
    pub fn validate(&self) -> Result<(), String> {
        self.defaults
            .validate()
            .map_err(|e| format!("defaults invalid: {e}"))?;
        for (name, pool) in &self.keys {
            pool.validate()
                .map_err(|e| format!("pool `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Background sweep period, if enabled.
    #[must_use]
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Per-key overrides with their key strings parsed.
    #[must_use]
    pub fn key_overrides(&self) -> HashMap<PoolKey, PoolConfig> {
        self.keys
            .iter()
            .map(|(name, cfg)| (PoolKey::parse(name, &self.key_separator), *cfg))
            .collect()
    }

    /// Parse manager configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from flat string properties.
    ///
    /// Values are trimmed before parsing, so `"true "` reads as `true`.
    /// Recognised keys: `max_size`, `refresh_interval_minutes`,
    /// `exhaustion_policy` (`fail_fast` or `block_with_timeout`),
    /// `acquire_timeout_ms`, `key_separator`, `lifecycle_always_active`,
    /// `sweep_interval_secs`, `evict_inactive_keys` and `evictable_targets`
    /// (comma separated). Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns a message naming the property that failed to parse, or a
    /// validation message.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self, String> {
        let trimmed: HashMap<&str, &str> = props
            .iter()
            .map(|(k, v)| (k.trim(), v.trim()))
            .collect();
        let mut cfg = Self::default();

        if let Some(v) = trimmed.get("max_size") {
            cfg.defaults.max_size = parse_prop("max_size", v)?;
        }
        if let Some(v) = trimmed.get("refresh_interval_minutes") {
            cfg.defaults.refresh_interval_minutes = parse_prop("refresh_interval_minutes", v)?;
        }
        let timeout_ms = trimmed
            .get("acquire_timeout_ms")
            .map(|v| parse_prop::<u64>("acquire_timeout_ms", v))
            .transpose()?
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_MS);
        cfg.defaults.exhaustion_policy = match trimmed.get("exhaustion_policy").copied() {
            None | Some("block_with_timeout") => ExhaustionPolicy::BlockWithTimeout { timeout_ms },
            Some("fail_fast") => ExhaustionPolicy::FailFast,
            Some(other) => return Err(format!("exhaustion_policy: unknown policy `{other}`")),
        };
        if let Some(v) = trimmed.get("key_separator") {
            cfg.key_separator = (*v).to_string();
        }
        if let Some(v) = trimmed.get("lifecycle_always_active") {
            cfg.lifecycle_always_active = parse_prop("lifecycle_always_active", v)?;
        }
        if let Some(v) = trimmed.get("sweep_interval_secs") {
            cfg.sweep_interval_secs = Some(parse_prop("sweep_interval_secs", v)?);
        }
        if let Some(v) = trimmed.get("evict_inactive_keys") {
            cfg.evict_inactive_keys = parse_prop("evict_inactive_keys", v)?;
        }
        if let Some(v) = trimmed.get("evictable_targets") {
            cfg.evictable_targets = v
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `LIFECYCLE_POOL_*` environment variables,
    /// loading a `.env` file first when one exists.
    ///
    /// `LIFECYCLE_POOL_MAX_SIZE=8` maps to the `max_size` property.
    ///
    /// # Errors
    ///
    /// Same as [`ManagerConfig::from_properties`].
    pub fn from_env() -> Result<Self, String> {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!(error = %e, "no .env file loaded");
        }
        let props: HashMap<String, String> = std::env::vars()
            .filter_map(|(k, v)| {
                k.strip_prefix(ENV_PREFIX)
                    .map(|name| (name.to_ascii_lowercase(), v))
            })
            .collect();
        Self::from_properties(&props)
    }
}

fn parse_prop<T>(name: &str, value: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| format!("{name}: cannot parse `{value}`: {e}"))
}
