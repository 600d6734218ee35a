use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};

/// Which cache backs handle resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    Disabled,
    Unbounded,
    Lru,
    #[default]
    Soft,
    Weak,
}

impl std::fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CachePolicy::Disabled => write!(f, "disabled"),
            CachePolicy::Unbounded => write!(f, "unbounded"),
            CachePolicy::Lru => write!(f, "lru"),
            CachePolicy::Soft => write!(f, "soft"),
            CachePolicy::Weak => write!(f, "weak"),
        }
    }
}

impl std::str::FromStr for CachePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "disabled" | "none" => Ok(CachePolicy::Disabled),
            "unbounded" => Ok(CachePolicy::Unbounded),
            "lru" => Ok(CachePolicy::Lru),
            "soft" => Ok(CachePolicy::Soft),
            "weak" => Ok(CachePolicy::Weak),
            _ => Err(format!(
                "Invalid cache policy '{}'. Must be one of: disabled, unbounded, lru, soft, weak",
                s
            )),
        }
    }
}

/// When a cached handle is refreshed from its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    /// Only when the caller asks for it.
    Manual,
    /// Each time the handle is resolved.
    #[default]
    OnResolve,
    /// On resolve and on every checked access.
    OnCall,
}

impl std::fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheStrategy::Manual => write!(f, "manual"),
            CacheStrategy::OnResolve => write!(f, "on_resolve"),
            CacheStrategy::OnCall => write!(f, "on_call"),
        }
    }
}

impl std::str::FromStr for CacheStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "manual" => Ok(CacheStrategy::Manual),
            "on_resolve" => Ok(CacheStrategy::OnResolve),
            "on_call" => Ok(CacheStrategy::OnCall),
            _ => Err(format!(
                "Invalid cache strategy '{}'. Must be one of: manual, on_resolve, on_call",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    #[serde(default)]
    pub policy: CachePolicy,
    #[serde(default)]
    pub strategy: CacheStrategy,
    /// Entries per filesystem for the `lru` policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lru_capacity: Option<usize>,
    /// Handles kept strongly reachable by the `soft` policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_retain: Option<usize>,
    /// Reaper wake-up interval for the `soft` and `weak` policies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaper_poll_ms: Option<u64>,
}

impl CacheConfig {
    pub fn get_policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn get_strategy(&self) -> CacheStrategy {
        self.strategy
    }

    pub fn get_lru_capacity(&self) -> usize {
        self.lru_capacity.unwrap_or_else(super::default_lru_capacity)
    }

    pub fn get_soft_retain(&self) -> usize {
        self.soft_retain.unwrap_or_else(super::default_soft_retain)
    }

    pub fn get_reaper_poll_ms(&self) -> u64 {
        self.reaper_poll_ms
            .unwrap_or_else(super::default_reaper_poll_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
}

const MAX_REAPER_POLL_MS: u64 = 60000;

pub fn validate_cache_config(config: &CacheConfig) -> Result<()> {
    if config.get_lru_capacity() == 0 {
        return Err(CacheError::Config(
            "lru_capacity must be a positive integer".to_string(),
        ));
    }

    let poll_ms = config.get_reaper_poll_ms();
    if poll_ms == 0 {
        return Err(CacheError::Config(
            "reaper_poll_ms must be a positive integer".to_string(),
        ));
    }
    if poll_ms > MAX_REAPER_POLL_MS {
        tracing::warn!(
            "reaper_poll_ms ({}) is above recommended maximum of {}ms. \
             Shutdown may wait this long for the reaper thread.",
            poll_ms,
            MAX_REAPER_POLL_MS
        );
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<()> {
    validate_cache_config(&config.cache)
}
