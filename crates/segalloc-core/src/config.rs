//! Allocator configuration.
//!
//! Every knob can be set through a `SEGALLOC_*` environment variable:
//! - `SEGALLOC_ARENA_SIZE`: bytes per slab arena (default 1M).
//! - `SEGALLOC_MAX_ALLOCATION`: largest single request (default 128M, at least 8M).
//! - `SEGALLOC_BACKING_LIMIT`: total bytes the backing store may map (default unbounded).
//! - `SEGALLOC_LARGE_RETAIN`: free dedicated chunks kept per large class (default 2).
//! - `SEGALLOC_LARGE_QUARANTINE`: released dedicated arenas whose addresses stay
//!   reserved (default 256, 0 unmaps them at once).
//! - `SEGALLOC_POISON`: fill released chunks with a poison byte (default off).
//! - `SEGALLOC_LOG_LEVEL`: minimum lifecycle record level (default warn).
//! - `SEGALLOC_LOG_CAPACITY`: lifecycle ring capacity (default 4096, 0 disables).
//!
//! Sizes accept `K`, `M` and `G` suffixes (`64K`, `8M`, `1G`).

use crate::error::ConfigError;
use crate::log::AllocatorLogLevel;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

/// Smallest accepted `max_allocation`.
pub const MIN_MAX_ALLOCATION: usize = 8 * MIB;

/// Smallest accepted `arena_size`.
pub const MIN_ARENA_SIZE: usize = 64 * KIB;

pub const ENV_ARENA_SIZE: &str = "SEGALLOC_ARENA_SIZE";
pub const ENV_MAX_ALLOCATION: &str = "SEGALLOC_MAX_ALLOCATION";
pub const ENV_BACKING_LIMIT: &str = "SEGALLOC_BACKING_LIMIT";
pub const ENV_LARGE_RETAIN: &str = "SEGALLOC_LARGE_RETAIN";
pub const ENV_LARGE_QUARANTINE: &str = "SEGALLOC_LARGE_QUARANTINE";
pub const ENV_POISON: &str = "SEGALLOC_POISON";
pub const ENV_LOG_LEVEL: &str = "SEGALLOC_LOG_LEVEL";
pub const ENV_LOG_CAPACITY: &str = "SEGALLOC_LOG_CAPACITY";

/// Tunables for one allocator instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
    pub arena_size: usize,
    pub max_allocation: usize,
    pub backing_limit: Option<usize>,
    pub large_retain_per_class: usize,
    /// Tombstones kept for released dedicated arenas. A stale release into a
    /// tombstone is still detected; past this many the oldest is unmapped.
    pub large_quarantine: usize,
    pub poison_freed: bool,
    pub log_level: AllocatorLogLevel,
    pub log_capacity: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            arena_size: MIB,
            max_allocation: 128 * MIB,
            backing_limit: None,
            large_retain_per_class: 2,
            large_quarantine: 256,
            poison_freed: false,
            log_level: AllocatorLogLevel::Warn,
            log_capacity: 4096,
        }
    }
}

impl AllocatorConfig {
    /// Reads the process environment on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`AllocatorConfig::from_env`] with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_ARENA_SIZE) {
            config.arena_size = parse_size(ENV_ARENA_SIZE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_ALLOCATION) {
            config.max_allocation = parse_size(ENV_MAX_ALLOCATION, &raw)?;
        }
        if let Some(raw) = lookup(ENV_BACKING_LIMIT) {
            config.backing_limit = match raw.trim().to_ascii_lowercase().as_str() {
                "" | "none" | "unlimited" => None,
                _ => Some(parse_size(ENV_BACKING_LIMIT, &raw)?),
            };
        }
        if let Some(raw) = lookup(ENV_LARGE_RETAIN) {
            config.large_retain_per_class = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidNumber {
                    var: ENV_LARGE_RETAIN,
                    value: raw.clone(),
                })?;
        }
        if let Some(raw) = lookup(ENV_LARGE_QUARANTINE) {
            config.large_quarantine = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidNumber {
                    var: ENV_LARGE_QUARANTINE,
                    value: raw.clone(),
                })?;
        }
        if let Some(raw) = lookup(ENV_POISON) {
            config.poison_freed = parse_bool(ENV_POISON, &raw)?;
        }
        if let Some(raw) = lookup(ENV_LOG_LEVEL) {
            // Unknown level names keep the default, like the mode variables do.
            config.log_level = AllocatorLogLevel::from_str_loose(&raw).unwrap_or_default();
        }
        if let Some(raw) = lookup(ENV_LOG_CAPACITY) {
            config.log_capacity = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidNumber {
                    var: ENV_LOG_CAPACITY,
                    value: raw.clone(),
                })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks the lower bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_allocation < MIN_MAX_ALLOCATION {
            return Err(ConfigError::MaxAllocationTooSmall {
                value: self.max_allocation,
                min: MIN_MAX_ALLOCATION,
            });
        }
        if self.arena_size < MIN_ARENA_SIZE {
            return Err(ConfigError::ArenaTooSmall {
                value: self.arena_size,
                min: MIN_ARENA_SIZE,
            });
        }
        Ok(())
    }
}

/// Parses `4096`, `64K`, `8M`, `1G` (case-insensitive, optional trailing `B`).
pub fn parse_size(var: &'static str, raw: &str) -> Result<usize, ConfigError> {
    let invalid = || ConfigError::InvalidSize {
        var,
        value: raw.to_string(),
    };
    let s = raw.trim().to_ascii_uppercase();
    let s = s.strip_suffix("IB").or_else(|| s.strip_suffix('B')).unwrap_or(&s);
    let (digits, shift) = match s.as_bytes().last() {
        Some(b'K') => (&s[..s.len() - 1], 10),
        Some(b'M') => (&s[..s.len() - 1], 20),
        Some(b'G') => (&s[..s.len() - 1], 30),
        _ => (s, 0),
    };
    let value: usize = digits.trim().parse().map_err(|_| invalid())?;
    value.checked_mul(1usize << shift).ok_or_else(invalid)
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" | "" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            var,
            value: raw.to_string(),
        }),
    }
}
