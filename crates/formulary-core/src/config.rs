//! Engine configuration.
//!
//! Every calibration constant used by the planner and the formula cache lives
//! here as a named, overridable value. Configuration is loaded from TOML; any
//! omitted field falls back to its default.

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

///
/// ConfigError
///

#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("failed to parse engine config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid engine config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read engine config '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    fn zero(field: &'static str) -> Self {
        Self::Invalid {
            field,
            reason: "must be greater than zero".to_string(),
        }
    }
}

///
/// EngineConfig
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub cost: CostConfig,
    pub cache: CacheConfig,
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;

        Ok(config)
    }

    /// Reject values that would disable the planner or the cache silently.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cost.validate()?;
        self.cache.validate()
    }
}

///
/// CostConfig
///
/// Calibration of the prefetch optimizer against the host's entity-fetch latency.
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CostConfig {
    /// Cost units paid per fetched entity and per content requirement.
    pub per_requirement_cost: u64,

    /// Upper bound on the smallest conjunctive bitmap for which a
    /// cardinality-driven prefetch is considered at all.
    pub prefetch_cardinality_threshold: usize,
}

impl CostConfig {
    pub const DEFAULT_PER_REQUIREMENT_COST: u64 = 148;
    pub const DEFAULT_PREFETCH_CARDINALITY_THRESHOLD: usize = 1000;

    /// Estimated cost of hydrating `entities` entities with `requirements` content parts.
    #[must_use]
    pub fn prefetch_cost(&self, entities: usize, requirements: usize) -> u64 {
        let widen = |n: usize| u64::try_from(n).unwrap_or(u64::MAX);

        widen(entities)
            .saturating_mul(widen(requirements))
            .saturating_mul(self.per_requirement_cost)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.per_requirement_cost == 0 {
            return Err(ConfigError::zero("cost.per_requirement_cost"));
        }
        if self.prefetch_cardinality_threshold == 0 {
            return Err(ConfigError::zero("cost.prefetch_cardinality_threshold"));
        }

        Ok(())
    }
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            per_requirement_cost: Self::DEFAULT_PER_REQUIREMENT_COST,
            prefetch_cardinality_threshold: Self::DEFAULT_PREFETCH_CARDINALITY_THRESHOLD,
        }
    }
}

///
/// CacheConfig
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub enabled: bool,

    /// Total byte budget for admitted payloads.
    pub max_size_bytes: u64,

    /// Minimal number of lookups between two evaluations for an adept to be admitted.
    pub min_usage_threshold: u32,

    /// Minimal estimated cost for a subtree to be considered for caching at all.
    pub min_complexity_threshold: u64,

    /// Payloads larger than this are never admitted.
    pub max_payload_bytes: u64,

    /// Number of evaluations a record may stay unused before it is evicted.
    pub cool_enough: u32,

    /// Adepts collected beyond this count between evaluations are discarded.
    pub max_adepts: usize,
}

impl CacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size_bytes == 0 {
            return Err(ConfigError::zero("cache.max_size_bytes"));
        }
        if self.min_usage_threshold == 0 {
            return Err(ConfigError::zero("cache.min_usage_threshold"));
        }
        if self.max_payload_bytes == 0 {
            return Err(ConfigError::zero("cache.max_payload_bytes"));
        }
        if self.max_adepts == 0 {
            return Err(ConfigError::zero("cache.max_adepts"));
        }
        if self.max_payload_bytes > self.max_size_bytes {
            return Err(ConfigError::Invalid {
                field: "cache.max_payload_bytes",
                reason: format!(
                    "must not exceed cache.max_size_bytes ({})",
                    self.max_size_bytes
                ),
            });
        }

        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_bytes: 100 * 1024 * 1024,
            min_usage_threshold: 2,
            min_complexity_threshold: 10_000,
            max_payload_bytes: 1024 * 1024,
            cool_enough: 3,
            max_adepts: 10_000,
        }
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = EngineConfig::from_toml_str("").expect("empty config should parse");

        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.cost.per_requirement_cost, 148);
        assert_eq!(config.cost.prefetch_cardinality_threshold, 1000);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = EngineConfig::from_toml_str(
            r"
            [cost]
            per_requirement_cost = 300

            [cache]
            enabled = false
            ",
        )
        .expect("partial config should parse");

        assert_eq!(config.cost.per_requirement_cost, 300);
        assert_eq!(config.cost.prefetch_cardinality_threshold, 1000);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.cool_enough, 3);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = EngineConfig::from_toml_str("[cost]\nper_entity_cost = 1\n")
            .expect_err("unknown field should fail");

        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_thresholds_are_rejected() {
        let err = EngineConfig::from_toml_str("[cost]\nprefetch_cardinality_threshold = 0\n")
            .expect_err("zero threshold should fail");

        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "cost.prefetch_cardinality_threshold",
                ..
            }
        ));
    }

    #[test]
    fn payload_limit_must_fit_cache_budget() {
        let err = EngineConfig::from_toml_str(
            "[cache]\nmax_size_bytes = 1024\nmax_payload_bytes = 2048\n",
        )
        .expect_err("oversized payload limit should fail");

        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "cache.max_payload_bytes",
                ..
            }
        ));
    }

    #[test]
    fn prefetch_cost_saturates() {
        let cost = CostConfig::default();

        assert_eq!(cost.prefetch_cost(10, 2), 2960);
        assert_eq!(cost.prefetch_cost(usize::MAX, usize::MAX), u64::MAX);
        assert_eq!(cost.prefetch_cost(usize::MAX, 0), 0);
        assert_eq!(cost.prefetch_cost(0, 3), 0);
    }
}
