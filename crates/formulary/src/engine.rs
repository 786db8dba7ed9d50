use crate::error::Error;
use formulary_core::{
    bitmap::Bitmap,
    cache::{CacheStats, EvaluationSummary, FormulaCache},
    config::{ConfigError, EngineConfig},
    entity::EntityFetcher,
    formula::Formula,
    query::{QueryOutcome, QueryPlan},
};
use std::{fs, path::Path, sync::Arc};
use tracing::{debug, info};

///
/// Engine
///
/// Owns the validated configuration and the formula cache shared by every
/// query. Plans built here carry both; the caller drives cache maintenance
/// by calling `evaluate_cache` on its own schedule.
///

#[derive(Clone, Debug)]
pub struct Engine {
    config: EngineConfig,
    cache: Arc<FormulaCache>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, Error> {
        config.validate()?;
        info!(
            cache_enabled = config.cache.enabled,
            cache_bytes = config.cache.max_size_bytes,
            per_requirement_cost = config.cost.per_requirement_cost,
            "formulary engine configured"
        );

        Ok(Self {
            cache: Arc::new(FormulaCache::new(config.cache)),
            config,
        })
    }

    pub fn from_toml_str(source: &str) -> Result<Self, Error> {
        Self::new(EngineConfig::from_toml_str(source)?)
    }

    /// Load the configuration from a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_toml_str(&source)
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<FormulaCache> {
        &self.cache
    }

    /// Plan for `formula` over `entity_type`, carrying the engine's cost
    /// calibration and cache.
    #[must_use]
    pub fn plan(&self, entity_type: impl Into<String>, formula: Formula) -> QueryPlan {
        QueryPlan::new(entity_type, formula)
            .with_cost(self.config.cost)
            .with_cache(Arc::clone(&self.cache))
    }

    pub fn execute(
        &self,
        plan: QueryPlan,
        fetcher: &dyn EntityFetcher,
    ) -> Result<QueryOutcome, Error> {
        let outcome = plan.execute(fetcher)?;
        debug!(
            rows = outcome.result.len(),
            prefetched = ?outcome.prefetched,
            retried = outcome.retried,
            captured = outcome.captured,
            "query executed"
        );

        Ok(outcome)
    }

    /// Plan and execute in one step.
    pub fn query(
        &self,
        entity_type: impl Into<String>,
        formula: Formula,
        fetcher: &dyn EntityFetcher,
    ) -> Result<QueryOutcome, Error> {
        self.execute(self.plan(entity_type, formula), fetcher)
    }

    /// Admit worthwhile adepts and evict cooled records.
    pub fn evaluate_cache(&self) -> EvaluationSummary {
        self.cache.evaluate_adepts()
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
