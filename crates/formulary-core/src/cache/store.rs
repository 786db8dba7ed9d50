use crate::{
    cache::FlattenedFormula,
    config::CacheConfig,
    formula::{Formula, FormulaKind},
    obs::sink::{self, CacheLookupOutcome, MetricsEvent},
};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, warn};

///
/// EvaluationSummary
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EvaluationSummary {
    pub admitted: u64,
    pub evicted: u64,
    pub records: u64,
    pub bytes: u64,
}

///
/// CacheStats
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CacheStats {
    /// Admitted records, with or without a captured payload.
    pub records: u64,
    /// Records holding a captured payload.
    pub payloads: u64,
    /// Candidates observed since the last evaluation.
    pub adepts: u64,
    /// Bytes reserved by admitted records.
    pub bytes: u64,
}

///
/// FormulaCache
///
/// Two-stage cache of flattened subtrees. Expensive subtrees seen by
/// `register` become adepts; `evaluate_adepts` admits the most worthwhile
/// adepts within the byte budget; `capture` flattens admitted subtrees once a
/// query computed them. Records left unused for too many evaluations cool
/// down and are evicted.
///
/// Shared across threads; one internal lock guards all state.
///

#[derive(Debug)]
pub struct FormulaCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

#[derive(Debug, Default)]
struct CacheState {
    records: HashMap<u64, CachedRecord>,
    adepts: HashMap<u64, Adept>,
}

#[derive(Debug)]
struct CachedRecord {
    payload: Option<Arc<FlattenedFormula>>,
    size_bytes: u64,
    cost_to_performance: u64,
    usage: u32,
    cooling: u32,
}

#[derive(Debug, Default)]
struct Adept {
    usage: u32,
    size_bytes: Option<u64>,
    cost_to_performance: u64,
}

enum Lookup {
    Hit(Arc<FlattenedFormula>),
    Stale,
    Pending,
    Absent,
}

fn worth(cost_to_performance: u64, usage: u32, size_bytes: u64) -> u64 {
    cost_to_performance.saturating_mul(u64::from(usage)) / size_bytes.max(1)
}

impl CacheState {
    fn lookup(&mut self, record_hash: u64, live_transactional_id_hash: u64) -> Lookup {
        let Some(record) = self.records.get_mut(&record_hash) else {
            return Lookup::Absent;
        };
        record.usage = record.usage.saturating_add(1);

        match &record.payload {
            Some(payload) if payload.is_valid_for(live_transactional_id_hash) => {
                Lookup::Hit(Arc::clone(payload))
            }
            Some(_) => {
                record.payload = None;
                Lookup::Stale
            }
            None => Lookup::Pending,
        }
    }

    fn bytes(&self) -> u64 {
        self.records
            .values()
            .map(|r| r.size_bytes)
            .fold(0, u64::saturating_add)
    }
}

impl FormulaCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn is_eligible(&self, formula: &Formula) -> bool {
        formula.is_cacheable() && formula.estimated_cost() >= self.config.min_complexity_threshold
    }

    /// Return `formula` with every subtree that has a valid payload replaced
    /// by its flattened form. Other eligible subtrees are counted as misses
    /// and remembered as adepts.
    #[must_use]
    pub fn register(&self, formula: Formula) -> Formula {
        if !self.config.enabled {
            return formula;
        }

        let mut state = self.state.lock();
        self.register_node(&mut state, &formula).unwrap_or(formula)
    }

    fn register_node(&self, state: &mut CacheState, formula: &Formula) -> Option<Formula> {
        if self.is_eligible(formula) {
            let record_hash = formula.hash();
            let outcome = match state.lookup(record_hash, formula.transactional_id_hash()) {
                Lookup::Hit(payload) => {
                    sink::record(MetricsEvent::CacheLookup {
                        outcome: CacheLookupOutcome::Hit,
                    });
                    return Some(Formula::flattened(payload));
                }
                Lookup::Stale => CacheLookupOutcome::Stale,
                Lookup::Pending => CacheLookupOutcome::Miss,
                Lookup::Absent => {
                    self.note_adept(state, record_hash);
                    CacheLookupOutcome::Miss
                }
            };
            sink::record(MetricsEvent::CacheLookup { outcome });
        }

        let inner = formula.inner_formulas();
        let replaced: Vec<Option<Formula>> = inner
            .iter()
            .map(|inner| self.register_node(state, inner))
            .collect();
        if replaced.iter().all(Option::is_none) {
            return None;
        }

        let rebuilt = inner
            .into_iter()
            .zip(replaced)
            .map(|(original, replaced)| replaced.unwrap_or_else(|| original.clone()))
            .collect();

        formula.clone_with_inner_formulas(rebuilt).ok()
    }

    fn note_adept(&self, state: &mut CacheState, record_hash: u64) {
        let capacity = self.config.max_adepts;
        if let Some(adept) = state.adepts.get_mut(&record_hash) {
            adept.usage = adept.usage.saturating_add(1);
        } else if state.adepts.len() < capacity {
            state.adepts.insert(
                record_hash,
                Adept {
                    usage: 1,
                    ..Adept::default()
                },
            );
        } else {
            warn!(
                record_hash,
                capacity, "formula cache adept discarded, anteroom is full"
            );
        }
    }

    /// Flatten every computed subtree that was admitted and awaits its
    /// payload; remember size and ratio of computed adepts. Returns the
    /// number of payloads captured.
    pub fn capture(&self, formula: &Formula) -> usize {
        if !self.config.enabled {
            return 0;
        }

        let mut state = self.state.lock();
        self.capture_node(&mut state, formula)
    }

    fn capture_node(&self, state: &mut CacheState, formula: &Formula) -> usize {
        if matches!(formula.kind(), FormulaKind::Flattened(_)) || formula.computed().is_none() {
            return 0;
        }

        let mut captured = 0;
        let record_hash = formula.hash();
        if let Some(record) = state.records.get_mut(&record_hash) {
            // Payloads over the limit stay uncaptured; the record cools down.
            if record.payload.is_none()
                && let Ok(payload) = FlattenedFormula::from_formula(formula)
                && payload.estimated_size_bytes() <= self.config.max_payload_bytes
            {
                let bytes = payload.estimated_size_bytes();
                record.size_bytes = bytes;
                record.cost_to_performance = formula.cost_to_performance_ratio();
                record.payload = Some(Arc::new(payload));
                captured += 1;

                sink::record(MetricsEvent::CachePayloadCaptured { bytes });
            }
        } else if let Some(adept) = state.adepts.get_mut(&record_hash)
            && adept.size_bytes.is_none()
        {
            adept.size_bytes = Some(estimated_size_bytes(formula));
            adept.cost_to_performance = formula.cost_to_performance_ratio();
        }

        captured
            + formula
                .inner_formulas()
                .into_iter()
                .map(|inner| self.capture_node(state, inner))
                .sum::<usize>()
    }

    /// Rank records and adepts by worth, keep what fits the byte budget, and
    /// start a new usage window.
    pub fn evaluate_adepts(&self) -> EvaluationSummary {
        let mut state = self.state.lock();
        let mut summary = EvaluationSummary::default();

        // Cool down records nobody asked for.
        let cool_enough = self.config.cool_enough;
        let before = state.records.len();
        state.records.retain(|_, record| {
            record.cooling = if record.usage == 0 {
                record.cooling.saturating_add(1)
            } else {
                0
            };
            record.cooling <= cool_enough
        });
        summary.evicted += u64::try_from(before - state.records.len()).unwrap_or(u64::MAX);

        // (worth, record_hash, is_adept)
        let mut candidates: Vec<(u64, u64, bool)> = state
            .records
            .iter()
            .map(|(hash, r)| {
                (
                    worth(r.cost_to_performance, r.usage.max(1), r.size_bytes),
                    *hash,
                    false,
                )
            })
            .collect();
        for (hash, adept) in &state.adepts {
            let Some(size_bytes) = adept.size_bytes else {
                continue;
            };
            if adept.usage >= self.config.min_usage_threshold
                && size_bytes <= self.config.max_payload_bytes
            {
                candidates.push((
                    worth(adept.cost_to_performance, adept.usage, size_bytes),
                    *hash,
                    true,
                ));
            }
        }
        candidates.sort_unstable_by(|a, b| b.cmp(a));

        let adepts = std::mem::take(&mut state.adepts);
        let mut records = std::mem::take(&mut state.records);
        let mut budget = self.config.max_size_bytes;
        for (_, hash, is_adept) in candidates {
            if is_adept {
                let Some(adept) = adepts.get(&hash) else {
                    continue;
                };
                let size_bytes = adept.size_bytes.unwrap_or(0);
                if size_bytes <= budget {
                    budget -= size_bytes;
                    summary.admitted += 1;
                    state.records.insert(
                        hash,
                        CachedRecord {
                            payload: None,
                            size_bytes,
                            cost_to_performance: adept.cost_to_performance,
                            usage: 0,
                            cooling: 0,
                        },
                    );
                }
            } else if let Some(mut record) = records.remove(&hash) {
                if record.size_bytes <= budget {
                    budget -= record.size_bytes;
                    record.usage = 0;
                    state.records.insert(hash, record);
                } else {
                    summary.evicted += 1;
                }
            }
        }

        summary.records = u64::try_from(state.records.len()).unwrap_or(u64::MAX);
        summary.bytes = state.bytes();

        debug!(
            admitted = summary.admitted,
            evicted = summary.evicted,
            records = summary.records,
            bytes = summary.bytes,
            "formula cache evaluated"
        );
        sink::record(MetricsEvent::CacheEvaluation {
            admitted: summary.admitted,
            evicted: summary.evicted,
            records: summary.records,
            bytes: summary.bytes,
        });

        summary
    }

    /// Store a payload produced elsewhere. Rejected when larger than the
    /// payload limit or the remaining budget.
    pub fn insert(&self, payload: Arc<FlattenedFormula>) -> bool {
        let size_bytes = payload.estimated_size_bytes();
        if !self.config.enabled || size_bytes > self.config.max_payload_bytes {
            return false;
        }

        let mut state = self.state.lock();
        let record_hash = payload.header().record_hash;
        let reserved = state
            .bytes()
            .saturating_sub(state.records.get(&record_hash).map_or(0, |r| r.size_bytes));
        if reserved.saturating_add(size_bytes) > self.config.max_size_bytes {
            return false;
        }

        state.adepts.remove(&record_hash);
        state.records.insert(
            record_hash,
            CachedRecord {
                payload: Some(payload),
                size_bytes,
                cost_to_performance: u64::MAX,
                usage: 0,
                cooling: 0,
            },
        );

        true
    }

    /// Payload recorded for `record_hash`, if still valid for the live sources.
    #[must_use]
    pub fn get(
        &self,
        record_hash: u64,
        live_transactional_id_hash: u64,
    ) -> Option<Arc<FlattenedFormula>> {
        let state = self.state.lock();
        state
            .records
            .get(&record_hash)
            .and_then(|r| r.payload.as_ref())
            .filter(|payload| payload.is_valid_for(live_transactional_id_hash))
            .cloned()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();

        CacheStats {
            records: u64::try_from(state.records.len()).unwrap_or(u64::MAX),
            payloads: u64::try_from(state.records.values().filter(|r| r.payload.is_some()).count())
                .unwrap_or(u64::MAX),
            adepts: u64::try_from(state.adepts.len()).unwrap_or(u64::MAX),
            bytes: state.bytes(),
        }
    }
}

// Size of the payload a computed subtree would flatten into, without building it.
fn estimated_size_bytes(formula: &Formula) -> u64 {
    let rows = formula.computed().map_or(0, |result| result.len());
    let ids = formula.gather_transactional_ids().len();

    u64::try_from(rows.saturating_mul(4).saturating_add(ids.saturating_mul(8)))
        .unwrap_or(u64::MAX)
        .saturating_add(16)
}
