use serde::{Deserialize, Serialize};
use std::{
    cell::RefCell,
    cmp::Ordering,
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

///
/// EventState
/// Ephemeral, in-memory counters for engine operations.
/// State is kept per thread; each query runs on a single thread.
///

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EventState {
    pub ops: EventOps,
    pub formulas: BTreeMap<String, FormulaCounters>,
    pub window_start_ms: u64,
}

impl Default for EventState {
    fn default() -> Self {
        Self {
            ops: EventOps::default(),
            formulas: BTreeMap::new(),
            window_start_ms: now_millis(),
        }
    }
}

///
/// EventOps
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EventOps {
    // Cache lookups
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_stale: u64,

    // Cache maintenance
    pub cache_evaluations: u64,
    pub cache_admitted: u64,
    pub cache_evicted: u64,
    pub cache_records: u64,
    pub cache_bytes: u64,
    pub payloads_captured: u64,
    pub payload_bytes: u64,

    // Prefetch planning
    pub prefetch_planned: u64,
    pub prefetch_not_worthwhile: u64,
    pub prefetch_not_possible: u64,
    pub prefetched_entities: u64,

    // Selection binding
    pub selection_index: u64,
    pub selection_prefetch: u64,

    // Transactions
    pub tx_committed: u64,
    pub tx_aborted: u64,
    pub tx_insertions: u64,
    pub tx_removals: u64,

    // Formula evaluation
    pub formulas_computed: u64,
    pub rows_computed: u64,
}

///
/// FormulaCounters
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct FormulaCounters {
    pub computes: u64,
    pub rows: u64,
}

thread_local! {
    static EVENT_STATE: RefCell<EventState> = RefCell::new(EventState::default());
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Borrow metrics immutably.
pub(crate) fn with_state<R>(f: impl FnOnce(&EventState) -> R) -> R {
    EVENT_STATE.with(|m| f(&m.borrow()))
}

/// Borrow metrics mutably.
pub(crate) fn with_state_mut<R>(f: impl FnOnce(&mut EventState) -> R) -> R {
    EVENT_STATE.with(|m| f(&mut m.borrow_mut()))
}

/// Reset all counters and restart the window.
pub(crate) fn reset_all() {
    with_state_mut(|m| *m = EventState::default());
}

///
/// EventReport
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EventReport {
    /// Ephemeral runtime counters since `window_start_ms`.
    pub counters: Option<EventState>,
    /// Per-formula-kind counters and averages.
    pub formula_counters: Vec<FormulaSummary>,
}

///
/// FormulaSummary
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct FormulaSummary {
    pub formula: String,
    pub computes: u64,
    pub rows: u64,
    pub avg_rows_per_compute: f64,
}

/// Build a report, or an empty one when the requested window starts after ours.
#[must_use]
pub(crate) fn report_window_start(window_start_ms: Option<u64>) -> EventReport {
    let snap = with_state(Clone::clone);
    if window_start_ms.is_some_and(|start| start > snap.window_start_ms) {
        return EventReport::default();
    }

    report_from(snap)
}

#[allow(clippy::cast_precision_loss)]
fn report_from(snap: EventState) -> EventReport {
    let mut formula_counters: Vec<FormulaSummary> = snap
        .formulas
        .iter()
        .map(|(formula, counters)| FormulaSummary {
            formula: formula.clone(),
            computes: counters.computes,
            rows: counters.rows,
            avg_rows_per_compute: if counters.computes > 0 {
                counters.rows as f64 / counters.computes as f64
            } else {
                0.0
            },
        })
        .collect();

    formula_counters.sort_by(|a, b| match b.computes.cmp(&a.computes) {
        Ordering::Equal => a.formula.cmp(&b.formula),
        other => other,
    });

    EventReport {
        counters: Some(snap),
        formula_counters,
    }
}

///
/// TESTS
///

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn reset_all_clears_state() {
        with_state_mut(|m| {
            m.ops.cache_hits = 3;
            m.ops.tx_committed = 2;
            m.formulas.insert(
                "AndFormula".to_string(),
                FormulaCounters {
                    computes: 1,
                    rows: 4,
                },
            );
        });

        reset_all();

        with_state(|m| {
            assert_eq!(m.ops.cache_hits, 0);
            assert_eq!(m.ops.tx_committed, 0);
            assert!(m.formulas.is_empty());
        });
    }

    #[test]
    fn report_sorts_formulas_by_compute_count() {
        reset_all();
        with_state_mut(|m| {
            m.formulas.insert(
                "OrFormula".to_string(),
                FormulaCounters {
                    computes: 2,
                    rows: 6,
                },
            );
            m.formulas.insert(
                "AndFormula".to_string(),
                FormulaCounters {
                    computes: 2,
                    rows: 2,
                },
            );
            m.formulas.insert(
                "NotFormula".to_string(),
                FormulaCounters {
                    computes: 5,
                    rows: 5,
                },
            );
        });

        let report = report_window_start(None);
        let names: Vec<_> = report
            .formula_counters
            .iter()
            .map(|f| f.formula.as_str())
            .collect();

        // Order by compute count desc, then name asc.
        assert_eq!(names, ["NotFormula", "AndFormula", "OrFormula"]);
        assert_eq!(report.formula_counters[0].avg_rows_per_compute, 1.0);
        assert_eq!(report.formula_counters[2].avg_rows_per_compute, 3.0);
    }

    #[test]
    fn report_serializes_to_json() {
        reset_all();
        with_state_mut(|m| m.ops.cache_misses = 7);

        let json = serde_json::to_value(report_window_start(None)).expect("report serializes");
        assert_eq!(json["counters"]["ops"]["cache_misses"], 7);
    }
}
