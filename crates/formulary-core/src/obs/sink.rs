//! Metrics sink boundary.
//!
//! Engine logic MUST NOT depend on obs::metrics directly.
//! All instrumentation flows through MetricsEvent and MetricsSink.
//!
//! This module is the only allowed bridge between execution logic
//! and the per-thread metrics state.
use crate::obs::metrics;
use std::cell::RefCell;

thread_local! {
    static SINK_OVERRIDE: RefCell<Option<*const dyn MetricsSink>> = RefCell::new(None);
}

///
/// CacheLookupOutcome
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CacheLookupOutcome {
    Hit,
    Miss,
    Stale,
}

///
/// PrefetchOutcome
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PrefetchOutcome {
    Planned,
    NotWorthwhile,
    NotPossible,
}

///
/// SelectionPath
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SelectionPath {
    Index,
    Prefetch,
}

///
/// TransactionOutcome
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransactionOutcome {
    Committed,
    Aborted,
}

///
/// MetricsEvent
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetricsEvent {
    CacheLookup {
        outcome: CacheLookupOutcome,
    },
    CacheEvaluation {
        admitted: u64,
        evicted: u64,
        records: u64,
        bytes: u64,
    },
    CachePayloadCaptured {
        bytes: u64,
    },
    PrefetchDecision {
        outcome: PrefetchOutcome,
        entities: u64,
    },
    SelectionBound {
        path: SelectionPath,
    },
    TransactionFinished {
        outcome: TransactionOutcome,
        structures: u64,
        insertions: u64,
        removals: u64,
    },
    FormulaComputed {
        formula: &'static str,
        rows: u64,
    },
}

///
/// MetricsSink
///

pub trait MetricsSink {
    fn record(&self, event: MetricsEvent);
}

/// GlobalMetricsSink
/// Default sink that writes into the per-thread metrics state.
/// Acts as the concrete sink when no scoped override is installed.

pub(crate) struct GlobalMetricsSink;

impl MetricsSink for GlobalMetricsSink {
    fn record(&self, event: MetricsEvent) {
        match event {
            MetricsEvent::CacheLookup { outcome } => metrics::with_state_mut(|m| match outcome {
                CacheLookupOutcome::Hit => m.ops.cache_hits = m.ops.cache_hits.saturating_add(1),
                CacheLookupOutcome::Miss => {
                    m.ops.cache_misses = m.ops.cache_misses.saturating_add(1);
                }
                CacheLookupOutcome::Stale => {
                    m.ops.cache_stale = m.ops.cache_stale.saturating_add(1);
                }
            }),

            MetricsEvent::CacheEvaluation {
                admitted,
                evicted,
                records,
                bytes,
            } => metrics::with_state_mut(|m| {
                m.ops.cache_evaluations = m.ops.cache_evaluations.saturating_add(1);
                m.ops.cache_admitted = m.ops.cache_admitted.saturating_add(admitted);
                m.ops.cache_evicted = m.ops.cache_evicted.saturating_add(evicted);
                // gauges
                m.ops.cache_records = records;
                m.ops.cache_bytes = bytes;
            }),

            MetricsEvent::CachePayloadCaptured { bytes } => metrics::with_state_mut(|m| {
                m.ops.payloads_captured = m.ops.payloads_captured.saturating_add(1);
                m.ops.payload_bytes = m.ops.payload_bytes.saturating_add(bytes);
            }),

            MetricsEvent::PrefetchDecision { outcome, entities } => {
                metrics::with_state_mut(|m| match outcome {
                    PrefetchOutcome::Planned => {
                        m.ops.prefetch_planned = m.ops.prefetch_planned.saturating_add(1);
                        m.ops.prefetched_entities =
                            m.ops.prefetched_entities.saturating_add(entities);
                    }
                    PrefetchOutcome::NotWorthwhile => {
                        m.ops.prefetch_not_worthwhile =
                            m.ops.prefetch_not_worthwhile.saturating_add(1);
                    }
                    PrefetchOutcome::NotPossible => {
                        m.ops.prefetch_not_possible = m.ops.prefetch_not_possible.saturating_add(1);
                    }
                });
            }

            MetricsEvent::SelectionBound { path } => metrics::with_state_mut(|m| match path {
                SelectionPath::Index => {
                    m.ops.selection_index = m.ops.selection_index.saturating_add(1);
                }
                SelectionPath::Prefetch => {
                    m.ops.selection_prefetch = m.ops.selection_prefetch.saturating_add(1);
                }
            }),

            MetricsEvent::TransactionFinished {
                outcome,
                structures: _,
                insertions,
                removals,
            } => metrics::with_state_mut(|m| match outcome {
                TransactionOutcome::Committed => {
                    m.ops.tx_committed = m.ops.tx_committed.saturating_add(1);
                    m.ops.tx_insertions = m.ops.tx_insertions.saturating_add(insertions);
                    m.ops.tx_removals = m.ops.tx_removals.saturating_add(removals);
                }
                TransactionOutcome::Aborted => {
                    m.ops.tx_aborted = m.ops.tx_aborted.saturating_add(1);
                }
            }),

            MetricsEvent::FormulaComputed { formula, rows } => metrics::with_state_mut(|m| {
                m.ops.formulas_computed = m.ops.formulas_computed.saturating_add(1);
                m.ops.rows_computed = m.ops.rows_computed.saturating_add(rows);

                let entry = m.formulas.entry(formula.to_string()).or_default();
                entry.computes = entry.computes.saturating_add(1);
                entry.rows = entry.rows.saturating_add(rows);
            }),
        }
    }
}

pub(crate) const GLOBAL_METRICS_SINK: GlobalMetricsSink = GlobalMetricsSink;

pub(crate) fn record(event: MetricsEvent) {
    let override_ptr = SINK_OVERRIDE.with(|cell| *cell.borrow());
    if let Some(ptr) = override_ptr {
        // SAFETY:
        // - `ptr` was produced from a valid `&dyn MetricsSink` in `with_metrics_sink`.
        // - `with_metrics_sink` restores the previous pointer before returning,
        //   including unwind paths via `Guard::drop`.
        // - `record` is synchronous and never stores `ptr` beyond this call.
        // Only a shared reference is materialized, matching the borrow used to
        // install the override.
        unsafe { (&*ptr).record(event) };
    } else {
        GLOBAL_METRICS_SINK.record(event);
    }
}

/// Snapshot the current thread's metrics state.
///
/// `window_start_ms` filters by window start (`EventState::window_start_ms`),
/// not by per-event timestamps.
#[must_use]
pub fn metrics_report(window_start_ms: Option<u64>) -> metrics::EventReport {
    metrics::report_window_start(window_start_ms)
}

/// Reset all metrics state for the current thread.
pub fn metrics_reset_all() {
    metrics::reset_all();
}

/// Run a closure with a temporary metrics sink override.
pub fn with_metrics_sink<T>(sink: &dyn MetricsSink, f: impl FnOnce() -> T) -> T {
    struct Guard(Option<*const dyn MetricsSink>);

    impl Drop for Guard {
        fn drop(&mut self) {
            SINK_OVERRIDE.with(|cell| {
                *cell.borrow_mut() = self.0;
            });
        }
    }

    // SAFETY:
    // - `sink_ptr` is installed only for this dynamic scope.
    // - `Guard` restores the previous slot on all exits, including panic.
    // - `record` only dereferences synchronously and never persists `sink_ptr`.
    let sink_ptr = unsafe { std::mem::transmute::<&dyn MetricsSink, *const dyn MetricsSink>(sink) };
    let prev = SINK_OVERRIDE.with(|cell| {
        let mut slot = cell.borrow_mut();
        slot.replace(sink_ptr)
    });
    let _guard = Guard(prev);

    f()
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    #[derive(Default)]
    struct Recorder {
        events: RefCell<Vec<MetricsEvent>>,
    }

    impl MetricsSink for Recorder {
        fn record(&self, event: MetricsEvent) {
            self.events.borrow_mut().push(event);
        }
    }

    fn lookup(outcome: CacheLookupOutcome) -> MetricsEvent {
        MetricsEvent::CacheLookup { outcome }
    }

    fn override_installed() -> bool {
        SINK_OVERRIDE.with(|cell| cell.borrow().is_some())
    }

    #[test]
    fn scoped_sinks_nest_and_unwind() {
        let query = Recorder::default();
        let maintenance = Recorder::default();

        with_metrics_sink(&query, || {
            record(lookup(CacheLookupOutcome::Miss));
            with_metrics_sink(&maintenance, || {
                record(lookup(CacheLookupOutcome::Stale));
            });
            record(lookup(CacheLookupOutcome::Hit));
        });
        assert!(!override_installed());

        assert_eq!(
            *query.events.borrow(),
            vec![
                lookup(CacheLookupOutcome::Miss),
                lookup(CacheLookupOutcome::Hit)
            ]
        );
        assert_eq!(
            *maintenance.events.borrow(),
            vec![lookup(CacheLookupOutcome::Stale)]
        );

        let unwound = catch_unwind(AssertUnwindSafe(|| {
            with_metrics_sink(&query, || panic!("evaluation aborted"));
        }));
        assert!(unwound.is_err());
        assert!(!override_installed());
    }

    #[test]
    fn default_sink_counts_engine_events() {
        metrics_reset_all();

        record(lookup(CacheLookupOutcome::Hit));
        record(lookup(CacheLookupOutcome::Stale));
        record(MetricsEvent::PrefetchDecision {
            outcome: PrefetchOutcome::Planned,
            entities: 12,
        });
        record(MetricsEvent::PrefetchDecision {
            outcome: PrefetchOutcome::NotWorthwhile,
            entities: 0,
        });
        record(MetricsEvent::SelectionBound {
            path: SelectionPath::Prefetch,
        });
        record(MetricsEvent::TransactionFinished {
            outcome: TransactionOutcome::Committed,
            structures: 2,
            insertions: 3,
            removals: 1,
        });
        for bytes in [640, 320] {
            record(MetricsEvent::CacheEvaluation {
                admitted: 1,
                evicted: 0,
                records: bytes / 64,
                bytes,
            });
        }

        let ops = metrics_report(None).counters.expect("counters").ops;
        assert_eq!((ops.cache_hits, ops.cache_stale), (1, 1));
        assert_eq!((ops.prefetch_planned, ops.prefetch_not_worthwhile), (1, 1));
        assert_eq!(ops.prefetched_entities, 12);
        assert_eq!(ops.selection_prefetch, 1);
        assert_eq!((ops.tx_committed, ops.tx_insertions, ops.tx_removals), (1, 3, 1));
        // Evaluations accumulate; record and byte counts are gauges.
        assert_eq!(ops.cache_admitted, 2);
        assert_eq!((ops.cache_records, ops.cache_bytes), (5, 320));
    }

    #[test]
    fn report_groups_computations_by_formula() {
        metrics_reset_all();
        let window_start = metrics::with_state(|m| m.window_start_ms);
        for (formula, rows) in [("AndFormula", 3), ("OrFormula", 10), ("AndFormula", 5)] {
            record(MetricsEvent::FormulaComputed { formula, rows });
        }

        let report = metrics_report(Some(window_start));
        let and = report
            .formula_counters
            .iter()
            .find(|summary| summary.formula == "AndFormula")
            .expect("and summary");
        assert_eq!((and.computes, and.rows), (2, 8));
        assert_eq!(report.formula_counters.len(), 2);

        assert!(
            metrics_report(Some(window_start.saturating_add(1)))
                .counters
                .is_none()
        );
    }
}
