//! Batch scanning on a bounded worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::unbounded;
use serde::Serialize;
use tracing::{info, warn};

use super::ConflictEngine;
use crate::conflict::Conflict;
use crate::content::UnitId;

/// Cooperative cancellation for batch scans. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; pairs not yet started are skipped.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// True once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// What happened to one pair of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PairOutcome {
    /// A new conflict was recorded.
    Detected(Conflict),
    /// The pair already had a conflict; it was returned unchanged.
    Existing(Conflict),
    /// No conflict; `similarity` is set when the gate ran.
    NoConflict {
        /// Embedding similarity of the pair.
        similarity: Option<f32>,
    },
    /// The pair could not be analysed (no embedding).
    Skipped {
        /// Why.
        reason: String,
    },
    /// The pair was rejected or hit an unexpected error.
    Failed {
        /// Error message.
        error: String,
    },
    /// Cancellation was requested before the pair started.
    Cancelled,
}

/// Outcome of one pair, with the pair as submitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairReport {
    /// First unit as submitted.
    pub unit_a: UnitId,
    /// Second unit as submitted.
    pub unit_b: UnitId,
    /// What happened.
    pub outcome: PairOutcome,
}

/// Per-pair results of a batch, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    /// One entry per submitted pair.
    pub pairs: Vec<PairReport>,
}

impl BatchReport {
    fn count(&self, pred: impl Fn(&PairOutcome) -> bool) -> usize {
        self.pairs.iter().filter(|p| pred(&p.outcome)).count()
    }

    /// Conflicts found or reused, in submission order.
    #[must_use]
    pub fn conflicts(&self) -> Vec<&Conflict> {
        self.pairs
            .iter()
            .filter_map(|p| match &p.outcome {
                PairOutcome::Detected(c) | PairOutcome::Existing(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    /// Pairs with a newly recorded conflict.
    #[must_use]
    pub fn detected_count(&self) -> usize {
        self.count(|o| matches!(o, PairOutcome::Detected(_)))
    }

    /// Pairs that reused an existing conflict.
    #[must_use]
    pub fn existing_count(&self) -> usize {
        self.count(|o| matches!(o, PairOutcome::Existing(_)))
    }

    /// Pairs without a conflict.
    #[must_use]
    pub fn no_conflict_count(&self) -> usize {
        self.count(|o| matches!(o, PairOutcome::NoConflict { .. }))
    }

    /// Pairs skipped for lack of an embedding.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.count(|o| matches!(o, PairOutcome::Skipped { .. }))
    }

    /// Pairs that failed.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, PairOutcome::Failed { .. }))
    }

    /// Pairs not started because of cancellation.
    #[must_use]
    pub fn cancelled_count(&self) -> usize {
        self.count(|o| matches!(o, PairOutcome::Cancelled))
    }

    /// Number of pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// True for an empty batch.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

type Job = (usize, UnitId, UnitId);

fn work(engine: &ConflictEngine, cancel: &CancellationToken, (_, unit_a, unit_b): Job) -> PairOutcome {
    if cancel.is_cancelled() {
        PairOutcome::Cancelled
    } else {
        engine.scan_pair(unit_a, unit_b)
    }
}

/// Runs every pair through the engine on `workers` scoped threads.
pub(super) fn run(
    engine: &ConflictEngine,
    pairs: &[(UnitId, UnitId)],
    workers: usize,
    cancel: &CancellationToken,
) -> BatchReport {
    let (job_tx, job_rx) = unbounded::<Job>();
    for (idx, (a, b)) in pairs.iter().enumerate() {
        // The receiver is alive until the end of this function.
        let _ = job_tx.send((idx, *a, *b));
    }
    drop(job_tx);

    let (out_tx, out_rx) = unbounded::<(usize, PairOutcome)>();
    let workers = workers.clamp(1, pairs.len().max(1));

    thread::scope(|scope| {
        let mut spawned = 0usize;
        for idx in 0..workers {
            let rx = job_rx.clone();
            let tx = out_tx.clone();
            let result = thread::Builder::new()
                .name(format!("medconflict-scan-{idx}"))
                .spawn_scoped(scope, move || {
                    for job in rx.iter() {
                        let idx = job.0;
                        if tx.send((idx, work(engine, cancel, job))).is_err() {
                            break;
                        }
                    }
                });
            match result {
                Ok(_) => spawned += 1,
                Err(e) => warn!(worker = idx, error = %e, "failed to spawn scan worker"),
            }
        }

        if spawned == 0 {
            for job in job_rx.iter() {
                let _ = out_tx.send((job.0, work(engine, cancel, job)));
            }
        }
    });
    drop(out_tx);

    let mut outcomes: Vec<Option<PairOutcome>> = vec![None; pairs.len()];
    for (idx, outcome) in out_rx.iter() {
        if let Some(slot) = outcomes.get_mut(idx) {
            *slot = Some(outcome);
        }
    }

    if cancel.is_cancelled() {
        info!(pairs = pairs.len(), "batch scan cancelled");
    }

    BatchReport {
        pairs: pairs
            .iter()
            .zip(outcomes)
            .map(|((a, b), outcome)| PairReport {
                unit_a: *a,
                unit_b: *b,
                outcome: outcome.unwrap_or_else(|| PairOutcome::Failed {
                    error: "worker exited before reporting".to_string(),
                }),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn report_counts_outcomes() {
        let pair = |outcome| PairReport {
            unit_a: UnitId::new(),
            unit_b: UnitId::new(),
            outcome,
        };
        let report = BatchReport {
            pairs: vec![
                pair(PairOutcome::NoConflict { similarity: Some(0.2) }),
                pair(PairOutcome::Skipped {
                    reason: "no embedding".to_string(),
                }),
                pair(PairOutcome::Cancelled),
                pair(PairOutcome::Cancelled),
            ],
        };
        assert_eq!(report.len(), 4);
        assert_eq!(report.no_conflict_count(), 1);
        assert_eq!(report.skipped_count(), 1);
        assert_eq!(report.cancelled_count(), 2);
        assert!(report.conflicts().is_empty());
    }
}
