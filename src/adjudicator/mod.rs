//! AI adjudication with a deterministic fallback.
//!
//! The adjudicator is the only slow, network-bound step of the pipeline.
//! [`AdjudicationGuard`] runs it on its own thread under a hard deadline;
//! any failure (timeout, malformed output, unavailability) turns into
//! [`Adjudication::PatternOnly`] and the scorer falls back to the patterns.
//! A scan never fails because the adjudicator did.

mod http;
mod parse;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DEFAULT_ADJUDICATION_MAX_IN_FLIGHT;
use crate::conflict::{clamp_unit, ConflictType, Severity};
use crate::error::AdjudicationError;
use crate::pattern::PatternKind;

pub use http::{AdjudicatorConfig, HttpAdjudicator};
pub use parse::parse_verdict;

/// Situations the adjudicator must not report as conflicts.
pub const NON_CONFLICT_GUIDANCE: &[&str] = &[
    "The statements differ only in level of detail, one being more specific or complete than the other.",
    "The recommendations depend on clinical context, such as prophylactic versus acute or treatment dosing.",
    "One statement reflects updated guidance that supersedes the other.",
    "The statements apply to different patient populations, such as adults versus children or pregnant versus non-pregnant patients.",
];

/// What is sent to the adjudicator for one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjudicationRequest {
    /// First statement, normalized.
    pub text_a: String,
    /// Second statement, normalized.
    pub text_b: String,
    /// Concept both statements were filed under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,
    /// Patterns that fired.
    pub patterns: Vec<PatternKind>,
    /// Embedding similarity of the pair.
    pub similarity: f32,
    /// Cases to treat as non-conflicts.
    pub non_conflict_guidance: Vec<String>,
}

impl AdjudicationRequest {
    /// Builds a request carrying the standard non-conflict guidance.
    #[must_use]
    pub fn new(
        text_a: impl Into<String>,
        text_b: impl Into<String>,
        concept: Option<String>,
        patterns: Vec<PatternKind>,
        similarity: f32,
    ) -> Self {
        Self {
            text_a: text_a.into(),
            text_b: text_b.into(),
            concept,
            patterns,
            similarity,
            non_conflict_guidance: NON_CONFLICT_GUIDANCE.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

/// Structured adjudication output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the statements really contradict each other.
    pub is_conflict: bool,
    /// Clinical category, if the adjudicator named one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_type: Option<ConflictType>,
    /// Severity; CRITICAL flags life-threatening risk.
    pub severity: Severity,
    /// Explanation of the contradiction (or why there is none).
    pub explanation: String,
    /// How a reviewer might settle it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_suggestion: Option<String>,
    /// Confidence in [0, 1].
    pub confidence: f32,
    /// Key differences between the statements.
    #[serde(default)]
    pub key_differences: Vec<String>,
}

impl Verdict {
    /// A positive verdict.
    #[must_use]
    pub fn conflict(severity: Severity, confidence: f32, explanation: impl Into<String>) -> Self {
        Self {
            is_conflict: true,
            conflict_type: None,
            severity,
            explanation: explanation.into(),
            resolution_suggestion: None,
            confidence: clamp_unit(confidence),
            key_differences: Vec::new(),
        }
    }

    /// A negative verdict.
    #[must_use]
    pub fn no_conflict(confidence: f32, explanation: impl Into<String>) -> Self {
        Self {
            is_conflict: false,
            conflict_type: None,
            severity: Severity::Low,
            explanation: explanation.into(),
            resolution_suggestion: None,
            confidence: clamp_unit(confidence),
            key_differences: Vec::new(),
        }
    }

    /// Sets the conflict type.
    #[must_use]
    pub fn with_type(mut self, conflict_type: ConflictType) -> Self {
        self.conflict_type = Some(conflict_type);
        self
    }

    /// Sets the resolution suggestion.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.resolution_suggestion = Some(suggestion.into());
        self
    }

    /// Adds a key difference.
    #[must_use]
    pub fn with_difference(mut self, difference: impl Into<String>) -> Self {
        self.key_differences.push(difference.into());
        self
    }
}

/// An external adjudication capability.
///
/// The guard stops waiting at its deadline but cannot cancel a call: a call
/// past the deadline keeps its thread until `adjudicate` returns. Implementations
/// must therefore bound their own running time, the way [`HttpAdjudicator`]
/// sets a client timeout. Calls that never return hold one of the guard's
/// in-flight slots for good.
pub trait Adjudicator: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Judges one pair. May block, but must return eventually.
    fn adjudicate(&self, request: &AdjudicationRequest) -> Result<Verdict, AdjudicationError>;
}

/// Outcome of the guarded call.
#[derive(Debug, Clone, PartialEq)]
pub enum Adjudication {
    /// The adjudicator answered in time with a valid verdict.
    Model(Verdict),
    /// Pattern-only classification applies.
    PatternOnly {
        /// Why the adjudicator was not used.
        reason: String,
    },
}

impl Adjudication {
    /// The verdict, if the adjudicator answered.
    #[must_use]
    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            Self::Model(v) => Some(v),
            Self::PatternOnly { .. } => None,
        }
    }
}

/// Runs an adjudicator under a deadline and falls back on any failure.
#[derive(Clone)]
pub struct AdjudicationGuard {
    adjudicator: Option<Arc<dyn Adjudicator>>,
    timeout: Duration,
    max_in_flight: usize,
    in_flight: Arc<AtomicUsize>,
}

/// One running call; frees its slot when the call thread finishes.
struct Slot(Arc<AtomicUsize>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for AdjudicationGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdjudicationGuard")
            .field("adjudicator", &self.adjudicator.as_ref().map(|a| a.name().to_string()))
            .field("timeout", &self.timeout)
            .field("max_in_flight", &self.max_in_flight)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl AdjudicationGuard {
    /// Wraps an adjudicator.
    #[must_use]
    pub fn new(adjudicator: Arc<dyn Adjudicator>, timeout: Duration) -> Self {
        Self {
            adjudicator: Some(adjudicator),
            timeout,
            max_in_flight: DEFAULT_ADJUDICATION_MAX_IN_FLIGHT,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Caps calls running at once, counting calls past their deadline.
    ///
    /// Once the cap is reached further pairs fall back to the patterns
    /// without calling the adjudicator. Clones share the count.
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Calls currently running, including abandoned ones.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// A guard that always falls back.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            adjudicator: None,
            timeout: Duration::ZERO,
            max_in_flight: DEFAULT_ADJUDICATION_MAX_IN_FLIGHT,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// True if an adjudicator is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.adjudicator.is_some()
    }

    /// Calls the adjudicator; never fails and never waits past the deadline.
    #[must_use]
    pub fn run(&self, request: AdjudicationRequest) -> Adjudication {
        let Some(adjudicator) = self.adjudicator.as_ref() else {
            return Adjudication::PatternOnly {
                reason: "no adjudicator configured".to_string(),
            };
        };

        match self.call(Arc::clone(adjudicator), request) {
            Ok(verdict) => {
                debug!(
                    adjudicator = adjudicator.name(),
                    is_conflict = verdict.is_conflict,
                    severity = %verdict.severity,
                    confidence = verdict.confidence,
                    "adjudication completed"
                );
                Adjudication::Model(verdict)
            }
            Err(err) => {
                warn!(adjudicator = adjudicator.name(), error = %err, "adjudication failed, using pattern-only fallback");
                Adjudication::PatternOnly {
                    reason: err.to_string(),
                }
            }
        }
    }

    fn call(&self, adjudicator: Arc<dyn Adjudicator>, request: AdjudicationRequest) -> Result<Verdict, AdjudicationError> {
        let max = self.max_in_flight;
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .map_err(|running| AdjudicationError::Unavailable {
                reason: format!("{running} adjudication calls still running"),
            })?;
        let slot = Slot(Arc::clone(&self.in_flight));

        let (tx, rx) = bounded::<Result<Verdict, AdjudicationError>>(1);

        // A call that outlives the deadline keeps running detached and holds
        // its slot until it returns; the late answer is dropped.
        thread::Builder::new()
            .name("medconflict-adjudicator".to_string())
            .spawn(move || {
                let _slot = slot;
                let _ = tx.send(adjudicator.adjudicate(&request));
            })
            .map_err(|e| AdjudicationError::Unavailable {
                reason: format!("failed to spawn adjudication thread: {e}"),
            })?;

        let verdict = rx.recv_timeout(self.timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => AdjudicationError::Timeout {
                duration_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            },
            RecvTimeoutError::Disconnected => AdjudicationError::Unavailable {
                reason: "adjudicator exited without answering".to_string(),
            },
        })??;

        validate(verdict)
    }
}

/// Rejects verdicts that cannot be trusted and clamps the rest.
fn validate(mut verdict: Verdict) -> Result<Verdict, AdjudicationError> {
    if !verdict.confidence.is_finite() {
        return Err(AdjudicationError::Malformed {
            reason: "confidence is not a number".to_string(),
        });
    }
    verdict.confidence = clamp_unit(verdict.confidence);
    if verdict.is_conflict && verdict.explanation.trim().is_empty() {
        return Err(AdjudicationError::Malformed {
            reason: "conflict verdict without explanation".to_string(),
        });
    }
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    struct Fixed(Result<Verdict, String>);

    impl Adjudicator for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn adjudicate(&self, _: &AdjudicationRequest) -> Result<Verdict, AdjudicationError> {
            self.0
                .clone()
                .map_err(|reason| AdjudicationError::Unavailable { reason })
        }
    }

    struct Slow(Duration);

    impl Adjudicator for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn adjudicate(&self, _: &AdjudicationRequest) -> Result<Verdict, AdjudicationError> {
            thread::sleep(self.0);
            Ok(Verdict::conflict(Severity::High, 0.9, "late"))
        }
    }

    fn request() -> AdjudicationRequest {
        AdjudicationRequest::new("a", "b", Some("aspirin".to_string()), vec![PatternKind::DosageConflict], 0.9)
    }

    #[test]
    fn request_carries_non_conflict_guidance() {
        let req = request();
        assert_eq!(req.non_conflict_guidance.len(), NON_CONFLICT_GUIDANCE.len());
        assert!(req.non_conflict_guidance.iter().any(|g| g.contains("prophylactic")));
        assert!(req.non_conflict_guidance.iter().any(|g| g.contains("patient populations")));
    }

    #[test]
    fn successful_call_returns_model_verdict() {
        let guard = AdjudicationGuard::new(
            Arc::new(Fixed(Ok(Verdict::conflict(Severity::Critical, 0.95, "teratogenic")))),
            Duration::from_secs(1),
        );
        let out = guard.run(request());
        assert_eq!(out.verdict().map(|v| v.severity), Some(Severity::Critical));
    }

    #[test]
    fn failure_falls_back() {
        let guard = AdjudicationGuard::new(Arc::new(Fixed(Err("offline".to_string()))), Duration::from_secs(1));
        let out = guard.run(request());
        let Adjudication::PatternOnly { reason } = out else {
            panic!("expected fallback");
        };
        assert!(reason.contains("offline"));
    }

    #[test]
    fn timeout_falls_back_without_waiting() {
        let guard = AdjudicationGuard::new(Arc::new(Slow(Duration::from_millis(500))), Duration::from_millis(20));
        let started = Instant::now();
        let out = guard.run(request());
        assert!(started.elapsed() < Duration::from_millis(400));
        let Adjudication::PatternOnly { reason } = out else {
            panic!("expected fallback");
        };
        assert!(reason.contains("timed out"));
    }

    #[test]
    fn hung_calls_are_capped() {
        let guard = AdjudicationGuard::new(Arc::new(Slow(Duration::from_millis(300))), Duration::from_millis(20))
            .with_max_in_flight(1);
        assert!(guard.run(request()).verdict().is_none());
        assert_eq!(guard.in_flight(), 1);

        let started = Instant::now();
        let Adjudication::PatternOnly { reason } = guard.clone().run(request()) else {
            panic!("expected fallback");
        };
        assert!(reason.contains("still running"));
        assert!(started.elapsed() < Duration::from_millis(100));

        let deadline = Instant::now() + Duration::from_secs(5);
        while guard.in_flight() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(guard.in_flight(), 0);
        let Adjudication::PatternOnly { reason } = guard.run(request()) else {
            panic!("expected fallback");
        };
        assert!(reason.contains("timed out"));
    }

    #[test]
    fn disabled_guard_always_falls_back() {
        let guard = AdjudicationGuard::disabled();
        assert!(!guard.is_enabled());
        assert!(guard.run(request()).verdict().is_none());
    }

    #[test]
    fn empty_explanation_is_malformed() {
        let guard = AdjudicationGuard::new(
            Arc::new(Fixed(Ok(Verdict::conflict(Severity::High, 0.8, "  ")))),
            Duration::from_secs(1),
        );
        assert!(guard.run(request()).verdict().is_none());
    }
}
