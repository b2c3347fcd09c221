//! End-to-end detection: gate, patterns, adjudication, scoring, batch scans.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use medconflict::{
    AdjudicationError, AdjudicationRequest, Adjudicator, CancellationToken, ConflictEngine, ConflictRepository,
    ConflictType, ContentUnit, Detector, DetectorSet, EngineConfig, InMemoryConflictRepository, InMemoryContentStore,
    InMemorySourceRegistry, PairOutcome, PatternKind, PatternMatch, Severity, Source, SourceType, UnitId, UnitPair,
    Verdict,
};

const SAME_TOPIC: [f32; 3] = [1.0, 0.0, 0.0];
const OTHER_TOPIC: [f32; 3] = [0.0, 1.0, 0.0];

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Harness {
    content: Arc<InMemoryContentStore>,
    sources: Arc<InMemorySourceRegistry>,
    repository: Arc<InMemoryConflictRepository>,
}

impl Harness {
    fn new() -> Self {
        init_tracing();
        Self {
            content: Arc::new(InMemoryContentStore::new()),
            sources: Arc::new(InMemorySourceRegistry::new()),
            repository: Arc::new(InMemoryConflictRepository::new()),
        }
    }

    fn without_embedder() -> Self {
        init_tracing();
        Self {
            content: Arc::new(InMemoryContentStore::without_embedder()),
            sources: Arc::new(InMemorySourceRegistry::new()),
            repository: Arc::new(InMemoryConflictRepository::new()),
        }
    }

    fn engine(&self) -> medconflict::EngineBuilder {
        ConflictEngine::builder(self.content.clone(), self.sources.clone(), self.repository.clone())
    }

    fn source(&self, title: &str, source_type: SourceType, credibility: u8) -> Source {
        let source = Source::new(title, source_type, credibility);
        self.sources.insert(source.clone()).unwrap();
        source
    }

    fn unit(&self, source: &Source, text: &str, embedding: &[f32]) -> UnitId {
        let unit = ContentUnit::new(source.id, text).with_embedding(embedding.to_vec());
        let id = unit.id;
        self.content.insert(unit).unwrap();
        id
    }

    fn bare_unit(&self, source: &Source, text: &str) -> UnitId {
        let unit = ContentUnit::new(source.id, text);
        let id = unit.id;
        self.content.insert(unit).unwrap();
        id
    }
}

/// Returns the same verdict every time and keeps every request.
struct Scripted {
    verdict: Verdict,
    requests: Mutex<Vec<AdjudicationRequest>>,
}

impl Scripted {
    fn new(verdict: Verdict) -> Arc<Self> {
        Arc::new(Self {
            verdict,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Adjudicator for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn adjudicate(&self, request: &AdjudicationRequest) -> Result<Verdict, AdjudicationError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.verdict.clone())
    }
}

struct Sleeper(Duration);

impl Adjudicator for Sleeper {
    fn name(&self) -> &str {
        "sleeper"
    }

    fn adjudicate(&self, _request: &AdjudicationRequest) -> Result<Verdict, AdjudicationError> {
        thread::sleep(self.0);
        Ok(Verdict::no_conflict(0.9, "too late to matter"))
    }
}

struct Down;

impl Adjudicator for Down {
    fn name(&self) -> &str {
        "down"
    }

    fn adjudicate(&self, _request: &AdjudicationRequest) -> Result<Verdict, AdjudicationError> {
        Err(AdjudicationError::Unavailable {
            reason: "connection refused".to_string(),
        })
    }
}

/// Always matches and counts calls.
#[derive(Clone)]
struct Counting(Arc<AtomicUsize>);

impl Detector for Counting {
    fn kind(&self) -> PatternKind {
        PatternKind::OpposingTerms
    }

    fn detect(&self, _text_a: &str, _text_b: &str) -> Option<PatternMatch> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Some(PatternMatch::new(PatternKind::OpposingTerms, 0.8))
    }
}

#[test]
fn unrelated_pairs_never_reach_detectors_or_adjudicator() {
    let h = Harness::new();
    let detector_calls = Arc::new(AtomicUsize::new(0));
    let adjudicator = Scripted::new(Verdict::conflict(Severity::High, 0.9, "always"));
    let engine = h
        .engine()
        .detectors(DetectorSet::empty().with(Counting(detector_calls.clone())))
        .adjudicator(adjudicator.clone())
        .build()
        .unwrap();

    let a_src = h.source("Cardiology lecture", SourceType::Lecture, 70);
    let b_src = h.source("Nephrology textbook", SourceType::Textbook, 80);
    let a = h.unit(&a_src, "Beta blockers reduce mortality after myocardial infarction", &SAME_TOPIC);
    let b = h.unit(&b_src, "Loop diuretics increase calcium excretion", &OTHER_TOPIC);

    assert!(engine.detect_conflict(a, b).unwrap().is_none());
    assert_eq!(detector_calls.load(Ordering::SeqCst), 0);
    assert_eq!(adjudicator.calls(), 0);
    assert_eq!(h.repository.conflict_count().unwrap(), 0);
}

#[test]
fn adjudicator_can_clear_a_dosing_difference() {
    let h = Harness::new();
    let adjudicator = Scripted::new(Verdict::no_conflict(
        0.85,
        "81 mg is the prophylactic dose, 325 mg the acute dose",
    ));
    let engine = h.engine().adjudicator(adjudicator.clone()).build().unwrap();

    let a_src = h.source("Preventive cardiology notes", SourceType::Lecture, 72);
    let b_src = h.source("Emergency medicine handbook", SourceType::Textbook, 85);
    let a = h.unit(&a_src, "Aspirin 81mg daily for primary prevention", &SAME_TOPIC);
    let b = h.unit(&b_src, "Aspirin 325mg for acute MI", &SAME_TOPIC);

    assert!(engine.detect_conflict(a, b).unwrap().is_none());
    assert_eq!(adjudicator.calls(), 1);
    assert_eq!(h.repository.conflict_count().unwrap(), 0);

    let requests = adjudicator.requests.lock().unwrap();
    let request = &requests[0];
    assert_eq!(request.text_b, "Aspirin 325mg for acute myocardial infarction");
    assert!(request.patterns.contains(&PatternKind::DosageConflict));
}

#[test]
fn contraindication_flip_is_critical() {
    let h = Harness::new();
    let adjudicator = Scripted::new(
        Verdict::conflict(
            Severity::Critical,
            0.95,
            "One source calls ACE inhibitors safe in pregnancy; the other contraindicates them",
        )
        .with_type(ConflictType::Contraindication)
        .with_suggestion("Follow the contraindication; ACE inhibitors are teratogenic")
        .with_difference("safe vs contraindicated"),
    );
    let engine = h.engine().adjudicator(adjudicator).build().unwrap();

    let lecture = h.source("Pharmacology lecture 7", SourceType::Lecture, 70);
    let guideline = h.source("ACC/AHA hypertension guideline", SourceType::Guideline, 95);
    let a = h.unit(&lecture, "ACE inhibitors are safe in pregnancy", &SAME_TOPIC);
    let b = h.unit(&guideline, "ACE inhibitors are contraindicated in pregnancy", &SAME_TOPIC);

    let conflict = engine.detect_conflict(a, b).unwrap().unwrap();
    assert_eq!(conflict.severity, Severity::Critical);
    assert_eq!(conflict.conflict_type, ConflictType::Contraindication);
    assert!(conflict.confidence >= 0.9);
    assert!(conflict.adjudicated);
    assert_eq!(conflict.key_differences, vec!["safe vs contraindicated".to_string()]);
    assert!(conflict.resolution_suggestion.is_some());
}

#[test]
fn detection_is_idempotent_per_pair() {
    let h = Harness::new();
    let adjudicator = Scripted::new(Verdict::conflict(Severity::High, 0.8, "doses disagree"));
    let engine = h.engine().adjudicator(adjudicator.clone()).build().unwrap();

    let a_src = h.source("Lecture", SourceType::Lecture, 70);
    let b_src = h.source("Textbook", SourceType::Textbook, 80);
    let a = h.unit(&a_src, "Metformin 500 mg twice daily", &SAME_TOPIC);
    let b = h.unit(&b_src, "Metformin 1000 mg twice daily", &SAME_TOPIC);

    let first = engine.detect_conflict(a, b).unwrap().unwrap();
    let second = engine.detect_conflict(a, b).unwrap().unwrap();
    let reversed = engine.detect_conflict(b, a).unwrap().unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.id, reversed.id);
    assert_eq!(adjudicator.calls(), 1);
    assert_eq!(h.repository.conflict_count().unwrap(), 1);
    let stored = h.repository.find_by_unit_pair(UnitPair::new(b, a)).unwrap().unwrap();
    assert_eq!(stored.id, first.id);
}

#[test]
fn slow_adjudicator_falls_back_to_patterns() {
    let h = Harness::new();
    let mut config = EngineConfig::default();
    config.adjudication.timeout_ms = 50;
    let engine = h
        .engine()
        .config(config)
        .adjudicator(Arc::new(Sleeper(Duration::from_millis(500))))
        .build()
        .unwrap();

    let a_src = h.source("Lecture", SourceType::Lecture, 70);
    let b_src = h.source("Guideline", SourceType::Guideline, 92);
    let a = h.unit(&a_src, "Aspirin 81 mg daily after ischemic stroke", &SAME_TOPIC);
    let b = h.unit(&b_src, "Aspirin 325 mg daily after ischemic stroke", &SAME_TOPIC);

    let started = std::time::Instant::now();
    let conflict = engine.detect_conflict(a, b).unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_millis(400));
    assert!(!conflict.adjudicated);
    assert!(conflict.patterns.contains(&PatternKind::DosageConflict));
    assert!(conflict.description.starts_with("Pattern-only detection"));
    assert!(conflict.confidence > 0.0 && conflict.confidence <= 0.9);
}

#[test]
fn unavailable_adjudicator_falls_back_to_patterns() {
    let h = Harness::new();
    let engine = h.engine().adjudicator(Arc::new(Down)).build().unwrap();

    let a_src = h.source("Lecture", SourceType::Lecture, 70);
    let b_src = h.source("Textbook", SourceType::Textbook, 80);
    let a = h.unit(&a_src, "Aspirin 81 mg daily after ischemic stroke", &SAME_TOPIC);
    let b = h.unit(&b_src, "Aspirin 325 mg daily after ischemic stroke", &SAME_TOPIC);

    let conflict = engine.detect_conflict(a, b).unwrap().unwrap();
    assert!(!conflict.adjudicated);
    assert_eq!(conflict.severity, Severity::High);
}

#[test]
fn missing_embedder_skips_the_pair() {
    let h = Harness::without_embedder();
    let engine = h.engine().build().unwrap();

    let a_src = h.source("Lecture", SourceType::Lecture, 70);
    let b_src = h.source("Textbook", SourceType::Textbook, 80);
    let a = h.bare_unit(&a_src, "Warfarin 5 mg daily");
    let b = h.bare_unit(&b_src, "Warfarin 10 mg daily");

    assert!(engine.detect_conflict(a, b).unwrap().is_none());
    assert_eq!(h.repository.conflict_count().unwrap(), 0);
}

#[test]
fn batch_reports_every_pair() {
    let h = Harness::without_embedder();
    let engine = h.engine().build().unwrap();

    let a_src = h.source("Lecture", SourceType::Lecture, 70);
    let b_src = h.source("Textbook", SourceType::Textbook, 80);
    let dose_a = h.unit(&a_src, "Aspirin 81 mg daily after ischemic stroke", &SAME_TOPIC);
    let dose_b = h.unit(&b_src, "Aspirin 325 mg daily after ischemic stroke", &SAME_TOPIC);
    let unrelated = h.unit(&b_src, "Loop diuretics increase calcium excretion", &OTHER_TOPIC);
    let bare = h.bare_unit(&b_src, "Aspirin is an antiplatelet agent");
    let same_source = h.unit(&a_src, "Aspirin 100 mg daily", &SAME_TOPIC);

    let pairs = vec![
        (dose_a, dose_b),
        (dose_a, unrelated),
        (dose_a, bare),
        (dose_a, same_source),
        (dose_b, dose_a),
    ];
    let report = engine.scan_batch(&pairs, 2);

    assert_eq!(report.len(), pairs.len());
    assert_eq!(report.no_conflict_count(), 1);
    assert_eq!(report.skipped_count(), 1);
    assert_eq!(report.failed_count(), 1);
    assert_eq!(report.detected_count() + report.existing_count(), 2);
    assert_eq!(report.detected_count(), 1);
    assert_eq!(h.repository.conflict_count().unwrap(), 1);

    for (report, (a, b)) in report.pairs.iter().zip(&pairs) {
        assert_eq!((report.unit_a, report.unit_b), (*a, *b));
    }
    assert!(matches!(report.pairs[1].outcome, PairOutcome::NoConflict { similarity: Some(s) } if s < 0.85));
    assert!(matches!(report.pairs[2].outcome, PairOutcome::Skipped { .. }));
    assert!(matches!(report.pairs[3].outcome, PairOutcome::Failed { .. }));

    let ids: Vec<_> = report.conflicts().iter().map(|c| c.id).collect();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], ids[1]);
}

#[test]
fn cancelled_batch_skips_unstarted_pairs() {
    let h = Harness::new();
    let engine = h.engine().build().unwrap();

    let a_src = h.source("Lecture", SourceType::Lecture, 70);
    let b_src = h.source("Textbook", SourceType::Textbook, 80);
    let pairs: Vec<_> = (0..10)
        .map(|i| {
            (
                h.unit(&a_src, &format!("Aspirin {} mg daily", 80 + i), &SAME_TOPIC),
                h.unit(&b_src, &format!("Aspirin {} mg daily", 300 + i), &SAME_TOPIC),
            )
        })
        .collect();

    let token = CancellationToken::new();
    token.cancel();
    let report = engine.scan_batch_with_cancel(&pairs, 4, &token);

    assert_eq!(report.len(), 10);
    assert_eq!(report.cancelled_count(), 10);
    assert_eq!(h.repository.conflict_count().unwrap(), 0);
}

#[test]
fn concurrent_batches_record_one_conflict_per_pair() {
    let h = Harness::new();
    let engine = h.engine().build().unwrap();

    let a_src = h.source("Lecture", SourceType::Lecture, 70);
    let b_src = h.source("Textbook", SourceType::Textbook, 80);
    let a = h.unit(&a_src, "Aspirin 81 mg daily after ischemic stroke", &SAME_TOPIC);
    let b = h.unit(&b_src, "Aspirin 325 mg daily after ischemic stroke", &SAME_TOPIC);

    let pairs = vec![(a, b); 16];
    let report = engine.scan_batch(&pairs, 8);

    assert_eq!(report.detected_count(), 1);
    assert_eq!(report.existing_count(), 15);
    assert_eq!(h.repository.conflict_count().unwrap(), 1);
    assert_eq!(engine.history(report.conflicts()[0].id).unwrap().len(), 1);
}
