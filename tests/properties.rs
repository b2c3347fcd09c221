use chrono::{DateTime, Duration, Utc};
use medconflict::{
    Adjudication, ConflictScorer, EbmEvaluator, EvidenceSide, PatternKind, PatternMatch, Severity, Source, SourceType,
    TextNormalizer, Verdict,
};
use proptest::prelude::*;

fn kind() -> impl Strategy<Value = PatternKind> {
    prop::sample::select(PatternKind::ALL.to_vec())
}

fn source_type() -> impl Strategy<Value = SourceType> {
    prop::sample::select(SourceType::ALL.to_vec())
}

fn source() -> impl Strategy<Value = Source> {
    (source_type(), 0u8..=120, prop::option::of(0i64..4000), any::<bool>()).prop_map(
        |(source_type, credibility, age_days, peer_reviewed)| {
            let mut source = Source::new("generated", source_type, credibility).with_peer_review(peer_reviewed);
            if let Some(days) = age_days {
                source = source.published(now() - Duration::days(days));
            }
            source
        },
    )
}

fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn side(source: &Source) -> EvidenceSide<'_> {
    EvidenceSide {
        source,
        level_override: None,
    }
}

proptest! {
    #[test]
    fn fallback_confidence_stays_in_bounds(
        kinds in prop::collection::vec(kind(), 1..6),
        strength in 0.0f32..=1.0,
    ) {
        let matches: Vec<PatternMatch> = kinds.into_iter().map(|k| PatternMatch::new(k, strength)).collect();
        let fallback = Adjudication::PatternOnly { reason: "timeout".to_string() };
        let assessment = ConflictScorer::default()
            .score(&matches, &fallback, "warfarin 5 mg daily", "warfarin 10 mg daily")
            .unwrap();
        prop_assert!((0.0..=0.9).contains(&assessment.confidence));
        prop_assert!(!assessment.adjudicated);
    }

    #[test]
    fn adjudicated_confidence_is_clamped(confidence in -5.0f32..5.0) {
        let verdict = Verdict::conflict(Severity::Medium, confidence, "disagree");
        let assessment = ConflictScorer::default()
            .score(&[], &Adjudication::Model(verdict), "a", "b")
            .unwrap();
        prop_assert!((0.0..=1.0).contains(&assessment.confidence));
    }

    #[test]
    fn evidence_comparison_is_symmetric(a in source(), b in source()) {
        let evaluator = EbmEvaluator::default();
        let ab = evaluator.compare_at(side(&a), side(&b), &[], now());
        let ba = evaluator.compare_at(side(&b), side(&a), &[], now());
        prop_assert_eq!(ab.preferred_source_id, ba.preferred_source_id);
        prop_assert_eq!(ab.requires_manual_review, ba.requires_manual_review);
        prop_assert!((ab.confidence - ba.confidence).abs() < 1e-12);
        prop_assert!((0.0..=1.0).contains(&ab.confidence));
        prop_assert!(ab.evaluation_a.score <= 100);
    }

    #[test]
    fn text_without_known_terms_passes_through(text in "[0-9 .,;:()%/-]{0,80}") {
        let normalizer = TextNormalizer::new();
        prop_assert_eq!(normalizer.normalize(&text), text);
    }

    #[test]
    fn unknown_words_pass_through(words in prop::collection::vec("zq[a-z]{2,8}", 0..10)) {
        let text = words.join(" ");
        prop_assert_eq!(TextNormalizer::new().normalize(&text), text);
    }
}
