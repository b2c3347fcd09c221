//! Lenient parsing of adjudicator replies.
//!
//! Models wrap JSON in prose or code fences, spell enums loosely and report
//! confidence as a percentage. Everything recoverable is recovered; a reply
//! without a usable `is_conflict` is rejected.

use serde_json::Value;

use super::Verdict;
use crate::conflict::{clamp_unit, ConflictType, Severity};
use crate::error::AdjudicationError;

fn malformed(reason: impl Into<String>) -> AdjudicationError {
    AdjudicationError::Malformed {
        reason: reason.into(),
    }
}

/// First balanced `{ ... }` object in the text, ignoring braces in strings.
fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (idx, ch) in text.char_indices().skip_while(|(i, _)| *i < start) {
        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..=idx]);
                }
            }
            _ => {}
        }
    }
    None
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_confidence(value: &Value) -> Option<f32> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    let fraction = if raw > 1.0 { raw / 100.0 } else { raw };
    #[allow(clippy::cast_possible_truncation)]
    Some(clamp_unit(fraction as f32))
}

fn as_text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn as_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::trim))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Parses a model reply into a [`Verdict`].
///
/// Missing severity defaults to MEDIUM for conflicts and LOW otherwise;
/// missing confidence defaults to 0.5.
///
/// # Errors
///
/// Returns [`AdjudicationError::Malformed`] if no JSON object is found or
/// `is_conflict` is missing.
pub fn parse_verdict(reply: &str) -> Result<Verdict, AdjudicationError> {
    let object = extract_object(reply).ok_or_else(|| malformed("no JSON object in reply"))?;
    let value: Value = serde_json::from_str(object).map_err(|e| malformed(format!("invalid JSON: {e}")))?;
    let Value::Object(map) = value else {
        return Err(malformed("reply is not a JSON object"));
    };

    let is_conflict = map
        .get("is_conflict")
        .or_else(|| map.get("conflict"))
        .and_then(as_bool)
        .ok_or_else(|| malformed("missing is_conflict"))?;

    let severity = map
        .get("severity")
        .and_then(Value::as_str)
        .and_then(Severity::parse_lenient)
        .unwrap_or(if is_conflict { Severity::Medium } else { Severity::Low });

    let conflict_type = map
        .get("conflict_type")
        .or_else(|| map.get("type"))
        .and_then(Value::as_str)
        .and_then(ConflictType::parse_lenient);

    let confidence = map.get("confidence").and_then(as_confidence).unwrap_or(0.5);

    Ok(Verdict {
        is_conflict,
        conflict_type,
        severity,
        explanation: as_text(map.get("explanation")).unwrap_or_default(),
        resolution_suggestion: as_text(map.get("resolution_suggestion")),
        confidence,
        key_differences: as_list(map.get("key_differences")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_json() {
        let v = parse_verdict(
            r#"{"is_conflict": true, "conflict_type": "DOSAGE", "severity": "HIGH", "explanation": "81 vs 325",
                "confidence": 0.82, "key_differences": ["dose"]}"#,
        )
        .unwrap();
        assert!(v.is_conflict);
        assert_eq!(v.conflict_type, Some(ConflictType::Dosage));
        assert_eq!(v.severity, Severity::High);
        assert!((v.confidence - 0.82).abs() < 1e-6);
        assert_eq!(v.key_differences, vec!["dose".to_string()]);
    }

    #[test]
    fn fenced_json_with_prose() {
        let reply = "Here is my analysis:\n```json\n{\"is_conflict\": \"no\", \"explanation\": \"different {populations}\"}\n```";
        let v = parse_verdict(reply).unwrap();
        assert!(!v.is_conflict);
        assert_eq!(v.severity, Severity::Low);
        assert_eq!(v.explanation, "different {populations}");
    }

    #[test]
    fn percent_confidence_and_loose_enums() {
        let v = parse_verdict(r#"{"is_conflict": true, "severity": "life-threatening", "type": "Contraindications", "confidence": "95%", "explanation": "x"}"#)
            .unwrap();
        assert_eq!(v.severity, Severity::Critical);
        assert_eq!(v.conflict_type, Some(ConflictType::Contraindication));
        assert!((v.confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn defaults_apply() {
        let v = parse_verdict(r#"{"is_conflict": true, "severity": "unknown", "explanation": "x"}"#).unwrap();
        assert_eq!(v.severity, Severity::Medium);
        assert!((v.confidence - 0.5).abs() < f32::EPSILON);
        assert!(v.conflict_type.is_none());
    }

    #[test]
    fn rejects_unusable_replies() {
        assert!(parse_verdict("I cannot answer that").is_err());
        assert!(parse_verdict(r#"{"severity": "HIGH"}"#).is_err());
        assert!(parse_verdict(r#"{"is_conflict": true"#).is_err());
    }
}
