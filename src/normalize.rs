//! Medical terminology normalization.
//!
//! Abbreviations and spelling variants are mapped to one canonical phrase so
//! that "MI" and "myocardial infarction" compare as the same subject. The
//! substitution is token-wise: each token is looked up once in the alias
//! table, so replacements never feed into further replacements and the
//! result does not depend on table order. Unknown tokens pass through
//! unchanged.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static RE_TOKEN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[A-Za-z\u{00B5}\u{03BC}][A-Za-z0-9\u{00B5}\u{03BC}]*").ok());

/// Built-in aliases, keyed by lowercase token.
const BUILTIN_ALIASES: &[(&str, &str)] = &[
    // Cardiology
    ("mi", "myocardial infarction"),
    ("ami", "acute myocardial infarction"),
    ("stemi", "st elevation myocardial infarction"),
    ("nstemi", "non st elevation myocardial infarction"),
    ("chf", "congestive heart failure"),
    ("hf", "heart failure"),
    ("afib", "atrial fibrillation"),
    ("af", "atrial fibrillation"),
    ("cad", "coronary artery disease"),
    ("acs", "acute coronary syndrome"),
    ("htn", "hypertension"),
    ("bp", "blood pressure"),
    ("hr", "heart rate"),
    ("pe", "pulmonary embolism"),
    ("dvt", "deep vein thrombosis"),
    ("vte", "venous thromboembolism"),
    ("tia", "transient ischemic attack"),
    ("cva", "stroke"),
    // Pharmacology
    ("acei", "ace inhibitor"),
    ("acei's", "ace inhibitors"),
    ("aceis", "ace inhibitors"),
    ("arb", "angiotensin receptor blocker"),
    ("arbs", "angiotensin receptor blockers"),
    ("nsaid", "nonsteroidal anti inflammatory drug"),
    ("nsaids", "nonsteroidal anti inflammatory drugs"),
    ("ssri", "selective serotonin reuptake inhibitor"),
    ("ssris", "selective serotonin reuptake inhibitors"),
    ("ppi", "proton pump inhibitor"),
    ("ppis", "proton pump inhibitors"),
    ("asa", "aspirin"),
    ("acetylsalicylic", "aspirin"),
    ("paracetamol", "acetaminophen"),
    ("apap", "acetaminophen"),
    // Internal medicine
    ("dm", "diabetes mellitus"),
    ("t2dm", "type 2 diabetes mellitus"),
    ("t1dm", "type 1 diabetes mellitus"),
    ("copd", "chronic obstructive pulmonary disease"),
    ("ckd", "chronic kidney disease"),
    ("aki", "acute kidney injury"),
    ("uti", "urinary tract infection"),
    ("gerd", "gastroesophageal reflux disease"),
    // Units and routes
    ("milligram", "mg"),
    ("milligrams", "mg"),
    ("microgram", "mcg"),
    ("micrograms", "mcg"),
    ("\u{00B5}g", "mcg"),
    ("\u{03BC}g", "mcg"),
    ("ug", "mcg"),
    ("gram", "g"),
    ("grams", "g"),
    ("gm", "g"),
    ("iu", "units"),
    ("unit", "units"),
    ("po", "oral"),
    ("iv", "intravenous"),
    ("im", "intramuscular"),
    ("qd", "daily"),
    ("od", "daily"),
    ("bid", "twice daily"),
    ("tid", "three times daily"),
    ("qid", "four times daily"),
    ("prn", "as needed"),
];

/// Aliased tokens that read as a unit when they follow a number ("24 hr").
const UNITS_AFTER_NUMBER: &[&str] = &["hr"];

/// True if the last non-blank character before `start` is a digit.
fn follows_number(text: &str, start: usize) -> bool {
    text[..start]
        .trim_end()
        .chars()
        .next_back()
        .is_some_and(|c| c.is_ascii_digit())
}

/// Canonicalizes medical terminology before comparison.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    aliases: HashMap<String, String>,
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextNormalizer {
    /// Creates a normalizer with the built-in alias table.
    #[must_use]
    pub fn new() -> Self {
        let aliases = BUILTIN_ALIASES
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { aliases }
    }

    /// Extends (or overrides) the built-in table.
    ///
    /// Keys are matched case-insensitively against single tokens.
    #[must_use]
    pub fn with_aliases<I, K, V>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in aliases {
            let key = key.as_ref().trim().to_lowercase();
            if !key.is_empty() {
                self.aliases.insert(key, value.into());
            }
        }
        self
    }

    /// Number of aliases known.
    #[must_use]
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    /// True if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Canonical form of a single token, if it has one.
    #[must_use]
    pub fn canonical(&self, token: &str) -> Option<&str> {
        self.aliases.get(&token.to_lowercase()).map(String::as_str)
    }

    /// Normalizes a piece of text.
    ///
    /// Never fails; if the tokenizer is unavailable the input is returned as is.
    #[must_use]
    pub fn normalize(&self, text: &str) -> String {
        let Some(re) = RE_TOKEN.as_ref() else {
            return text.to_string();
        };
        re.replace_all(text, |caps: &Captures<'_>| {
            let token = &caps[0];
            let is_unit = caps.get(0).is_some_and(|m| follows_number(text, m.start()))
                && UNITS_AFTER_NUMBER.contains(&token.to_lowercase().as_str());
            if is_unit {
                return token.to_string();
            }
            self.canonical(token).map_or_else(|| token.to_string(), str::to_string)
        })
        .into_owned()
    }
}
