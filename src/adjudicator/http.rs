//! Adjudicator backed by an OpenAI-compatible chat completions endpoint.

use std::fmt::Write as _;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use super::{parse_verdict, AdjudicationRequest, Adjudicator, Verdict};
use crate::error::AdjudicationError;

const SYSTEM_PROMPT: &str = "You review pairs of statements from medical education sources. \
Decide whether they genuinely contradict each other in a way that matters clinically. \
Reply with a single JSON object with the keys: is_conflict (bool), conflict_type \
(DOSAGE, CONTRAINDICATION, MECHANISM, TREATMENT, DIAGNOSIS, PROGNOSIS or OTHER), severity \
(LOW, MEDIUM, HIGH or CRITICAL; CRITICAL only for life-threatening dosage or contraindication \
errors), explanation, resolution_suggestion, confidence (0 to 1) and key_differences (list).";

/// Connection settings for [`HttpAdjudicator`].
#[derive(Debug, Clone)]
pub struct AdjudicatorConfig {
    /// Full URL of the chat completions endpoint.
    pub endpoint: String,
    /// Model name sent with each request.
    pub model: String,
    /// Bearer token, if the endpoint needs one.
    pub api_key: Option<String>,
    /// HTTP timeout; keep it at or below the guard deadline.
    pub timeout: Duration,
    /// Sampling temperature.
    pub temperature: f32,
}

impl AdjudicatorConfig {
    /// Settings for `endpoint` and `model` with a 5 s timeout and temperature 0.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: None,
            timeout: Duration::from_millis(crate::config::DEFAULT_ADJUDICATION_TIMEOUT_MS),
            temperature: 0.0,
        }
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the HTTP timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Calls a remote model over HTTP.
#[derive(Debug)]
pub struct HttpAdjudicator {
    config: AdjudicatorConfig,
    client: reqwest::blocking::Client,
}

impl HttpAdjudicator {
    /// Builds the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`AdjudicationError::Http`] if the client cannot be built.
    pub fn new(config: AdjudicatorConfig) -> Result<Self, AdjudicationError> {
        let client = reqwest::blocking::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn body(&self, request: &AdjudicationRequest) -> Value {
        json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": render_prompt(request) },
            ],
        })
    }
}

/// The user message for one pair.
pub(crate) fn render_prompt(request: &AdjudicationRequest) -> String {
    let mut out = String::new();
    if let Some(concept) = &request.concept {
        let _ = writeln!(out, "Concept: {concept}");
    }
    let _ = writeln!(out, "Statement A: {}", request.text_a);
    let _ = writeln!(out, "Statement B: {}", request.text_b);
    let _ = writeln!(out, "Embedding similarity: {:.2}", request.similarity);
    if !request.patterns.is_empty() {
        let kinds: Vec<String> = request.patterns.iter().map(ToString::to_string).collect();
        let _ = writeln!(out, "Heuristic patterns detected: {}", kinds.join(", "));
    }
    let _ = writeln!(out, "These are NOT conflicts:");
    for rule in &request.non_conflict_guidance {
        let _ = writeln!(out, "- {rule}");
    }
    out
}

impl Adjudicator for HttpAdjudicator {
    fn name(&self) -> &str {
        &self.config.model
    }

    fn adjudicate(&self, request: &AdjudicationRequest) -> Result<Verdict, AdjudicationError> {
        let mut call = self.client.post(&self.config.endpoint).json(&self.body(request));
        if let Some(key) = &self.config.api_key {
            call = call.bearer_auth(key);
        }

        let resp = call.send()?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().unwrap_or_default();
            return Err(AdjudicationError::Unavailable {
                reason: format!("endpoint returned {status}: {text}"),
            });
        }

        let payload: Value = resp.json()?;
        let content = payload
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| AdjudicationError::Malformed {
                reason: "response has no choices[0].message.content".to_string(),
            })?;
        debug!(model = %self.config.model, bytes = content.len(), "adjudicator replied");

        parse_verdict(content)
    }
}
