//! Turns the model's free-form answer into a `VerificationResult`.
//!
//! The model is asked for `{"confidence": <0..1>, "feedback": "..."}` but may
//! wrap it in markdown fences, use `score` instead of `confidence`, quote the
//! number, or ignore the format entirely. None of that is an error here.

use serde_json::Value;

use crate::types::{DEFAULT_FEEDBACK, VerificationResult};

pub fn normalize_answer(raw: &str) -> VerificationResult {
    let cleaned = strip_fences(raw);

    match serde_json::from_str::<Value>(cleaned) {
        Ok(Value::Object(map)) => {
            let confidence = map
                .get("confidence")
                .or_else(|| map.get("score"))
                .and_then(numeric)
                .unwrap_or(0.0);
            let feedback = map
                .get("feedback")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_FEEDBACK);
            VerificationResult::new(confidence, feedback)
        }
        _ => {
            tracing::debug!(len = raw.len(), "model answer was not a JSON object");
            VerificationResult::new(0.0, raw)
        }
    }
}

fn strip_fences(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}
