//! Deterministic retrieval query synthesis from a structured state.

use crate::model::StructuredState;

/// Maximum query length in characters.
pub const MAX_QUERY_CHARS: usize = 400;

/// Query used when the state has no usable facts.
pub const FALLBACK_QUERY: &str = "patient symptoms";

/// Build the completion query.
///
/// Parts are `age {age}`, the gender, then one part per symptom made of its
/// `duration: ..`, `severity: ..` and the additional context, skipping unset
/// fields. Symptom names are not part of the query, so a symptom with none of
/// those fields contributes nothing. Parts are joined with `" ; "` and the
/// result is cut to [`MAX_QUERY_CHARS`] characters.
pub fn build_search_query(state: &StructuredState) -> String {
    let mut parts = Vec::new();
    if let Some(age) = set(&state.age) {
        parts.push(format!("age {age}"));
    }
    if let Some(gender) = set(&state.gender) {
        parts.push(gender.to_string());
    }

    for symptom in &state.symptoms {
        let mut words = Vec::new();
        if let Some(duration) = set(&symptom.duration) {
            words.push(format!("duration: {duration}"));
        }
        if let Some(severity) = set(&symptom.severity) {
            words.push(format!("severity: {severity}"));
        }
        if let Some(context) = set(&symptom.additional_context) {
            words.push(context.to_string());
        }
        if !words.is_empty() {
            parts.push(words.join(" "));
        }
    }

    if parts.is_empty() {
        return FALLBACK_QUERY.to_string();
    }
    parts.join(" ; ").chars().take(MAX_QUERY_CHARS).collect()
}

fn set(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
