//! JSON extraction from free-form model replies
//!
//! Model replies are prose that should contain exactly one JSON object.
//! The object is sliced from the first `{` to the last `}` and parsed
//! against the caller's expected shape; everything downstream of the
//! delegate goes through this boundary.

use serde::de::DeserializeOwned;

use crate::types::AppError;

/// Slice the embedded JSON object out of a reply, if any
pub fn embedded_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Parse the JSON object embedded in a model reply
pub fn parse_embedded<T: DeserializeOwned>(text: &str) -> Result<T, AppError> {
    let object = embedded_object(text)
        .ok_or_else(|| AppError::Delegate("No JSON object in model reply".to_string()))?;

    serde_json::from_str(object)
        .map_err(|e| AppError::Delegate(format!("Malformed JSON in model reply: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, Debug, PartialEq)]
    struct Verdict {
        ok: bool,
        score: f64,
    }

    #[test]
    fn bare_object() {
        let v: Verdict = parse_embedded(r#"{"ok": true, "score": 87.5}"#).unwrap();
        assert_eq!(v, Verdict { ok: true, score: 87.5 });
    }

    #[test]
    fn object_wrapped_in_prose_and_fences() {
        let reply = "Sure! Here is the analysis you asked for:\n```json\n{\"ok\": false, \"score\": 12}\n```\nLet me know if you need anything else.";
        let v: Verdict = parse_embedded(reply).unwrap();
        assert!(!v.ok);
        assert_eq!(v.score, 12.0);
    }

    #[test]
    fn no_object_is_an_error() {
        let result: Result<Verdict, _> = parse_embedded("I cannot answer that.");
        assert!(matches!(result, Err(AppError::Delegate(_))));
    }

    #[test]
    fn truncated_object_is_an_error() {
        let result: Result<Verdict, _> = parse_embedded(r#"{"ok": true, "score""#);
        assert!(matches!(result, Err(AppError::Delegate(_))));
    }

    #[test]
    fn wrong_shape_is_an_error() {
        let result: Result<Verdict, _> = parse_embedded(r#"{"unexpected": 1}"#);
        assert!(matches!(result, Err(AppError::Delegate(_))));
    }

    #[test]
    fn brace_in_prose_spans_to_last_close() {
        // Greedy slice: first { to last }
        let reply = "prefix {\"ok\": true, \"score\": 1} suffix";
        let v: Verdict = parse_embedded(reply).unwrap();
        assert!(v.ok);
    }
}
