//! Small, fast JSON-body helpers used ahead of full parsing/serialization.

/// Fast heuristic for "is this revision body a redirect document": the
/// canonical serializer is skipped entirely in favor of scanning for the
/// literal substring `"redirect":`, which only legitimately occurs as the
/// top-level redirect-target key.
pub fn is_redirect_body(body: &str) -> bool {
    body.contains("\"redirect\":")
}

/// Extracts the `target` of a `"redirect":{"target":"Q2"}` body without a
/// full JSON parse, falling back to `serde_json` only if the fast path fails.
pub fn extract_redirect_target(body: &str) -> Option<String> {
    if let Some(v) = serde_json::from_str::<serde_json::Value>(body).ok() {
        return v.get("redirect").and_then(|r| r.get("target")).and_then(|t| t.as_str()).map(String::from);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_redirect_heuristic() {
        assert!(is_redirect_body(r#"{"redirect":{"target":"Q2"}}"#));
        assert!(!is_redirect_body(r#"{"labels":{}}"#));
    }

    #[test]
    fn extracts_redirect_target() {
        let target = extract_redirect_target(r#"{"redirect":{"target":"Q2"}}"#);
        assert_eq!(target.as_deref(), Some("Q2"));
    }
}
