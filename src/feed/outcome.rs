use serde::Serialize;
use thiserror::Error;

/// Why a feed was judged invalid.
///
/// Network failures are stored as their rendered message so outcomes stay
/// `Clone` and can be compared in tests.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum InvalidReason {
    /// Feed-typed outline without an `xmlUrl`.
    #[error("feed has no URL")]
    EmptyUrl,
    /// The URL could not be parsed.
    #[error("malformed URL: {0}")]
    MalformedUrl(String),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("request failed: {0}")]
    Network(String),
    /// Request exceeded the configured timeout, in milliseconds
    #[error("request timed out after {0}ms")]
    Timeout(u64),
    /// Response status other than 200
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    /// Content-Type header missing or not an XML type
    #[error("content-type {} is not XML", .0.as_deref().unwrap_or("<missing>"))]
    ContentType(Option<String>),
    /// The classification task panicked or was aborted
    #[error("check aborted: {0}")]
    TaskFailed(String),
}

/// Result of classifying one feed URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    Valid,
    Invalid(InvalidReason),
    /// Answered 200 and matched the exception list; counts as valid.
    ExceptionOverride,
}

impl Verdict {
    /// Whether the feed should be treated as working.
    pub fn is_valid(&self) -> bool {
        !matches!(self, Verdict::Invalid(_))
    }
}

/// Verdict for one feed outline, with enough context to report it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationOutcome {
    pub url: String,
    /// Display text of the outline.
    pub title: String,
    /// Display texts of the enclosing folders, outermost first.
    pub path: Vec<String>,
    #[serde(flatten)]
    pub verdict: Verdict,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_exception_override_counts_as_valid() {
        assert!(Verdict::Valid.is_valid());
        assert!(Verdict::ExceptionOverride.is_valid());
        assert!(!Verdict::Invalid(InvalidReason::EmptyUrl).is_valid());
    }

    #[test]
    fn test_reason_messages() {
        assert_eq!(InvalidReason::HttpStatus(404).to_string(), "HTTP status 404");
        assert_eq!(
            InvalidReason::ContentType(Some("text/html".into())).to_string(),
            "content-type text/html is not XML"
        );
        assert_eq!(
            InvalidReason::ContentType(None).to_string(),
            "content-type <missing> is not XML"
        );
    }

    #[test]
    fn test_outcome_json_shape() {
        let outcome = VerificationOutcome {
            url: "https://example.com/feed".into(),
            title: "Example".into(),
            path: vec!["Blogs".into()],
            verdict: Verdict::Invalid(InvalidReason::HttpStatus(404)),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "url": "https://example.com/feed",
                "title": "Example",
                "path": ["Blogs"],
                "verdict": "invalid",
                "reason": { "kind": "http_status", "detail": 404 }
            })
        );

        let valid = VerificationOutcome {
            verdict: Verdict::Valid,
            ..outcome
        };
        let json = serde_json::to_value(&valid).unwrap();
        assert_eq!(json["verdict"], "valid");
        assert!(json.get("reason").is_none());
    }
}
