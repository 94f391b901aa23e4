//! GitHub API error types and rate-limit classification.
//!
//! The `gh` CLI reports most failures only as text on stderr. Structured
//! signals (GraphQL `errors[].type == "RATE_LIMITED"` in the response body, or
//! an `HTTP 429` status on stderr) are checked first; otherwise the configured
//! text classifier decides. Changes to
//! the wording `gh` or GitHub use will silently flip the classification, so the
//! default classifier is kept byte-for-byte stable and covered by tests.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use super::runner::GhOutput;

/// Errors surfaced by the forge client. Every failure is exactly one of these.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ForgeError {
    /// Transient; the caller should stop dispatching and retry later.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Any other call failure, scoped to the call that produced it.
    #[error("{0}")]
    Client(String),
}

impl ForgeError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ForgeError::RateLimited(_))
    }
}

/// Decides from diagnostic text whether a failure was a rate limit.
pub type RateLimitClassifier = fn(&str) -> bool;

/// Case-sensitive substring match on the phrases GitHub uses for primary and
/// secondary rate limits.
pub fn default_rate_limit_classifier(stderr: &str) -> bool {
    stderr.contains("rate limit") || stderr.contains("secondary rate")
}

#[derive(Deserialize)]
struct GraphqlErrors {
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Deserialize)]
struct GraphqlError {
    #[serde(rename = "type")]
    kind: Option<String>,
}

fn has_structured_rate_limit(stdout: &str) -> bool {
    serde_json::from_str::<GraphqlErrors>(stdout)
        .map(|body| {
            body.errors
                .iter()
                .any(|e| e.kind.as_deref() == Some("RATE_LIMITED"))
        })
        .unwrap_or(false)
}

static TOO_MANY_REQUESTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bHTTP 429\b").expect("valid status regex"));

/// `gh` ends HTTP failures with `(HTTP <status>)`.
fn has_too_many_requests_status(stderr: &str) -> bool {
    TOO_MANY_REQUESTS.is_match(stderr)
}

/// Turn a failed `gh` invocation into a `ForgeError`. `what` prefixes the
/// generic error message.
pub fn classify_failure(
    output: &GhOutput,
    classifier: RateLimitClassifier,
    what: &str,
) -> ForgeError {
    if has_structured_rate_limit(&output.stdout)
        || has_too_many_requests_status(&output.stderr)
        || classifier(&output.stderr)
    {
        return ForgeError::RateLimited(output.stderr.clone());
    }
    ForgeError::Client(format!("{}: {}", what, output.stderr.trim()))
}
