//! Parsing helpers for the paged `/user/starred` REST endpoint.
//!
//! Page 1 is requested with `gh api -i`, which prints the HTTP status line and
//! headers before the JSON body. Remaining pages are requested with `--jq` and
//! come back as one JSON object per line.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::StarredRepo;

/// jq filter applied to pages after the first.
pub const JQ_STARS: &str =
    ".[] | {full_name: .full_name, description: .description, language: .language}";

static HEADER_BODY_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\r?\n\r?\n").expect("valid header split regex"));

static LAST_PAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"page=(\d+)>;\s*rel="last""#).expect("valid link regex"));

/// REST route for one page of the authenticated user's stars.
pub fn starred_route(per_page: usize, page: u32) -> String {
    format!("/user/starred?per_page={}&page={}", per_page, page)
}

/// Split `gh api -i` output into the header block and the body.
pub fn split_headers(raw: &str) -> (&str, &str) {
    let mut parts = HEADER_BODY_SPLIT.splitn(raw, 2);
    let headers = parts.next().unwrap_or_default();
    let body = parts.next().unwrap_or_default();
    (headers, body)
}

/// Last page number advertised by the `Link` header, or 1 when there is none.
///
/// GitHub Link headers look like:
/// `<https://api.github.com/user/starred?per_page=100&page=2>; rel="next", <...&page=7>; rel="last"`
pub fn last_page(headers: &str) -> u32 {
    LAST_PAGE
        .captures(headers)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(1)
}

/// Parse a JSON array page body.
pub fn parse_star_page(body: &str) -> Result<Vec<StarredRepo>, serde_json::Error> {
    serde_json::from_str(body.trim())
}

/// Parse newline-delimited objects produced by [`JQ_STARS`]. Blank lines are
/// skipped.
pub fn parse_ndjson(output: &str) -> Result<Vec<StarredRepo>, serde_json::Error> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(serde_json::from_str)
        .collect()
}
