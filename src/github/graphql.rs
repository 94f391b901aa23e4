//! Batched latest-release lookup through the GraphQL API.
//!
//! One query carries up to 100 aliased `repository` selections plus a
//! `rateLimit` selection; GitHub charges a single point for it regardless of
//! how many repositories are included.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::model::{LatestRelease, RateLimit};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRelease {
    tag_name: String,
    name: Option<String>,
    description: Option<String>,
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    data: Option<Map<String, Value>>,
}

/// Parsed body of a release batch query.
#[derive(Debug, Default)]
pub struct ReleaseBatch {
    pub releases: HashMap<String, LatestRelease>,
    pub rate_limit: Option<RateLimit>,
}

fn escape(s: &str) -> String {
    s.replace('"', "\\\"")
}

/// Build the query for `names`, aliasing each repository as `repo{index}`.
pub fn build_releases_query(names: &[String]) -> String {
    let fragments: Vec<String> = names
        .iter()
        .enumerate()
        .map(|(i, full_name)| {
            let (owner, name) = full_name.split_once('/').unwrap_or((full_name, ""));
            format!(
                "repo{i}: repository(owner: \"{owner}\", name: \"{name}\") {{\n  \
                   nameWithOwner\n  \
                   latestRelease {{\n    \
                     tagName\n    \
                     name\n    \
                     description\n    \
                     publishedAt\n  \
                   }}\n\
                 }}",
                i = i,
                owner = escape(owner),
                name = escape(name),
            )
        })
        .collect();
    format!(
        "{{ rateLimit {{ remaining limit used }} {} }}",
        fragments.join("\n")
    )
}

/// Map the aliased response back to the requested names. Repos that are
/// missing, null, or have no release are left out.
pub fn parse_releases_response(
    stdout: &str,
    names: &[String],
) -> Result<ReleaseBatch, serde_json::Error> {
    let parsed: WireResponse = serde_json::from_str(stdout)?;
    let data = parsed.data.unwrap_or_default();

    let rate_limit = match data.get("rateLimit") {
        Some(v) if !v.is_null() => Some(serde_json::from_value::<RateLimit>(v.clone())?),
        _ => None,
    };

    let mut releases = HashMap::new();
    for (i, full_name) in names.iter().enumerate() {
        let Some(release) = data
            .get(&format!("repo{}", i))
            .and_then(|repo| repo.get("latestRelease"))
            .filter(|r| !r.is_null())
        else {
            continue;
        };
        let wire: WireRelease = serde_json::from_value(release.clone())?;
        releases.insert(
            full_name.clone(),
            LatestRelease {
                tag_name: wire.tag_name,
                name: wire.name,
                body: wire.description,
                published_at: wire.published_at,
            },
        );
    }

    Ok(ReleaseBatch {
        releases,
        rate_limit,
    })
}
