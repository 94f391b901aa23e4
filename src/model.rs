use serde::{Deserialize, Serialize};

/// A repository as listed on the user's stars page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StarredRepo {
    pub full_name: String,
    pub description: Option<String>,
    pub language: Option<String>,
}

/// Latest release of a repository as reported by the forge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LatestRelease {
    pub tag_name: String,
    pub name: Option<String>,
    pub body: Option<String>,
    pub published_at: Option<String>,
}

/// Rate-limit telemetry attached to every GraphQL response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimit {
    pub remaining: i64,
    pub limit: i64,
    pub used: i64,
}

/// A tag change detected for a repo that already had a baseline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewRelease {
    pub full_name: String,
    pub old_tag: String,
    pub new_tag: String,
    pub name: Option<String>,
    pub body: Option<String>,
    pub published_at: Option<String>,
}

/// Outcome of one sync run.
///
/// `first_sync` lists repos whose first release was recorded as a baseline;
/// those never appear in `new_releases`. `rate_limited` means the run stopped
/// early and should be retried later.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncSummary {
    pub repos_synced: usize,
    pub new_releases: Vec<NewRelease>,
    pub first_sync: Vec<String>,
    pub rate_limited: bool,
    pub errors: Vec<String>,
    pub rate_limit: Option<RateLimit>,
}
