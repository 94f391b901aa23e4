//! Database entity and view models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::FromRow;

/// A starred repository tracked across runs.
#[derive(Debug, Clone, Serialize, FromRow, PartialEq, Eq)]
pub struct TrackedRepo {
    pub id: i64,
    pub full_name: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub last_checked_at: Option<NaiveDateTime>,
    pub last_known_tag: Option<String>,
}

/// A recorded release. `old_tag` is `None` for the baseline row.
#[derive(Debug, Clone, Serialize, FromRow, PartialEq, Eq)]
pub struct ReleaseEvent {
    pub id: i64,
    pub repo_id: i64,
    pub tag_name: String,
    pub name: Option<String>,
    pub body: Option<String>,
    pub published_at: Option<String>,
    pub old_tag: Option<String>,
    pub created_at: NaiveDateTime,
}

/// One row of the sync audit log.
#[derive(Debug, Clone, Serialize, FromRow, PartialEq, Eq)]
pub struct SyncRun {
    pub id: i64,
    pub synced_at: NaiveDateTime,
    pub repos_checked: i64,
    pub new_releases_found: i64,
}

/// Release joined with its repository, as shown in the report.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ReleaseWithRepo {
    pub tag_name: String,
    pub name: Option<String>,
    pub body: Option<String>,
    pub published_at: Option<String>,
    pub old_tag: Option<String>,
    pub full_name: String,
    pub language: Option<String>,
    pub repo_description: Option<String>,
}

/// Fields of a release to be recorded against a repo.
#[derive(Debug, Clone, Copy)]
pub struct NewReleaseRow<'a> {
    pub tag_name: &'a str,
    pub name: Option<&'a str>,
    pub body: Option<&'a str>,
    pub published_at: Option<&'a str>,
    pub old_tag: Option<&'a str>,
}
