use super::model::{NewReleaseRow, ReleaseEvent, ReleaseWithRepo, SyncRun, TrackedRepo};
use crate::model::StarredRepo;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open database {}", normalized))?;
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }

    // In-memory URLs like sqlite::memory: or sqlite::memory:?cache=shared
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match path_part.strip_prefix("~/") {
        Some(rest) => match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
            Err(_) => path_part.to_string(),
        },
        None => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    // Rebuild URL, prefer sqlite:// form. Missing files are created.
    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    match query_part {
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Insert a repo or refresh its description and language. Never touches
/// `last_known_tag` or `last_checked_at`. Returns the row id.
#[instrument(skip_all, fields(full_name = %repo.full_name))]
pub async fn upsert_repo(pool: &Pool, repo: &StarredRepo) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO repos (full_name, description, language) VALUES (?, ?, ?) \
         ON CONFLICT(full_name) DO UPDATE SET \
             description = excluded.description, \
             language = excluded.language \
         RETURNING id",
    )
    .bind(&repo.full_name)
    .bind(repo.description.as_deref())
    .bind(repo.language.as_deref())
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to upsert repo {}", repo.full_name))?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn find_repo(pool: &Pool, full_name: &str) -> Result<Option<TrackedRepo>> {
    let repo = sqlx::query_as::<_, TrackedRepo>(
        "SELECT id, full_name, description, language, last_checked_at, last_known_tag \
         FROM repos WHERE full_name = ?",
    )
    .bind(full_name)
    .fetch_optional(pool)
    .await?;
    Ok(repo)
}

/// Record `tag_name` as the latest known tag and stamp the check time.
#[instrument(skip_all)]
pub async fn update_checked(pool: &Pool, repo_id: i64, tag_name: &str) -> Result<()> {
    sqlx::query(
        "UPDATE repos SET last_checked_at = datetime('now'), last_known_tag = ? WHERE id = ?",
    )
    .bind(tag_name)
    .bind(repo_id)
    .execute(pool)
    .await
    .context("failed to update repo check state")?;
    Ok(())
}

/// Insert a release unless `(repo_id, tag_name)` already exists. Returns
/// whether a row was written.
#[instrument(skip(pool, release), fields(tag = %release.tag_name))]
pub async fn insert_release_if_absent(
    pool: &Pool,
    repo_id: i64,
    release: NewReleaseRow<'_>,
) -> Result<bool> {
    let res = sqlx::query(
        "INSERT OR IGNORE INTO releases (repo_id, tag_name, name, body, published_at, old_tag) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(repo_id)
    .bind(release.tag_name)
    .bind(release.name)
    .bind(release.body)
    .bind(release.published_at)
    .bind(release.old_tag)
    .execute(pool)
    .await
    .context("failed to insert release")?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn log_sync_run(
    pool: &Pool,
    repos_checked: usize,
    new_releases_found: usize,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO sync_log (repos_checked, new_releases_found) VALUES (?, ?) RETURNING id",
    )
    .bind(repos_checked as i64)
    .bind(new_releases_found as i64)
    .fetch_one(pool)
    .await
    .context("failed to log sync run")?;
    Ok(id)
}

/// All tracked repos ordered by name, optionally filtered by language
/// (case-insensitive).
#[instrument(skip_all)]
pub async fn all_repos(pool: &Pool, language: Option<&str>) -> Result<Vec<TrackedRepo>> {
    let repos = match language {
        Some(lang) => {
            sqlx::query_as::<_, TrackedRepo>(
                "SELECT id, full_name, description, language, last_checked_at, last_known_tag \
                 FROM repos WHERE lower(language) = lower(?) ORDER BY full_name",
            )
            .bind(lang)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, TrackedRepo>(
                "SELECT id, full_name, description, language, last_checked_at, last_known_tag \
                 FROM repos ORDER BY full_name",
            )
            .fetch_all(pool)
            .await?
        }
    };
    Ok(repos)
}

pub async fn repo_count(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM repos")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Releases of one repo in insertion order.
pub async fn releases_for_repo(pool: &Pool, repo_id: i64) -> Result<Vec<ReleaseEvent>> {
    let rows = sqlx::query_as::<_, ReleaseEvent>(
        "SELECT id, repo_id, tag_name, name, body, published_at, old_tag, created_at \
         FROM releases WHERE repo_id = ? ORDER BY id",
    )
    .bind(repo_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Releases published at or after `since`, newest first.
#[instrument(skip_all)]
pub async fn releases_since(pool: &Pool, since: DateTime<Utc>) -> Result<Vec<ReleaseWithRepo>> {
    let rows = sqlx::query_as::<_, ReleaseWithRepo>(
        "SELECT r.tag_name, r.name, r.body, r.published_at, r.old_tag, \
                repos.full_name, repos.language, repos.description AS repo_description \
         FROM releases r \
         JOIN repos ON repos.id = r.repo_id \
         WHERE datetime(r.published_at) >= datetime(?) \
         ORDER BY datetime(r.published_at) DESC",
    )
    .bind(since.format("%Y-%m-%d %H:%M:%S").to_string())
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn latest_sync(pool: &Pool) -> Result<Option<SyncRun>> {
    let run = sqlx::query_as::<_, SyncRun>(
        "SELECT id, synced_at, repos_checked, new_releases_found \
         FROM sync_log ORDER BY id DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(run)
}

/// Drop all three relations and recreate them from the migrations.
#[instrument(skip_all)]
pub async fn reset(pool: &Pool) -> Result<()> {
    let mut tx = pool.begin().await?;
    for stmt in [
        "DROP TABLE IF EXISTS releases",
        "DROP TABLE IF EXISTS sync_log",
        "DROP TABLE IF EXISTS repos",
        "DELETE FROM _sqlx_migrations",
    ] {
        sqlx::query(stmt).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    run_migrations(pool).await
}
