//! End-to-end sync run: star listing, concurrent release lookups, and the
//! sequential diff that writes to the store.
//!
//! Network fetches run in a bounded pool of tasks and never touch the store.
//! Their outcomes are parked in slots indexed by batch number, so the
//! sequential phase sees dispatch order no matter which task finished first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use anyhow::anyhow;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::config::SyncOptions;
use crate::db::{self, NewReleaseRow, Pool};
use crate::github::{ForgeApi, ForgeError};
use crate::model::{LatestRelease, NewRelease, StarredRepo, SyncSummary};

#[derive(Debug, Error)]
pub enum SyncError {
    /// The starred list could not be fetched; nothing was written.
    #[error("failed to fetch starred repos: {0}")]
    Forge(#[from] ForgeError),
    /// A store write or read failed. Rows written before the failure remain.
    #[error("database error: {0:#}")]
    Store(#[from] anyhow::Error),
}

type BatchOutcome = Result<HashMap<String, LatestRelease>, ForgeError>;

/// Shared completion counter, reset between the fetch and write phases.
#[derive(Debug)]
struct Progress {
    done: AtomicUsize,
    total: usize,
}

impl Progress {
    fn new(total: usize) -> Self {
        Self {
            done: AtomicUsize::new(0),
            total,
        }
    }

    fn advance(&self, n: usize) -> usize {
        self.done.fetch_add(n, Ordering::SeqCst) + n
    }

    fn reset(&self) {
        self.done.store(0, Ordering::SeqCst);
    }
}

/// Run one sync against `pool` using `client`.
#[instrument(skip_all)]
pub async fn sync(
    pool: &Pool,
    client: Arc<dyn ForgeApi>,
    opts: &SyncOptions,
) -> Result<SyncSummary, SyncError> {
    info!("fetching starred repos");
    let repos = client.list_starred_repos().await?;
    info!(count = repos.len(), "fetched starred repos");

    // Identity first, so repos exist even if release checks fail part way.
    for repo in &repos {
        db::upsert_repo(pool, repo).await?;
    }

    let batch_size = opts.batch_size.clamp(1, client.batch_cap().max(1));
    let batches: Vec<Vec<StarredRepo>> = repos.chunks(batch_size).map(<[_]>::to_vec).collect();

    let progress = Arc::new(Progress::new(repos.len()));
    let outcomes = fetch_batches(Arc::clone(&client), &batches, opts.workers, &progress).await;
    progress.reset();

    let mut summary = apply_outcomes(pool, &batches, outcomes, &progress).await?;

    db::log_sync_run(pool, summary.repos_synced, summary.new_releases.len()).await?;
    summary.rate_limit = client.last_rate_limit();

    info!(
        repos_synced = summary.repos_synced,
        new_releases = summary.new_releases.len(),
        first_sync = summary.first_sync.len(),
        errors = summary.errors.len(),
        rate_limited = summary.rate_limited,
        "sync finished"
    );
    Ok(summary)
}

/// Fetch every batch with at most `workers` tasks. Each task claims the next
/// unclaimed index until none remain; a rate-limited task stops claiming but
/// the others carry on. Returns one slot per batch, in batch order.
async fn fetch_batches(
    client: Arc<dyn ForgeApi>,
    batches: &[Vec<StarredRepo>],
    workers: usize,
    progress: &Arc<Progress>,
) -> Vec<Option<BatchOutcome>> {
    if batches.is_empty() {
        return Vec::new();
    }

    let names: Arc<Vec<Vec<String>>> = Arc::new(
        batches
            .iter()
            .map(|b| b.iter().map(|r| r.full_name.clone()).collect())
            .collect(),
    );
    let slots: Arc<Vec<OnceLock<BatchOutcome>>> =
        Arc::new((0..batches.len()).map(|_| OnceLock::new()).collect());
    let next = Arc::new(AtomicUsize::new(0));
    let workers = workers.clamp(1, batches.len());
    info!(batches = batches.len(), workers, "checking releases");

    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let client = Arc::clone(&client);
            let names = Arc::clone(&names);
            let slots = Arc::clone(&slots);
            let next = Arc::clone(&next);
            let progress = Arc::clone(progress);
            tokio::spawn(async move {
                loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(batch) = names.get(index) else {
                        break;
                    };
                    let outcome = client.fetch_release_batch(batch).await;
                    let stop = match &outcome {
                        Ok(_) => false,
                        Err(err) if err.is_rate_limit() => {
                            warn!(worker, batch = index, "rate limited; worker stops claiming");
                            true
                        }
                        Err(err) => {
                            warn!(worker, batch = index, error = %err, "release batch failed");
                            false
                        }
                    };
                    if !stop {
                        let done = progress.advance(batch.len());
                        info!(done, total = progress.total, "release lookups");
                    }
                    let _ = slots[index].set(outcome);
                    if stop {
                        break;
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        if let Err(err) = handle.await {
            error!(?err, "release worker task failed");
        }
    }

    match Arc::try_unwrap(slots) {
        Ok(slots) => slots.into_iter().map(OnceLock::into_inner).collect(),
        Err(shared) => shared.iter().map(|slot| slot.get().cloned()).collect(),
    }
}

/// Walk outcomes in batch order, diffing and writing. Stops at the first
/// rate-limited batch.
async fn apply_outcomes(
    pool: &Pool,
    batches: &[Vec<StarredRepo>],
    outcomes: Vec<Option<BatchOutcome>>,
    progress: &Progress,
) -> Result<SyncSummary, SyncError> {
    let mut summary = SyncSummary::default();

    for (index, (batch, outcome)) in batches.iter().zip(outcomes).enumerate() {
        let releases = match outcome {
            Some(Ok(releases)) => releases,
            Some(Err(ForgeError::RateLimited(_))) => {
                warn!(batch = index, "rate limited; stopping early");
                summary.rate_limited = true;
                break;
            }
            Some(Err(ForgeError::Client(msg))) => {
                summary.errors.push(msg);
                summary.repos_synced += batch.len();
                progress.advance(batch.len());
                continue;
            }
            None => {
                // The worker holding this batch died before storing a result.
                summary
                    .errors
                    .push(format!("release batch {} was not fetched", index + 1));
                summary.repos_synced += batch.len();
                progress.advance(batch.len());
                continue;
            }
        };

        for repo in batch {
            if let Some(release) = releases.get(&repo.full_name) {
                diff_repo(pool, &repo.full_name, release, &mut summary).await?;
            }
            summary.repos_synced += 1;
        }

        let done = progress.advance(batch.len());
        if (index + 1) % 10 == 0 {
            info!(done, total = progress.total, "recording releases");
        }
    }

    Ok(summary)
}

fn release_row<'a>(release: &'a LatestRelease, old_tag: Option<&'a str>) -> NewReleaseRow<'a> {
    NewReleaseRow {
        tag_name: &release.tag_name,
        name: release.name.as_deref(),
        body: release.body.as_deref(),
        published_at: release.published_at.as_deref(),
        old_tag,
    }
}

/// Compare the reported latest release against the stored tag and record
/// the outcome.
async fn diff_repo(
    pool: &Pool,
    full_name: &str,
    release: &LatestRelease,
    summary: &mut SyncSummary,
) -> Result<(), SyncError> {
    let tracked = db::find_repo(pool, full_name)
        .await?
        .ok_or_else(|| anyhow!("repo {} missing from store after upsert", full_name))?;

    match tracked.last_known_tag.as_deref() {
        None => {
            db::update_checked(pool, tracked.id, &release.tag_name).await?;
            db::insert_release_if_absent(pool, tracked.id, release_row(release, None)).await?;
            summary.first_sync.push(full_name.to_string());
        }
        Some(old_tag) if old_tag != release.tag_name => {
            db::insert_release_if_absent(pool, tracked.id, release_row(release, Some(old_tag))).await?;
            db::update_checked(pool, tracked.id, &release.tag_name).await?;
            info!(repo = full_name, old_tag, new_tag = %release.tag_name, "new release");
            summary.new_releases.push(NewRelease {
                full_name: full_name.to_string(),
                old_tag: old_tag.to_string(),
                new_tag: release.tag_name.clone(),
                name: release.name.clone(),
                body: release.body.clone(),
                published_at: release.published_at.clone(),
            });
        }
        Some(_) => {}
    }
    Ok(())
}
