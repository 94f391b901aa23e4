//! Forge API client backed by the pre-authenticated `gh` CLI.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument};

use crate::config::{Config, MAX_PER_CALL};
use crate::model::{LatestRelease, RateLimit, StarredRepo};

pub mod error;
pub mod graphql;
pub mod pagination;
pub mod runner;

pub use error::{default_rate_limit_classifier, ForgeError, RateLimitClassifier};
pub use runner::{GhOutput, GhRunner, SubprocessRunner};

/// Most names a single release batch call accepts.
pub const RELEASE_BATCH_SIZE: usize = MAX_PER_CALL;

/// The operations the sync engine needs from a forge.
#[async_trait]
pub trait ForgeApi: Send + Sync {
    /// Every starred repo, in page order.
    async fn list_starred_repos(&self) -> Result<Vec<StarredRepo>, ForgeError>;

    /// Latest release for each of `names` that has one. One request per call.
    async fn fetch_release_batch(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, LatestRelease>, ForgeError>;

    /// Telemetry from the most recent release batch response.
    fn last_rate_limit(&self) -> Option<RateLimit>;

    /// Cap on `names` per `fetch_release_batch` call.
    fn batch_cap(&self) -> usize {
        RELEASE_BATCH_SIZE
    }
}

#[derive(Clone)]
pub struct GhClient {
    runner: Arc<dyn GhRunner>,
    stars_per_page: usize,
    classifier: RateLimitClassifier,
    last_rate_limit: Arc<Mutex<Option<RateLimit>>>,
}

impl std::fmt::Debug for GhClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GhClient")
            .field("stars_per_page", &self.stars_per_page)
            .finish_non_exhaustive()
    }
}

impl GhClient {
    pub fn from_config(cfg: &Config) -> Self {
        Self::with_runner(
            Arc::new(SubprocessRunner::new(cfg.gh.binary.clone())),
            cfg.sync.stars_per_page,
        )
    }

    pub fn with_runner(runner: Arc<dyn GhRunner>, stars_per_page: usize) -> Self {
        Self {
            runner,
            stars_per_page: stars_per_page.clamp(1, MAX_PER_CALL),
            classifier: default_rate_limit_classifier,
            last_rate_limit: Arc::new(Mutex::new(None)),
        }
    }

    /// Replace the text classifier used when no structured signal is present.
    pub fn with_classifier(mut self, classifier: RateLimitClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    async fn gh(&self, args: Vec<String>, what: &str) -> Result<String, ForgeError> {
        debug!(?args, "invoking gh");
        let output = self.runner.run(&args).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ForgeError::Client(
                    "GitHub CLI (gh) not found. Install it: https://cli.github.com/".into(),
                )
            } else {
                ForgeError::Client(format!("failed to run gh: {}", e))
            }
        })?;
        if !output.success {
            return Err(error::classify_failure(&output, self.classifier, what));
        }
        Ok(output.stdout)
    }

    async fn fetch_first_star_page(&self) -> Result<(Vec<StarredRepo>, u32), ForgeError> {
        let raw = self
            .gh(
                vec![
                    "api".into(),
                    pagination::starred_route(self.stars_per_page, 1),
                    "-i".into(),
                ],
                "gh api failed",
            )
            .await?;
        let (headers, body) = pagination::split_headers(&raw);
        let last_page = pagination::last_page(headers);
        let repos = pagination::parse_star_page(body)
            .map_err(|e| ForgeError::Client(format!("invalid starred page 1: {}", e)))?;
        Ok((repos, last_page))
    }

    async fn fetch_star_page(&self, page: u32) -> Result<Vec<StarredRepo>, ForgeError> {
        let out = self
            .gh(
                vec![
                    "api".into(),
                    pagination::starred_route(self.stars_per_page, page),
                    "--jq".into(),
                    pagination::JQ_STARS.into(),
                ],
                "gh api failed",
            )
            .await?;
        pagination::parse_ndjson(&out)
            .map_err(|e| ForgeError::Client(format!("invalid starred page {}: {}", page, e)))
    }

    fn store_rate_limit(&self, rate_limit: RateLimit) {
        let mut guard = self
            .last_rate_limit
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(rate_limit);
    }
}

#[async_trait]
impl ForgeApi for GhClient {
    /// Page 1 is fetched alone to learn the page count; the rest are fetched
    /// in parallel, one task per page. The first failing page (in page order)
    /// is returned, but every task is awaited.
    #[instrument(skip_all)]
    async fn list_starred_repos(&self) -> Result<Vec<StarredRepo>, ForgeError> {
        let (mut repos, last_page) = self.fetch_first_star_page().await?;
        if last_page <= 1 {
            return Ok(repos);
        }
        debug!(last_page, "fetching remaining star pages");

        let handles: Vec<_> = (2..=last_page)
            .map(|page| {
                let client = self.clone();
                tokio::spawn(async move { client.fetch_star_page(page).await })
            })
            .collect();

        let mut first_err = None;
        for joined in futures::future::join_all(handles).await {
            let result = match joined {
                Ok(result) => result,
                Err(join_err) => Err(ForgeError::Client(format!(
                    "star page task failed: {}",
                    join_err
                ))),
            };
            match result {
                Ok(page) => repos.extend(page),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(repos),
        }
    }

    #[instrument(skip_all, fields(count = names.len()))]
    async fn fetch_release_batch(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, LatestRelease>, ForgeError> {
        if names.is_empty() {
            return Ok(HashMap::new());
        }
        if names.len() > RELEASE_BATCH_SIZE {
            return Err(ForgeError::Client(format!(
                "release batch of {} exceeds the limit of {}",
                names.len(),
                RELEASE_BATCH_SIZE
            )));
        }

        let query = graphql::build_releases_query(names);
        let out = self
            .gh(
                vec![
                    "api".into(),
                    "graphql".into(),
                    "-f".into(),
                    format!("query={}", query),
                ],
                "GraphQL query failed",
            )
            .await?;

        let batch = graphql::parse_releases_response(&out, names)
            .map_err(|e| ForgeError::Client(format!("invalid GraphQL response: {}", e)))?;
        if let Some(rate_limit) = batch.rate_limit {
            self.store_rate_limit(rate_limit);
        }
        Ok(batch.releases)
    }

    fn last_rate_limit(&self) -> Option<RateLimit> {
        *self
            .last_rate_limit
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Answers each call from a closure over the argument list.
    struct ScriptedRunner<F>(F);

    #[async_trait]
    impl<F> GhRunner for ScriptedRunner<F>
    where
        F: Fn(&[String]) -> std::io::Result<GhOutput> + Send + Sync,
    {
        async fn run(&self, args: &[String]) -> std::io::Result<GhOutput> {
            (self.0)(args)
        }
    }

    fn client<F>(f: F) -> GhClient
    where
        F: Fn(&[String]) -> std::io::Result<GhOutput> + Send + Sync + 'static,
    {
        GhClient::with_runner(Arc::new(ScriptedRunner(f)), 2)
    }

    fn page_of(names: &[&str]) -> String {
        names
            .iter()
            .map(|n| json!({"full_name": n, "description": null, "language": "Rust"}).to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn first_page(last: u32, names: &[&str]) -> String {
        let body: Vec<_> = names
            .iter()
            .map(|n| json!({"full_name": n, "description": "d", "language": null}))
            .collect();
        format!(
            "HTTP/2.0 200 OK\nLink: <https://api.github.com/user/starred?per_page=2&page=2>; rel=\"next\", <https://api.github.com/user/starred?per_page=2&page={}>; rel=\"last\"\n\n{}",
            last,
            serde_json::Value::Array(body)
        )
    }

    #[tokio::test]
    async fn lists_all_pages_in_page_order() {
        let gh = client(|args| {
            let route = args[1].as_str();
            if route.ends_with("page=1") {
                assert_eq!(args[2], "-i");
                Ok(GhOutput::ok(first_page(3, &["a/1", "a/2"])))
            } else if route.ends_with("page=2") {
                assert_eq!(args[2], "--jq");
                Ok(GhOutput::ok(page_of(&["b/1", "b/2"])))
            } else {
                Ok(GhOutput::ok(page_of(&["c/1"])))
            }
        });

        let repos = gh.list_starred_repos().await.unwrap();
        let names: Vec<_> = repos.iter().map(|r| r.full_name.as_str()).collect();
        assert_eq!(names, vec!["a/1", "a/2", "b/1", "b/2", "c/1"]);
    }

    #[tokio::test]
    async fn single_page_makes_one_call() {
        let calls = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&calls);
        let gh = client(move |_| {
            *counter.lock().unwrap() += 1;
            Ok(GhOutput::ok("HTTP/2.0 200 OK\n\n[{\"full_name\":\"a/b\"}]"))
        });
        let repos = gh.list_starred_repos().await.unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn any_failed_page_aborts_listing() {
        let gh = client(|args| {
            if args[1].ends_with("page=1") {
                Ok(GhOutput::ok(first_page(3, &["a/1"])))
            } else if args[1].ends_with("page=3") {
                Ok(GhOutput::failed("gh: API rate limit exceeded (HTTP 403)"))
            } else {
                Ok(GhOutput::ok(page_of(&["b/1"])))
            }
        });
        let err = gh.list_starred_repos().await.unwrap_err();
        assert!(err.is_rate_limit());
    }

    #[tokio::test]
    async fn missing_gh_binary_is_client_error() {
        let gh = client(|_| Err(std::io::Error::from(std::io::ErrorKind::NotFound)));
        let err = gh.list_starred_repos().await.unwrap_err();
        assert!(matches!(err, ForgeError::Client(ref m) if m.contains("not found")));
    }

    #[tokio::test]
    async fn release_batch_records_telemetry_separately() {
        let gh = client(|args| {
            assert_eq!(&args[..3], &["api", "graphql", "-f"]);
            assert!(args[3].starts_with("query={ rateLimit"));
            Ok(GhOutput::ok(
                json!({
                    "data": {
                        "rateLimit": {"remaining": 7, "limit": 5000, "used": 4993},
                        "repo0": {"latestRelease": {"tagName": "v2", "name": null,
                                  "description": null, "publishedAt": null}},
                        "repo1": {"latestRelease": null}
                    }
                })
                .to_string(),
            ))
        });
        assert!(gh.last_rate_limit().is_none());

        let names = vec!["a/b".to_string(), "c/d".to_string()];
        let releases = gh.fetch_release_batch(&names).await.unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases["a/b"].tag_name, "v2");
        assert_eq!(gh.last_rate_limit().map(|r| r.remaining), Some(7));
    }

    #[tokio::test]
    async fn empty_batch_makes_no_call() {
        let gh = client(|_| panic!("no call expected"));
        assert!(gh.fetch_release_batch(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn release_batch_failure_is_classified() {
        let gh = client(|_| Ok(GhOutput::failed("was submitted too quickly: secondary rate")));
        let err = gh.fetch_release_batch(&["a/b".into()]).await.unwrap_err();
        assert!(err.is_rate_limit());

        let gh = client(|_| Ok(GhOutput::failed("Could not resolve to a Repository\n")));
        let err = gh.fetch_release_batch(&["a/b".into()]).await.unwrap_err();
        assert_eq!(
            err,
            ForgeError::Client("GraphQL query failed: Could not resolve to a Repository".into())
        );
    }

    #[tokio::test]
    async fn custom_classifier_changes_batch_classification() {
        fn abuse_detection(stderr: &str) -> bool {
            stderr.contains("abuse detection")
        }
        let stderr = "gh: You have triggered an abuse detection mechanism (HTTP 403)";

        let gh = client(move |_| Ok(GhOutput::failed(stderr)));
        let err = gh.fetch_release_batch(&["a/b".into()]).await.unwrap_err();
        assert!(!err.is_rate_limit());

        let gh = client(move |_| Ok(GhOutput::failed(stderr))).with_classifier(abuse_detection);
        let err = gh.fetch_release_batch(&["a/b".into()]).await.unwrap_err();
        assert_eq!(err, ForgeError::RateLimited(stderr.into()));

        // The replacement classifier no longer knows the default phrases.
        let gh = client(|_| Ok(GhOutput::failed("API rate limit exceeded")))
            .with_classifier(abuse_detection);
        let err = gh.fetch_release_batch(&["a/b".into()]).await.unwrap_err();
        assert!(!err.is_rate_limit());
    }
}
