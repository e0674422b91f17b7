use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, info, warn};

use super::capture::ResponseCapture;
use super::mirror::{MirrorUrls, fetch_fragment};
use super::retry::with_retry;
use super::table::{ClaimResult, CompletionTable};
use crate::config::FetchConfig;
use crate::error::{Error, Result};
use crate::png::{PngError, is_png};
use crate::utils::multierr::MultiError;
use crate::utils::worker_pool::WorkerPool;

/// Counters for one acquisition run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub fragments: usize,
    pub requests: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub failed: usize,
}

pub fn fragment_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{}.png", index))
}

enum Accepted {
    Stored(usize),
    Duplicate(usize),
}

struct WorkerContext {
    client: reqwest::Client,
    config: FetchConfig,
    table: CompletionTable,
    requests: AtomicUsize,
    duplicates: AtomicUsize,
    rejected: AtomicUsize,
    failed: AtomicUsize,
}

impl WorkerContext {
    fn spend_request(&self) -> Result<()> {
        let budget = self.config.request_budget();
        if self.requests.fetch_add(1, Ordering::AcqRel) >= budget {
            return Err(Error::BudgetExhausted(budget));
        }
        Ok(())
    }

    /// Validate a captured response and persist it if its slot is still open.
    async fn accept(&self, url: &str, capture: ResponseCapture) -> Result<Accepted> {
        let seq = capture.sequence().ok_or_else(|| Error::MissingSequence {
            url: url.to_string(),
        })?;
        let index = self.table.index_of(seq)?;
        if !is_png(capture.body()) {
            return Err(Error::InvalidFragment {
                url: url.to_string(),
                seq,
                source: PngError::Signature,
            });
        }

        let claim = match self.table.try_claim(index)? {
            ClaimResult::Claimed(claim) => claim,
            ClaimResult::Duplicate => return Ok(Accepted::Duplicate(index)),
        };
        write_fragment(&self.config.work_dir, index, &capture.into_body()).await?;
        claim.commit();
        Ok(Accepted::Stored(index))
    }
}

/// Write through a temporary name so a fragment file is never seen half-written.
async fn write_fragment(dir: &Path, index: usize, body: &[u8]) -> Result<()> {
    let path = fragment_path(dir, index);
    let tmp = path.with_extension("png.part");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(())
}

async fn worker_loop(id: usize, ctx: Arc<WorkerContext>) -> Result<()> {
    let config = &ctx.config;
    let mut urls = MirrorUrls::new(&config.mirrors, config.image, id);

    while !ctx.table.is_complete() {
        let url = urls
            .next()
            .ok_or_else(|| Error::Config("no mirrors configured".into()))?;
        let ctx_ref: &WorkerContext = &ctx;
        let url_ref = url.as_str();

        let fetched = with_retry(&config.retry, || async move {
            ctx_ref.spend_request()?;
            fetch_fragment(&ctx_ref.client, url_ref, &ctx_ref.config.fragment_header).await
        })
        .await;
        let capture = match fetched {
            Ok(capture) => capture,
            // A dead or misbehaving mirror only costs budget; move on to the next one.
            Err(e @ (Error::Network(_) | Error::HttpStatus { .. })) => {
                ctx.failed.fetch_add(1, Ordering::Relaxed);
                warn!(worker = id, url = %url, error = %e, "mirror request failed");
                continue;
            }
            Err(e) => return Err(e),
        };

        match ctx.accept(&url, capture).await {
            Ok(Accepted::Stored(index)) => {
                info!(
                    worker = id,
                    seq = index,
                    obtained = ctx.table.obtained(),
                    total = ctx.table.total(),
                    "stored fragment"
                );
            }
            Ok(Accepted::Duplicate(index)) => {
                ctx.duplicates.fetch_add(1, Ordering::Relaxed);
                debug!(worker = id, seq = index, "duplicate fragment dropped");
            }
            Err(
                e @ (Error::MissingSequence { .. }
                | Error::SequenceOutOfRange { .. }
                | Error::InvalidFragment { .. }),
            ) => {
                ctx.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(worker = id, url = %url, error = %e, "fragment rejected");
            }
            Err(e) => return Err(e),
        }
    }

    debug!(worker = id, "all fragments obtained, worker exiting");
    Ok(())
}

/// Run the worker pool until every fragment index is stored under `work_dir`.
pub async fn acquire(config: &FetchConfig) -> Result<FetchSummary> {
    config.validate()?;
    tokio::fs::create_dir_all(&config.work_dir).await?;

    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .connect_timeout(config.connect_timeout)
        .user_agent(concat!("pngfetch/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let ctx = Arc::new(WorkerContext {
        client,
        config: config.clone(),
        table: CompletionTable::new(config.fragments),
        requests: AtomicUsize::new(0),
        duplicates: AtomicUsize::new(0),
        rejected: AtomicUsize::new(0),
        failed: AtomicUsize::new(0),
    });

    info!(
        threads = config.threads,
        fragments = config.fragments,
        mirrors = config.mirrors.len(),
        image = config.image,
        "starting fragment acquisition"
    );

    let pool = WorkerPool::new(config.threads);
    let results = pool.run(|id| worker_loop(id, Arc::clone(&ctx))).await;

    let mut causes = MultiError::new();
    for (id, result) in results.into_iter().enumerate() {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => causes.push(id, e),
            Err(join_err) => causes.push(id, Error::Join(join_err)),
        }
    }

    if !ctx.table.is_complete() {
        return Err(Error::Incomplete {
            missing: ctx.table.missing(),
            causes,
        });
    }
    for (id, e) in causes.errors() {
        warn!(worker = id, error = %e, "worker stopped early");
    }

    Ok(FetchSummary {
        fragments: ctx.table.total(),
        requests: ctx
            .requests
            .load(Ordering::Acquire)
            .min(config.request_budget()),
        duplicates: ctx.duplicates.load(Ordering::Acquire),
        rejected: ctx.rejected.load(Ordering::Acquire),
        failed: ctx.failed.load(Ordering::Acquire),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::png::test_util::fragment;
    use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::TcpListener;

    const HEADER: &str = "x-ece252-fragment";

    /// Scripted mirror: replies with `script[i % len]` on the i-th request.
    #[derive(Clone)]
    struct Script {
        replies: Arc<Vec<(Option<String>, StatusCode, Vec<u8>)>>,
        hits: Arc<AtomicUsize>,
    }

    async fn scripted(State(script): State<Script>) -> impl IntoResponse {
        let i = script.hits.fetch_add(1, Ordering::SeqCst);
        let (seq, status, body) = script.replies[i % script.replies.len()].clone();
        let mut headers = axum::http::HeaderMap::new();
        if let Some(seq) = seq {
            headers.insert(HEADER, seq.parse().unwrap());
        }
        (status, headers, body)
    }

    async fn start_script(replies: Vec<(Option<String>, StatusCode, Vec<u8>)>) -> (String, Script) {
        let script = Script {
            replies: Arc::new(replies),
            hits: Arc::new(AtomicUsize::new(0)),
        };
        let app = Router::new()
            .route("/image", get(scripted))
            .with_state(script.clone());
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/image", addr), script)
    }

    fn test_config(mirrors: Vec<String>, dir: &Path, fragments: usize) -> FetchConfig {
        FetchConfig {
            mirrors,
            threads: 2,
            fragments,
            work_dir: dir.to_path_buf(),
            output: dir.join("all.png"),
            request_timeout: Duration::from_secs(5),
            retry: RetryConfig {
                max_retries: 2,
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                backoff_multiplier: 2.0,
                jitter: false,
            },
            ..FetchConfig::default()
        }
    }

    fn ok(seq: usize, body: &[u8]) -> (Option<String>, StatusCode, Vec<u8>) {
        (Some(seq.to_string()), StatusCode::OK, body.to_vec())
    }

    #[tokio::test]
    async fn test_all_fragments_stored_before_return() {
        let frags: Vec<_> = (0..4).map(|i| fragment(2, 1, i as u8).0).collect();
        let replies = frags.iter().enumerate().map(|(i, b)| ok(i, b)).collect();
        let (url, _) = start_script(replies).await;
        let dir = tempfile::tempdir().unwrap();

        let summary = acquire(&test_config(vec![url], dir.path(), 4)).await.unwrap();

        assert_eq!(summary.fragments, 4);
        for (i, bytes) in frags.iter().enumerate() {
            let stored = std::fs::read(fragment_path(dir.path(), i)).unwrap();
            assert_eq!(&stored, bytes);
        }
        assert!(!dir.path().join("0.png.part").exists());
    }

    #[tokio::test]
    async fn test_missing_header_does_not_touch_table() {
        let (f0, _) = fragment(2, 1, 0);
        let (f1, _) = fragment(2, 1, 1);
        let replies = vec![
            (None, StatusCode::OK, f0.clone()),
            ok(1, &f1),
            (Some("-1".to_string()), StatusCode::OK, f0.clone()),
            (Some("99".to_string()), StatusCode::OK, f0.clone()),
            ok(0, &f0),
        ];
        let (url, script) = start_script(replies).await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(vec![url], dir.path(), 2);
        config.threads = 1;

        let summary = acquire(&config).await.unwrap();

        assert_eq!(summary.rejected, 3);
        assert_eq!(script.hits.load(Ordering::SeqCst), 5);
        assert_eq!(std::fs::read(fragment_path(dir.path(), 0)).unwrap(), f0);
        assert_eq!(std::fs::read(fragment_path(dir.path(), 1)).unwrap(), f1);
        assert!(!dir.path().join("-1.png").exists());
    }

    #[tokio::test]
    async fn test_duplicates_do_not_overwrite() {
        let (f0, _) = fragment(2, 1, 0);
        let (f0_other, _) = fragment(2, 1, 200);
        let (f1, _) = fragment(2, 1, 1);
        let replies = vec![ok(0, &f0), ok(0, &f0_other), ok(1, &f1)];
        let (url, _) = start_script(replies).await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(vec![url], dir.path(), 2);
        config.threads = 1;

        let summary = acquire(&config).await.unwrap();

        assert_eq!(summary.duplicates, 1);
        assert_eq!(std::fs::read(fragment_path(dir.path(), 0)).unwrap(), f0);
    }

    #[tokio::test]
    async fn test_non_png_body_rejected() {
        let (f0, _) = fragment(2, 1, 0);
        let replies = vec![ok(0, b"<html>busy</html>"), ok(0, &f0)];
        let (url, _) = start_script(replies).await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(vec![url], dir.path(), 1);
        config.threads = 1;

        let summary = acquire(&config).await.unwrap();
        assert_eq!(summary.rejected, 1);
        assert_eq!(std::fs::read(fragment_path(dir.path(), 0)).unwrap(), f0);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let (f0, _) = fragment(2, 1, 0);
        let replies = vec![
            (None, StatusCode::SERVICE_UNAVAILABLE, vec![]),
            ok(0, &f0),
        ];
        let (url, script) = start_script(replies).await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(vec![url], dir.path(), 1);
        config.threads = 1;

        acquire(&config).await.unwrap();
        assert_eq!(script.hits.load(Ordering::SeqCst), 2);
    }

    /// Bind then drop to get a port nobody listens on.
    fn dead_mirror() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}/image", addr)
    }

    #[tokio::test]
    async fn test_unreachable_mirror_ends_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(vec![dead_mirror()], dir.path(), 3);

        match acquire(&config).await {
            Err(Error::Incomplete { missing, causes }) => {
                assert_eq!(missing, vec![0, 1, 2]);
                assert_eq!(causes.len(), 2);
                assert!(
                    causes
                        .errors()
                        .iter()
                        .all(|(_, e)| matches!(e, Error::BudgetExhausted(60)))
                );
            }
            other => panic!("expected Incomplete, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_dead_mirror_rotates_to_healthy_one() {
        let (f0, _) = fragment(2, 1, 0);
        let (good, script) = start_script(vec![ok(0, &f0)]).await;
        let dir = tempfile::tempdir().unwrap();
        // Worker 0 starts on the dead mirror.
        let mut config = test_config(vec![dead_mirror(), good], dir.path(), 1);
        config.threads = 1;

        let summary = acquire(&config).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(script.hits.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read(fragment_path(dir.path(), 0)).unwrap(), f0);
    }

    #[tokio::test]
    async fn test_not_found_mirror_is_skipped() {
        let (f0, _) = fragment(2, 1, 0);
        let (missing, missing_script) =
            start_script(vec![(None, StatusCode::NOT_FOUND, vec![])]).await;
        let (good, _) = start_script(vec![ok(0, &f0)]).await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(vec![missing, good], dir.path(), 1);
        config.threads = 1;

        let summary = acquire(&config).await.unwrap();

        assert_eq!(summary.failed, 1);
        // 404 is not retried on the same mirror.
        assert_eq!(missing_script.hits.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read(fragment_path(dir.path(), 0)).unwrap(), f0);
    }

    #[tokio::test]
    async fn test_request_budget_stops_duplicate_loop() {
        let (f0, _) = fragment(2, 1, 0);
        let (url, _) = start_script(vec![ok(0, &f0)]).await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(vec![url], dir.path(), 2);
        config.max_requests = Some(6);

        match acquire(&config).await {
            Err(Error::Incomplete { missing, causes }) => {
                assert_eq!(missing, vec![1]);
                assert!(
                    causes
                        .errors()
                        .iter()
                        .all(|(_, e)| matches!(e, Error::BudgetExhausted(6)))
                );
            }
            other => panic!("expected Incomplete, got {:?}", other.map(|_| ())),
        }
    }
}
