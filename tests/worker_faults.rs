//! Worker failure paths: session-creation failures abort the run, while
//! restart-budget exhaustion only replaces the worker.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

use sitescan::crawl_engine::CheckpointManager;
use sitescan::{
    Activation, BrowserSession, Clickable, CrawlError, CrawlMode, MemorySink, NavigationOutcome,
    ResultSink, SessionFactory,
};

/// Factory that can never produce a session (no browser on the machine).
struct BrokenFactory;

#[async_trait]
impl SessionFactory for BrokenFactory {
    async fn create(&self) -> Result<Box<dyn BrowserSession>> {
        Err(anyhow!("browser executable not found"))
    }
}

/// Sessions that are created fine but crash on every navigation.
struct FaultySession;

#[async_trait]
impl BrowserSession for FaultySession {
    async fn navigate(&mut self, _url: &str) -> Result<NavigationOutcome> {
        Err(anyhow!("renderer crashed"))
    }

    async fn enumerate_clickables(&mut self) -> Result<Vec<Clickable>> {
        Ok(Vec::new())
    }

    async fn activate(&mut self, _clickable: &Clickable) -> Result<Activation> {
        Ok(Activation {
            new_url: None,
            content_changed: false,
        })
    }

    async fn current_url(&mut self) -> Result<String> {
        Ok(String::new())
    }

    async fn content_hash(&mut self) -> Result<u64> {
        Ok(0)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct FaultyFactory;

#[async_trait]
impl SessionFactory for FaultyFactory {
    async fn create(&self) -> Result<Box<dyn BrowserSession>> {
        Ok(Box::new(FaultySession))
    }
}

fn config_for(dir: &TempDir) -> sitescan::CrawlConfig {
    sitescan::CrawlConfig::builder("http://fixture/")
        .mode(CrawlMode::Markdown)
        .output_dir(dir.path().to_path_buf())
        .workers(1, 1, 1)
        .delays(0.0, 0.5, 0.0)
        .checkpoint_interval_secs(3600)
        .build()
        .expect("config validates")
}

#[tokio::test]
async fn session_creation_failure_is_fatal() {
    let dir = TempDir::new().expect("tempdir");
    let (_tx, rx) = watch::channel(false);

    let result = sitescan::run_crawl(
        &config_for(&dir),
        Arc::new(BrokenFactory),
        Arc::new(MemorySink::new()) as Arc<dyn ResultSink>,
        rx,
    )
    .await;

    assert!(
        matches!(result, Err(CrawlError::BrowserError(_))),
        "a run where no session can ever be created must abort, got {result:?}"
    );
}

#[tokio::test]
async fn restart_budget_exhaustion_replaces_worker_without_aborting() {
    let dir = TempDir::new().expect("tempdir");
    let (_tx, rx) = watch::channel(false);

    // Sessions exist but every navigation faults: workers burn through
    // their restart budgets and get replaced until the URL exhausts its
    // attempt budget. The run must finish normally, not abort as a
    // browser-initialization failure.
    let summary = tokio::time::timeout(
        Duration::from_secs(30),
        sitescan::run_crawl(
            &config_for(&dir),
            Arc::new(FaultyFactory),
            Arc::new(MemorySink::new()) as Arc<dyn ResultSink>,
            rx,
        ),
    )
    .await
    .expect("run must terminate")
    .expect("faulting sessions must not abort the crawl");

    assert_eq!(summary.pages_visited, 0);
    assert_eq!(summary.results_emitted, 0);

    // the seed exhausted its retries and is parked in visited
    let manager = CheckpointManager::new(
        dir.path().join("crawl.checkpoint.json"),
        Duration::from_secs(3600),
        false,
    );
    let checkpoint = manager.load().expect("final checkpoint exists");
    assert_eq!(checkpoint.visited.len(), 1);
    assert!(checkpoint.pending.is_empty());
}
