//! SPA route discovery: clickable exploration, synthetic fragment routes,
//! and real client-side navigation.

mod common;

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

use common::{FixtureClickable, FixturePage, FixtureSite, MockFactory};
use sitescan::crawl_engine::CheckpointManager;
use sitescan::{CrawlMode, MemorySink, ResultSink};

#[tokio::test]
async fn spa_shell_discovers_synthetic_and_real_routes() {
    let shell = FixturePage {
        html: "<html><head><title>Shell</title></head>\
               <body><main>App shell content.</main></body></html>"
            .to_string(),
        clickables: vec![
            FixtureClickable {
                text: "Overview".to_string(),
                goes_to: None,
                mutates_content: true,
            },
            FixtureClickable {
                text: "Pricing".to_string(),
                goes_to: None,
                mutates_content: true,
            },
            FixtureClickable {
                text: "Team".to_string(),
                goes_to: None,
                mutates_content: true,
            },
            FixtureClickable {
                text: "Deep".to_string(),
                goes_to: Some("http://fixture/section/deep".to_string()),
                mutates_content: false,
            },
        ],
        ..FixturePage::default()
    };
    let site = Arc::new(
        FixtureSite::new()
            .page("http://fixture/", shell)
            .html_page("http://fixture/section/deep", "Deep page.", &[]),
    );

    let dir = TempDir::new().expect("tempdir");
    let config = sitescan::CrawlConfig::builder("http://fixture/")
        .mode(CrawlMode::Markdown)
        .output_dir(dir.path().to_path_buf())
        .workers(1, 1, 1)
        .delays(0.0, 0.5, 0.0)
        .spa(true)
        .checkpoint_interval_secs(3600)
        .build()
        .expect("config validates");

    let sink = Arc::new(MemorySink::new());
    let (_tx, rx) = watch::channel(false);
    let summary = sitescan::run_crawl(
        &config,
        Arc::new(MockFactory { site: Arc::clone(&site) }),
        Arc::clone(&sink) as Arc<dyn ResultSink>,
        rx,
    )
    .await
    .expect("crawl completes");

    let manager = CheckpointManager::new(
        dir.path().join("crawl.checkpoint.json"),
        Duration::from_secs(3600),
        false,
    );
    let visited: Vec<String> = manager
        .load()
        .expect("final checkpoint exists")
        .visited
        .into_iter()
        .map(|u| u.into_string())
        .collect();

    // the real client-side route was discovered and visited
    assert!(visited.contains(&"http://fixture/section/deep".to_string()));

    // content-mutating clickables produced synthetic fragment routes
    for slug in ["overview", "pricing", "team"] {
        let synthetic = format!("http://fixture/#section-{slug}");
        assert!(
            visited.contains(&synthetic),
            "missing synthetic route {synthetic}; visited: {visited:?}"
        );
    }
    assert!(visited.contains(&"http://fixture/".to_string()));
    assert_eq!(summary.pages_visited, 5);

    // fragment routes all serve the shell document, so markdown output
    // dedups to one doc per canonical document
    let docs: Vec<_> = sink.results();
    assert_eq!(docs.len(), 2, "one doc for the shell, one for the deep page");
}
