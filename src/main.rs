// sitescan binary: parse the CLI, launch the browser, run the crawl.
//
// Exit codes: 0 on normal termination (including a reached page budget),
// 1 on unrecoverable crawl errors, 2 on configuration errors.

use clap::Parser;
use log::{error, info};
use std::sync::Arc;
use tokio::sync::watch;

use sitescan::cli::Cli;
use sitescan::{
    ChromiumSessionFactory, CrawlError, CrawlMode, KeywordCsvSink, MarkdownTreeSink, ResultSink,
    launch_browser, run_crawl,
};

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    // The browser layer logs through tracing; everything else uses log.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();

    let config = match cli.resolve_config() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e:#}");
            return 2;
        }
    };

    if let Some(path) = &cli.save_config {
        return match config.save(path) {
            Ok(()) => {
                info!("configuration written to {}", path.display());
                0
            }
            Err(e) => {
                error!("failed to save configuration: {e:#}");
                2
            }
        };
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(watch_for_signals(shutdown_tx));

    let (browser, handler_task, profile_dir) =
        match launch_browser(config.headless(), None).await {
            Ok(launched) => launched,
            Err(e) => {
                error!("failed to launch browser: {e:#}");
                return 1;
            }
        };
    let factory = Arc::new(ChromiumSessionFactory::new(Arc::new(browser), config.spa()));

    let sink: Arc<dyn ResultSink> = match config.mode() {
        CrawlMode::Keywords(_) => Arc::new(KeywordCsvSink::new(config.keyword_csv_path())),
        CrawlMode::Markdown => Arc::new(MarkdownTreeSink::new(config.markdown_root())),
    };

    let result = run_crawl(&config, factory, sink, shutdown_rx).await;

    handler_task.abort();
    if let Err(e) = std::fs::remove_dir_all(&profile_dir) {
        log::debug!("failed to remove browser profile dir: {e}");
    }

    match result {
        Ok(summary) => {
            println!("{summary}");
            0
        }
        Err(CrawlError::ConfigError(msg)) => {
            error!("configuration error: {msg}");
            2
        }
        Err(e) => {
            error!("crawl failed: {e}");
            1
        }
    }
}

/// Flip the shutdown flag on SIGINT/SIGTERM so the manager can drain and
/// checkpoint. A second signal aborts immediately.
async fn watch_for_signals(shutdown_tx: watch::Sender<bool>) {
    wait_for_signal().await;
    info!("termination signal received, shutting down gracefully (signal again to force)");
    let _ = shutdown_tx.send(true);
    wait_for_signal().await;
    error!("second termination signal, aborting");
    std::process::exit(1);
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
