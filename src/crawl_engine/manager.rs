//! Crawl coordination: worker pool supervision, termination, and
//! checkpoint cadence.
//!
//! The manager reconciles the live worker set against the controller's
//! published target (spawn up, cooperative drain down, replace crashes),
//! drives periodic checkpoints off a consistent store snapshot, and ends
//! the run when the frontier drains, the page budget is reached, or a
//! termination signal arrives. Every exit path writes a final checkpoint.

use chrono::Utc;
use dashmap::DashSet;
use log::{error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::checkpoint::{
    CHECKPOINT_VERSION, Checkpoint, CheckpointError, CheckpointManager, ControllerSnapshot,
    WindowSample,
};
use super::controller::{RateController, Tunables};
use super::crawl_types::{CrawlError, CrawlResult, CrawlSummary};
use super::frontier::CrawlStore;
use super::worker::{Counters, Worker, WorkerExit, WorkerShared};
use crate::browser::SessionFactory;
use crate::config::{CrawlConfig, CrawlMode};
use crate::extract::{ContentFilter, KeywordMatcher};
use crate::sink::ResultSink;
use crate::urlkit::{AdmissionPolicy, DomainScope, canonicalize};

/// Pool reconcile / termination-check cadence.
const TICK: Duration = Duration::from_millis(250);
/// Cooperative shutdown grace before workers are aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
/// Session-creation failures tolerated before the run is declared fatal.
/// Restart-budget exits do not count; those workers are just replaced.
const FATAL_INIT_FAILURES: u32 = 3;

struct WorkerHandle {
    id: u32,
    drain: Arc<AtomicBool>,
    handle: JoinHandle<Result<(), WorkerExit>>,
}

/// Run a crawl to completion.
///
/// `shutdown_rx` flips to `true` on a termination signal; the manager then
/// writes an emergency checkpoint, drains the pool, and finishes with a
/// final atomic checkpoint. Exit is also triggered by an empty frontier
/// with no work in flight, or by the `max_pages` budget.
pub async fn run_crawl(
    config: &CrawlConfig,
    factory: Arc<dyn SessionFactory>,
    sink: Arc<dyn ResultSink>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> CrawlResult<CrawlSummary> {
    let started = Instant::now();

    let checkpointer = Arc::new(CheckpointManager::new(
        config.checkpoint_path(),
        config.checkpoint_interval(),
        config.keep_checkpoint_backup(),
    ));

    let loaded = if config.resume() {
        match checkpointer.load() {
            Ok(checkpoint) => {
                info!(
                    "resuming from checkpoint: {} visited, {} pending, {} pages",
                    checkpoint.visited.len(),
                    checkpoint.pending.len(),
                    checkpoint.pages_visited
                );
                Some(checkpoint)
            }
            Err(CheckpointError::NotFound(path)) => {
                warn!("--resume requested but no checkpoint at {}", path.display());
                None
            }
            Err(e) => return Err(CrawlError::CheckpointError(e.to_string())),
        }
    } else {
        None
    };

    // The checkpoint's recorded strip set wins over the configured one so a
    // resumed run canonicalizes exactly like the first one did.
    let mut stripped_params = config.stripped_query_params().to_vec();
    if let Some(checkpoint) = &loaded {
        if !checkpoint.stripped_query_params.is_empty()
            && checkpoint.stripped_query_params != stripped_params
        {
            warn!("using the checkpoint's stripped-query-parameter set over the configured one");
            stripped_params = checkpoint.stripped_query_params.clone();
        }
        if !checkpoint.config_fingerprint.is_empty()
            && checkpoint.config_fingerprint != config.fingerprint()
        {
            warn!("checkpoint was written under a different configuration; resuming anyway");
        }
    }

    let seed = canonicalize(config.start_url(), None, &stripped_params)
        .map_err(|reason| CrawlError::ConfigError(format!("invalid seed URL: {reason}")))?;
    let seed_host = seed
        .host()
        .ok_or_else(|| CrawlError::ConfigError("seed URL has no host".to_string()))?;

    let policy = Arc::new(AdmissionPolicy::new(
        DomainScope::from_seed(&seed_host, config.allow_subdomains()),
        config.path_prefix().map(str::to_string),
        config.allowed_extensions().to_vec(),
    ));

    let matcher = match config.mode() {
        CrawlMode::Keywords(keywords) => {
            let matcher = KeywordMatcher::new(keywords)
                .map_err(|e| CrawlError::ConfigError(format!("{e:#}")))?;
            Some(Arc::new(matcher))
        }
        CrawlMode::Markdown => None,
    };
    let content_filter = Arc::new(ContentFilter {
        include_headers: config.include_headers(),
        include_menus: config.include_menus(),
        include_footers: config.include_footers(),
        include_sidebars: config.include_sidebars(),
        custom_excluded: config.excluded_selectors().to_vec(),
    });

    let store = Arc::new(CrawlStore::new(config.max_attempts()));
    let controller = Arc::new(RateController::new(Tunables {
        min_workers: config.min_workers(),
        max_workers: config.max_workers(),
        min_delay: config.min_delay(),
        max_delay: config.max_delay(),
        initial_workers: config.initial_workers(),
        initial_delay: config.initial_delay(),
        aggressive: config.aggressive_throttling(),
        adaptive: config.adaptive_control(),
        ..Tunables::default()
    }));

    let counters = Arc::new(Counters::default());
    if let Some(checkpoint) = loaded {
        store.load_state(checkpoint.visited, checkpoint.pending);
        counters
            .pages_visited
            .store(checkpoint.pages_visited, Ordering::Relaxed);
        if let Some(snapshot) = checkpoint.controller {
            controller.restore(
                Duration::from_secs_f64(snapshot.current_delay_secs.max(0.0)),
                snapshot.target_workers,
                snapshot.window.into_iter().map(|s| s.outcome).collect(),
            );
        }
    } else {
        store.try_enqueue(seed);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shared = Arc::new(WorkerShared {
        store: Arc::clone(&store),
        controller: Arc::clone(&controller),
        sink: Arc::clone(&sink),
        policy,
        matcher,
        content_filter,
        counters: Arc::clone(&counters),
        seen_hits: Arc::new(DashSet::new()),
        seen_docs: Arc::new(DashSet::new()),
        stripped_params: Arc::new(stripped_params.clone()),
        spa: config.spa(),
        max_restarts: config.max_restarts(),
        max_pages: config.max_pages(),
        shutdown: Arc::clone(&shutdown),
    });

    let mut workers: Vec<WorkerHandle> = Vec::new();
    let mut next_worker_id = 0u32;
    let mut init_failures = 0u32;
    let mut interval = tokio::time::interval(TICK);
    let mut signalled = false;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("termination signal received, writing emergency checkpoint");
                    let checkpoint =
                        make_checkpoint(&store, &controller, &counters, config, &stripped_params);
                    if let Err(e) = checkpointer.emergency_save(&checkpoint) {
                        error!("emergency checkpoint failed: {e}");
                    }
                    signalled = true;
                    break;
                }
            }
        }

        controller.tick();

        // Reap finished workers. Only genuine session-creation failures
        // count toward the fatal threshold; a worker that exhausted its
        // restart budget is replaced by the reconcile pass below.
        let mut index = 0;
        while index < workers.len() {
            if workers[index].handle.is_finished() {
                let worker = workers.swap_remove(index);
                match worker.handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(WorkerExit::SessionInit(e))) => {
                        warn!("worker {} could not create a session: {e:#}", worker.id);
                        init_failures += 1;
                    }
                    Ok(Err(exit @ WorkerExit::RestartBudget(_))) => {
                        warn!("worker {} will be replaced: {exit}", worker.id);
                    }
                    Err(join_err) => warn!("worker {} panicked: {join_err}", worker.id),
                }
            } else {
                index += 1;
            }
        }

        let pages = counters.pages_visited.load(Ordering::Relaxed);
        if init_failures >= FATAL_INIT_FAILURES && pages == 0 {
            error!("no worker could establish a browser session; aborting");
            shutdown.store(true, Ordering::Relaxed);
            let checkpoint =
                make_checkpoint(&store, &controller, &counters, config, &stripped_params);
            if let Err(e) = checkpointer.save(&checkpoint) {
                warn!("final checkpoint failed: {e}");
            }
            return Err(CrawlError::BrowserError(
                "unable to create any browser session".to_string(),
            ));
        }

        // Termination conditions.
        if store.is_quiescent() {
            info!("frontier drained, finishing run");
            break;
        }
        if config.max_pages().is_some_and(|limit| pages >= limit) {
            info!("page budget reached ({pages} pages), finishing run");
            break;
        }

        // Reconcile pool size with the published target.
        let target = controller.setpoints().target_workers as usize;
        while workers.len() < target && !shutdown.load(Ordering::Relaxed) {
            let drain = Arc::new(AtomicBool::new(false));
            let worker = Worker {
                id: next_worker_id,
                shared: Arc::clone(&shared),
                factory: Arc::clone(&factory),
                drain: Arc::clone(&drain),
            };
            workers.push(WorkerHandle {
                id: next_worker_id,
                drain,
                handle: tokio::spawn(worker.run()),
            });
            next_worker_id += 1;
        }
        if workers.len() > target {
            // newest workers drain first; they finish their current URL
            workers.sort_by_key(|w| w.id);
            for worker in workers.iter().skip(target) {
                worker.drain.store(true, Ordering::Relaxed);
            }
        }

        if checkpointer.is_due(pages) {
            let checkpoint =
                make_checkpoint(&store, &controller, &counters, config, &stripped_params);
            let checkpointer = Arc::clone(&checkpointer);
            let result =
                tokio::task::spawn_blocking(move || checkpointer.save(&checkpoint)).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("periodic checkpoint failed, will retry: {e}"),
                Err(e) => warn!("checkpoint task failed: {e}"),
            }
        }
    }

    // Cooperative drain, then force-terminate stragglers.
    shutdown.store(true, Ordering::Relaxed);
    let deadline = Instant::now() + SHUTDOWN_GRACE;
    for worker in &mut workers {
        let remaining = deadline
            .saturating_duration_since(Instant::now())
            .max(Duration::from_millis(10));
        match timeout(remaining, &mut worker.handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(exit))) => warn!("worker {} failed during shutdown: {exit}", worker.id),
            Ok(Err(join_err)) => warn!("worker {} panicked: {join_err}", worker.id),
            Err(_) => {
                warn!("worker {} exceeded shutdown grace, aborting", worker.id);
                worker.handle.abort();
            }
        }
    }

    let checkpoint = make_checkpoint(&store, &controller, &counters, config, &stripped_params);
    if let Err(e) = checkpointer.save(&checkpoint) {
        warn!("final checkpoint failed: {e}");
    }
    if let Err(e) = sink.flush().await {
        warn!("sink flush failed: {e:#}");
    }

    let setpoints = controller.setpoints();
    let summary = CrawlSummary {
        pages_visited: counters.pages_visited.load(Ordering::Relaxed),
        pages_failed: counters.pages_failed.load(Ordering::Relaxed),
        results_emitted: counters.results_emitted.load(Ordering::Relaxed),
        final_delay: setpoints.delay,
        final_workers: setpoints.target_workers,
        elapsed: started.elapsed(),
    };
    info!("crawl finished: {summary}");
    if signalled {
        info!("run ended on a termination signal; resume with --resume");
    }
    Ok(summary)
}

/// Build a checkpoint from a consistent store snapshot. The store lock is
/// held only inside `snapshot()`; serialization and I/O happen outside it.
fn make_checkpoint(
    store: &CrawlStore,
    controller: &RateController,
    counters: &Counters,
    config: &CrawlConfig,
    stripped_params: &[String],
) -> Checkpoint {
    let (visited, pending) = store.snapshot();
    let setpoints = controller.setpoints();
    Checkpoint {
        checkpoint_version: CHECKPOINT_VERSION.to_string(),
        checkpoint_time: Utc::now(),
        visited,
        pending,
        controller: Some(ControllerSnapshot {
            current_delay_secs: setpoints.delay.as_secs_f64(),
            target_workers: setpoints.target_workers,
            window: controller
                .window_snapshot()
                .into_iter()
                .map(|(outcome, age_secs)| WindowSample { outcome, age_secs })
                .collect(),
        }),
        pages_visited: counters.pages_visited.load(Ordering::Relaxed),
        config_fingerprint: config.fingerprint(),
        stripped_query_params: stripped_params.to_vec(),
    }
}
