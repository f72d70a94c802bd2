//! Crawl worker.
//!
//! Each worker owns one browser session and loops: claim a URL, read the
//! published delay, fetch and render, report exactly one outcome to the
//! controller, emit results, enqueue discoveries, complete the URL, sleep
//! the delay. Session faults discard and recreate the session within a
//! restart budget; when the budget is exhausted the worker exits and the
//! manager replaces it.

use anyhow::{Context, Result, anyhow};
use dashmap::DashSet;
use log::{debug, info, warn};
use rand::Rng;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use xxhash_rust::xxh3::xxh3_64;

use super::controller::RateController;
use super::crawl_types::{Disposition, FrontierEntry, Outcome, StatusClass};
use super::frontier::CrawlStore;
use crate::browser::{Activation, BrowserSession, NavigationOutcome, SessionFactory};
use crate::extract::{
    ContentFilter, KeywordMatcher, build_markdown_doc, extract_links, scan_inline_scripts,
};
use crate::sink::ResultSink;
use crate::urlkit::{AdmissionPolicy, CanonicalUrl, canonicalize};

/// Poll interval while the frontier is empty but peers are still in flight.
const CLAIM_POLL: Duration = Duration::from_millis(200);
/// Cancellation check granularity during the post-fetch sleep.
const SLEEP_SLICE: Duration = Duration::from_millis(200);
/// Clickable exploration bound per page.
const MAX_CLICKABLES: usize = 20;
/// 2xx bodies shorter than this are checked against the rate-limit phrase
/// heuristic.
const RATE_LIMIT_BODY_MAX: usize = 4096;

const RATE_LIMIT_PHRASES: &[&str] = &[
    "rate limit",
    "too many requests",
    "slow down",
    "try again later",
    "temporarily blocked",
];

/// Why a worker stopped before the crawl ended.
///
/// The manager reacts differently to the two cases: a worker that cannot
/// create any browser session counts toward the fatal-initialization
/// threshold, while one that burned through its session-fault budget is
/// simply replaced.
#[derive(Debug)]
pub enum WorkerExit {
    /// `SessionFactory::create` failed; no browser session exists.
    SessionInit(anyhow::Error),
    /// Session faults exceeded the `max_restarts` budget.
    RestartBudget(u32),
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionInit(e) => write!(f, "session creation failed: {e:#}"),
            Self::RestartBudget(faults) => {
                write!(f, "restart budget exhausted after {faults} session faults")
            }
        }
    }
}

impl std::error::Error for WorkerExit {}

/// Progress counters shared between workers and the manager.
#[derive(Debug, Default)]
pub struct Counters {
    pub pages_visited: AtomicU64,
    pub pages_failed: AtomicU64,
    pub results_emitted: AtomicU64,
}

/// State shared by every worker of one crawl run.
pub struct WorkerShared {
    pub store: Arc<CrawlStore>,
    pub controller: Arc<RateController>,
    pub sink: Arc<dyn ResultSink>,
    pub policy: Arc<AdmissionPolicy>,
    pub matcher: Option<Arc<KeywordMatcher>>,
    pub content_filter: Arc<ContentFilter>,
    pub counters: Arc<Counters>,
    /// xxh3 keys of emitted `(url, keyword, sentence)` triples.
    pub seen_hits: Arc<DashSet<u64>>,
    /// xxh3 keys of canonical URLs with an emitted markdown doc.
    pub seen_docs: Arc<DashSet<u64>>,
    pub stripped_params: Arc<Vec<String>>,
    pub spa: bool,
    pub max_restarts: u32,
    pub max_pages: Option<u64>,
    pub shutdown: Arc<AtomicBool>,
}

impl WorkerShared {
    fn budget_reached(&self) -> bool {
        self.max_pages
            .is_some_and(|limit| self.counters.pages_visited.load(Ordering::Relaxed) >= limit)
    }
}

/// One crawl worker. Constructed and supervised by the pool manager.
pub struct Worker {
    pub id: u32,
    pub shared: Arc<WorkerShared>,
    pub factory: Arc<dyn SessionFactory>,
    /// Cooperative drain flag: finish the current URL, then exit.
    pub drain: Arc<AtomicBool>,
}

impl Worker {
    fn should_stop(&self) -> bool {
        self.shared.shutdown.load(Ordering::Relaxed)
            || self.drain.load(Ordering::Relaxed)
            || self.shared.budget_reached()
    }

    /// Main worker loop.
    ///
    /// Returns [`WorkerExit::SessionInit`] when no browser session can be
    /// created at all, or [`WorkerExit::RestartBudget`] once session faults
    /// exceed the budget and a replacement worker should take over. Every
    /// per-page failure is converted into an outcome and a URL-state
    /// transition instead.
    pub async fn run(self) -> Result<(), WorkerExit> {
        let mut session: Option<Box<dyn BrowserSession>> = None;
        let mut restarts = 0u32;
        let setpoints = self.shared.controller.subscribe();
        debug!("worker {} started", self.id);

        loop {
            if self.should_stop() {
                break;
            }
            let Some(entry) = self.shared.store.claim() else {
                if self.shared.store.is_quiescent() {
                    break;
                }
                tokio::time::sleep(CLAIM_POLL).await;
                continue;
            };
            if self.should_stop() {
                // claimed after the stop signal: hand the URL back untouched
                self.shared.store.restore(&entry.url);
                break;
            }

            // one read per fetch; the sleep below uses this same value
            let delay = setpoints.borrow().delay;

            let disposition = match self.process(&mut session, &mut restarts, &entry).await {
                Ok(disposition) => disposition,
                Err(exit) => {
                    warn!("worker {} stopping: {exit}", self.id);
                    self.shared.store.complete(&entry.url, Disposition::Retry);
                    close_session(&mut session).await;
                    return Err(exit);
                }
            };

            match disposition {
                Disposition::Success => {
                    self.shared
                        .counters
                        .pages_visited
                        .fetch_add(1, Ordering::Relaxed);
                }
                Disposition::Terminal => {
                    self.shared
                        .counters
                        .pages_failed
                        .fetch_add(1, Ordering::Relaxed);
                }
                Disposition::Retry => {}
            }
            self.shared.store.complete(&entry.url, disposition);

            let pause = if disposition == Disposition::Retry {
                delay.max(retry_backoff(entry.attempts))
            } else {
                delay
            };
            self.sleep_cooperatively(pause).await;
        }

        close_session(&mut session).await;
        debug!("worker {} exiting", self.id);
        Ok(())
    }

    /// Fetch one URL and map the result to a disposition.
    ///
    /// State machine: Claimed → Fetching → {Succeeded, RetryableFailed,
    /// TerminalFailed}. Session faults get one in-place retry with a fresh
    /// session; the restart budget bounds faults across the worker's life.
    async fn process(
        &self,
        session: &mut Option<Box<dyn BrowserSession>>,
        restarts: &mut u32,
        entry: &FrontierEntry,
    ) -> Result<Disposition, WorkerExit> {
        info!(
            "fetching (attempt {}): {}",
            entry.attempts + 1,
            entry.url
        );

        let mut fault_retried = false;
        let nav = loop {
            let sess = ensure_session(session, &self.factory)
                .await
                .map_err(WorkerExit::SessionInit)?;
            match sess.navigate(entry.url.as_str()).await {
                Ok(nav) => break nav,
                Err(e) => {
                    warn!("session fault on {}: {e:#}", entry.url);
                    close_session(session).await;
                    *restarts += 1;
                    if *restarts > self.shared.max_restarts {
                        return Err(WorkerExit::RestartBudget(*restarts));
                    }
                    if fault_retried {
                        // second fault on the same URL: back to the frontier
                        return Ok(Disposition::Retry);
                    }
                    fault_retried = true;
                }
            }
        };

        let mut status = nav.status;
        if status == StatusClass::Ok2xx && looks_rate_limited(&nav.html) {
            debug!("rate-limit phrase heuristic fired for {}", entry.url);
            status = StatusClass::RateLimited429;
        }
        self.shared.controller.record(Outcome::from_status(status));

        // A repeated navigation error on the same URL means the session
        // itself is suspect; recycle it before the next claim.
        if status == StatusClass::NavigationError && entry.attempts >= 1 {
            close_session(session).await;
            *restarts += 1;
            if *restarts > self.shared.max_restarts {
                return Err(WorkerExit::RestartBudget(*restarts));
            }
        }

        match status {
            StatusClass::Ok2xx | StatusClass::Redirect3xx => {
                let final_url = match canonicalize(&nav.final_url, None, &self.shared.stripped_params)
                {
                    Ok(url) => url,
                    Err(reason) => {
                        warn!("unusable landing URL for {}: {reason}", entry.url);
                        return Ok(Disposition::Terminal);
                    }
                };
                // Post-redirect admission re-check: a chain that leaves the
                // crawl scope revokes admission.
                if let Err(reason) = self.shared.policy.admit(&final_url) {
                    info!("admission revoked after redirect: {} ({reason})", entry.url);
                    return Ok(Disposition::Terminal);
                }
                self.harvest(session, &final_url, &nav).await;
                Ok(Disposition::Success)
            }
            StatusClass::RateLimited429
            | StatusClass::Server5xx
            | StatusClass::Timeout
            | StatusClass::NavigationError => {
                warn!(
                    "fetch failed ({status}): {} [attempt {}]",
                    entry.url,
                    entry.attempts + 1
                );
                Ok(Disposition::Retry)
            }
            StatusClass::Client4xx => {
                warn!("terminal client error for {}", entry.url);
                Ok(Disposition::Terminal)
            }
        }
    }

    /// Discover links and emit results for a successfully rendered page.
    /// Discovery failures are logged, never propagated.
    async fn harvest(
        &self,
        session: &mut Option<Box<dyn BrowserSession>>,
        page_url: &CanonicalUrl,
        nav: &NavigationOutcome,
    ) {
        self.emit_results(page_url, nav).await;

        match page_url.parsed() {
            Ok(base) => {
                let mut discovered = extract_links(&nav.html, &base);
                discovered.extend(scan_inline_scripts(&nav.html, &base));
                let mut admitted = 0usize;
                for raw in &discovered {
                    if self.admit_and_enqueue(raw) {
                        admitted += 1;
                    }
                }
                debug!(
                    target: "sitescan::links",
                    "{}: {} candidates, {} admitted",
                    page_url,
                    discovered.len(),
                    admitted
                );
            }
            Err(e) => warn!("cannot resolve links against {page_url}: {e}"),
        }

        if self.shared.spa
            && let Some(sess) = session.as_mut()
        {
            self.explore_clickables(sess.as_mut(), page_url).await;
        }
    }

    /// Canonicalize, admit, and enqueue one discovered URL.
    fn admit_and_enqueue(&self, raw: &str) -> bool {
        let Ok(url) = canonicalize(raw, None, &self.shared.stripped_params) else {
            return false;
        };
        if self.shared.policy.admit(&url).is_err() {
            return false;
        }
        matches!(
            self.shared.store.try_enqueue(url),
            super::frontier::EnqueueOutcome::Enqueued
        )
    }

    async fn emit_results(&self, page_url: &CanonicalUrl, nav: &NavigationOutcome) {
        match &self.shared.matcher {
            Some(matcher) => {
                let text = self.shared.content_filter.filter(&nav.html);
                for hit in matcher.find_matches(&text) {
                    let key = xxh3_64(
                        format!("{}\x1f{}\x1f{}", page_url, hit.keyword, hit.sentence).as_bytes(),
                    );
                    if !self.shared.seen_hits.insert(key) {
                        continue;
                    }
                    let result = super::crawl_types::PageResult::KeywordHit {
                        url: page_url.clone(),
                        keyword: hit.keyword,
                        context: hit.context,
                    };
                    if let Err(e) = self.shared.sink.emit(&result).await {
                        warn!("sink rejected keyword hit for {page_url}: {e:#}");
                    } else {
                        self.shared
                            .counters
                            .results_emitted
                            .fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            None => {
                let key = xxh3_64(page_url.as_str().as_bytes());
                if !self.shared.seen_docs.insert(key) {
                    return;
                }
                match build_markdown_doc(page_url, &nav.html) {
                    Ok(result) => {
                        if let Err(e) = self.shared.sink.emit(&result).await {
                            warn!("sink rejected markdown doc for {page_url}: {e:#}");
                        } else {
                            self.shared
                                .counters
                                .results_emitted
                                .fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Err(e) => warn!("markdown conversion failed for {page_url}: {e:#}"),
                }
            }
        }
    }

    /// SPA route discovery: activate navigation affordances, enqueue real
    /// URL changes, synthesize fragment routes for in-place content swaps.
    ///
    /// Handles carry a persistent per-document identifier, so the dedup set
    /// keyed on `(page, handle)` survives the DOM mutations the activations
    /// themselves cause: a handle is activated at most once per page visit
    /// even when re-enumeration sees matched elements inserted, removed, or
    /// reordered. Activation that changed the location is undone by
    /// navigating back before the next handle. Bounded at
    /// [`MAX_CLICKABLES`] candidates per page.
    async fn explore_clickables(&self, session: &mut dyn BrowserSession, page_url: &CanonicalUrl) {
        let mut explored: HashSet<u64> = HashSet::new();

        while explored.len() < MAX_CLICKABLES {
            let clickables = match session.enumerate_clickables().await {
                Ok(c) => c,
                Err(e) => {
                    debug!("clickable enumeration failed on {page_url}: {e:#}");
                    return;
                }
            };
            let Some(next) = clickables
                .into_iter()
                .take(MAX_CLICKABLES)
                .find(|c| !explored.contains(&c.id))
            else {
                return;
            };
            explored.insert(next.id);

            match session.activate(&next).await {
                Ok(Activation {
                    new_url: Some(new_url),
                    ..
                }) => {
                    if self.admit_and_enqueue(&new_url) {
                        debug!("SPA navigation discovered: {new_url}");
                    }
                    // restore the origin before touching the next handle
                    if session.navigate(page_url.as_str()).await.is_err() {
                        debug!("failed to navigate back to {page_url}, stopping exploration");
                        return;
                    }
                }
                Ok(Activation {
                    content_changed: true,
                    ..
                }) => {
                    let slug = slug_for_clickable(&next.text, next.id);
                    let synthetic = page_url.with_fragment(&format!("section-{slug}"));
                    if self.shared.policy.admit(&synthetic).is_ok() {
                        self.shared.store.try_enqueue(synthetic);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("activation failed on {page_url}: {e:#}");
                    return;
                }
            }
        }
    }

    async fn sleep_cooperatively(&self, total: Duration) {
        let mut remaining = total;
        while remaining > Duration::ZERO && !self.should_stop() {
            let slice = remaining.min(SLEEP_SLICE);
            tokio::time::sleep(slice).await;
            remaining = remaining.saturating_sub(slice);
        }
    }
}

async fn ensure_session<'a>(
    session: &'a mut Option<Box<dyn BrowserSession>>,
    factory: &Arc<dyn SessionFactory>,
) -> Result<&'a mut Box<dyn BrowserSession>> {
    if session.is_none() {
        *session = Some(
            factory
                .create()
                .await
                .context("failed to create browser session")?,
        );
    }
    session
        .as_mut()
        .ok_or_else(|| anyhow!("browser session unavailable"))
}

async fn close_session(session: &mut Option<Box<dyn BrowserSession>>) {
    if let Some(mut sess) = session.take()
        && let Err(e) = sess.close().await
    {
        debug!("session close failed: {e:#}");
    }
}

/// Rate-limit phrase heuristic for 2xx responses with tiny bodies.
#[must_use]
pub fn looks_rate_limited(html: &str) -> bool {
    if html.len() >= RATE_LIMIT_BODY_MAX {
        return false;
    }
    let lower = html.to_lowercase();
    RATE_LIMIT_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

/// Jittered exponential backoff slept after a retryable failure, on top of
/// whichever is larger between it and the controller delay.
fn retry_backoff(attempts: u32) -> Duration {
    const BASE_MS: u64 = 1000;
    const MAX_MS: u64 = 30_000;
    const JITTER: f64 = 0.2;

    let exp = BASE_MS.saturating_mul(1u64 << attempts.min(5));
    let jitter = rand::rng().random_range(-JITTER..=JITTER);
    let jittered = (exp as f64 * (1.0 + jitter)) as u64;
    Duration::from_millis(jittered.min(MAX_MS))
}

/// Slug for a synthetic fragment route: handle text reduced to
/// alphanumerics and dashes, or the handle id when the text is empty.
fn slug_for_clickable(text: &str, id: u64) -> String {
    let slug: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        format!("{id}")
    } else {
        slug.chars().take(40).collect()
    }
}
