//! Chromium-backed browser session.
//!
//! One [`ChromiumSession`] wraps one CDP page. Navigation classifies the
//! response by listening for the main-frame `Network.responseReceived`
//! event and matching the document response against the target URL;
//! timeouts and navigation failures are reported as status classes, while
//! protocol-level failures surface as errors (session faults) so the worker
//! can discard and recreate the session.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::network::{EventResponseReceived, ResourceType};
use chromiumoxide::listeners::EventStream;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;
use xxhash_rust::xxh3::xxh3_64;

use super::js_scripts;
use super::{Activation, BrowserSession, Clickable, NavigationOutcome, SessionFactory};
use crate::crawl_engine::StatusClass;

/// Regular navigation: document ready + network idle, overall cap.
const NAVIGATION_CAP: Duration = Duration::from_secs(15);
/// SPA navigation adds loader disappearance and a first DOM mutation.
const SPA_NAVIGATION_CAP: Duration = Duration::from_secs(20);
/// Activation quiescence: overall cap.
const ACTIVATION_CAP: Duration = Duration::from_secs(10);
/// No outstanding network responses for this long = network idle.
const NETWORK_IDLE: Duration = Duration::from_millis(500);
/// No DOM mutations for this long = DOM quiescent.
const DOM_IDLE: Duration = Duration::from_millis(300);
/// Poll interval for readiness probes.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Creates [`ChromiumSession`]s against one shared browser process.
pub struct ChromiumSessionFactory {
    browser: Arc<Browser>,
    spa: bool,
}

impl ChromiumSessionFactory {
    #[must_use]
    pub fn new(browser: Arc<Browser>, spa: bool) -> Self {
        Self { browser, spa }
    }
}

#[async_trait]
impl SessionFactory for ChromiumSessionFactory {
    async fn create(&self) -> Result<Box<dyn BrowserSession>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("failed to create browser page")?;
        Ok(Box::new(ChromiumSession {
            page,
            spa: self.spa,
        }))
    }
}

/// A single CDP page, exclusively owned by one worker.
pub struct ChromiumSession {
    page: Page,
    spa: bool,
}

#[derive(Debug, Deserialize)]
struct ClickHandle {
    id: u64,
    #[serde(default)]
    text: String,
}

impl ChromiumSession {
    async fn eval<T: serde::de::DeserializeOwned>(&self, script: &str) -> Result<T> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("script evaluation failed")?;
        result
            .into_value::<T>()
            .map_err(|e| anyhow!("failed to decode script result: {e}"))
    }

    /// Drain response events until the stream is idle for [`NETWORK_IDLE`],
    /// collecting document statuses on the way.
    async fn drain_until_network_idle(
        events: &mut EventStream<EventResponseReceived>,
        documents: &mut Vec<(String, i64)>,
        deadline: Instant,
    ) {
        loop {
            if Instant::now() >= deadline {
                return;
            }
            match timeout(NETWORK_IDLE, events.next()).await {
                Ok(Some(event)) => {
                    if event.r#type == ResourceType::Document {
                        documents.push((event.response.url.clone(), event.response.status));
                    }
                }
                // idle period elapsed, or the stream ended
                _ => return,
            }
        }
    }

    /// Poll a readiness probe until it returns true or the deadline passes.
    async fn poll_until(&self, script: &str, want: bool, deadline: Instant) -> bool {
        while Instant::now() < deadline {
            if self.eval::<bool>(script).await.unwrap_or(!want) == want {
                return true;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        false
    }

    /// Wait until the mutation counter stops moving for [`DOM_IDLE`].
    async fn wait_dom_quiescent(&self, deadline: Instant) {
        let mut last = self.eval::<u64>(js_scripts::MUTATION_COUNT_SCRIPT).await.unwrap_or(0);
        let mut stable_since = Instant::now();
        while Instant::now() < deadline {
            tokio::time::sleep(POLL_INTERVAL).await;
            let count = self
                .eval::<u64>(js_scripts::MUTATION_COUNT_SCRIPT)
                .await
                .unwrap_or(last);
            if count != last {
                last = count;
                stable_since = Instant::now();
            } else if stable_since.elapsed() >= DOM_IDLE {
                return;
            }
        }
    }

    /// Pick the document status for `target`: prefer the URL-matched
    /// response, fall back to the last document response observed.
    fn classify(target: &str, documents: &[(String, i64)]) -> StatusClass {
        let wanted = normalize_for_match(target);
        let matched = documents
            .iter()
            .rev()
            .find(|(url, _)| normalize_for_match(url) == wanted)
            .or_else(|| documents.last());
        match matched {
            Some((_, code)) => StatusClass::from_status_code(*code),
            // Served from cache or the event was missed: trust the render.
            None => StatusClass::Ok2xx,
        }
    }

    fn timeout_outcome(url: &str, started: Instant) -> NavigationOutcome {
        NavigationOutcome {
            status: StatusClass::Timeout,
            final_url: url.to_string(),
            html: String::new(),
            load_time: started.elapsed(),
        }
    }

    fn error_outcome(url: &str, started: Instant) -> NavigationOutcome {
        NavigationOutcome {
            status: StatusClass::NavigationError,
            final_url: url.to_string(),
            html: String::new(),
            load_time: started.elapsed(),
        }
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> Result<NavigationOutcome> {
        let started = Instant::now();
        let cap = if self.spa { SPA_NAVIGATION_CAP } else { NAVIGATION_CAP };
        let deadline = started + cap;

        // The listener must exist before goto so the document response is
        // not missed.
        let mut events = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .context("failed to attach network event listener")?;

        match timeout(cap, self.page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                debug!("goto failed for {url}: {e}");
                return Ok(Self::error_outcome(url, started));
            }
            Err(_) => return Ok(Self::timeout_outcome(url, started)),
        }

        match timeout(deadline.saturating_duration_since(Instant::now()), self.page.wait_for_navigation()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                debug!("navigation wait failed for {url}: {e}");
                return Ok(Self::error_outcome(url, started));
            }
            Err(_) => return Ok(Self::timeout_outcome(url, started)),
        }

        if !self.poll_until(js_scripts::DOCUMENT_READY_SCRIPT, true, deadline).await {
            return Ok(Self::timeout_outcome(url, started));
        }

        let mut documents = Vec::new();
        Self::drain_until_network_idle(&mut events, &mut documents, deadline).await;

        if self.spa {
            // Observer first, so the "at least one mutation" probe below
            // sees client-side rendering work.
            let _: bool = self
                .eval(js_scripts::INSTALL_MUTATION_OBSERVER_SCRIPT)
                .await
                .unwrap_or(false);
            if !self.poll_until(js_scripts::LOADER_VISIBLE_SCRIPT, false, deadline).await {
                warn!("loader element still visible at deadline for {url}");
            }
            let mutated = async {
                while Instant::now() < deadline {
                    match self.eval::<u64>(js_scripts::MUTATION_COUNT_SCRIPT).await {
                        Ok(n) if n > 0 => return true,
                        _ => tokio::time::sleep(POLL_INTERVAL).await,
                    }
                }
                false
            }
            .await;
            if !mutated {
                debug!("no DOM mutation observed after load for {url}");
            }
            Self::drain_until_network_idle(&mut events, &mut documents, deadline).await;
        }

        let final_url = match self.page.url().await {
            Ok(Some(u)) => u,
            _ => url.to_string(),
        };
        let html = self
            .page
            .content()
            .await
            .context("failed to read rendered page content")?;

        Ok(NavigationOutcome {
            status: Self::classify(&final_url, &documents),
            final_url,
            html,
            load_time: started.elapsed(),
        })
    }

    async fn enumerate_clickables(&mut self) -> Result<Vec<Clickable>> {
        let handles: Vec<ClickHandle> = self.eval(js_scripts::CLICKABLES_SCRIPT).await?;
        Ok(handles
            .into_iter()
            .map(|h| Clickable {
                id: h.id,
                text: h.text,
            })
            .collect())
    }

    async fn activate(&mut self, clickable: &Clickable) -> Result<Activation> {
        let before_url = self.current_url().await?;
        let before_hash = self.content_hash().await?;
        let deadline = Instant::now() + ACTIVATION_CAP;

        let mut events = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .context("failed to attach network event listener")?;

        let selector = format!("[data-sitescan-id=\"{}\"]", clickable.id);
        let element = match timeout(
            deadline.saturating_duration_since(Instant::now()),
            self.page.find_element(selector.as_str()),
        )
        .await
        {
            Ok(Ok(el)) => el,
            // The element left the DOM since enumeration; nothing happened.
            _ => {
                return Ok(Activation {
                    new_url: None,
                    content_changed: false,
                });
            }
        };
        if let Err(e) = element.click().await {
            debug!("activation click failed on {selector}: {e}");
            return Ok(Activation {
                new_url: None,
                content_changed: false,
            });
        }

        let _: bool = self
            .eval(js_scripts::INSTALL_MUTATION_OBSERVER_SCRIPT)
            .await
            .unwrap_or(false);
        let mut documents = Vec::new();
        Self::drain_until_network_idle(&mut events, &mut documents, deadline).await;
        self.wait_dom_quiescent(deadline).await;

        let after_url = self.current_url().await?;
        let after_hash = self.content_hash().await?;

        Ok(Activation {
            new_url: (after_url != before_url).then_some(after_url),
            content_changed: after_hash != before_hash,
        })
    }

    async fn current_url(&mut self) -> Result<String> {
        match self.page.url().await {
            Ok(Some(url)) => Ok(url),
            _ => self.eval("window.location.href").await,
        }
    }

    async fn content_hash(&mut self) -> Result<u64> {
        let body: String = self.eval(js_scripts::BODY_TEXT_SCRIPT).await?;
        Ok(xxh3_64(body.as_bytes()))
    }

    async fn close(&mut self) -> Result<()> {
        self.page
            .clone()
            .close()
            .await
            .context("failed to close page")?;
        Ok(())
    }
}

/// Reduce a URL to `scheme://host/path` (no query, no fragment, no trailing
/// slash) for matching a network response against the navigation target.
fn normalize_for_match(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or_default().to_lowercase();
            let path = parsed.path().trim_end_matches('/');
            format!("{}://{}{}", parsed.scheme(), host, path)
        }
        Err(_) => url.trim_end_matches('/').to_string(),
    }
}
