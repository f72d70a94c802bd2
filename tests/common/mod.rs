//! Shared test fixtures: an in-process fixture site served through a mock
//! browser session, so engine behavior can be exercised end-to-end without
//! a real browser.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sitescan::crawl_engine::StatusClass;
use sitescan::{
    Activation, BrowserSession, Clickable, CrawlConfig, CrawlMode, NavigationOutcome,
    SessionFactory,
};

/// One page of the fixture site.
#[derive(Debug, Clone, Default)]
pub struct FixturePage {
    pub html: String,
    /// Status served for this page (default 200).
    pub status: Option<StatusClass>,
    /// When set, navigation lands on this URL instead.
    pub redirect_to: Option<String>,
    pub clickables: Vec<FixtureClickable>,
}

#[derive(Debug, Clone)]
pub struct FixtureClickable {
    pub text: String,
    /// Activation changes the location to this URL.
    pub goes_to: Option<String>,
    /// Activation mutates the body content hash in place.
    pub mutates_content: bool,
}

/// A scriptable site shared by all mock sessions of a run.
#[derive(Default)]
pub struct FixtureSite {
    pages: HashMap<String, FixturePage>,
    requests: Mutex<Vec<String>>,
    request_counter: AtomicU64,
    /// Serve 429 on every Nth request (counted from 1).
    pub rate_limit_every: Option<u64>,
    /// Artificial per-navigation latency.
    pub latency: Duration,
}

impl FixtureSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, page: FixturePage) -> Self {
        self.pages.insert(url.to_string(), page);
        self
    }

    /// Simple HTML page with the given body and links.
    pub fn html_page(self, url: &str, body: &str, links: &[&str]) -> Self {
        let anchors: String = links
            .iter()
            .map(|href| format!("<a href=\"{href}\">{href}</a>"))
            .collect();
        self.page(
            url,
            FixturePage {
                html: format!(
                    "<html><head><title>{url}</title></head><body><main>{body}</main>{anchors}</body></html>"
                ),
                ..FixturePage::default()
            },
        )
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> u64 {
        self.request_counter.load(Ordering::Relaxed)
    }

    fn lookup(&self, url: &str) -> Option<&FixturePage> {
        // fragments address sections of the same document
        let without_fragment = url.split('#').next().unwrap_or(url);
        self.pages
            .get(url)
            .or_else(|| self.pages.get(without_fragment))
    }
}

/// Mock browser session serving a [`FixtureSite`].
pub struct MockSession {
    site: Arc<FixtureSite>,
    current_url: String,
    current_page: Option<FixturePage>,
    /// Bumped by content-mutating activations.
    mutation_generation: u64,
}

#[async_trait]
impl BrowserSession for MockSession {
    async fn navigate(&mut self, url: &str) -> Result<NavigationOutcome> {
        if !self.site.latency.is_zero() {
            tokio::time::sleep(self.site.latency).await;
        }
        let n = self.site.request_counter.fetch_add(1, Ordering::Relaxed) + 1;
        self.site.requests.lock().push(url.to_string());

        if let Some(every) = self.site.rate_limit_every
            && n % every == 0
        {
            return Ok(NavigationOutcome {
                status: StatusClass::RateLimited429,
                final_url: url.to_string(),
                html: "<html>too many requests</html>".to_string(),
                load_time: Duration::from_millis(1),
            });
        }

        let Some(page) = self.site.lookup(url).cloned() else {
            return Ok(NavigationOutcome {
                status: StatusClass::Client4xx,
                final_url: url.to_string(),
                html: String::new(),
                load_time: Duration::from_millis(1),
            });
        };

        let final_url = page.redirect_to.clone().unwrap_or_else(|| url.to_string());
        let outcome = NavigationOutcome {
            status: page.status.unwrap_or(StatusClass::Ok2xx),
            final_url: final_url.clone(),
            html: page.html.clone(),
            load_time: Duration::from_millis(1),
        };
        self.current_url = final_url;
        self.current_page = Some(page);
        self.mutation_generation = 0;
        Ok(outcome)
    }

    async fn enumerate_clickables(&mut self) -> Result<Vec<Clickable>> {
        // fixture clickable lists never mutate, so the position doubles as
        // the persistent handle
        Ok(self
            .current_page
            .as_ref()
            .map(|page| {
                page.clickables
                    .iter()
                    .enumerate()
                    .map(|(index, c)| Clickable {
                        id: index as u64,
                        text: c.text.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn activate(&mut self, clickable: &Clickable) -> Result<Activation> {
        let page = self
            .current_page
            .as_ref()
            .ok_or_else(|| anyhow!("no page loaded"))?;
        let Some(fixture) = page.clickables.get(clickable.id as usize) else {
            return Ok(Activation {
                new_url: None,
                content_changed: false,
            });
        };
        if let Some(target) = &fixture.goes_to {
            self.current_url = target.clone();
            return Ok(Activation {
                new_url: Some(target.clone()),
                content_changed: true,
            });
        }
        if fixture.mutates_content {
            self.mutation_generation += 1;
            return Ok(Activation {
                new_url: None,
                content_changed: true,
            });
        }
        Ok(Activation {
            new_url: None,
            content_changed: false,
        })
    }

    async fn current_url(&mut self) -> Result<String> {
        Ok(self.current_url.clone())
    }

    async fn content_hash(&mut self) -> Result<u64> {
        Ok(self.mutation_generation)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Factory producing [`MockSession`]s for one fixture site.
pub struct MockFactory {
    pub site: Arc<FixtureSite>,
}

#[async_trait]
impl SessionFactory for MockFactory {
    async fn create(&self) -> Result<Box<dyn BrowserSession>> {
        Ok(Box::new(MockSession {
            site: Arc::clone(&self.site),
            current_url: String::new(),
            current_page: None,
            mutation_generation: 0,
        }))
    }
}

/// Config tuned for fast tests: one-worker pool, near-zero delays, output
/// under a temp dir.
pub fn test_config(start_url: &str, output_dir: std::path::PathBuf) -> CrawlConfig {
    CrawlConfig::builder(start_url)
        .mode(CrawlMode::Markdown)
        .output_dir(output_dir)
        .workers(1, 1, 1)
        .delays(0.0, 0.5, 0.0)
        .checkpoint_interval_secs(3600)
        .build()
        .expect("test config should validate")
}
