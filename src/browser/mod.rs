//! Browser session abstraction.
//!
//! The crawl engine never talks to Chromium directly; it drives a
//! [`BrowserSession`] and obtains new sessions from a [`SessionFactory`].
//! That seam is what makes the engine testable: integration tests plug in a
//! scripted session serving a fixture site, while production uses
//! [`ChromiumSession`] backed by a shared headless browser process.

pub mod chromium;
pub mod js_scripts;
pub mod setup;

pub use chromium::{ChromiumSession, ChromiumSessionFactory};
pub use setup::{find_browser_executable, launch_browser};

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::crawl_engine::StatusClass;

/// Result of one navigation, readiness waits included.
#[derive(Debug, Clone)]
pub struct NavigationOutcome {
    pub status: StatusClass,
    /// Landing URL after redirects, as reported by the browser.
    pub final_url: String,
    /// Serialized rendered DOM. Empty on timeout / navigation error.
    pub html: String,
    pub load_time: Duration,
}

/// A stable identifier for a navigation affordance found on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clickable {
    /// Persistent per-document handle, assigned the first time the element
    /// is enumerated and preserved across re-enumerations, so dedup on
    /// `(page, handle)` survives DOM mutations.
    pub id: u64,
    /// Trimmed text content, used for synthetic fragment slugs.
    pub text: String,
}

/// What a user-style activation of a clickable did to the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    /// Present when the location URL changed.
    pub new_url: Option<String>,
    /// True when the body content hash changed without a URL change.
    pub content_changed: bool,
}

/// A JavaScript-capable browser page owned by exactly one worker.
///
/// Implementations uphold the readiness policy: regular navigation waits
/// for document ready plus network idle; SPA-enabled sessions additionally
/// wait for loader elements to disappear and for the first DOM mutation.
#[async_trait]
pub trait BrowserSession: Send {
    /// Load a URL, wait for readiness, and classify the response.
    ///
    /// Timeouts and navigation failures are reported through
    /// [`StatusClass`], not as errors; an `Err` from this method is a
    /// session fault (renderer crash, protocol error) and the worker will
    /// discard the session.
    async fn navigate(&mut self, url: &str) -> Result<NavigationOutcome>;

    /// Enumerate navigation affordances for SPA discovery.
    async fn enumerate_clickables(&mut self) -> Result<Vec<Clickable>>;

    /// Activate a clickable and wait for network and DOM quiescence.
    async fn activate(&mut self, clickable: &Clickable) -> Result<Activation>;

    /// Location URL as currently reported by the page.
    async fn current_url(&mut self) -> Result<String>;

    /// Hash of the visible body text, used to detect SPA content changes.
    async fn content_hash(&mut self) -> Result<u64>;

    /// Release the underlying page.
    async fn close(&mut self) -> Result<()>;
}

/// Creates browser sessions for workers.
///
/// The factory owns whatever heavyweight state sessions share (the browser
/// process); creating a session must be cheap enough to call on every
/// restart within a worker's restart budget.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn BrowserSession>>;
}
