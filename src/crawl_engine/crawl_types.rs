//! Core types for the crawl engine.
//!
//! This module contains the shared vocabulary of the engine: fetch status
//! classification, controller outcomes, frontier entries, page results, and
//! the public error type.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::urlkit::CanonicalUrl;

/// HTTP-like classification of one navigation, as observed by the browser
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 2xx document response.
    Ok2xx,
    /// 3xx landing (redirects are followed; this only appears when the chain
    /// ends on a 3xx).
    Redirect3xx,
    /// 4xx other than 429.
    Client4xx,
    /// 429, or a 2xx body matching the rate-limit phrase heuristic.
    RateLimited429,
    /// 5xx document response.
    Server5xx,
    /// Navigation or readiness wait exceeded its deadline.
    Timeout,
    /// The browser failed to navigate at all (DNS, connection, crash).
    NavigationError,
}

impl StatusClass {
    /// Map a numeric status code from the network layer.
    #[must_use]
    pub fn from_status_code(code: i64) -> Self {
        match code {
            200..=299 => Self::Ok2xx,
            300..=399 => Self::Redirect3xx,
            429 => Self::RateLimited429,
            400..=499 => Self::Client4xx,
            500..=599 => Self::Server5xx,
            _ => Self::NavigationError,
        }
    }
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok2xx => "2xx",
            Self::Redirect3xx => "3xx",
            Self::Client4xx => "4xx",
            Self::RateLimited429 => "429",
            Self::Server5xx => "5xx",
            Self::Timeout => "timeout",
            Self::NavigationError => "navigation-error",
        };
        f.write_str(s)
    }
}

/// Categorical result of one fetch attempt, fed to the rate controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    RateLimited,
    ServerError,
    ClientError,
    Timeout,
}

impl Outcome {
    /// Controller outcome for a status class. Exactly one outcome is
    /// reported per navigate call.
    #[must_use]
    pub fn from_status(status: StatusClass) -> Self {
        match status {
            StatusClass::Ok2xx | StatusClass::Redirect3xx => Self::Success,
            StatusClass::RateLimited429 => Self::RateLimited,
            StatusClass::Server5xx => Self::ServerError,
            StatusClass::Client4xx => Self::ClientError,
            StatusClass::Timeout | StatusClass::NavigationError => Self::Timeout,
        }
    }
}

/// How a claimed URL leaves the in-flight set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Fetched and processed; the URL becomes visited.
    Success,
    /// Retryable failure; re-enqueued with an incremented attempt count
    /// until the attempt budget is exhausted.
    Retry,
    /// Terminal failure; the URL becomes visited without a result so it is
    /// never fetched again.
    Terminal,
}

/// One scheduled URL in the frontier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierEntry {
    pub url: CanonicalUrl,
    /// Fetch attempts already made for this URL (0 = never attempted).
    #[serde(default)]
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl FrontierEntry {
    #[must_use]
    pub fn new(url: CanonicalUrl) -> Self {
        Self {
            url,
            attempts: 0,
            enqueued_at: Utc::now(),
        }
    }
}

/// Document statistics attached to a markdown result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocMetadata {
    pub title: Option<String>,
    /// Counts of h1..h6, in order.
    pub heading_counts: [usize; 6],
    pub link_count: usize,
    pub image_count: usize,
    pub word_count: usize,
}

/// One unit of output produced for a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PageResult {
    /// A keyword occurrence with its sentence context (previous sentence,
    /// containing sentence, following sentence, concatenated).
    KeywordHit {
        url: CanonicalUrl,
        keyword: String,
        context: String,
    },
    /// A page converted to markdown, categorized by the first path segment.
    MarkdownDoc {
        url: CanonicalUrl,
        category: String,
        markdown: String,
        metadata: DocMetadata,
    },
}

impl PageResult {
    #[must_use]
    pub fn url(&self) -> &CanonicalUrl {
        match self {
            Self::KeywordHit { url, .. } | Self::MarkdownDoc { url, .. } => url,
        }
    }
}

/// End-of-run report logged by the manager and returned from the engine.
#[derive(Debug, Clone)]
pub struct CrawlSummary {
    pub pages_visited: u64,
    pub pages_failed: u64,
    pub results_emitted: u64,
    pub final_delay: Duration,
    pub final_workers: u32,
    pub elapsed: Duration,
}

impl fmt::Display for CrawlSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "visited {} pages ({} terminal failures), emitted {} results in {:.1}s; final setpoints: {} workers, {:.2}s delay",
            self.pages_visited,
            self.pages_failed,
            self.results_emitted,
            self.elapsed.as_secs_f64(),
            self.final_workers,
            self.final_delay.as_secs_f64()
        )
    }
}

/// Public error type for crawl operations.
#[derive(Debug, Clone)]
pub enum CrawlError {
    /// Configuration error (bad seed URL, inconsistent bounds).
    ConfigError(String),
    /// The browser layer could not be initialized at all.
    BrowserError(String),
    /// Checkpoint load failed when a resume was requested.
    CheckpointError(String),
    /// Operation cancelled before completion.
    Cancelled,
    /// Other errors.
    Other(String),
}

impl fmt::Display for CrawlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Configuration error: {msg}"),
            Self::BrowserError(msg) => write!(f, "Browser error: {msg}"),
            Self::CheckpointError(msg) => write!(f, "Checkpoint error: {msg}"),
            Self::Cancelled => write!(f, "Crawl operation was cancelled"),
            Self::Other(msg) => write!(f, "Crawl error: {msg}"),
        }
    }
}

impl std::error::Error for CrawlError {}

impl From<anyhow::Error> for CrawlError {
    fn from(err: anyhow::Error) -> Self {
        // {:#} preserves the full context chain
        Self::Other(format!("{err:#}"))
    }
}

/// Convenience alias for Result with `CrawlError`
pub type CrawlResult<T> = Result<T, CrawlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_classification() {
        assert_eq!(StatusClass::from_status_code(200), StatusClass::Ok2xx);
        assert_eq!(StatusClass::from_status_code(301), StatusClass::Redirect3xx);
        assert_eq!(StatusClass::from_status_code(404), StatusClass::Client4xx);
        assert_eq!(StatusClass::from_status_code(429), StatusClass::RateLimited429);
        assert_eq!(StatusClass::from_status_code(503), StatusClass::Server5xx);
    }

    #[test]
    fn outcome_mapping() {
        assert_eq!(Outcome::from_status(StatusClass::Ok2xx), Outcome::Success);
        assert_eq!(
            Outcome::from_status(StatusClass::RateLimited429),
            Outcome::RateLimited
        );
        assert_eq!(
            Outcome::from_status(StatusClass::Server5xx),
            Outcome::ServerError
        );
        assert_eq!(
            Outcome::from_status(StatusClass::Client4xx),
            Outcome::ClientError
        );
        assert_eq!(
            Outcome::from_status(StatusClass::NavigationError),
            Outcome::Timeout
        );
    }
}
