//! sitescan: an adaptive, checkpointable web crawler driven by a headless
//! browser.
//!
//! The crate visits pages reachable from a seed URL, renders them with a
//! JavaScript-capable browser engine, and either reports keyword
//! occurrences with sentence context or converts pages into markdown
//! documents organized by URL category. The core is the crawl engine in
//! [`crawl_engine`]; the browser, extraction, and sink layers plug into it
//! through traits so the engine can be exercised without a real browser.

pub mod browser;
pub mod cli;
pub mod config;
pub mod crawl_engine;
pub mod extract;
pub mod sink;
pub mod urlkit;

pub use browser::{
    Activation, BrowserSession, ChromiumSession, ChromiumSessionFactory, Clickable,
    NavigationOutcome, SessionFactory, launch_browser,
};
pub use config::{CrawlConfig, CrawlConfigBuilder, CrawlMode};
pub use crawl_engine::{
    Checkpoint, CheckpointManager, CrawlError, CrawlResult, CrawlStore, CrawlSummary,
    FrontierEntry, Outcome, PageResult, RateController, Setpoints, StatusClass, Tunables,
    run_crawl,
};
pub use extract::{ContentFilter, KeywordMatcher};
pub use sink::{KeywordCsvSink, MarkdownTreeSink, MemorySink, ResultSink};
pub use urlkit::{AdmissionPolicy, CanonicalUrl, DomainScope, RejectReason, canonicalize};
