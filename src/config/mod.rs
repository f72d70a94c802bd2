//! Crawl configuration.
//!
//! [`CrawlConfig`] is the single source of truth for a run: crawl scope,
//! output mode, controller tunables, checkpoint settings. It is built
//! through the fluent builder, serializes to JSON for `--config` /
//! `--save-config` round-trips, and exposes a fingerprint so checkpoints
//! can detect configuration drift across resumes.

mod builder;
mod types;

pub use builder::CrawlConfigBuilder;
pub use types::{CrawlConfig, CrawlMode};
