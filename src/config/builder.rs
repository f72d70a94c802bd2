//! Fluent builder for [`CrawlConfig`].
//!
//! The start URL is the only required field; `build()` validates bounds and
//! cross-field consistency and fails with a descriptive error instead of
//! producing a config the engine would reject later.

use anyhow::Result;
use std::path::PathBuf;

use super::types::{CrawlConfig, CrawlMode};

#[derive(Debug, Clone)]
pub struct CrawlConfigBuilder {
    config: CrawlConfig,
}

impl CrawlConfig {
    /// Start building a config for the given seed URL.
    #[must_use]
    pub fn builder(start_url: impl Into<String>) -> CrawlConfigBuilder {
        CrawlConfigBuilder {
            config: Self {
                start_url: start_url.into(),
                ..Self::default()
            },
        }
    }
}

impl CrawlConfigBuilder {
    #[must_use]
    pub fn mode(mut self, mode: CrawlMode) -> Self {
        self.config.mode = mode;
        self
    }

    #[must_use]
    pub fn keywords(mut self, keywords: Vec<String>) -> Self {
        self.config.mode = CrawlMode::Keywords(keywords);
        self
    }

    #[must_use]
    pub fn output_dir(mut self, dir: PathBuf) -> Self {
        self.config.output_dir = dir;
        self
    }

    #[must_use]
    pub fn path_prefix(mut self, prefix: Option<String>) -> Self {
        self.config.path_prefix = prefix;
        self
    }

    #[must_use]
    pub fn allow_subdomains(mut self, allow: bool) -> Self {
        self.config.allow_subdomains = allow;
        self
    }

    #[must_use]
    pub fn allowed_extensions(mut self, extensions: Vec<String>) -> Self {
        self.config.allowed_extensions = extensions;
        self
    }

    #[must_use]
    pub fn stripped_query_params(mut self, params: Vec<String>) -> Self {
        self.config.stripped_query_params = params;
        self
    }

    #[must_use]
    pub fn max_pages(mut self, limit: Option<u64>) -> Self {
        self.config.max_pages = limit;
        self
    }

    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn max_restarts(mut self, restarts: u32) -> Self {
        self.config.max_restarts = restarts;
        self
    }

    #[must_use]
    pub fn workers(mut self, min: u32, max: u32, initial: u32) -> Self {
        self.config.min_workers = min;
        self.config.max_workers = max;
        self.config.initial_workers = initial;
        self
    }

    #[must_use]
    pub fn delays(mut self, min_secs: f64, max_secs: f64, initial_secs: f64) -> Self {
        self.config.min_delay_secs = min_secs;
        self.config.max_delay_secs = max_secs;
        self.config.initial_delay_secs = initial_secs;
        self
    }

    #[must_use]
    pub fn adaptive_control(mut self, enabled: bool) -> Self {
        self.config.adaptive_control = enabled;
        self
    }

    #[must_use]
    pub fn aggressive_throttling(mut self, enabled: bool) -> Self {
        self.config.aggressive_throttling = enabled;
        self
    }

    #[must_use]
    pub fn spa(mut self, enabled: bool) -> Self {
        self.config.spa = enabled;
        self
    }

    #[must_use]
    pub fn headless(mut self, enabled: bool) -> Self {
        self.config.headless = enabled;
        self
    }

    #[must_use]
    pub fn resume(mut self, enabled: bool) -> Self {
        self.config.resume = enabled;
        self
    }

    #[must_use]
    pub fn checkpoint_interval_secs(mut self, secs: u64) -> Self {
        self.config.checkpoint_interval_secs = secs;
        self
    }

    #[must_use]
    pub fn content_filter_flags(
        mut self,
        headers: bool,
        menus: bool,
        footers: bool,
        sidebars: bool,
    ) -> Self {
        self.config.include_headers = headers;
        self.config.include_menus = menus;
        self.config.include_footers = footers;
        self.config.include_sidebars = sidebars;
        self
    }

    /// Validate and produce the config.
    pub fn build(self) -> Result<CrawlConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_are_valid() {
        let config = CrawlConfig::builder("https://example.com/")
            .build()
            .expect("defaults should validate");
        assert_eq!(config.start_url(), "https://example.com/");
        assert_eq!(config.max_attempts(), 3);
        assert!(config.adaptive_control());
    }

    #[test]
    fn builder_rejects_inverted_bounds() {
        assert!(
            CrawlConfig::builder("https://example.com/")
                .workers(4, 2, 3)
                .build()
                .is_err()
        );
        assert!(
            CrawlConfig::builder("https://example.com/")
                .delays(5.0, 1.0, 2.0)
                .build()
                .is_err()
        );
    }

    #[test]
    fn builder_rejects_bad_seed() {
        assert!(CrawlConfig::builder("ftp://example.com/").build().is_err());
        assert!(CrawlConfig::builder("  ").build().is_err());
    }

    #[test]
    fn builder_rejects_empty_keywords() {
        assert!(
            CrawlConfig::builder("https://example.com/")
                .keywords(vec!["  ".to_string()])
                .build()
                .is_err()
        );
    }
}
