//! Configuration types.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use xxhash_rust::xxh3::xxh3_64;

use crate::urlkit::DEFAULT_STRIPPED_QUERY_PARAMS;

/// What the crawl produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlMode {
    /// Report keyword occurrences with sentence context.
    Keywords(Vec<String>),
    /// Convert each page to a markdown document.
    Markdown,
}

/// Full configuration for one crawl run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    pub(crate) start_url: String,
    pub(crate) mode: CrawlMode,
    pub(crate) output_dir: PathBuf,

    // scope
    pub(crate) path_prefix: Option<String>,
    pub(crate) allow_subdomains: bool,
    pub(crate) allowed_extensions: Vec<String>,
    pub(crate) stripped_query_params: Vec<String>,

    // budgets
    pub(crate) max_pages: Option<u64>,
    pub(crate) max_attempts: u32,
    pub(crate) max_restarts: u32,

    // controller
    pub(crate) min_workers: u32,
    pub(crate) max_workers: u32,
    pub(crate) initial_workers: u32,
    pub(crate) min_delay_secs: f64,
    pub(crate) max_delay_secs: f64,
    pub(crate) initial_delay_secs: f64,
    pub(crate) adaptive_control: bool,
    pub(crate) aggressive_throttling: bool,

    // browser
    pub(crate) spa: bool,
    pub(crate) headless: bool,

    // checkpointing
    pub(crate) resume: bool,
    pub(crate) checkpoint_interval_secs: u64,
    pub(crate) keep_checkpoint_backup: bool,

    // content filter
    pub(crate) include_headers: bool,
    pub(crate) include_menus: bool,
    pub(crate) include_footers: bool,
    pub(crate) include_sidebars: bool,
    #[serde(default)]
    pub(crate) excluded_selectors: Vec<String>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            start_url: String::new(),
            mode: CrawlMode::Markdown,
            output_dir: PathBuf::from("./output"),
            path_prefix: None,
            allow_subdomains: false,
            allowed_extensions: Vec::new(),
            stripped_query_params: DEFAULT_STRIPPED_QUERY_PARAMS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            max_pages: None,
            max_attempts: 3,
            max_restarts: 3,
            min_workers: 1,
            max_workers: num_cpus::get().max(2) as u32,
            initial_workers: 2,
            min_delay_secs: 0.5,
            max_delay_secs: 30.0,
            initial_delay_secs: 1.0,
            adaptive_control: true,
            aggressive_throttling: false,
            spa: false,
            headless: true,
            resume: false,
            checkpoint_interval_secs: 600,
            keep_checkpoint_backup: true,
            include_headers: false,
            include_menus: false,
            include_footers: false,
            include_sidebars: false,
            excluded_selectors: Vec::new(),
        }
    }
}

impl CrawlConfig {
    #[must_use]
    pub fn start_url(&self) -> &str {
        &self.start_url
    }

    #[must_use]
    pub fn mode(&self) -> &CrawlMode {
        &self.mode
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    #[must_use]
    pub fn path_prefix(&self) -> Option<&str> {
        self.path_prefix.as_deref()
    }

    #[must_use]
    pub fn allow_subdomains(&self) -> bool {
        self.allow_subdomains
    }

    #[must_use]
    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    #[must_use]
    pub fn stripped_query_params(&self) -> &[String] {
        &self.stripped_query_params
    }

    pub(crate) fn set_stripped_query_params(&mut self, params: Vec<String>) {
        self.stripped_query_params = params;
    }

    #[must_use]
    pub fn max_pages(&self) -> Option<u64> {
        self.max_pages
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn max_restarts(&self) -> u32 {
        self.max_restarts
    }

    #[must_use]
    pub fn min_delay(&self) -> Duration {
        Duration::from_secs_f64(self.min_delay_secs)
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_secs_f64(self.max_delay_secs)
    }

    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs_f64(self.initial_delay_secs)
    }

    #[must_use]
    pub fn min_workers(&self) -> u32 {
        self.min_workers
    }

    #[must_use]
    pub fn max_workers(&self) -> u32 {
        self.max_workers
    }

    #[must_use]
    pub fn initial_workers(&self) -> u32 {
        self.initial_workers
    }

    #[must_use]
    pub fn adaptive_control(&self) -> bool {
        self.adaptive_control
    }

    #[must_use]
    pub fn aggressive_throttling(&self) -> bool {
        self.aggressive_throttling
    }

    #[must_use]
    pub fn spa(&self) -> bool {
        self.spa
    }

    #[must_use]
    pub fn headless(&self) -> bool {
        self.headless
    }

    #[must_use]
    pub fn resume(&self) -> bool {
        self.resume
    }

    #[must_use]
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }

    #[must_use]
    pub fn keep_checkpoint_backup(&self) -> bool {
        self.keep_checkpoint_backup
    }

    #[must_use]
    pub fn checkpoint_path(&self) -> PathBuf {
        self.output_dir.join("crawl.checkpoint.json")
    }

    #[must_use]
    pub fn keyword_csv_path(&self) -> PathBuf {
        self.output_dir.join("keyword_hits.csv")
    }

    #[must_use]
    pub fn markdown_root(&self) -> PathBuf {
        self.output_dir.join("pages")
    }

    #[must_use]
    pub fn include_headers(&self) -> bool {
        self.include_headers
    }

    #[must_use]
    pub fn include_menus(&self) -> bool {
        self.include_menus
    }

    #[must_use]
    pub fn include_footers(&self) -> bool {
        self.include_footers
    }

    #[must_use]
    pub fn include_sidebars(&self) -> bool {
        self.include_sidebars
    }

    #[must_use]
    pub fn excluded_selectors(&self) -> &[String] {
        &self.excluded_selectors
    }

    /// Check bounds and cross-field consistency. Called by the builder and
    /// again after CLI overrides are applied.
    pub fn validate(&self) -> Result<()> {
        use anyhow::bail;

        if self.start_url.trim().is_empty() {
            bail!("start URL must not be empty");
        }
        if !self.start_url.starts_with("http://") && !self.start_url.starts_with("https://") {
            bail!("start URL must be http(s): {}", self.start_url);
        }
        if self.min_workers == 0 {
            bail!("min workers must be at least 1");
        }
        if self.min_workers > self.max_workers {
            bail!(
                "worker bounds inverted: min {} > max {}",
                self.min_workers,
                self.max_workers
            );
        }
        if !(self.min_workers..=self.max_workers).contains(&self.initial_workers) {
            bail!(
                "initial workers {} outside [{}, {}]",
                self.initial_workers,
                self.min_workers,
                self.max_workers
            );
        }
        if self.min_delay_secs < 0.0 || self.min_delay_secs > self.max_delay_secs {
            bail!(
                "delay bounds invalid: min {} max {}",
                self.min_delay_secs,
                self.max_delay_secs
            );
        }
        if !(self.min_delay_secs..=self.max_delay_secs).contains(&self.initial_delay_secs) {
            bail!(
                "initial delay {} outside [{}, {}]",
                self.initial_delay_secs,
                self.min_delay_secs,
                self.max_delay_secs
            );
        }
        if let CrawlMode::Keywords(keywords) = &self.mode
            && keywords.iter().all(|k| k.trim().is_empty())
        {
            bail!("keyword mode requires at least one non-empty keyword");
        }
        Ok(())
    }

    /// Load a configuration file (JSON).
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Write the configuration to a file (JSON, pretty).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context("failed to create config directory")?;
        }
        let data = serde_json::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, data)
            .with_context(|| format!("failed to write config file {}", path.display()))
    }

    /// Stable fingerprint over the scope-relevant parts of the
    /// configuration. Recorded in checkpoints; a mismatch on resume is
    /// warned about but honored.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let scope = serde_json::json!({
            "start_url": self.start_url,
            "mode": self.mode,
            "path_prefix": self.path_prefix,
            "allow_subdomains": self.allow_subdomains,
            "allowed_extensions": self.allowed_extensions,
            "stripped_query_params": self.stripped_query_params,
        });
        format!("{:016x}", xxh3_64(scope.to_string().as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn config_file_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("config.json");

        let config = CrawlConfig {
            start_url: "https://example.com/docs/".to_string(),
            mode: CrawlMode::Keywords(vec!["alpha".to_string()]),
            max_pages: Some(100),
            ..CrawlConfig::default()
        };
        config.save(&path).expect("save succeeds");

        let loaded = CrawlConfig::load(&path).expect("load succeeds");
        assert_eq!(loaded.start_url(), config.start_url());
        assert_eq!(loaded.mode(), config.mode());
        assert_eq!(loaded.max_pages(), Some(100));
        assert_eq!(loaded.fingerprint(), config.fingerprint());
    }

    #[test]
    fn fingerprint_tracks_scope_changes_only() {
        let base = CrawlConfig {
            start_url: "https://example.com/".to_string(),
            ..CrawlConfig::default()
        };
        let mut same_scope = base.clone();
        same_scope.max_workers = 99;
        assert_eq!(base.fingerprint(), same_scope.fingerprint());

        let mut new_scope = base.clone();
        new_scope.path_prefix = Some("/docs/".to_string());
        assert_ne!(base.fingerprint(), new_scope.fingerprint());
    }
}
