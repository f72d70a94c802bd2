//! Command-line surface.
//!
//! Options override values from `--config` when given explicitly; the
//! resolved configuration can be persisted back with `--save-config`.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;

use crate::config::{CrawlConfig, CrawlMode};

#[derive(Parser, Debug)]
#[command(
    name = "sitescan",
    version,
    about = "Adaptive, checkpointable web crawler: keyword detection or markdown harvesting"
)]
pub struct Cli {
    /// Starting URL for the crawl (required unless provided via --config)
    pub url: Option<String>,

    /// Keywords to search for (comma separated); enables keyword mode
    #[arg(long, value_delimiter = ',')]
    pub keywords: Vec<String>,

    /// Convert pages to markdown documents instead of keyword matching
    #[arg(long)]
    pub markdown_mode: bool,

    /// Only crawl URLs whose path starts with this prefix
    #[arg(long)]
    pub path_prefix: Option<String>,

    /// Stop after this many pages
    #[arg(long)]
    pub max_pages: Option<u64>,

    /// Lower bound for the adaptive worker count
    #[arg(long)]
    pub min_workers: Option<u32>,

    /// Upper bound for the adaptive worker count
    #[arg(long)]
    pub max_workers: Option<u32>,

    /// Worker count at startup
    #[arg(long)]
    pub initial_workers: Option<u32>,

    /// Lower bound for the inter-request delay (seconds)
    #[arg(long)]
    pub min_delay: Option<f64>,

    /// Upper bound for the inter-request delay (seconds)
    #[arg(long)]
    pub max_delay: Option<f64>,

    /// Inter-request delay at startup (seconds)
    #[arg(long)]
    pub initial_delay: Option<f64>,

    /// Pin the initial worker count and delay for the whole run
    #[arg(long)]
    pub disable_adaptive_control: bool,

    /// Back off harder on rate limiting (double delay, shed two workers)
    #[arg(long)]
    pub aggressive_throttling: bool,

    /// Crawl any subdomain of the seed's registrable domain
    #[arg(long)]
    pub allow_subdomains: bool,

    /// File extensions to crawl despite the default exclusion list
    /// (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub allowed_extensions: Vec<String>,

    /// Enable SPA discovery: clickable exploration and synthetic routes
    #[arg(long)]
    pub spa: bool,

    /// Resume from the checkpoint in the output directory
    #[arg(long)]
    pub resume: bool,

    /// Seconds between periodic checkpoints
    #[arg(long)]
    pub checkpoint_interval: Option<u64>,

    /// Browser session faults tolerated per worker before it is replaced
    #[arg(long)]
    pub max_restarts: Option<u32>,

    /// Output directory (keyword CSV or markdown tree, plus checkpoints)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Load configuration from a JSON file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write the resolved configuration to a JSON file and exit
    #[arg(long)]
    pub save_config: Option<PathBuf>,
}

impl Cli {
    /// Merge the config file (if any), CLI overrides, and defaults into a
    /// validated [`CrawlConfig`].
    pub fn resolve_config(&self) -> Result<CrawlConfig> {
        let mut config = match &self.config {
            Some(path) => CrawlConfig::load(path)?,
            None => CrawlConfig::default(),
        };

        if let Some(url) = &self.url {
            config.start_url = url.clone();
        }
        if config.start_url.trim().is_empty() {
            bail!("a starting URL is required (positional argument or config file)");
        }

        if !self.keywords.is_empty() && self.markdown_mode {
            bail!("--keywords and --markdown-mode are mutually exclusive");
        }
        if !self.keywords.is_empty() {
            config.mode = CrawlMode::Keywords(self.keywords.clone());
        } else if self.markdown_mode {
            config.mode = CrawlMode::Markdown;
        } else if matches!(config.mode, CrawlMode::Keywords(ref k) if k.is_empty()) {
            bail!("keyword mode requires --keywords");
        }

        if let Some(prefix) = &self.path_prefix {
            config.path_prefix = Some(prefix.clone());
        }
        if let Some(limit) = self.max_pages {
            config.max_pages = Some(limit);
        }
        if let Some(v) = self.min_workers {
            config.min_workers = v;
        }
        if let Some(v) = self.max_workers {
            config.max_workers = v;
        }
        if let Some(v) = self.initial_workers {
            config.initial_workers = v;
        }
        if let Some(v) = self.min_delay {
            config.min_delay_secs = v;
        }
        if let Some(v) = self.max_delay {
            config.max_delay_secs = v;
        }
        if let Some(v) = self.initial_delay {
            config.initial_delay_secs = v;
        }
        if self.disable_adaptive_control {
            config.adaptive_control = false;
        }
        if self.aggressive_throttling {
            config.aggressive_throttling = true;
        }
        if self.allow_subdomains {
            config.allow_subdomains = true;
        }
        if !self.allowed_extensions.is_empty() {
            config.allowed_extensions = self.allowed_extensions.clone();
        }
        if self.spa {
            config.spa = true;
        }
        if self.resume {
            config.resume = true;
        }
        if let Some(secs) = self.checkpoint_interval {
            config.checkpoint_interval_secs = secs;
        }
        if let Some(v) = self.max_restarts {
            config.max_restarts = v;
        }
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }

        config
            .validate()
            .context("invalid configuration after applying CLI options")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("sitescan").chain(args.iter().copied()))
            .expect("args should parse")
    }

    #[test]
    fn keyword_mode_from_flags() {
        let cli = parse(&["https://example.com/", "--keywords", "alpha,beta"]);
        let config = cli.resolve_config().expect("resolves");
        assert_eq!(
            config.mode(),
            &CrawlMode::Keywords(vec!["alpha".to_string(), "beta".to_string()])
        );
    }

    #[test]
    fn markdown_mode_and_scope_flags() {
        let cli = parse(&[
            "https://example.com/docs/",
            "--markdown-mode",
            "--path-prefix",
            "/docs/",
            "--allow-subdomains",
            "--max-pages",
            "50",
        ]);
        let config = cli.resolve_config().expect("resolves");
        assert_eq!(config.mode(), &CrawlMode::Markdown);
        assert_eq!(config.path_prefix(), Some("/docs/"));
        assert!(config.allow_subdomains());
        assert_eq!(config.max_pages(), Some(50));
    }

    #[test]
    fn conflicting_modes_rejected() {
        let cli = parse(&["https://example.com/", "--keywords", "x", "--markdown-mode"]);
        assert!(cli.resolve_config().is_err());
    }

    #[test]
    fn missing_url_rejected() {
        let cli = parse(&["--markdown-mode"]);
        assert!(cli.resolve_config().is_err());
    }

    #[test]
    fn controller_bounds_validated() {
        let cli = parse(&[
            "https://example.com/",
            "--markdown-mode",
            "--min-workers",
            "4",
            "--max-workers",
            "2",
        ]);
        assert!(cli.resolve_config().is_err());
    }
}
