//! Filesystem tree output for markdown documents.
//!
//! Documents land under `<root>/<category>/<slug>.md` with a small metadata
//! preamble. The slug is derived from the URL path; colliding slugs get a
//! short hash suffix so distinct URLs never overwrite each other.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use std::path::PathBuf;
use tokio::fs;
use xxhash_rust::xxh3::xxh3_64;

use super::ResultSink;
use crate::crawl_engine::{DocMetadata, PageResult};
use crate::urlkit::CanonicalUrl;

/// Writes one markdown file per page into a category tree.
pub struct MarkdownTreeSink {
    root: PathBuf,
}

impl MarkdownTreeSink {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn doc_path(&self, url: &CanonicalUrl, category: &str) -> PathBuf {
        let category = sanitize_filename::sanitize(category);
        let slug = slug_for(url);
        self.root.join(category).join(format!("{slug}.md"))
    }
}

#[async_trait]
impl ResultSink for MarkdownTreeSink {
    async fn emit(&self, result: &PageResult) -> Result<()> {
        let PageResult::MarkdownDoc {
            url,
            category,
            markdown,
            metadata,
        } = result
        else {
            debug!("markdown sink ignoring non-markdown result");
            return Ok(());
        };

        let path = self.doc_path(url, category);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("failed to create category directory")?;
        }
        let document = render_document(url, metadata, markdown);
        fs::write(&path, document)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!("markdown saved: {}", path.display());
        Ok(())
    }
}

fn render_document(url: &CanonicalUrl, metadata: &DocMetadata, markdown: &str) -> String {
    let title = metadata.title.as_deref().unwrap_or("(untitled)");
    format!(
        "---\nsource: {url}\ntitle: {title}\nwords: {}\nlinks: {}\nimages: {}\n---\n\n{markdown}\n",
        metadata.word_count, metadata.link_count, metadata.image_count
    )
}

/// Filesystem slug for a canonical URL: the path with separators folded to
/// dashes, plus a short content hash to keep distinct URLs distinct after
/// sanitization.
fn slug_for(url: &CanonicalUrl) -> String {
    let path = url.path();
    let base: String = path
        .trim_matches('/')
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let base = base.trim_matches('-');
    let stem = if base.is_empty() { "index" } else { base };
    let stem: String = sanitize_filename::sanitize(stem).chars().take(80).collect();
    let hash = xxh3_64(url.as_str().as_bytes());
    format!("{stem}-{:08x}", hash as u32)
}
