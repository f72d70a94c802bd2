//! Markdown document building.
//!
//! Converts rendered HTML into a markdown document with metadata (title,
//! heading counts, link/image counts, word count) and a category derived
//! from the URL path. Conversion is deterministic: identical HTML input
//! yields byte-identical markdown.

use anyhow::{Result, anyhow};
use htmd::HtmlToMarkdown;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;

use crate::crawl_engine::{DocMetadata, PageResult};
use crate::urlkit::CanonicalUrl;

static TITLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("title").expect("BUG: hardcoded CSS selector 'title' is invalid")
});

static LINK_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("a[href]").expect("BUG: hardcoded CSS selector 'a[href]' is invalid")
});

static IMG_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("img").expect("BUG: hardcoded CSS selector 'img' is invalid")
});

static BODY_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("body").expect("BUG: hardcoded CSS selector 'body' is invalid")
});

static EXCESS_BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\n{3,}").expect("BUG: hardcoded regex r\"\\n{3,}\" is invalid")
});

/// Markdown output category: the first non-empty path segment, `"index"`
/// for root-level pages.
#[must_use]
pub fn category_for(url: &CanonicalUrl) -> String {
    url.first_path_segment()
        .unwrap_or_else(|| "index".to_string())
}

/// Convert rendered HTML to markdown.
pub fn convert_to_markdown(html: &str) -> Result<String> {
    let converter = HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "noscript", "template"])
        .build();
    let markdown = converter
        .convert(html)
        .map_err(|e| anyhow!("markdown conversion failed: {e}"))?;
    let markdown = EXCESS_BLANK_LINES.replace_all(&markdown, "\n\n");
    Ok(markdown.trim().to_string())
}

/// Collect document statistics from the rendered HTML.
#[must_use]
pub fn page_metadata(html: &str) -> DocMetadata {
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let mut heading_counts = [0usize; 6];
    for (level, counter) in heading_counts.iter_mut().enumerate() {
        let selector = Selector::parse(&format!("h{}", level + 1))
            .expect("BUG: hardcoded heading selector is invalid");
        *counter = document.select(&selector).count();
    }

    let word_count = document
        .select(&BODY_SELECTOR)
        .next()
        .map(|body| body.text().collect::<String>().split_whitespace().count())
        .unwrap_or(0);

    DocMetadata {
        title,
        heading_counts,
        link_count: document.select(&LINK_SELECTOR).count(),
        image_count: document.select(&IMG_SELECTOR).count(),
        word_count,
    }
}

/// Build the full markdown result for a page.
pub fn build_markdown_doc(url: &CanonicalUrl, html: &str) -> Result<PageResult> {
    Ok(PageResult::MarkdownDoc {
        category: category_for(url),
        markdown: convert_to_markdown(html)?,
        metadata: page_metadata(html),
        url: url.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::urlkit::canonicalize;

    const PAGE: &str = r#"
        <html>
        <head><title>Guide</title></head>
        <body>
          <h1>Main</h1>
          <h2>Sub one</h2><h2>Sub two</h2>
          <p>Hello world from the guide.</p>
          <a href="/next">next</a>
          <img src="/pic.png" alt="pic">
          <script>ignored()</script>
        </body>
        </html>
    "#;

    fn canon(raw: &str) -> CanonicalUrl {
        canonicalize(raw, None, &[]).expect("test URL should canonicalize")
    }

    #[test]
    fn metadata_counts() {
        let meta = page_metadata(PAGE);
        assert_eq!(meta.title.as_deref(), Some("Guide"));
        assert_eq!(meta.heading_counts[0], 1);
        assert_eq!(meta.heading_counts[1], 2);
        assert_eq!(meta.link_count, 1);
        assert_eq!(meta.image_count, 1);
        assert!(meta.word_count >= 10);
    }

    #[test]
    fn conversion_keeps_structure_and_is_deterministic() {
        let first = convert_to_markdown(PAGE).expect("conversion succeeds");
        assert!(first.contains("# Main"));
        assert!(first.contains("Hello world"));
        assert!(!first.contains("ignored"));
        let second = convert_to_markdown(PAGE).expect("conversion succeeds");
        assert_eq!(first, second, "identical input must produce identical output");
    }

    #[test]
    fn category_from_first_path_segment() {
        assert_eq!(category_for(&canon("https://example.com/blog/post-1")), "blog");
        assert_eq!(category_for(&canon("https://example.com/")), "index");
    }

    #[test]
    fn builds_markdown_result() {
        let url = canon("https://example.com/guide/start");
        let result = build_markdown_doc(&url, PAGE).expect("doc builds");
        match result {
            PageResult::MarkdownDoc {
                category, metadata, ..
            } => {
                assert_eq!(category, "guide");
                assert_eq!(metadata.title.as_deref(), Some("Guide"));
            }
            PageResult::KeywordHit { .. } => panic!("expected markdown doc"),
        }
    }
}
