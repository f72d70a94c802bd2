//! Content extraction: link discovery, keyword matching, content filtering,
//! and markdown document building. Everything in this module is a pure
//! function over rendered HTML; the browser is never touched here.

pub mod content_filter;
pub mod keywords;
pub mod links;
pub mod markdown;

pub use content_filter::ContentFilter;
pub use keywords::KeywordMatcher;
pub use links::{extract_links, scan_inline_scripts};
pub use markdown::{build_markdown_doc, category_for};
