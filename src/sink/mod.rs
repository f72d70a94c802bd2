//! Result sinks.
//!
//! The engine produces a stream of [`PageResult`]s; sinks side-effect them
//! to storage. The engine itself guarantees the sink contract's dedup
//! rules (no repeated `(url, keyword, sentence)` records, at most one
//! markdown doc per canonical URL), so sinks can append blindly.

pub mod csv_sink;
pub mod markdown_sink;

pub use csv_sink::KeywordCsvSink;
pub use markdown_sink::MarkdownTreeSink;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::crawl_engine::PageResult;

/// Consumer of page results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn emit(&self, result: &PageResult) -> Result<()>;

    /// Flush buffered output; called once at the end of the run.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory sink for embedding and tests.
#[derive(Default)]
pub struct MemorySink {
    results: Mutex<Vec<PageResult>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn results(&self) -> Vec<PageResult> {
        self.results.lock().clone()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn emit(&self, result: &PageResult) -> Result<()> {
        self.results.lock().push(result.clone());
        Ok(())
    }
}
