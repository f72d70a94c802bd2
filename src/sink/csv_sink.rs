//! CSV output for keyword hits.
//!
//! One row per hit: `url,keyword,context`. Quoting follows the usual CSV
//! rules (fields containing commas, quotes, or newlines are quoted, quotes
//! doubled). Markdown results are not this sink's job and are ignored.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::ResultSink;
use crate::crawl_engine::PageResult;

const HEADER: &str = "url,keyword,context\n";

/// Appends keyword hits to a CSV file, writing the header on creation.
pub struct KeywordCsvSink {
    path: PathBuf,
    file: Mutex<Option<tokio::fs::File>>,
}

impl KeywordCsvSink {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> Result<tokio::fs::File> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .context("failed to create output directory")?;
        }
        let fresh = !self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        if fresh {
            file.write_all(HEADER.as_bytes())
                .await
                .context("failed to write CSV header")?;
        }
        Ok(file)
    }
}

#[async_trait]
impl ResultSink for KeywordCsvSink {
    async fn emit(&self, result: &PageResult) -> Result<()> {
        let PageResult::KeywordHit {
            url,
            keyword,
            context,
        } = result
        else {
            debug!("csv sink ignoring non-keyword result");
            return Ok(());
        };

        let line = format!(
            "{},{},{}\n",
            csv_field(url.as_str()),
            csv_field(keyword),
            csv_field(context)
        );

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        let file = guard.as_mut().expect("file was just opened");
        file.write_all(line.as_bytes())
            .await
            .context("failed to append keyword hit")?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        if let Some(file) = self.file.lock().await.as_mut() {
            file.flush().await.context("failed to flush CSV output")?;
        }
        Ok(())
    }
}

/// Quote a field when it contains a delimiter, quote, or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::urlkit::canonicalize;
    use tempfile::TempDir;

    #[test]
    fn csv_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("line\nbreak"), "\"line\nbreak\"");
    }

    #[tokio::test]
    async fn writes_header_once_and_appends() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("hits.csv");
        let sink = KeywordCsvSink::new(path.clone());
        let url = canonicalize("https://example.com/a", None, &[]).expect("canonicalizes");

        for n in 0..2 {
            sink.emit(&PageResult::KeywordHit {
                url: url.clone(),
                keyword: "alpha".to_string(),
                context: format!("Sentence {n}, with a comma."),
            })
            .await
            .expect("emit succeeds");
        }
        sink.flush().await.expect("flush succeeds");

        let data = std::fs::read_to_string(&path).expect("file exists");
        let lines: Vec<&str> = data.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "url,keyword,context");
        assert!(lines[1].starts_with("https://example.com/a,alpha,"));
        assert!(lines[1].contains("\"Sentence 0, with a comma.\""));
    }
}
