//! Crawl-scope admission rules.
//!
//! The admission policy decides which canonical URLs may enter the frontier:
//! scheme, host scope derived from the seed URL, an optional path prefix,
//! and a file-extension filter that keeps the crawl on webpages instead of
//! assets.

use std::collections::HashSet;

use super::{CanonicalUrl, RejectReason};

/// Extensions treated as non-webpage assets and rejected by default.
/// Overridable per entry through `allowed_extensions`.
const DEFAULT_EXCLUDED_EXTENSIONS: &[&str] = &[
    // images
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "svg", "ico", "tiff", "avif",
    // archives
    "zip", "tar", "gz", "bz2", "xz", "7z", "rar",
    // office and documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp",
    // audio / video
    "mp3", "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "wav", "ogg", "m4a",
    // executables and packages
    "exe", "msi", "dmg", "pkg", "deb", "rpm", "apk", "bin",
    // fonts
    "woff", "woff2", "ttf", "otf", "eot",
    // client assets
    "css", "js", "mjs",
];

/// Two-label public suffixes where the registrable domain is three labels
/// (`example.co.uk`, not `co.uk`). Deliberately a short pragmatic list, not
/// the full public-suffix database.
const TWO_LABEL_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "co.jp", "co.nz", "com.au", "net.au", "org.au",
    "co.za", "com.br", "com.mx", "co.in", "co.kr",
];

/// Host scope for a crawl, derived from the seed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainScope {
    /// Only the seed's exact host (default).
    ExactHost(String),
    /// Any subdomain of the seed's registrable domain.
    Registrable(String),
    /// An explicitly configured host.
    Host(String),
}

impl DomainScope {
    /// Derive the scope from a seed host.
    #[must_use]
    pub fn from_seed(seed_host: &str, allow_subdomains: bool) -> Self {
        if allow_subdomains {
            Self::Registrable(registrable_domain(seed_host))
        } else {
            Self::ExactHost(seed_host.to_ascii_lowercase())
        }
    }

    fn contains(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        match self {
            Self::ExactHost(h) | Self::Host(h) => host == *h,
            Self::Registrable(reg) => {
                host == *reg || host.ends_with(&format!(".{reg}"))
            }
        }
    }
}

/// Extract the registrable domain from a host: the last two labels, or the
/// last three when the trailing two form a known two-label public suffix.
#[must_use]
pub fn registrable_domain(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }
    let last_two = labels[labels.len() - 2..].join(".");
    let take = if TWO_LABEL_SUFFIXES.contains(&last_two.as_str()) {
        3
    } else {
        2
    };
    labels[labels.len().saturating_sub(take)..].join(".")
}

/// Whether a path names a webpage under the default extension rules:
/// trailing slash or no extension counts as a webpage.
#[must_use]
pub fn is_webpage_path(path: &str) -> bool {
    path_extension(path).is_none()
}

fn path_extension(path: &str) -> Option<String> {
    if path.ends_with('/') {
        return None;
    }
    let last = path.rsplit('/').next()?;
    let (_, ext) = last.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Admission policy for one crawl run.
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    scope: DomainScope,
    path_prefix: Option<String>,
    excluded_extensions: HashSet<String>,
    allowed_extensions: HashSet<String>,
}

impl AdmissionPolicy {
    /// Build a policy from the seed URL's host and the scope/path options.
    #[must_use]
    pub fn new(
        scope: DomainScope,
        path_prefix: Option<String>,
        allowed_extensions: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            scope,
            path_prefix,
            excluded_extensions: DEFAULT_EXCLUDED_EXTENSIONS
                .iter()
                .map(|e| (*e).to_string())
                .collect(),
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    #[must_use]
    pub fn scope(&self) -> &DomainScope {
        &self.scope
    }

    /// Decide whether `url` is in scope for the crawl.
    ///
    /// Admission is re-checked after navigation on the final (post-redirect)
    /// URL; a URL that passed at enqueue time can still be revoked here.
    pub fn admit(&self, url: &CanonicalUrl) -> Result<(), RejectReason> {
        let parsed = url
            .parsed()
            .map_err(|_| RejectReason::Unparseable(url.as_str().to_string()))?;

        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(RejectReason::UnsupportedScheme(other.to_string())),
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| RejectReason::OutOfScope(String::new()))?;
        if !self.scope.contains(host) {
            return Err(RejectReason::OutOfScope(host.to_string()));
        }

        let path = parsed.path();
        if let Some(prefix) = &self.path_prefix
            && !path.starts_with(prefix.as_str())
        {
            return Err(RejectReason::PathPrefix(path.to_string()));
        }

        if let Some(ext) = path_extension(path)
            && self.excluded_extensions.contains(&ext)
            && !self.allowed_extensions.contains(&ext)
        {
            return Err(RejectReason::ExcludedExtension(ext));
        }

        Ok(())
    }
}
