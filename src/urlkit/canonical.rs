//! Canonical URL form.
//!
//! Canonicalization rules: lowercase scheme and host, strip default ports,
//! strip fragments, strip a configurable set of tracking query parameters,
//! collapse duplicate slashes in the path, and normalize an empty path to
//! `/`. Two URLs are the same page iff their canonical forms are byte-equal.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use super::RejectReason;

/// Query parameters stripped during canonicalization unless the caller
/// supplies its own set. The active set is recorded in every checkpoint so a
/// resumed crawl canonicalizes identically.
pub const DEFAULT_STRIPPED_QUERY_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "gclid",
    "fbclid",
    "ref",
];

/// A URL in canonical form.
///
/// Only [`canonicalize`] constructs these; everywhere else in the engine the
/// inner string is treated as opaque identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalUrl(String);

impl CanonicalUrl {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    /// Parsed view of the canonical URL.
    ///
    /// Canonical URLs were produced from a successful parse, so this cannot
    /// fail for values constructed by [`canonicalize`].
    pub fn parsed(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.0)
    }

    /// Host component, lowercased at canonicalization time.
    #[must_use]
    pub fn host(&self) -> Option<String> {
        Url::parse(&self.0)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }

    /// Path component.
    #[must_use]
    pub fn path(&self) -> String {
        Url::parse(&self.0)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "/".to_string())
    }

    /// Attach a synthetic fragment to an already-canonical URL.
    ///
    /// Canonicalization strips fragments, but SPA discovery needs synthetic
    /// `#section-*` routes as distinct frontier identities; this is the one
    /// sanctioned way to produce them.
    #[must_use]
    pub fn with_fragment(&self, fragment: &str) -> CanonicalUrl {
        let base = self.0.split('#').next().unwrap_or(&self.0);
        CanonicalUrl(format!("{base}#{fragment}"))
    }

    /// First non-empty path segment, used as the markdown output category.
    #[must_use]
    pub fn first_path_segment(&self) -> Option<String> {
        let path = self.path();
        path.split('/')
            .find(|segment| !segment.is_empty())
            .map(str::to_string)
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Resolve `raw` against `base` (if relative) and reduce it to canonical
/// form.
///
/// Rejects non-http(s) schemes, URLs containing ASCII control characters,
/// and anything that fails to parse even with the base applied.
pub fn canonicalize(
    raw: &str,
    base: Option<&Url>,
    stripped_params: &[String],
) -> Result<CanonicalUrl, RejectReason> {
    if raw.chars().any(|c| c.is_ascii_control()) {
        return Err(RejectReason::ControlCharacters);
    }

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RejectReason::Unparseable(raw.to_string()));
    }

    // Absolute parse first, relative resolution against the base second.
    let mut url = match Url::parse(trimmed) {
        Ok(u) => u,
        Err(url::ParseError::RelativeUrlWithoutBase) => match base {
            Some(b) => b
                .join(trimmed)
                .map_err(|_| RejectReason::Unparseable(raw.to_string()))?,
            None => return Err(RejectReason::Unparseable(raw.to_string())),
        },
        Err(_) => return Err(RejectReason::Unparseable(raw.to_string())),
    };

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(RejectReason::UnsupportedScheme(other.to_string())),
    }
    if url.host_str().is_none() {
        return Err(RejectReason::OutOfScope(String::new()));
    }

    // The url crate already lowercases scheme and host and drops default
    // ports on serialization; fragments and tracking params are ours.
    url.set_fragment(None);

    if url.query().is_some() {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !stripped_params.iter().any(|p| p == k.as_ref()))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            serializer.extend_pairs(kept);
            url.set_query(Some(&serializer.finish()));
        }
    }

    let collapsed = collapse_duplicate_slashes(url.path());
    if collapsed != url.path() {
        url.set_path(&collapsed);
    }

    Ok(CanonicalUrl(url.to_string()))
}

fn collapse_duplicate_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    if out.is_empty() { "/".to_string() } else { out }
}
