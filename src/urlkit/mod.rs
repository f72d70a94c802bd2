//! URL canonicalization and crawl-scope admission.
//!
//! Every URL that enters the crawl engine passes through this module first:
//! [`canonicalize`] turns a raw href into a [`CanonicalUrl`] (or a typed
//! rejection), and [`AdmissionPolicy::admit`] decides whether the canonical
//! URL is in scope for the crawl. Canonical form is the identity used by the
//! frontier, the visited set, and the checkpoint, so canonicalization must be
//! a fixed point: feeding a canonical URL back through produces the same
//! bytes.

mod admission;
mod canonical;

pub use admission::{AdmissionPolicy, DomainScope, is_webpage_path, registrable_domain};
pub use canonical::{CanonicalUrl, DEFAULT_STRIPPED_QUERY_PARAMS, canonicalize};

use std::fmt;

/// Typed rejection produced by canonicalization or admission.
///
/// Rejections are ordinary values, not errors: a rejected URL is simply not
/// enqueued. The variants exist so callers can log *why* discovery dropped a
/// link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The raw string did not parse as a URL, even against the base.
    Unparseable(String),
    /// Scheme is not http or https.
    UnsupportedScheme(String),
    /// The raw URL contained ASCII control characters.
    ControlCharacters,
    /// Host is missing or outside the policy's domain scope.
    OutOfScope(String),
    /// Path does not start with the required prefix.
    PathPrefix(String),
    /// File extension is in the excluded set.
    ExcludedExtension(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unparseable(raw) => write!(f, "unparseable URL: {raw}"),
            Self::UnsupportedScheme(scheme) => write!(f, "unsupported scheme: {scheme}"),
            Self::ControlCharacters => write!(f, "URL contains control characters"),
            Self::OutOfScope(host) => write!(f, "host out of crawl scope: {host}"),
            Self::PathPrefix(path) => write!(f, "path outside required prefix: {path}"),
            Self::ExcludedExtension(ext) => write!(f, "excluded file extension: {ext}"),
        }
    }
}
