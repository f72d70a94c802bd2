//! Link discovery from rendered HTML.
//!
//! Three discovery paths feed the frontier: `<a href>` extraction from the
//! rendered DOM, a second pass with a different parser when the first one
//! finds suspiciously few links (malformed markup), and a scan of inline
//! scripts for router-style path literals that SPAs never render as
//! anchors.

use log::debug;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

/// Below this many anchors the primary parse is suspect and the lenient
/// fallback pass runs too.
const FALLBACK_THRESHOLD: usize = 5;

static ANCHOR_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("a[href]").expect("BUG: hardcoded CSS selector 'a[href]' is invalid")
});

static INLINE_SCRIPT_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("script:not([src])")
        .expect("BUG: hardcoded CSS selector 'script:not([src])' is invalid")
});

/// Router configuration literals: `path: '/x'`, `to: "/x"`, `href: '/x'`.
static ROUTE_CONFIG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:path|to|href)\s*:\s*["'](/[^"'\s]*)["']"#)
        .expect("BUG: hardcoded route-config regex is invalid")
});

/// Imperative navigation calls: `router.push('/x')`, `navigate("/x")`,
/// `history.pushState(_, _, '/x')`.
static NAV_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:router\.(?:push|replace|navigate)|navigate|pushState)\([^)]*?["'](/[^"'\s]*)["']"#)
        .expect("BUG: hardcoded nav-call regex is invalid")
});

/// Extract absolute candidate URLs from every `<a href>` in `html`,
/// resolved against `base`.
///
/// When fewer than five anchors surface, the serialized HTML is parsed a
/// second time with a separate lenient parser as a safety net; both result
/// sets are merged. Canonicalization and admission happen downstream.
#[must_use]
pub fn extract_links(html: &str, base: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    let document = Html::parse_document(html);
    for element in document.select(&ANCHOR_SELECTOR) {
        if let Some(href) = element.value().attr("href")
            && let Some(resolved) = resolve(href, base)
            && seen.insert(resolved.clone())
        {
            links.push(resolved);
        }
    }

    if links.len() < FALLBACK_THRESHOLD {
        debug!(
            target: "sitescan::links",
            "only {} anchors from primary parse, running lenient fallback",
            links.len()
        );
        for resolved in lenient_hrefs(html, base) {
            if seen.insert(resolved.clone()) {
                links.push(resolved);
            }
        }
    }

    links
}

/// Second-parser safety net over the serialized HTML.
fn lenient_hrefs(html: &str, base: &Url) -> Vec<String> {
    use kuchiki::traits::TendrilSink;

    let document = kuchiki::parse_html().one(html);
    let Ok(anchors) = document.select("a") else {
        return Vec::new();
    };
    anchors
        .filter_map(|node| {
            let attrs = node.attributes.borrow();
            attrs
                .get("href")
                .and_then(|href| resolve(href, base))
        })
        .collect()
}

/// Scan inline scripts for path-like string literals used by client-side
/// routers, resolved against `base`.
#[must_use]
pub fn scan_inline_scripts(html: &str, base: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut routes = Vec::new();

    for script in document.select(&INLINE_SCRIPT_SELECTOR) {
        let source: String = script.text().collect();
        for captures in ROUTE_CONFIG_RE
            .captures_iter(&source)
            .chain(NAV_CALL_RE.captures_iter(&source))
        {
            let path = &captures[1];
            // Router templates with parameter segments cannot be fetched.
            if path.contains(':') || path.contains('*') {
                continue;
            }
            if let Some(resolved) = resolve(path, base)
                && seen.insert(resolved.clone())
            {
                routes.push(resolved);
            }
        }
    }

    routes
}

fn resolve(href: &str, base: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let url = match Url::parse(href) {
        Ok(u) => u,
        Err(url::ParseError::RelativeUrlWithoutBase) => base.join(href).ok()?,
        Err(_) => return None,
    };
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}
