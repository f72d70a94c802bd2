//! JavaScript evaluation scripts used by the Chromium session.
//!
//! This module contains the JavaScript code injected into pages for link
//! harvesting, clickable enumeration, readiness probing, and SPA change
//! detection.

/// Extract absolute http(s) hrefs from the rendered DOM, deduplicated.
pub const LINKS_SCRIPT: &str = r"
    (() => {
        const seen = new Set();
        const urls = [];
        document.querySelectorAll('a[href]').forEach(link => {
            const href = link.getAttribute('href');
            if (!href) return;
            try {
                const absolute = new URL(href, window.location.href);
                if (!['http:', 'https:'].includes(absolute.protocol)) return;
                if (!seen.has(absolute.href)) {
                    seen.add(absolute.href);
                    urls.push(absolute.href);
                }
            } catch (e) {
                // unparsable href, skip
            }
        });
        return urls;
    })()
";

/// Tag navigation affordances with a persistent identifier and return
/// `{ id, text }` handles for them, in DOM order.
///
/// An element keeps the `data-sitescan-id` it was given the first time it
/// was seen, so the handle stays stable across re-enumerations even after
/// activations mutate, insert, or reorder matched elements. Only elements
/// seen for the first time consume a fresh id from the per-document
/// counter.
///
/// The selector set targets SPA navigation: menu items, nav list entries,
/// non-submit buttons, ARIA button/menuitem roles, and elements wired with
/// click handlers. Anchors with real hrefs are excluded here; the link
/// harvest already covers them.
pub const CLICKABLES_SCRIPT: &str = r#"
    (() => {
        const selector = [
            'nav li',
            '.nav-item',
            '.menu-item',
            '[role="menuitem"]',
            'button:not([type="submit"])',
            '[role="button"]',
            '[onclick]',
            '[data-action]',
            '[ng-click]',
            '[v-on\\:click]'
        ].join(', ');

        if (window.__sitescanNextHandle === undefined) {
            window.__sitescanNextHandle = 0;
        }
        const handles = [];
        document.querySelectorAll(selector).forEach(el => {
            if (el.closest('a[href]')) return;
            let id = el.getAttribute('data-sitescan-id');
            if (id === null) {
                id = String(window.__sitescanNextHandle);
                window.__sitescanNextHandle += 1;
                el.setAttribute('data-sitescan-id', id);
            }
            handles.push({
                id: Number(id),
                text: (el.textContent || '').trim().slice(0, 80)
            });
        });
        return handles;
    })()
"#;

/// Heuristic loader/spinner selectors that must disappear before an SPA
/// page is considered ready.
pub const LOADER_VISIBLE_SCRIPT: &str = r#"
    (() => {
        const selectors = [
            '.loader', '.loading', '.spinner', '.preloader',
            '#loader', '#loading', '[class*="skeleton"]', '[aria-busy="true"]'
        ];
        for (const sel of selectors) {
            for (const el of document.querySelectorAll(sel)) {
                const style = window.getComputedStyle(el);
                if (style.display !== 'none' && style.visibility !== 'hidden') {
                    return true;
                }
            }
        }
        return false;
    })()
"#;

/// Install a mutation counter on `window` (idempotent). Readable through
/// [`MUTATION_COUNT_SCRIPT`] to detect SPA re-renders and activation
/// quiescence.
pub const INSTALL_MUTATION_OBSERVER_SCRIPT: &str = r"
    (() => {
        if (window.__sitescanMutations !== undefined) return true;
        window.__sitescanMutations = 0;
        const observer = new MutationObserver(records => {
            window.__sitescanMutations += records.length;
        });
        observer.observe(document.documentElement, {
            childList: true,
            subtree: true,
            characterData: true,
            attributes: true
        });
        return true;
    })()
";

/// Current mutation count, 0 when the observer is not installed.
pub const MUTATION_COUNT_SCRIPT: &str = r"
    (() => window.__sitescanMutations || 0)()
";

/// Visible body text, the input of the SPA content hash.
pub const BODY_TEXT_SCRIPT: &str = r"
    (() => document.body ? document.body.innerText : '')()
";

/// `document.readyState === 'complete'`.
pub const DOCUMENT_READY_SCRIPT: &str = r"
    (() => document.readyState === 'complete')()
";
