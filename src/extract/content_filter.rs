//! Page content filtering.
//!
//! Reduces rendered HTML to the text that should be searched for keywords,
//! removing boilerplate element classes (headers, menus, footers, sidebars)
//! according to include flags, plus any custom selectors. Pure function of
//! the input HTML.

use kuchiki::traits::TendrilSink;
use log::debug;

const HEADER_SELECTORS: &str = "header, .header, #header, .site-header";
const MENU_SELECTORS: &str = "nav, .nav, .menu, .navbar, [role=\"navigation\"]";
const FOOTER_SELECTORS: &str = "footer, .footer, #footer, .site-footer";
const SIDEBAR_SELECTORS: &str = "aside, .sidebar, #sidebar, .side-nav";

/// Declarative filter configuration. The default excludes all boilerplate
/// classes; flip an `include_*` flag to keep that class in the text.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    pub include_headers: bool,
    pub include_menus: bool,
    pub include_footers: bool,
    pub include_sidebars: bool,
    /// Extra CSS selectors to remove unconditionally.
    pub custom_excluded: Vec<String>,
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self {
            include_headers: false,
            include_menus: false,
            include_footers: false,
            include_sidebars: false,
            custom_excluded: Vec::new(),
        }
    }
}

impl ContentFilter {
    /// Extract filtered text from rendered HTML.
    ///
    /// Script and style subtrees are always removed; the boilerplate
    /// classes follow the include flags. Whitespace is normalized to single
    /// spaces within lines, with paragraph structure preserved as double
    /// newlines so sentence splitting downstream sees block boundaries.
    #[must_use]
    pub fn filter(&self, html: &str) -> String {
        let document = kuchiki::parse_html().one(html);

        detach_all(&document, "script, style, noscript, template");
        if !self.include_headers {
            detach_all(&document, HEADER_SELECTORS);
        }
        if !self.include_menus {
            detach_all(&document, MENU_SELECTORS);
        }
        if !self.include_footers {
            detach_all(&document, FOOTER_SELECTORS);
        }
        if !self.include_sidebars {
            detach_all(&document, SIDEBAR_SELECTORS);
        }
        for selector in &self.custom_excluded {
            detach_all(&document, selector);
        }

        let body_text = match document.select_first("body") {
            Ok(body) => block_text(body.as_node()),
            Err(()) => block_text(&document),
        };
        collapse_blank_lines(&body_text)
    }
}

fn detach_all(document: &kuchiki::NodeRef, selectors: &str) {
    let Ok(matches) = document.select(selectors) else {
        debug!("invalid filter selector skipped: {selectors}");
        return;
    };
    let nodes: Vec<_> = matches.map(|m| m.as_node().clone()).collect();
    for node in nodes {
        node.detach();
    }
}

/// Collect text, inserting paragraph breaks at block element boundaries so
/// headings and paragraphs do not run together into one pseudo-sentence.
fn block_text(node: &kuchiki::NodeRef) -> String {
    const BLOCK_TAGS: &[&str] = &[
        "p", "div", "section", "article", "li", "br", "tr", "h1", "h2", "h3", "h4", "h5", "h6",
        "blockquote", "pre",
    ];

    let mut out = String::new();
    for descendant in node.inclusive_descendants() {
        if let Some(text) = descendant.as_text() {
            out.push_str(&text.borrow());
        } else if let Some(element) = descendant.as_element()
            && BLOCK_TAGS.contains(&element.name.local.as_ref())
        {
            out.push_str("\n\n");
        }
    }
    out
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for block in text.split("\n\n") {
        let collapsed = block.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&collapsed);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <header>Site Title</header>
          <nav><ul><li>Home</li><li>Docs</li></ul></nav>
          <main><p>Real content here.</p><p>Second paragraph.</p></main>
          <aside>Related links</aside>
          <footer>Copyright notice</footer>
          <script>var tracked = true;</script>
        </body></html>
    "#;

    #[test]
    fn default_filter_strips_boilerplate() {
        let text = ContentFilter::default().filter(PAGE);
        assert!(text.contains("Real content here."));
        assert!(text.contains("Second paragraph."));
        assert!(!text.contains("Site Title"));
        assert!(!text.contains("Home"));
        assert!(!text.contains("Related links"));
        assert!(!text.contains("Copyright"));
        assert!(!text.contains("tracked"));
    }

    #[test]
    fn include_flags_keep_classes() {
        let filter = ContentFilter {
            include_footers: true,
            ..ContentFilter::default()
        };
        let text = filter.filter(PAGE);
        assert!(text.contains("Copyright notice"));
        assert!(!text.contains("Site Title"));
    }

    #[test]
    fn custom_selectors_removed() {
        let filter = ContentFilter {
            custom_excluded: vec![".ad".to_string()],
            ..ContentFilter::default()
        };
        let text = filter.filter(r#"<body><p>Keep</p><div class="ad">Buy now</div></body>"#);
        assert!(text.contains("Keep"));
        assert!(!text.contains("Buy now"));
    }

    #[test]
    fn paragraphs_stay_separated() {
        let text = ContentFilter::default()
            .filter("<body><p>One sentence</p><p>Two sentence</p></body>");
        assert!(text.contains("One sentence\n\nTwo sentence"));
    }

    #[test]
    fn filtering_is_deterministic() {
        let filter = ContentFilter::default();
        assert_eq!(filter.filter(PAGE), filter.filter(PAGE));
    }
}
