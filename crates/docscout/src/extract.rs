//! Content-root location and pruning
//!
//! The content root is found by walking a [`RootChain`]: the selector from
//! the active [`SelectorSpec`] first, then a fixed list of common roots.
//! Every candidate implements [`ContentRoot`], "find it or return nothing".
//! The chosen subtree is re-parsed, pruned, and converted to markdown.

use crate::convert::element_to_markdown;
use crate::types::SelectorSpec;
use regex::Regex;
use scraper::node::Element;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use tracing::debug;

/// Roots tried after the issued content selector
pub const FALLBACK_ROOTS: &[&str] = &["main", "article", ".content", "#content", "body"];

/// Always removed from the content root
pub const GENERIC_PRUNE: &[&str] = &[
    "script",
    "style",
    "noscript",
    "iframe",
    "frame",
    "aside",
    "button[aria-label*='copy']",
    "button[aria-label*='Copy']",
    ".copy-button",
    ".clipboard-button",
];

/// Class fragments that mark navigation chrome
const NAV_CLASS_HINTS: &[&str] = &[
    "sidebar",
    "sidenav",
    "side-nav",
    "toc",
    "table-of-contents",
    "navigation",
    "nav-menu",
    "menu-panel",
];

/// Link count at which fixed or nav-classed elements are treated as sidebars
pub const SIDEBAR_MIN_LINKS: usize = 8;

const MAX_TITLE_CHARS: usize = 200;

/// Headings kept per manifest entry
pub const MAX_HEADINGS: usize = 20;

static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));
static TITLE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid selector"));
static HEADING_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6}\s+.+)$").expect("valid regex"));

/// A strategy for finding the content root in a document
pub trait ContentRoot {
    /// Human-readable name for logs
    fn describe(&self) -> String;

    fn locate<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>>;
}

/// Content root found by CSS selector
pub struct SelectorRoot {
    source: String,
    selector: Option<Selector>,
}

impl SelectorRoot {
    pub fn new(selector: &str) -> Self {
        let parsed = Selector::parse(selector).ok();
        if parsed.is_none() {
            debug!(selector, "Ignoring unparseable content selector");
        }
        Self {
            source: selector.to_string(),
            selector: parsed,
        }
    }
}

impl ContentRoot for SelectorRoot {
    fn describe(&self) -> String {
        self.source.clone()
    }

    fn locate<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>> {
        document.select(self.selector.as_ref()?).next()
    }
}

/// Ordered content-root candidates; first hit wins
pub struct RootChain {
    candidates: Vec<Box<dyn ContentRoot>>,
}

impl RootChain {
    pub fn new() -> Self {
        Self {
            candidates: Vec::new(),
        }
    }

    /// Spec selector followed by [`FALLBACK_ROOTS`]
    pub fn for_spec(spec: &SelectorSpec) -> Self {
        let mut chain = Self::new();
        chain.push(Box::new(SelectorRoot::new(&spec.content_selector)));
        for fallback in FALLBACK_ROOTS {
            if *fallback != spec.content_selector {
                chain.push(Box::new(SelectorRoot::new(fallback)));
            }
        }
        chain
    }

    pub fn push(&mut self, candidate: Box<dyn ContentRoot>) {
        self.candidates.push(candidate);
    }

    pub fn locate<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>> {
        self.candidates.iter().find_map(|candidate| {
            let found = candidate.locate(document);
            if found.is_some() {
                debug!(root = %candidate.describe(), "Located content root");
            }
            found
        })
    }
}

impl Default for RootChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Locate, prune, and convert the content of a page. `None` when no root matches.
pub fn extract_markdown(html: &str, spec: &SelectorSpec) -> Option<String> {
    let document = Html::parse_document(html);
    let root = RootChain::for_spec(spec).locate(&document)?;
    let mut fragment = Html::parse_fragment(&root.html());
    let removed = prune(&mut fragment, &spec.prune_selectors);
    debug!(removed, "Pruned content root");
    Some(element_to_markdown(fragment.root_element()))
}

/// Remove prune-selector matches, [`GENERIC_PRUNE`] matches, and sidebars.
///
/// Returns the number of detached subtrees.
pub fn prune(fragment: &mut Html, prune_selectors: &[String]) -> usize {
    let top = fragment.root_element();
    let mut top_level = top.children().filter_map(ElementRef::wrap);
    // A single wrapper element is the content root itself and must survive.
    let protected = match (top_level.next(), top_level.next()) {
        (Some(only), None) => Some(only.id()),
        _ => None,
    };

    let mut doomed = Vec::new();
    let selectors = prune_selectors
        .iter()
        .map(String::as_str)
        .chain(GENERIC_PRUNE.iter().copied());
    for raw in selectors {
        match Selector::parse(raw) {
            Ok(selector) => doomed.extend(fragment.select(&selector).map(|el| el.id())),
            Err(_) => debug!(selector = raw, "Ignoring unparseable prune selector"),
        }
    }

    for node in top.descendants() {
        let Some(el) = ElementRef::wrap(node) else {
            continue;
        };
        if looks_like_sidebar(el.value()) && el.select(&LINK_SELECTOR).count() >= SIDEBAR_MIN_LINKS {
            doomed.push(el.id());
        }
    }

    doomed.retain(|id| Some(*id) != protected);
    doomed.dedup();
    let count = doomed.len();
    for id in doomed {
        if let Some(mut node) = fragment.tree.get_mut(id) {
            node.detach();
        }
    }
    count
}

/// Fixed/sticky positioned or carrying a navigation class
fn looks_like_sidebar(element: &Element) -> bool {
    let class = element.attr("class").unwrap_or("").to_lowercase();
    if class.contains("fixed") || class.contains("sticky") {
        return true;
    }
    let style: String = element
        .attr("style")
        .unwrap_or("")
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if style.contains("position:fixed") || style.contains("position:sticky") {
        return true;
    }
    class
        .split_whitespace()
        .any(|token| NAV_CLASS_HINTS.iter().any(|hint| token.contains(hint)))
}

/// Contents of the `<title>` tag
pub fn document_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let title = document.select(&TITLE_SELECTOR).next()?;
    let text = title.text().collect::<String>();
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

/// Page title: first markdown heading, then `<title>`, then the caller's fallback, then "Untitled"
pub fn page_title(markdown: &str, html: Option<&str>, fallback: Option<&str>) -> String {
    let title = heading_lines(markdown)
        .next()
        .map(|h| h.trim_start_matches('#').trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| html.and_then(document_title))
        .or_else(|| {
            fallback
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "Untitled".to_string());
    title.chars().take(MAX_TITLE_CHARS).collect()
}

/// Up to [`MAX_HEADINGS`] heading lines, outside code fences
pub fn extract_headings(markdown: &str) -> Vec<String> {
    heading_lines(markdown)
        .take(MAX_HEADINGS)
        .map(str::to_string)
        .collect()
}

fn heading_lines(markdown: &str) -> impl Iterator<Item = &str> {
    let mut in_fence = false;
    markdown.lines().filter(move |line| {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            return false;
        }
        !in_fence && HEADING_LINE.is_match(line)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(root: &str, prune: &[&str]) -> SelectorSpec {
        SelectorSpec {
            content_selector: root.to_string(),
            prune_selectors: prune.iter().map(|s| s.to_string()).collect(),
            notes: String::new(),
        }
    }

    fn sidebar_links(n: usize) -> String {
        (0..n)
            .map(|i| format!("<a href=\"/docs/p{i}\">Page {i}</a>"))
            .collect()
    }

    #[test]
    fn test_root_chain_prefers_spec_selector() {
        let html = "<html><body><main>Main text</main><div class=\"doc-body\">Doc text</div></body></html>";
        let md = extract_markdown(html, &spec(".doc-body", &[])).unwrap();
        assert_eq!(md, "Doc text");
    }

    #[test]
    fn test_root_chain_falls_back_in_order() {
        let html = "<html><body><nav>Menu</nav><article>Article text</article></body></html>";
        let md = extract_markdown(html, &spec("#missing", &[])).unwrap();
        assert_eq!(md, "Article text");

        let html = "<html><body><p>Only body</p></body></html>";
        let md = extract_markdown(html, &spec("#missing", &[])).unwrap();
        assert_eq!(md, "Only body");
    }

    #[test]
    fn test_invalid_selector_falls_back() {
        let html = "<html><body><main>Main text</main></body></html>";
        let md = extract_markdown(html, &spec("div[[[", &["p:::bad"])).unwrap();
        assert_eq!(md, "Main text");
    }

    #[test]
    fn test_prune_declared_and_generic() {
        let html = r#"<html><body><main>
            <div class="breadcrumbs">Home / Docs</div>
            <h1>Intro</h1>
            <aside>Related</aside>
            <button class="copy-button">Copy</button>
            <p>Real content</p>
            <script>var x = 1;</script>
        </main></body></html>"#;
        let md = extract_markdown(html, &spec("main", &[".breadcrumbs"])).unwrap();
        assert!(md.contains("# Intro"));
        assert!(md.contains("Real content"));
        assert!(!md.contains("Home / Docs"));
        assert!(!md.contains("Related"));
        assert!(!md.contains("Copy"));
        assert!(!md.contains("var x"));
    }

    #[test]
    fn test_sidebar_heuristic_needs_enough_links() {
        let html = format!(
            r#"<html><body><main>
            <div class="doc-sidebar">{}</div>
            <div class="toc-mini">{}</div>
            <p>Body text</p>
            </main></body></html>"#,
            sidebar_links(8),
            sidebar_links(3)
        );
        let md = extract_markdown(&html, &spec("main", &[])).unwrap();
        assert!(md.contains("Body text"));
        assert!(!md.contains("Page 7"));
        // the small toc survives
        assert!(md.contains("Page 2"));
    }

    #[test]
    fn test_sidebar_heuristic_positioned() {
        let html = format!(
            r#"<html><body><main>
            <div style="position: sticky; top: 0">{}</div>
            <p>Body text</p>
            </main></body></html>"#,
            sidebar_links(10)
        );
        let md = extract_markdown(&html, &spec("main", &[])).unwrap();
        assert!(!md.contains("Page 9"));
        assert!(md.contains("Body text"));
    }

    #[test]
    fn test_content_root_is_never_pruned() {
        let html = format!(
            r#"<html><body><div class="docs-sidebar-layout">{}<p>Body text</p></div></body></html>"#,
            sidebar_links(9)
        );
        let md = extract_markdown(&html, &spec(".docs-sidebar-layout", &[])).unwrap();
        assert!(md.contains("Body text"));
    }

    #[test]
    fn test_page_title_precedence() {
        assert_eq!(page_title("intro\n\n## Setup", None, None), "Setup");
        assert_eq!(
            page_title("no headings", Some("<title> Site  Title </title>"), Some("Fallback")),
            "Site Title"
        );
        assert_eq!(page_title("no headings", None, Some("Fallback")), "Fallback");
        assert_eq!(page_title("no headings", None, None), "Untitled");
        assert_eq!(page_title(&format!("# {}", "x".repeat(300)), None, None).len(), 200);
    }

    #[test]
    fn test_extract_headings_skips_code() {
        let md = "# One\n\n```bash\n# not a heading\n```\n\n## Two";
        assert_eq!(extract_headings(md), vec!["# One", "## Two"]);

        let many: String = (0..30).map(|i| format!("## H{i}\n\n")).collect();
        assert_eq!(extract_headings(&many).len(), MAX_HEADINGS);
    }
}
