//! Engine selection: plain fetch or rendered fetch
//!
//! The start page is fetched both ways, reduced to a boilerplate-free
//! markdown preview, and compared. Rendering wins when it reveals
//! substantially more content, structure, or links.

use crate::canonical::canonicalize;
use crate::client::PageClient;
use crate::convert::element_to_markdown;
use crate::render::{render_once, RenderEngine};
use crate::types::{host_key, EngineDecision, EngineMetrics, EngineMode, PreviewMetrics};
use scraper::{Html, Selector};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};
use url::Url;

/// Relative length difference above which rendered content counts as richer
pub const DEFAULT_LENGTH_THRESHOLD: f64 = 0.3;

const HEADING_DELTA: usize = 3;
const CODE_BLOCK_DELTA: usize = 2;
const SPA_PLAIN_MAX_LINKS: usize = 5;
const SPA_RENDERED_MIN_LINKS: usize = 10;

/// Removed before measuring a preview
const PREVIEW_STRIP: &[&str] = &[
    "script",
    "style",
    "noscript",
    "iframe",
    "svg",
    "nav",
    "header",
    "footer",
    ".cookie-banner",
    ".newsletter",
];

static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

/// Markdown preview of a page with boilerplate containers removed
pub fn preview_markdown(html: &str) -> String {
    let mut document = Html::parse_document(html);
    let mut doomed = Vec::new();
    for raw in PREVIEW_STRIP {
        if let Ok(selector) = Selector::parse(raw) {
            doomed.extend(document.select(&selector).map(|el| el.id()));
        }
    }
    for id in doomed {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }
    element_to_markdown(document.root_element())
}

/// Same-host links, excluding anchors and non-http schemes
pub fn count_internal_links(html: &str, base: &Url) -> usize {
    let document = Html::parse_document(html);
    let host = host_key(base);
    document
        .select(&LINK_SELECTOR)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| canonicalize(base, href))
        .filter(|u| Url::parse(u).map(|p| host_key(&p) == host).unwrap_or(false))
        .count()
}

/// Measure a page for comparison
pub fn measure(html: &str, base: &Url) -> PreviewMetrics {
    let preview = preview_markdown(html);
    let mut headings = 0;
    let mut fences = 0;
    for line in preview.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            fences += 1;
        } else if is_heading_line(line) {
            headings += 1;
        }
    }
    PreviewMetrics {
        length: preview.chars().count(),
        headings,
        code_blocks: fences / 2,
        internal_links: count_internal_links(html, base),
    }
}

fn is_heading_line(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes)
        && line[hashes..]
            .chars()
            .next()
            .map(char::is_whitespace)
            .unwrap_or(false)
}

/// Compare plain and rendered previews
pub fn decide(plain: PreviewMetrics, rendered: PreviewMetrics, threshold: f64) -> EngineDecision {
    let length_diff =
        plain.length.abs_diff(rendered.length) as f64 / plain.length.max(1) as f64;

    let mut reasons = Vec::new();
    if length_diff > threshold && rendered.length > plain.length {
        reasons.push(format!(
            "rendered content {:.0}% longer",
            length_diff * 100.0
        ));
    }
    let heading_delta = rendered.headings.saturating_sub(plain.headings);
    if heading_delta > HEADING_DELTA {
        reasons.push(format!("rendered has {} more headings", heading_delta));
    }
    let code_delta = rendered.code_blocks.saturating_sub(plain.code_blocks);
    if code_delta > CODE_BLOCK_DELTA {
        reasons.push(format!("rendered has {} more code blocks", code_delta));
    }
    if plain.internal_links < SPA_PLAIN_MAX_LINKS
        && rendered.internal_links > SPA_RENDERED_MIN_LINKS
    {
        reasons.push(format!(
            "plain fetch found {} internal links vs {} rendered (client-side navigation)",
            plain.internal_links, rendered.internal_links
        ));
    }

    let metrics = Some(EngineMetrics {
        plain,
        rendered,
        length_diff,
    });
    if reasons.is_empty() {
        EngineDecision {
            mode: EngineMode::PlainFetch,
            metrics,
            reason: "plain fetch content sufficient".to_string(),
        }
    } else {
        EngineDecision {
            mode: EngineMode::RenderedFetch,
            metrics,
            reason: reasons.join("; "),
        }
    }
}

/// Chooses the engine mode for a site
pub struct EngineSelector {
    client: PageClient,
    render: Option<Arc<dyn RenderEngine>>,
    threshold: f64,
}

impl EngineSelector {
    pub fn new(client: PageClient, render: Option<Arc<dyn RenderEngine>>) -> Self {
        Self {
            client,
            render,
            threshold: DEFAULT_LENGTH_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Fetch the start page both ways and decide. One attempt each, no retries.
    pub async fn select(&self, start_url: &Url) -> EngineDecision {
        let Some(engine) = self.render.clone() else {
            return EngineDecision {
                mode: EngineMode::PlainFetch,
                metrics: None,
                reason: "rendering engine not available".to_string(),
            };
        };

        let plain_html = match self.client.get_page(start_url.as_str()).await {
            Ok(page) => page.body,
            Err(e) => {
                warn!(url = %start_url, error = %e, "Plain fetch failed during engine selection");
                String::new()
            }
        };

        let rendered_html = match render_once(engine, start_url.to_string(), None).await {
            Ok(html) => html,
            Err(e) => {
                warn!(url = %start_url, error = %e, "Rendered fetch failed during engine selection");
                return EngineDecision {
                    mode: EngineMode::PlainFetch,
                    metrics: None,
                    reason: format!("rendered fetch failed: {}", e),
                };
            }
        };

        let plain = measure(&plain_html, start_url);
        let rendered = measure(&rendered_html, start_url);
        debug!(?plain, ?rendered, "Engine metrics");
        let decision = decide(plain, rendered, self.threshold);
        info!(mode = %decision.mode, reason = %decision.reason, "Engine selected");
        decision
    }
}
