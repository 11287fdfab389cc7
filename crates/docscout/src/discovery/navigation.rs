//! Navigation discovery
//!
//! Links come from semantic navigation containers first, then from
//! navigation data embedded in inline scripts, then from the main content
//! area. Section pages found that way may be visited once more for their
//! own sub-navigation. A script-heavy, link-poor start page is rendered
//! and harvested as a last resort.

use super::{DiscoveryContext, DiscoveryStrategy};
use crate::canonical::first_segment;
use crate::error::ScrapeError;
use crate::render::render_once;
use crate::scoring::DOC_KEYWORDS;
use crate::types::{DiscoverySource, EngineMode, Frontier, UrlRecord};
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use std::sync::LazyLock;
use tracing::{debug, info};
use url::Url;

/// Containers whose links are site navigation
pub const NAV_SELECTORS: &[&str] = &[
    "nav",
    "aside",
    ".sidebar",
    "#sidebar",
    ".toc",
    "#toc",
    ".navigation",
    ".nav-menu",
    ".docs-nav",
    ".doc-sidebar",
    "[role='navigation']",
    ".menu",
    "#menu",
];

/// Main content regions, tried when navigation yields too little
pub const CONTENT_AREA_SELECTORS: &[&str] = &[
    "main",
    "article",
    ".content",
    "#content",
    ".documentation",
    ".markdown",
    ".md-content",
    "[role=\"main\"]",
];

const MIN_RESULTS: usize = 5;
const CONTENT_AREA_LINKS_PER_AREA: usize = 100;
const CONTENT_AREA_MAX_RESULTS: usize = 50;
const MAX_TITLE_CHARS: usize = 100;

/// Section hop only runs while the harvest is smaller than this
const SECTION_HOP_BELOW: usize = 50;

/// Path depth of a section landing page
const SECTION_MAX_SEGMENTS: usize = 2;

const SCRIPT_HEAVY_MIN: usize = 3;
const LINK_POOR_MAX: usize = 5;

/// Empty mount points left by client-side frameworks
const SPA_ROOTS: &[&str] = &["#root", "#__next", "#app", "#___gatsby", "#__nuxt"];

static NEXT_DATA_ASSIGN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"window\.__NEXT_DATA__\s*=\s*").expect("valid regex"));

static DOCUSAURUS_ASSIGN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"window\.__DOCUSAURUS_CONFIG__\s*=\s*").expect("valid regex"));

static PATH_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\{\s*"?(?:path|href)"?\s*:\s*"(/[^"\s]*)"\s*,\s*"?(?:label|title)"?\s*:\s*"([^"]*)""#,
    )
    .expect("valid regex")
});

static PATH_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r#"["'](/(?:{})(?:/[A-Za-z0-9_\-./]*)?)["']"#,
        DOC_KEYWORDS.join("|")
    ))
    .expect("valid regex")
});

static LINKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

static SCRIPTS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script").expect("valid selector"));

/// A link as found on a page: href and visible text
type RawLink = (String, String);

/// Navigation-based discovery
pub struct NavigationStrategy;

impl NavigationStrategy {
    pub fn new() -> Self {
        Self
    }

    /// Visit section landing pages and collect their navigation links
    async fn section_hop(&self, ctx: &DiscoveryContext, found: &mut Frontier) {
        let sections: Vec<String> = found
            .iter()
            .filter(|r| is_section_page(&r.url))
            .map(|r| r.url.clone())
            .take(ctx.limits.section_hop_pages)
            .collect();
        debug!(count = sections.len(), "Visiting section pages");

        for (i, section) in sections.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(ctx.limits.section_hop_pause).await;
            }
            let Some(html) = ctx.fetch_html(section).await else {
                continue;
            };
            let Ok(base) = Url::parse(section) else {
                continue;
            };
            admit_into(
                ctx,
                &base,
                nav_links(&html),
                DiscoverySource::Navigation,
                found,
                usize::MAX,
            );
        }
    }

    /// Render the start page and take every link it exposes
    async fn rendered_harvest(&self, ctx: &DiscoveryContext, found: &mut Frontier) {
        let Some(engine) = ctx.render.clone() else {
            return;
        };
        match render_once(engine, ctx.start_url.to_string(), None).await {
            Ok(html) => {
                let mut links = nav_links(&html);
                links.extend(content_area_links(&html));
                admit_into(
                    ctx,
                    &ctx.start_url,
                    links,
                    DiscoverySource::RenderedFallback,
                    found,
                    usize::MAX,
                );
            }
            Err(e) => debug!(error = %e, "Rendered link harvest failed"),
        }
    }
}

impl Default for NavigationStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoveryStrategy for NavigationStrategy {
    fn name(&self) -> &'static str {
        "navigation"
    }

    fn source(&self) -> DiscoverySource {
        DiscoverySource::Navigation
    }

    fn min_results(&self) -> usize {
        MIN_RESULTS
    }

    async fn discover(&self, ctx: &DiscoveryContext) -> Result<Vec<UrlRecord>, ScrapeError> {
        let html = match &ctx.start_html {
            Some(html) => html.clone(),
            None => match ctx.fetch_html(ctx.start_url.as_str()).await {
                Some(html) => html,
                None => return Ok(Vec::new()),
            },
        };
        let start = &ctx.start_url;
        let mut found = Frontier::new();

        admit_into(ctx, start, nav_links(&html), DiscoverySource::Navigation, &mut found, usize::MAX);
        debug!(urls = found.len(), "Navigation container links");

        if found.len() < MIN_RESULTS {
            admit_into(ctx, start, spa_links(&html), DiscoverySource::Navigation, &mut found, usize::MAX);
            debug!(urls = found.len(), "After embedded navigation data");
        }

        if found.len() < MIN_RESULTS {
            let before = found.len();
            admit_into(
                ctx,
                start,
                content_area_links(&html),
                DiscoverySource::ContentArea,
                &mut found,
                before + CONTENT_AREA_MAX_RESULTS,
            );
            debug!(urls = found.len(), "After content area links");
        }

        if ctx.limits.section_hop && !found.is_empty() && found.len() < SECTION_HOP_BELOW {
            self.section_hop(ctx, &mut found).await;
        }

        if found.len() < MIN_RESULTS
            && ctx.mode == EngineMode::PlainFetch
            && looks_client_rendered(&html)
        {
            info!("Start page is script-heavy and link-poor, harvesting rendered links");
            self.rendered_harvest(ctx, &mut found).await;
        }

        Ok(found.into_records())
    }
}

/// Admit raw links into the harvest, stopping once it holds `limit` records
fn admit_into(
    ctx: &DiscoveryContext,
    base: &Url,
    links: Vec<RawLink>,
    source: DiscoverySource,
    found: &mut Frontier,
    limit: usize,
) {
    for (href, text) in links {
        if found.len() >= limit {
            break;
        }
        if let Some(url) = ctx.admit(base, &href) {
            let title: String = text.chars().take(MAX_TITLE_CHARS).collect();
            found.insert(UrlRecord::new(url, source).with_title(title));
        }
    }
}

fn link_text(a: scraper::ElementRef) -> String {
    a.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Links inside navigation containers
pub(crate) fn nav_links(html: &str) -> Vec<RawLink> {
    let document = Html::parse_document(html);
    let mut links = Vec::new();
    for raw in NAV_SELECTORS {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        for container in document.select(&selector) {
            for a in container.select(&LINKS) {
                if let Some(href) = a.value().attr("href") {
                    links.push((href.to_string(), link_text(a)));
                }
            }
        }
    }
    links
}

/// Links inside the main content region, bounded per area
pub(crate) fn content_area_links(html: &str) -> Vec<RawLink> {
    let document = Html::parse_document(html);
    let mut links = Vec::new();
    for raw in CONTENT_AREA_SELECTORS {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        for area in document.select(&selector) {
            for a in area.select(&LINKS).take(CONTENT_AREA_LINKS_PER_AREA) {
                if let Some(href) = a.value().attr("href") {
                    links.push((href.to_string(), link_text(a)));
                }
            }
        }
    }
    links
}

/// Navigation embedded in inline scripts.
///
/// Known framework shapes come first, then generic `{path, label}`
/// objects, then bare documentation path literals.
pub(crate) fn spa_links(html: &str) -> Vec<RawLink> {
    let document = Html::parse_document(html);
    let mut links = Vec::new();
    let mut script_text = String::new();

    for script in document.select(&SCRIPTS) {
        let text: String = script.text().collect();
        if script.value().id() == Some("__NEXT_DATA__") {
            if let Some(data) = first_json_value(&text) {
                next_navigation(&data, &mut links);
            }
        }
        script_text.push_str(&text);
        script_text.push('\n');
    }

    if let Some(data) = json_after(&script_text, &NEXT_DATA_ASSIGN) {
        next_navigation(&data, &mut links);
    }
    if let Some(config) = json_after(&script_text, &DOCUSAURUS_ASSIGN) {
        if let Some(items) = config.pointer("/themeConfig/navbar/items") {
            docusaurus_items(items, &mut links);
        }
    }

    for caps in PATH_LABEL.captures_iter(&script_text) {
        links.push((caps[1].to_string(), caps[2].to_string()));
    }

    if links.len() < MIN_RESULTS {
        for caps in PATH_LITERAL.captures_iter(&script_text) {
            links.push((caps[1].to_string(), String::new()));
        }
    }
    links
}

fn first_json_value(text: &str) -> Option<Value> {
    serde_json::Deserializer::from_str(text.trim_start())
        .into_iter::<Value>()
        .next()?
        .ok()
}

fn json_after(text: &str, marker: &Regex) -> Option<Value> {
    let m = marker.find(text)?;
    first_json_value(&text[m.end()..])
}

fn next_navigation(data: &Value, links: &mut Vec<RawLink>) {
    let Some(items) = data
        .pointer("/props/pageProps/navigation")
        .and_then(Value::as_array)
    else {
        return;
    };
    for item in items {
        if let Some(url) = item.get("url").and_then(Value::as_str) {
            let title = item.get("title").and_then(Value::as_str).unwrap_or("Page");
            links.push((url.to_string(), title.to_string()));
        }
    }
}

fn docusaurus_items(items: &Value, links: &mut Vec<RawLink>) {
    let Some(items) = items.as_array() else {
        return;
    };
    for item in items {
        let target = item
            .get("to")
            .or_else(|| item.get("href"))
            .and_then(Value::as_str);
        if let Some(target) = target {
            let label = item.get("label").and_then(Value::as_str).unwrap_or("Page");
            links.push((target.to_string(), label.to_string()));
        }
        if let Some(children) = item.get("items") {
            docusaurus_items(children, links);
        }
    }
}

/// Shallow paths or paths naming a documentation section
fn is_section_page(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let segments = parsed.path().split('/').filter(|s| !s.is_empty()).count();
    if segments == 0 {
        return false;
    }
    segments <= SECTION_MAX_SEGMENTS
        || first_segment(parsed.path())
            .map(|s| DOC_KEYWORDS.iter().any(|k| s.to_lowercase().contains(k)))
            .unwrap_or(false)
}

/// Many scripts or an empty framework mount point, and few links
fn looks_client_rendered(html: &str) -> bool {
    let document = Html::parse_document(html);
    let scripts = document.select(&SCRIPTS).count();
    let links = document.select(&LINKS).count();
    let empty_mount = SPA_ROOTS.iter().any(|raw| {
        Selector::parse(raw)
            .ok()
            .and_then(|s| document.select(&s).next().map(|el| el.text().all(|t| t.trim().is_empty())))
            .unwrap_or(false)
    });
    (scripts >= SCRIPT_HEAVY_MIN || empty_mount) && links < LINK_POOR_MAX
}
