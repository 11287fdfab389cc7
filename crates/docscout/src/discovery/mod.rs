//! URL discovery
//!
//! Design: each strategy turns a start URL into candidate URL records.
//! [`DiscoveryResolver`] tries them in registration order and keeps the
//! first whose admitted results reach that strategy's threshold.

mod crawl;
mod navigation;
mod repository;
mod scope;
mod sitemap;

pub use crawl::CrawlStrategy;
pub use navigation::{NavigationStrategy, CONTENT_AREA_SELECTORS, NAV_SELECTORS};
pub use repository::RepositoryStrategy;
pub use scope::infer_scope;
pub use sitemap::{title_from_path, SitemapStrategy};

use crate::canonical::{canonicalize, canonicalize_url, detect_locale, is_doc_page, locale_allows};
use crate::client::PageClient;
use crate::error::ScrapeError;
use crate::render::{render_once, RenderEngine};
use crate::types::{DiscoverySource, EngineMode, EvidencePage, Frontier, ScopeRule, UrlRecord};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::{Position, Url};

/// Bounds on discovery work
#[derive(Debug, Clone)]
pub struct DiscoveryLimits {
    /// Global cap on URLs read from sitemaps
    pub sitemap_max_urls: usize,
    /// Maximum sitemap index nesting
    pub sitemap_max_depth: usize,
    /// Follow discovered section pages for their sub-navigation
    pub section_hop: bool,
    pub section_hop_pages: usize,
    /// Pause between section page fetches
    pub section_hop_pause: Duration,
    /// Pages fetched by the crawl fallback
    pub crawl_budget: usize,
}

impl Default for DiscoveryLimits {
    fn default() -> Self {
        Self {
            sitemap_max_urls: 5000,
            sitemap_max_depth: 3,
            section_hop: true,
            section_hop_pages: 10,
            section_hop_pause: Duration::from_millis(500),
            crawl_budget: 100,
        }
    }
}

/// Everything a strategy may consult
pub struct DiscoveryContext {
    pub client: PageClient,
    pub render: Option<Arc<dyn RenderEngine>>,
    pub start_url: Url,
    pub mode: EngineMode,
    /// Start page as fetched under `mode`, once the resolver has needed it
    pub start_html: Option<String>,
    pub scope: ScopeRule,
    pub target_locale: Option<String>,
    pub limits: DiscoveryLimits,
}

impl DiscoveryContext {
    pub fn new(client: PageClient, start_url: Url) -> Self {
        let scope = ScopeRule::for_url(&start_url);
        Self {
            client,
            render: None,
            start_url,
            mode: EngineMode::PlainFetch,
            start_html: None,
            scope,
            target_locale: None,
            limits: DiscoveryLimits::default(),
        }
    }

    pub fn with_render(mut self, render: Option<Arc<dyn RenderEngine>>) -> Self {
        self.render = render;
        self
    }

    pub fn with_mode(mut self, mode: EngineMode) -> Self {
        self.mode = mode;
        self
    }

    /// Target locale; `None` disables locale filtering
    pub fn with_locale(mut self, locale: Option<String>) -> Self {
        self.target_locale = locale;
        self
    }

    /// Use the locale detected from the start URL
    pub fn with_detected_locale(mut self) -> Self {
        self.target_locale = detect_locale(&self.start_url);
        self
    }

    pub fn with_limits(mut self, limits: DiscoveryLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Preset scope, skipping inference from the start page
    pub fn with_scope(mut self, scope: ScopeRule) -> Self {
        self.scope = scope;
        self
    }

    /// `scheme://host[:port]` of the start URL
    pub fn origin(&self) -> &str {
        &self.start_url[..Position::BeforePath]
    }

    pub fn locale_ok(&self, url: &Url) -> bool {
        match &self.target_locale {
            Some(target) => locale_allows(url, target),
            None => true,
        }
    }

    /// Canonicalize a link found on `base` and keep it only if it is an
    /// in-scope, in-locale documentation page
    pub fn admit(&self, base: &Url, href: &str) -> Option<String> {
        let canonical = canonicalize(base, href)?;
        let parsed = Url::parse(&canonical).ok()?;
        (self.scope.matches(&parsed) && is_doc_page(&parsed) && self.locale_ok(&parsed))
            .then_some(canonical)
    }

    /// Plain GET of an HTML page; failures are logged and swallowed
    pub async fn fetch_html(&self, url: &str) -> Option<String> {
        match self.client.get_page(url).await {
            Ok(page) => Some(page.body),
            Err(e) => {
                debug!(url, error = %e, "Discovery fetch failed");
                None
            }
        }
    }
}

/// A way of enumerating a site's pages
#[async_trait]
pub trait DiscoveryStrategy: Send + Sync {
    /// Unique identifier for this strategy (for logging and reports)
    fn name(&self) -> &'static str;

    fn source(&self) -> DiscoverySource;

    /// Fewest admitted URLs for this strategy's result to be accepted
    fn min_results(&self) -> usize;

    /// Returns true if this strategy applies to the start URL
    fn matches(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
    }

    /// Scope replacing the one inferred from the start page. Strategies
    /// that emit URLs on another host return one and never need the start
    /// page fetched.
    fn scope_for(&self, _start_url: &Url) -> Option<ScopeRule> {
        None
    }

    async fn discover(&self, ctx: &DiscoveryContext) -> Result<Vec<UrlRecord>, ScrapeError>;
}

/// Output of discovery
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryResult {
    pub frontier: Frontier,
    pub scope: ScopeRule,
    /// Name of the strategy whose result was kept
    pub strategy: String,
    pub source: DiscoverySource,
    pub target_locale: Option<String>,
    #[serde(skip)]
    pub evidence: Vec<EvidencePage>,
}

/// Ordered strategy chain
pub struct DiscoveryResolver {
    strategies: Vec<Box<dyn DiscoveryStrategy>>,
}

impl Default for DiscoveryResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Create a resolver with the default chain:
    /// repository, sitemap, navigation, crawl
    pub fn with_defaults() -> Self {
        let mut resolver = Self::new();
        resolver.register(Box::new(RepositoryStrategy::new()));
        resolver.register(Box::new(SitemapStrategy::new()));
        resolver.register(Box::new(NavigationStrategy::new()));
        resolver.register(Box::new(CrawlStrategy::new()));
        resolver
    }

    /// Register a strategy; strategies run in registration order
    pub fn register(&mut self, strategy: Box<dyn DiscoveryStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run the chain.
    ///
    /// Strategy failures are swallowed. When no strategy reaches its
    /// threshold the largest non-empty result is kept; an empty frontier
    /// is the only error.
    #[instrument(skip(self, ctx), fields(start_url = %ctx.start_url))]
    pub async fn resolve(&self, mut ctx: DiscoveryContext) -> Result<DiscoveryResult, ScrapeError> {
        let mut evidence = Vec::new();
        let mut prepared = false;
        let mut best: Option<DiscoveryResult> = None;

        for strategy in &self.strategies {
            if !strategy.matches(&ctx.start_url) {
                continue;
            }
            let scope_override = strategy.scope_for(&ctx.start_url);
            if scope_override.is_none() && !prepared {
                prepare(&mut ctx, &mut evidence).await;
                prepared = true;
            }
            let scope = scope_override.unwrap_or_else(|| ctx.scope.clone());

            debug!(strategy = strategy.name(), "Trying discovery strategy");
            let records = match strategy.discover(&ctx).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "Discovery strategy failed");
                    continue;
                }
            };
            let raw = records.len();
            let frontier = admit_records(records, &scope, ctx.target_locale.as_deref());
            info!(
                strategy = strategy.name(),
                raw,
                admitted = frontier.len(),
                "Discovery strategy finished"
            );

            let result = DiscoveryResult {
                frontier,
                scope,
                strategy: strategy.name().to_string(),
                source: strategy.source(),
                target_locale: ctx.target_locale.clone(),
                evidence: evidence.clone(),
            };
            if result.frontier.len() >= strategy.min_results() && !result.frontier.is_empty() {
                return Ok(result);
            }
            if best
                .as_ref()
                .map(|b| result.frontier.len() > b.frontier.len())
                .unwrap_or(true)
            {
                best = Some(result);
            }
        }

        match best {
            Some(result) if !result.frontier.is_empty() => {
                info!(
                    strategy = %result.strategy,
                    urls = result.frontier.len(),
                    "No strategy reached its threshold, keeping largest result"
                );
                Ok(result)
            }
            _ => Err(ScrapeError::NoUrlsDiscovered(ctx.start_url.to_string())),
        }
    }
}

/// Fetch the start page under the engine mode and infer scope from it
async fn prepare(ctx: &mut DiscoveryContext, evidence: &mut Vec<EvidencePage>) {
    let url = ctx.start_url.to_string();
    let mut html = None;
    if ctx.mode == EngineMode::RenderedFetch {
        if let Some(engine) = ctx.render.clone() {
            match render_once(engine, url.clone(), None).await {
                Ok(rendered) => html = Some(rendered),
                Err(e) => warn!(url = %url, error = %e, "Rendered start page fetch failed"),
            }
        }
    }
    if html.is_none() {
        html = ctx.fetch_html(&url).await;
    }

    if ctx.scope.include.is_empty() && ctx.scope.exclude.is_empty() {
        ctx.scope = infer_scope(&ctx.start_url, html.as_deref());
    }
    debug!(include = ?ctx.scope.include, "Discovery scope");
    if let Some(html) = &html {
        evidence.push(EvidencePage {
            url: url.clone(),
            html: html.clone(),
        });
    }
    ctx.start_html = html;
}

/// Canonicalize records and drop those outside scope, locale, or the document filter
fn admit_records(records: Vec<UrlRecord>, scope: &ScopeRule, locale: Option<&str>) -> Frontier {
    records
        .into_iter()
        .filter_map(|mut record| {
            let canonical = canonicalize_url(&record.url)?;
            let parsed = Url::parse(&canonical).ok()?;
            let locale_ok = locale.map(|l| locale_allows(&parsed, l)).unwrap_or(true);
            if !(scope.matches(&parsed) && is_doc_page(&parsed) && locale_ok) {
                return None;
            }
            record.url = canonical;
            Some(record)
        })
        .collect()
}
