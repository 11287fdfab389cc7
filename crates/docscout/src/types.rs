//! Core types for DocScout

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

/// Where a URL record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoverySource {
    Sitemap,
    Navigation,
    Crawl,
    ContentArea,
    RenderedFallback,
    Repository,
}

impl std::fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DiscoverySource::Sitemap => "sitemap",
            DiscoverySource::Navigation => "navigation",
            DiscoverySource::Crawl => "crawl",
            DiscoverySource::ContentArea => "content-area",
            DiscoverySource::RenderedFallback => "rendered-fallback",
            DiscoverySource::Repository => "repository",
        };
        f.write_str(name)
    }
}

/// A discovered page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct UrlRecord {
    /// Canonical absolute URL
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    pub source: DiscoverySource,
}

impl UrlRecord {
    pub fn new(url: impl Into<String>, source: DiscoverySource) -> Self {
        Self {
            url: url.into(),
            title: None,
            source,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        let title = title.trim();
        if !title.is_empty() {
            self.title = Some(title.to_string());
        }
        self
    }
}

/// Deduplicated set of URL records keyed by canonical URL.
///
/// The first record inserted for a URL wins; later duplicates are ignored.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Frontier {
    records: Vec<UrlRecord>,
    #[serde(skip)]
    seen: HashSet<String>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, returning false when the URL is already present
    pub fn insert(&mut self, record: UrlRecord) -> bool {
        if !self.seen.insert(record.url.clone()) {
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn contains(&self, url: &str) -> bool {
        self.seen.contains(url)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UrlRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[UrlRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<UrlRecord> {
        self.records
    }

    /// Keep the first `max` records
    pub fn truncate(&mut self, max: usize) {
        for dropped in self.records.drain(max.min(self.records.len())..) {
            self.seen.remove(&dropped.url);
        }
    }

    /// Keep only records satisfying the predicate
    pub fn retain(&mut self, mut keep: impl FnMut(&UrlRecord) -> bool) {
        let seen = &mut self.seen;
        self.records.retain(|r| {
            let k = keep(r);
            if !k {
                seen.remove(&r.url);
            }
            k
        });
    }
}

impl Extend<UrlRecord> for Frontier {
    fn extend<T: IntoIterator<Item = UrlRecord>>(&mut self, iter: T) {
        for record in iter {
            self.insert(record);
        }
    }
}

impl FromIterator<UrlRecord> for Frontier {
    fn from_iter<T: IntoIterator<Item = UrlRecord>>(iter: T) -> Self {
        let mut frontier = Frontier::new();
        frontier.extend(iter);
        frontier
    }
}

/// Host plus port, the unit scope rules compare against
pub fn host_key(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host.to_lowercase(), port),
        (Some(host), None) => host.to_lowercase(),
        _ => String::new(),
    }
}

/// Which URLs belong to the documentation being scraped.
///
/// Exclude always wins over include. An empty include list matches every
/// path on the base host. Patterns match when the path contains them or
/// starts with the pattern minus its trailing slash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ScopeRule {
    /// Host (with port when non-default)
    pub base_host: String,

    #[serde(default)]
    pub include: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,
}

impl ScopeRule {
    pub fn new(base_host: impl Into<String>) -> Self {
        Self {
            base_host: base_host.into(),
            ..Default::default()
        }
    }

    /// Build a rule for the host of `url`
    pub fn for_url(url: &Url) -> Self {
        Self::new(host_key(url))
    }

    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.include.push(pattern.into());
        self
    }

    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }

    /// Whether a URL is in scope
    pub fn matches(&self, url: &Url) -> bool {
        if host_key(url) != self.base_host {
            return false;
        }
        self.matches_path(url.path())
    }

    /// Same as [`matches`](Self::matches) for an unparsed URL; invalid URLs are out of scope
    pub fn matches_str(&self, url: &str) -> bool {
        Url::parse(url).map(|u| self.matches(&u)).unwrap_or(false)
    }

    /// Path-only half of the scope check
    pub fn matches_path(&self, path: &str) -> bool {
        let included = self.include.is_empty()
            || self.include.iter().any(|p| pattern_matches(p, path));
        included && !self.exclude.iter().any(|p| pattern_matches(p, path))
    }
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    path.contains(pattern) || path.starts_with(pattern.trim_end_matches('/'))
}

/// Content selector specification issued by inference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SelectorSpec {
    /// CSS selector for the content root
    pub content_selector: String,

    /// CSS selectors removed from the content root before conversion
    #[serde(default)]
    pub prune_selectors: Vec<String>,

    #[serde(default)]
    pub notes: String,
}

impl Default for SelectorSpec {
    fn default() -> Self {
        Self {
            content_selector: "body".to_string(),
            prune_selectors: Vec::new(),
            notes: String::new(),
        }
    }
}

impl SelectorSpec {
    /// Add prune selectors not already present, keeping the content root
    pub fn merged_with(&self, other: &SelectorSpec) -> SelectorSpec {
        let mut merged = self.clone();
        for selector in &other.prune_selectors {
            if !merged.prune_selectors.contains(selector) {
                merged.prune_selectors.push(selector.clone());
            }
        }
        if !other.notes.is_empty() {
            merged.notes = other.notes.clone();
        }
        merged
    }
}

/// How pages are fetched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum EngineMode {
    /// No script execution
    #[default]
    PlainFetch,
    /// Full browser rendering
    RenderedFetch,
}

impl std::fmt::Display for EngineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineMode::PlainFetch => write!(f, "plain-fetch"),
            EngineMode::RenderedFetch => write!(f, "rendered-fetch"),
        }
    }
}

/// Comparable measurements of one page preview
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PreviewMetrics {
    pub length: usize,
    pub headings: usize,
    pub code_blocks: usize,
    pub internal_links: usize,
}

/// Plain vs rendered comparison
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EngineMetrics {
    pub plain: PreviewMetrics,
    pub rendered: PreviewMetrics,
    /// |rendered - plain| / max(plain, 1)
    pub length_diff: f64,
}

/// Result of engine selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EngineDecision {
    pub mode: EngineMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<EngineMetrics>,

    pub reason: String,
}

/// One written page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ManifestEntry {
    pub url: String,
    /// Path relative to the run's output directory
    pub path: String,
    pub size_bytes: u64,
    pub headings: Vec<String>,
    /// SHA-256 of the written file, hex
    pub content_hash: String,
}

/// Everything written during one crawl pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Manifest {
    pub start_url: String,
    pub engine_mode: EngineMode,
    /// URLs attempted
    pub total_pages: usize,
    /// Files written
    pub total_files: usize,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(start_url: impl Into<String>, engine_mode: EngineMode) -> Self {
        Self {
            start_url: start_url.into(),
            engine_mode,
            total_pages: 0,
            total_files: 0,
            entries: Vec::new(),
        }
    }

    /// written / attempted, 0.0 for an empty pass
    pub fn success_rate(&self) -> f64 {
        if self.total_pages == 0 {
            return 0.0;
        }
        self.total_files as f64 / self.total_pages as f64
    }
}

/// Raw page kept from discovery for inference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidencePage {
    pub url: String,
    pub html: String,
}
