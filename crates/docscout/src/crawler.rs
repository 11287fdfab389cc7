//! Scoped crawler
//!
//! Fetches every frontier URL, extracts and cleans its content, and writes
//! one markdown file per page under `md/raw/`, replacing whatever an
//! earlier pass left there. Plain-fetch passes run a bounded worker pool;
//! rendered passes run one page at a time on a single browser session.

use crate::clean::clean_markdown;
use crate::client::PageClient;
use crate::config::DEFAULT_WORKERS;
use crate::convert::is_html;
use crate::error::ScrapeError;
use crate::extract::{extract_headings, extract_markdown, page_title};
use crate::render::{render_page, RenderEngine, RenderSession};
use crate::types::{EngineMode, Manifest, ManifestEntry, SelectorSpec, UrlRecord};
use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Output subdirectory for page files
pub const RAW_DIR: &str = "md/raw";

/// Extensions dropped from the URL path before it becomes a file name
const STRIPPED_EXTENSIONS: &[&str] = &[".html", ".htm", ".md", ".mdx", ".php", ".aspx", ".txt"];

static UNSAFE_PATH_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w/\-.]").expect("valid regex"));

/// One crawl over a frontier
#[async_trait]
pub trait CrawlPass: Send + Sync {
    async fn run(
        &self,
        records: &[UrlRecord],
        spec: &SelectorSpec,
        mode: EngineMode,
    ) -> Result<Manifest, ScrapeError>;
}

/// A page ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDocument {
    pub title: String,
    /// Cleaned markdown body
    pub body: String,
}

impl PageDocument {
    /// File contents: title line, source line, body
    pub fn render(&self, url: &str) -> String {
        let body = strip_title_heading(&self.body, &self.title);
        format!("# {}\n\nSource: {}\n\n{}\n", self.title, url, body.trim())
    }
}

/// Extract, clean, and title one fetched page. `None` when the page has no
/// content root or too little text.
pub fn process_page(
    record: &UrlRecord,
    body: &str,
    content_type: &Option<String>,
    spec: &SelectorSpec,
    min_chars: usize,
) -> Option<PageDocument> {
    let (markdown, html) = if is_html(content_type, body) {
        (extract_markdown(body, spec)?, Some(body))
    } else {
        // markdown and plain text are already converted
        (body.to_string(), None)
    };

    let cleaned = clean_markdown(&markdown);
    let cleaned = cleaned.trim();
    if cleaned.chars().count() < min_chars {
        debug!(url = %record.url, chars = cleaned.chars().count(), "Page too short");
        return None;
    }

    Some(PageDocument {
        title: page_title(cleaned, html, record.title.as_deref()),
        body: cleaned.to_string(),
    })
}

/// Relative output path for a URL: `md/raw/<slug>.md`
pub fn slug_path(url: &str) -> String {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    let mut path = path.trim_matches('/').to_string();
    if path.is_empty() {
        path = "index".to_string();
    }
    let lower = path.to_lowercase();
    if let Some(ext) = STRIPPED_EXTENSIONS.iter().find(|ext| lower.ends_with(*ext)) {
        path.truncate(path.len() - ext.len());
    }
    let path = UNSAFE_PATH_CHARS.replace_all(&path, "_");
    let segments: Vec<&str> = path
        .split('/')
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .collect();
    let slug = if segments.is_empty() {
        "index".to_string()
    } else {
        segments.join("/")
    };
    format!("{}/{}.md", RAW_DIR, slug)
}

/// Output paths taken during one pass.
///
/// Distinct URLs can slug to the same file (`/intro.html` and `/intro`);
/// later claimants get a suffix from their URL hash.
#[derive(Debug, Default)]
pub struct PathClaims {
    claimed: HashSet<String>,
}

impl PathClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an output path for `url`
    pub fn claim(&mut self, url: &str) -> String {
        let path = slug_path(url);
        if self.claimed.insert(path.clone()) {
            return path;
        }
        let stem = path.strip_suffix(".md").unwrap_or(&path).to_string();
        let digest = format!("{:x}", Sha256::digest(url.as_bytes()));
        for len in [8, 16, 64] {
            let candidate = format!("{}-{}.md", stem, &digest[..len]);
            if self.claimed.insert(candidate.clone()) {
                return candidate;
            }
        }
        // same URL twice
        let mut n = 2;
        loop {
            let candidate = format!("{}-{}.md", stem, n);
            if self.claimed.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}

/// Drop a leading heading that repeats the title
fn strip_title_heading<'a>(body: &'a str, title: &str) -> &'a str {
    let trimmed = body.trim_start();
    let Some(first) = trimmed.lines().next() else {
        return body;
    };
    if first.starts_with('#') && first.trim_start_matches('#').trim() == title {
        trimmed[first.len()..].trim_start()
    } else {
        body
    }
}

/// Write a page to `rel_path` under `output_dir` and describe it
pub async fn write_page(
    output_dir: &Path,
    rel_path: String,
    url: &str,
    page: &PageDocument,
) -> Result<ManifestEntry, ScrapeError> {
    let path = output_dir.join(&rel_path);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = page.render(url);
    tokio::fs::write(&path, &content).await?;

    Ok(ManifestEntry {
        url: url.to_string(),
        path: rel_path,
        size_bytes: content.len() as u64,
        headings: extract_headings(&page.body),
        content_hash: format!("{:x}", Sha256::digest(content.as_bytes())),
    })
}

/// Entries and path claims of one pass, behind one lock
#[derive(Default)]
struct PassState {
    entries: Vec<ManifestEntry>,
    claims: PathClaims,
}

/// Frontier crawler writing into one output directory
pub struct Crawler {
    client: PageClient,
    render: Option<Arc<dyn RenderEngine>>,
    output_dir: PathBuf,
    start_url: String,
    workers: usize,
    min_content_chars: usize,
}

impl Crawler {
    pub fn new(client: PageClient, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            render: None,
            output_dir: output_dir.into(),
            start_url: String::new(),
            workers: DEFAULT_WORKERS,
            min_content_chars: crate::config::DEFAULT_MIN_CONTENT_CHARS,
        }
    }

    pub fn with_render(mut self, render: Option<Arc<dyn RenderEngine>>) -> Self {
        self.render = render;
        self
    }

    pub fn with_start_url(mut self, start_url: impl Into<String>) -> Self {
        self.start_url = start_url.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_min_content_chars(mut self, min: usize) -> Self {
        self.min_content_chars = min;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Remove whatever an earlier pass wrote
    async fn clear_raw_dir(&self) -> Result<(), ScrapeError> {
        let raw_dir = self.output_dir.join(RAW_DIR);
        match tokio::fs::remove_dir_all(&raw_dir).await {
            Ok(()) => debug!(dir = %raw_dir.display(), "Cleared previous pass"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Plain fetches through a semaphore-bounded task pool
    async fn run_plain(&self, records: &[UrlRecord], spec: &SelectorSpec) -> Vec<ManifestEntry> {
        let state = Arc::new(Mutex::new(PassState::default()));
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let spec = Arc::new(spec.clone());
        let mut tasks = JoinSet::new();

        for record in records.iter().cloned() {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let client = self.client.clone();
            let spec = Arc::clone(&spec);
            let state = Arc::clone(&state);
            let output_dir = self.output_dir.clone();
            let min_chars = self.min_content_chars;

            tasks.spawn(async move {
                let _permit = permit;
                let page = match client.fetch_with_retry(&record.url).await {
                    Ok(page) => page,
                    Err(e) => {
                        debug!(url = %record.url, error = %e, "Fetch failed");
                        return;
                    }
                };
                let Some(doc) = process_page(&record, &page.body, &page.content_type, &spec, min_chars)
                else {
                    return;
                };
                let rel_path = state.lock().await.claims.claim(&record.url);
                match write_page(&output_dir, rel_path, &record.url, &doc).await {
                    Ok(entry) => {
                        debug!(url = %record.url, path = %entry.path, "Wrote page");
                        state.lock().await.entries.push(entry);
                    }
                    Err(e) => warn!(url = %record.url, error = %e, "Failed to write page"),
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Crawl task panicked");
            }
        }

        let mut guard = state.lock().await;
        std::mem::take(&mut guard.entries)
    }

    /// Sequential rendered fetches on one session. Errs only when no
    /// session could be opened or the session was lost; pages written so
    /// far are then discarded by the caller.
    async fn run_rendered(
        &self,
        engine: Arc<dyn RenderEngine>,
        records: &[UrlRecord],
        spec: &SelectorSpec,
    ) -> Result<Vec<ManifestEntry>, ScrapeError> {
        let mut session = tokio::task::spawn_blocking(move || engine.open_session())
            .await
            .map_err(|e| ScrapeError::Render(e.to_string()))??;
        let mut entries = Vec::new();
        let mut claims = PathClaims::new();

        for record in records {
            let url = record.url.clone();
            let selector = spec.content_selector.clone();
            let joined = tokio::task::spawn_blocking(move || {
                // keep the session across a panicking page so it can be quit
                let html = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    render_page(session.as_mut(), &url, Some(selector.as_str()))
                }))
                .unwrap_or_else(|_| Err(ScrapeError::Render("render panicked".to_string())));
                (session, html)
            })
            .await;
            let html = match joined {
                Ok((returned, html)) => {
                    session = returned;
                    html
                }
                Err(e) => {
                    warn!(url = %record.url, error = %e, "Render task lost its session");
                    return Err(ScrapeError::Render(e.to_string()));
                }
            };

            let html = match html {
                Ok(html) => html,
                Err(e) => {
                    debug!(url = %record.url, error = %e, "Render failed");
                    continue;
                }
            };
            let content_type = Some("text/html".to_string());
            let Some(doc) = process_page(record, &html, &content_type, spec, self.min_content_chars)
            else {
                continue;
            };
            let rel_path = claims.claim(&record.url);
            match write_page(&self.output_dir, rel_path, &record.url, &doc).await {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(url = %record.url, error = %e, "Failed to write page"),
            }
        }

        if let Err(e) = tokio::task::spawn_blocking(move || quit(session)).await {
            warn!(error = %e, "Failed to quit render session");
        }
        Ok(entries)
    }
}

fn quit(session: Box<dyn RenderSession>) {
    session.quit();
}

#[async_trait]
impl CrawlPass for Crawler {
    #[instrument(skip_all, fields(pages = records.len(), %mode))]
    async fn run(
        &self,
        records: &[UrlRecord],
        spec: &SelectorSpec,
        mode: EngineMode,
    ) -> Result<Manifest, ScrapeError> {
        info!(workers = self.workers, content_selector = %spec.content_selector, "Crawling frontier");

        // each pass owns md/raw outright
        self.clear_raw_dir().await?;

        let entries = match (mode, &self.render) {
            (EngineMode::RenderedFetch, Some(engine)) => {
                match self.run_rendered(Arc::clone(engine), records, spec).await {
                    Ok(entries) => entries,
                    Err(e) => {
                        warn!(error = %e, "Rendering unavailable; using plain fetches");
                        self.clear_raw_dir().await?;
                        self.run_plain(records, spec).await
                    }
                }
            }
            (EngineMode::RenderedFetch, None) => {
                warn!("Rendered mode without a rendering engine; using plain fetches");
                self.run_plain(records, spec).await
            }
            (EngineMode::PlainFetch, _) => self.run_plain(records, spec).await,
        };

        let mut manifest = Manifest::new(self.start_url.clone(), mode);
        manifest.total_pages = records.len();
        manifest.total_files = entries.len();
        manifest.entries = entries;
        info!(
            written = manifest.total_files,
            attempted = manifest.total_pages,
            success_rate = manifest.success_rate(),
            "Crawl pass finished"
        );
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::testing::FakeEngine;
    use crate::client::ClientOptions;
    use crate::retry::RetryPolicy;
    use crate::types::DiscoverySource;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(url: &str) -> UrlRecord {
        UrlRecord::new(url, DiscoverySource::Sitemap)
    }

    fn markdown() -> Option<String> {
        Some("text/markdown".to_string())
    }

    #[test]
    fn test_min_content_boundary() {
        let spec = SelectorSpec::default();
        let r = record("https://x.test/docs/a");
        assert_eq!("Nineteen chars here".len(), 19);
        assert_eq!("Twenty chars in here".len(), 20);
        assert!(process_page(&r, "Nineteen chars here", &markdown(), &spec, 20).is_none());
        assert!(process_page(&r, "Twenty chars in here", &markdown(), &spec, 20).is_some());
    }

    #[test]
    fn test_process_html_page() {
        let html = r#"<html><head><title>Install | Acme</title></head><body>
            <nav><a href="/">Home</a></nav>
            <main><h1>Installation</h1><p>Run the installer and follow the prompts.</p></main>
            </body></html>"#;
        let spec = SelectorSpec {
            content_selector: "main".into(),
            ..Default::default()
        };
        let doc = process_page(&record("https://x.test/docs/install"), html, &None, &spec, 20).unwrap();
        assert_eq!(doc.title, "Installation");
        assert!(doc.body.contains("Run the installer"));
        assert!(!doc.body.contains("Home"));
    }

    #[test]
    fn test_slug_path() {
        assert_eq!(slug_path("https://x.test/"), "md/raw/index.md");
        assert_eq!(slug_path("https://x.test/docs/intro.html"), "md/raw/docs/intro.md");
        assert_eq!(slug_path("https://x.test/docs/a b/c"), "md/raw/docs/a_20b/c.md");
        assert_eq!(
            slug_path("https://raw.githubusercontent.com/o/r/main/docs/guide.md"),
            "md/raw/o/r/main/docs/guide.md"
        );
        assert_eq!(slug_path("https://x.test/v1.2/api"), "md/raw/v1.2/api.md");
    }

    #[test]
    fn test_claims_disambiguate_colliding_slugs() {
        let mut claims = PathClaims::new();
        let plain = claims.claim("https://x.test/docs/intro");
        let html = claims.claim("https://x.test/docs/intro.html");
        let again = claims.claim("https://x.test/docs/intro.html");
        assert_eq!(plain, "md/raw/docs/intro.md");
        assert!(html.starts_with("md/raw/docs/intro-") && html.ends_with(".md"));
        assert_eq!(html.len(), "md/raw/docs/intro-".len() + 8 + 3);
        assert_ne!(again, html);
        assert_ne!(again, plain);
        assert_eq!(claims.len(), 3);
        assert_eq!(claims.claim("https://x.test/docs/other"), "md/raw/docs/other.md");
    }

    #[test]
    fn test_render_strips_duplicate_title() {
        let doc = PageDocument {
            title: "Intro".into(),
            body: "# Intro\n\nHello world".into(),
        };
        assert_eq!(
            doc.render("https://x.test/intro"),
            "# Intro\n\nSource: https://x.test/intro\n\nHello world\n"
        );
    }

    #[tokio::test]
    async fn test_write_page_entry() {
        let dir = TempDir::new().unwrap();
        let doc = PageDocument {
            title: "Guide".into(),
            body: "## Setup\n\nSteps go here.\n\n## Usage\n\nMore.".into(),
        };
        let url = "https://x.test/docs/guide";
        let entry = write_page(dir.path(), slug_path(url), url, &doc).await.unwrap();
        assert_eq!(entry.path, "md/raw/docs/guide.md");
        assert_eq!(entry.headings, vec!["## Setup".to_string(), "## Usage".to_string()]);
        assert_eq!(entry.content_hash.len(), 64);
        let written = std::fs::read_to_string(dir.path().join(&entry.path)).unwrap();
        assert_eq!(written.len() as u64, entry.size_bytes);
    }

    fn client() -> PageClient {
        PageClient::new(ClientOptions {
            retry: RetryPolicy::immediate(3),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_plain_crawl_drops_failures() {
        let server = MockServer::start().await;
        let page = |title: &str| {
            ResponseTemplate::new(200).set_body_raw(
                format!(
                    "<html><body><main><h1>{title}</h1><p>Body of the {title} page with text.</p></main></body></html>"
                ),
                "text/html",
            )
        };
        Mock::given(method("GET")).and(path("/docs/a")).respond_with(page("A")).mount(&server).await;
        Mock::given(method("GET")).and(path("/docs/b")).respond_with(page("B")).mount(&server).await;
        Mock::given(method("GET"))
            .and(path("/docs/gone"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let crawler = Crawler::new(client(), dir.path()).with_start_url(server.uri()).with_workers(2);
        let records: Vec<UrlRecord> = ["/docs/a", "/docs/b", "/docs/gone"]
            .iter()
            .map(|p| record(&format!("{}{}", server.uri(), p)))
            .collect();
        let manifest = crawler
            .run(&records, &SelectorSpec::default(), EngineMode::PlainFetch)
            .await
            .unwrap();

        assert_eq!(manifest.total_pages, 3);
        assert_eq!(manifest.total_files, 2);
        assert!(manifest.entries.iter().all(|e| !e.url.ends_with("/gone")));
        assert!(dir.path().join("md/raw/docs/a.md").exists());
    }

    #[tokio::test]
    async fn test_plain_crawl_keeps_colliding_pages_apart() {
        let server = MockServer::start().await;
        for (route, title) in [("/docs/intro.html", "Legacy"), ("/docs/intro", "Current")] {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(200).set_body_raw(
                    format!("<html><body><main><h1>{title}</h1><p>The {title} introduction page.</p></main></body></html>"),
                    "text/html",
                ))
                .mount(&server)
                .await;
        }

        let dir = TempDir::new().unwrap();
        let crawler = Crawler::new(client(), dir.path()).with_workers(2);
        let records = vec![
            record(&format!("{}/docs/intro.html", server.uri())),
            record(&format!("{}/docs/intro", server.uri())),
        ];
        let manifest = crawler
            .run(&records, &SelectorSpec::default(), EngineMode::PlainFetch)
            .await
            .unwrap();

        assert_eq!(manifest.total_files, 2);
        let paths: HashSet<&str> = manifest.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths.len(), 2);
        for entry in &manifest.entries {
            let written = std::fs::read_to_string(dir.path().join(&entry.path)).unwrap();
            assert!(written.contains(&entry.url));
        }
    }

    #[tokio::test]
    async fn test_rendered_crawl_falls_back_when_browser_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/docs/a"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "<html><body><main><h1>A</h1><p>Plain page A content here.</p></main></body></html>",
                "text/html",
            ))
            .mount(&server)
            .await;

        let engine = Arc::new(FakeEngine {
            fail_open: true,
            ..Default::default()
        });
        let render: Arc<dyn RenderEngine> = engine.clone();
        let dir = TempDir::new().unwrap();
        let crawler = Crawler::new(client(), dir.path()).with_render(Some(render));
        let records = vec![record(&format!("{}/docs/a", server.uri()))];
        let manifest = crawler
            .run(&records, &SelectorSpec::default(), EngineMode::RenderedFetch)
            .await
            .unwrap();

        assert_eq!(manifest.total_files, 1);
        assert!(dir.path().join("md/raw/docs/a.md").exists());
    }

    #[tokio::test]
    async fn test_rendered_crawl_survives_panicking_page() {
        let engine = FakeEngine {
            panic_on: Some("https://x.test/docs/crash".to_string()),
            ..Default::default()
        }
        .with_page(
            "https://x.test/docs/b",
            "<html><body><main><h1>B</h1><p>Rendered page B content.</p></main></body></html>",
        );
        let engine = Arc::new(engine);
        let render: Arc<dyn RenderEngine> = engine.clone();
        let dir = TempDir::new().unwrap();
        let crawler = Crawler::new(client(), dir.path()).with_render(Some(render));
        let records = vec![record("https://x.test/docs/crash"), record("https://x.test/docs/b")];
        let manifest = crawler
            .run(&records, &SelectorSpec::default(), EngineMode::RenderedFetch)
            .await
            .unwrap();

        assert_eq!(manifest.total_files, 1);
        assert_eq!(engine.sessions_opened.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(engine.sessions_quit.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rendered_crawl_uses_one_session() {
        let engine = FakeEngine::default()
            .with_page(
                "https://x.test/docs/a",
                "<html><body><main><h1>A</h1><p>Rendered page A content.</p></main></body></html>",
            )
            .with_page(
                "https://x.test/docs/b",
                "<html><body><main><h1>B</h1><p>Rendered page B content.</p></main></body></html>",
            );
        let engine = Arc::new(engine);
        let render: Arc<dyn RenderEngine> = engine.clone();
        let dir = TempDir::new().unwrap();
        let crawler = Crawler::new(client(), dir.path()).with_render(Some(render));
        let records = vec![
            record("https://x.test/docs/a"),
            record("https://x.test/docs/b"),
            record("https://x.test/docs/missing"),
        ];
        let manifest = crawler
            .run(&records, &SelectorSpec::default(), EngineMode::RenderedFetch)
            .await
            .unwrap();

        assert_eq!(manifest.total_files, 2);
        assert_eq!(manifest.engine_mode, EngineMode::RenderedFetch);
        assert_eq!(engine.sessions_opened.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(engine.sessions_quit.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
