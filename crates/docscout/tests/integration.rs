//! Integration tests for DocScout using wiremock

use async_trait::async_trait;
use docscout::discovery::RepositoryStrategy;
use docscout::{
    ClientOptions, CrawlPass, Crawler, DiscoveryContext, DiscoveryResolver, DiscoverySource,
    EngineMode, InferenceRequest, InferenceResult, PageClient, Pipeline, PipelineConfig,
    RetryPolicy, ScopeInference, ScopeRule, ScrapeError, SelectorSpec, UrlRecord,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FOOTER: &str = "Acme Cloud is a registered trademark of Acme Corporation.";

fn client() -> PageClient {
    PageClient::new(ClientOptions {
        retry: RetryPolicy::immediate(3),
        ..Default::default()
    })
    .unwrap()
}

fn sitemap(urls: &[String]) -> String {
    let entries: String = urls
        .iter()
        .map(|u| format!("<url><loc>{u}</loc></url>"))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{entries}</urlset>"#
    )
}

fn doc_page(title: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(
        format!(
            r#"<html><head><title>{title} | Acme</title></head><body>
            <nav><a href="/docs/">Docs</a><a href="/blog/">Blog</a></nav>
            <main>
              <span class="badge">v1.0</span>
              <h1>{title}</h1>
              <p>This page explains how {title} works and when to reach for it.</p>
              <h2>Usage</h2>
              <p>Call the {title} endpoint with your project token.</p>
              <p>{FOOTER}</p>
            </main>
            <footer>Copyright Acme</footer>
            </body></html>"#
        ),
        "text/html; charset=utf-8",
    )
}

async fn mount_site(server: &MockServer, pages: usize, missing: &[usize]) -> Vec<String> {
    let urls: Vec<String> = (1..=pages)
        .map(|i| format!("{}/docs/page-{i}", server.uri()))
        .collect();
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sitemap(&urls), "application/xml"),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/docs/"))
        .respond_with(doc_page("Overview"))
        .mount(server)
        .await;
    for i in 1..=pages {
        let response = if missing.contains(&i) {
            ResponseTemplate::new(404)
        } else {
            doc_page(&format!("Topic {i}"))
        };
        Mock::given(method("GET"))
            .and(path(format!("/docs/page-{i}")))
            .respond_with(response)
            .mount(server)
            .await;
    }
    urls
}

#[tokio::test]
async fn test_sitemap_discovery_under_docs_scope() {
    let server = MockServer::start().await;
    let urls = mount_site(&server, 12, &[]).await;

    let start = Url::parse(&format!("{}/docs/", server.uri())).unwrap();
    let result = DiscoveryResolver::with_defaults()
        .resolve(DiscoveryContext::new(client(), start))
        .await
        .unwrap();

    assert_eq!(result.strategy, "sitemap");
    assert_eq!(result.source, DiscoverySource::Sitemap);
    assert_eq!(result.scope.include, vec!["/docs/".to_string()]);
    assert_eq!(result.frontier.len(), 12);
    for url in &urls {
        assert!(result.frontier.contains(url), "missing {url}");
        assert!(result.scope.matches_str(url));
    }
}

#[tokio::test]
async fn test_locale_filter_drops_sibling_language() {
    let server = MockServer::start().await;
    let mut urls: Vec<String> = (1..=8)
        .map(|i| format!("{}/en/5.0/topic-{i}", server.uri()))
        .collect();
    urls.extend((1..=8).map(|i| format!("{}/el/5.0/topic-{i}", server.uri())));
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sitemap(&urls)))
        .mount(&server)
        .await;

    let start = Url::parse(&format!("{}/en/5.0/", server.uri())).unwrap();
    // host-wide scope so only the locale filter separates the two trees
    let scope = ScopeRule::for_url(&start).exclude("/search/");
    let ctx = DiscoveryContext::new(client(), start)
        .with_scope(scope)
        .with_detected_locale();
    assert_eq!(ctx.target_locale.as_deref(), Some("en"));

    let result = DiscoveryResolver::with_defaults().resolve(ctx).await.unwrap();
    assert_eq!(result.frontier.len(), 8);
    assert!(result.frontier.iter().all(|r| r.url.contains("/en/5.0/")));
    assert!(!result.frontier.iter().any(|r| r.url.contains("/el/")));
}

#[tokio::test]
async fn test_repository_discovery_through_tree_api() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "default_branch": "trunk"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/git/trees/trunk"))
        .and(query_param("recursive", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "truncated": false,
            "tree": [
                {"path": "README.md", "type": "blob"},
                {"path": "docs", "type": "tree"},
                {"path": "docs/intro.md", "type": "blob"},
                {"path": "docs/guide.mdx", "type": "blob"},
                {"path": "src/lib.rs", "type": "blob"},
                {"path": "node_modules/pkg/README.md", "type": "blob"},
                {"path": ".github/CONTRIBUTING.md", "type": "blob"},
                {"path": "CHANGELOG.md", "type": "blob"}
            ]
        })))
        .mount(&server)
        .await;

    let mut resolver = DiscoveryResolver::new();
    resolver.register(Box::new(
        RepositoryStrategy::new()
            .with_api_base(server.uri())
            .with_raw_base(server.uri()),
    ));
    let start = Url::parse("https://github.com/acme/widgets").unwrap();
    let result = resolver
        .resolve(DiscoveryContext::new(client(), start))
        .await
        .unwrap();

    assert_eq!(result.source, DiscoverySource::Repository);
    let urls: Vec<&str> = result.frontier.iter().map(|r| r.url.as_str()).collect();
    let raw = |p: &str| format!("{}/acme/widgets/trunk/{}", server.uri(), p);
    assert!(urls.contains(&raw("docs/intro.md").as_str()));
    assert!(urls.contains(&raw("docs/guide.mdx").as_str()));
    assert!(urls.contains(&raw("README.md").as_str()));
    assert!(urls.contains(&raw("CHANGELOG.md").as_str()));
    assert!(!urls.iter().any(|u| u.contains("node_modules") || u.contains(".github")));
    assert!(!urls.iter().any(|u| u.ends_with(".rs")));
}

#[tokio::test]
async fn test_crawler_retries_transient_and_drops_missing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/docs/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/docs/flaky"))
        .respond_with(doc_page("Flaky"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/docs/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let crawler = Crawler::new(client(), dir.path()).with_start_url(server.uri());
    let records = vec![
        UrlRecord::new(format!("{}/docs/flaky", server.uri()), DiscoverySource::Sitemap),
        UrlRecord::new(format!("{}/docs/gone", server.uri()), DiscoverySource::Sitemap),
    ];
    let spec = SelectorSpec {
        content_selector: "main".to_string(),
        prune_selectors: vec![".badge".to_string()],
        notes: String::new(),
    };
    let manifest = crawler
        .run(&records, &spec, EngineMode::PlainFetch)
        .await
        .unwrap();

    assert_eq!(manifest.total_pages, 2);
    assert_eq!(manifest.total_files, 1);
    let entry = &manifest.entries[0];
    assert!(entry.url.ends_with("/docs/flaky"));
    assert_eq!(entry.path, "md/raw/docs/flaky.md");

    let text = std::fs::read_to_string(dir.path().join(&entry.path)).unwrap();
    assert!(text.starts_with("# Flaky\n\nSource: "));
    assert!(text.contains("## Usage"));
    assert!(!text.contains("v1.0"));
    assert!(!text.contains("Copyright Acme"));
}

#[tokio::test]
async fn test_full_pipeline_with_heuristic_inference() {
    let server = MockServer::start().await;
    mount_site(&server, 12, &[12]).await;
    let out = TempDir::new().unwrap();

    let report = Pipeline::builder(format!("{}/docs/", server.uri()))
        .config(PipelineConfig {
            output_dir: out.path().to_path_buf(),
            retry: RetryPolicy::immediate(2),
            ..Default::default()
        })
        .build()
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.engine.mode, EngineMode::PlainFetch);
    assert_eq!(report.engine.reason, "rendering engine not available");
    assert_eq!(report.discovery_strategy, "sitemap");
    assert_eq!(report.inference_source, "heuristic");
    assert_eq!(report.selector.content_selector, "main");
    assert_eq!(report.frontier, 12);
    assert_eq!(report.pages_written, 11);
    assert_eq!(report.crawl_attempts, 1);
    assert_eq!(report.dedup.boilerplate_blocks, 1);
    assert_eq!(report.dedup.files_rewritten, 11);

    for artifact in ["engine-decision.json", "inference.json", "manifest.json", "AGENTS.md"] {
        assert!(out.path().join(artifact).exists(), "missing {artifact}");
    }
    let page = std::fs::read_to_string(out.path().join("md/raw/docs/page-3.md")).unwrap();
    assert!(page.contains("Topic 3 works"));
    assert!(!page.contains(FOOTER));

    let manifest: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.path().join("manifest.json")).unwrap())
            .unwrap();
    assert_eq!(manifest["total_pages"], 12);
    assert_eq!(manifest["total_files"], 11);
    assert_eq!(manifest["engine_mode"], "plain-fetch");

    let index = std::fs::read_to_string(out.path().join("AGENTS.md")).unwrap();
    assert!(index.contains("|root: ./md/raw|"));
    assert!(index.contains("docs/:{page-1.md,page-10.md,page-11.md,page-2.md"));
    assert!(!index.contains("page-12.md"));
}

/// Issues a selector that only matches a version badge, then the real root
struct SecondGuess {
    calls: AtomicUsize,
}

#[async_trait]
impl ScopeInference for SecondGuess {
    fn name(&self) -> &'static str {
        "second-guess"
    }

    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResult, ScrapeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let selector = if call == 0 {
            assert!(request.feedback.is_none());
            ".badge"
        } else {
            assert!(request.feedback.as_deref().unwrap_or("").contains("\".badge\""));
            "main"
        };
        let start = Url::parse(&request.start_url).unwrap();
        Ok(InferenceResult {
            selector: SelectorSpec {
                content_selector: selector.to_string(),
                ..Default::default()
            },
            scope: ScopeRule::for_url(&start).include("/docs/"),
            source: self.name().to_string(),
        })
    }
}

#[tokio::test]
async fn test_pipeline_reinfers_after_low_yield() {
    let server = MockServer::start().await;
    mount_site(&server, 10, &[]).await;
    let out = TempDir::new().unwrap();
    let inference = Arc::new(SecondGuess {
        calls: AtomicUsize::new(0),
    });

    let report = Pipeline::builder(format!("{}/docs/", server.uri()))
        .config(PipelineConfig {
            output_dir: out.path().to_path_buf(),
            retry: RetryPolicy::immediate(1),
            ..Default::default()
        })
        .inference(inference.clone())
        .build()
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(inference.calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.crawl_attempts, 2);
    assert_eq!(report.selector.content_selector, "main");
    assert_eq!(report.pages_written, 10);

    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.path().join("inference.json")).unwrap())
            .unwrap();
    assert_eq!(saved["selector"]["content_selector"], "main");
}
