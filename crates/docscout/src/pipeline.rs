//! Pipeline orchestration
//!
//! ```text
//! engine selection -> discovery -> inference -> scope filter + cap
//!   -> sample crawl + refinement -> full crawl (quality gated)
//!   -> cross-page dedup -> manifest + AGENTS.md
//! ```

use crate::client::{ClientOptions, PageClient};
use crate::config::{LocaleMode, PipelineConfig};
use crate::crawler::{CrawlPass, Crawler, RAW_DIR};
use crate::dedup::{dedupe_directory, DedupReport};
use crate::discovery::{DiscoveryContext, DiscoveryResolver, DiscoveryResult};
use crate::engine::EngineSelector;
use crate::error::ScrapeError;
use crate::index::{build_compact_index, site_name, INDEX_FILE};
use crate::inference::{HeuristicInference, InferenceRequest, InferenceResult, ScopeInference};
use crate::render::RenderEngine;
use crate::types::{
    host_key, DiscoverySource, EngineDecision, EngineMode, Manifest, ScopeRule, SelectorSpec, UrlRecord,
};
use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub const ENGINE_DECISION_FILE: &str = "engine-decision.json";
pub const INFERENCE_FILE: &str = "inference.json";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Scratch directory for the refinement sample crawl
const SAMPLE_DIR: &str = ".sample";

/// Frontier paths handed to inference
const INFERENCE_LINK_SAMPLE: usize = 50;

/// Sample pages shown to refinement
const REFINE_SAMPLES: usize = 3;

/// Summary of one run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub start_url: String,
    pub output_dir: PathBuf,
    pub engine: EngineDecision,
    pub discovery_strategy: String,
    pub discovered: usize,
    /// URLs crawled after scope filtering and the page cap
    pub frontier: usize,
    pub selector: SelectorSpec,
    pub scope: ScopeRule,
    pub inference_source: String,
    pub crawl_attempts: u32,
    pub success_rate: f64,
    pub pages_written: usize,
    pub dedup: DedupReport,
    pub manifest_path: PathBuf,
    pub index_path: PathBuf,
}

/// What a crawl pass runs against
#[derive(Debug, Clone)]
pub struct CrawlPlan {
    pub records: Vec<UrlRecord>,
    pub spec: SelectorSpec,
}

/// Source of a replacement plan after a low-yield pass
#[async_trait]
pub trait Reinfer: Send {
    /// `None` keeps the current results
    async fn reinfer(&mut self, feedback: String) -> Option<CrawlPlan>;
}

/// Crawl success threshold and retry budget
#[derive(Debug, Clone, Copy)]
pub struct QualityGate {
    pub min_success_rate: f64,
    pub retries: u32,
}

impl QualityGate {
    /// Crawl `plan`; while the success rate stays below the threshold and
    /// budget remains, ask `reinfer` for a new plan and crawl again. The
    /// last pass is accepted whatever its yield. Returns the manifest and
    /// the number of passes run.
    #[instrument(skip_all, fields(min_success_rate = self.min_success_rate, retries = self.retries))]
    pub async fn crawl(
        &self,
        pass: &dyn CrawlPass,
        mut plan: CrawlPlan,
        mode: EngineMode,
        reinfer: &mut dyn Reinfer,
    ) -> Result<(Manifest, u32), ScrapeError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let manifest = pass.run(&plan.records, &plan.spec, mode).await?;
            let rate = manifest.success_rate();
            info!(attempt, rate, written = manifest.total_files, "Crawl pass result");

            if rate >= self.min_success_rate {
                return Ok((manifest, attempt));
            }
            if attempt > self.retries {
                warn!(rate, attempt, "Low success rate, retry budget spent; accepting results");
                return Ok((manifest, attempt));
            }

            let feedback = low_yield_feedback(&plan.spec, &manifest, self.min_success_rate);
            match reinfer.reinfer(feedback).await {
                Some(next) => plan = next,
                None => {
                    warn!(rate, "No replacement selector; accepting results");
                    return Ok((manifest, attempt));
                }
            }
        }
    }
}

fn low_yield_feedback(spec: &SelectorSpec, manifest: &Manifest, min: f64) -> String {
    format!(
        "Crawling with content selector {:?} produced usable content for only {} of {} pages \
         ({:.0}%), below the {:.0}% minimum. The selector probably does not exist on most \
         documentation pages or matches an element without the main text. Choose a content \
         selector present on typical documentation pages.",
        spec.content_selector,
        manifest.total_files,
        manifest.total_pages,
        manifest.success_rate() * 100.0,
        min * 100.0,
    )
}

/// Fluent construction of a [`Pipeline`]
pub struct PipelineBuilder {
    config: PipelineConfig,
    render: Option<Arc<dyn RenderEngine>>,
    inference: Option<Arc<dyn ScopeInference>>,
    resolver: Option<DiscoveryResolver>,
    crawl_pass: Option<Arc<dyn CrawlPass>>,
}

impl PipelineBuilder {
    pub fn new(start_url: impl Into<String>) -> Self {
        Self {
            config: PipelineConfig {
                start_url: start_url.into(),
                ..Default::default()
            },
            render: None,
            inference: None,
            resolver: None,
            crawl_pass: None,
        }
    }

    /// Replace every tunable; the start URL given to [`new`](Self::new) is kept
    /// when `config.start_url` is empty
    pub fn config(mut self, config: PipelineConfig) -> Self {
        let start_url = std::mem::take(&mut self.config.start_url);
        self.config = config;
        if self.config.start_url.is_empty() {
            self.config.start_url = start_url;
        }
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn max_pages(mut self, max_pages: usize) -> Self {
        self.config.max_pages = max_pages;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers.max(1);
        self
    }

    pub fn locale(mut self, locale: LocaleMode) -> Self {
        self.config.locale = locale;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    pub fn render_engine(mut self, engine: Arc<dyn RenderEngine>) -> Self {
        self.render = Some(engine);
        self
    }

    pub fn inference(mut self, inference: Arc<dyn ScopeInference>) -> Self {
        self.inference = Some(inference);
        self
    }

    pub fn resolver(mut self, resolver: DiscoveryResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Crawl implementation for the full passes; defaults to [`Crawler`]
    pub fn crawl_pass(mut self, pass: Arc<dyn CrawlPass>) -> Self {
        self.crawl_pass = Some(pass);
        self
    }

    pub fn build(self) -> Result<Pipeline, ScrapeError> {
        let start_url = Url::parse(&self.config.start_url)
            .map_err(|e| ScrapeError::InvalidUrl(format!("{}: {}", self.config.start_url, e)))?;
        if !matches!(start_url.scheme(), "http" | "https") {
            return Err(ScrapeError::InvalidUrl(self.config.start_url.clone()));
        }
        let client = PageClient::new(ClientOptions {
            user_agent: self.config.user_agent.clone(),
            retry: self.config.retry.clone(),
            ..Default::default()
        })?;
        Ok(Pipeline {
            start_url,
            client,
            render: self.render,
            inference: self.inference,
            resolver: self.resolver.unwrap_or_else(DiscoveryResolver::with_defaults),
            crawl_pass: self.crawl_pass,
            config: self.config,
        })
    }
}

/// One configured documentation scrape
pub struct Pipeline {
    config: PipelineConfig,
    start_url: Url,
    client: PageClient,
    render: Option<Arc<dyn RenderEngine>>,
    inference: Option<Arc<dyn ScopeInference>>,
    resolver: DiscoveryResolver,
    crawl_pass: Option<Arc<dyn CrawlPass>>,
}

impl Pipeline {
    pub fn builder(start_url: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(start_url)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Engine selection alone
    pub async fn select_engine(&self) -> EngineDecision {
        EngineSelector::new(self.client.clone(), self.render.clone())
            .with_threshold(self.config.engine_threshold)
            .select(&self.start_url)
            .await
    }

    /// Discovery alone, under `mode`
    pub async fn discover(&self, mode: EngineMode) -> Result<DiscoveryResult, ScrapeError> {
        let ctx = DiscoveryContext::new(self.client.clone(), self.start_url.clone())
            .with_render(self.render.clone())
            .with_mode(mode)
            .with_locale(self.config.locale.target(&self.start_url))
            .with_limits(self.config.discovery.clone());
        self.resolver.resolve(ctx).await
    }

    /// Run every stage and write the artifacts
    #[instrument(skip(self), fields(start_url = %self.start_url))]
    pub async fn run(&self) -> Result<PipelineReport, ScrapeError> {
        let out = self.config.output_dir.clone();
        tokio::fs::create_dir_all(&out).await?;

        info!("Stage 1/6: engine selection");
        let decision = self.select_engine().await;
        write_json(&out.join(ENGINE_DECISION_FILE), &decision).await?;

        info!(mode = %decision.mode, "Stage 2/6: discovery");
        let discovery = self.discover(decision.mode).await?;
        info!(
            strategy = %discovery.strategy,
            urls = discovery.frontier.len(),
            "Discovery finished"
        );
        // raw repository files are markdown, never rendered
        let mode = if discovery.source == DiscoverySource::Repository {
            EngineMode::PlainFetch
        } else {
            decision.mode
        };

        info!("Stage 3/6: selector and scope inference");
        let mut request = self.inference_request(&discovery).await;
        let (collaborator, mut inference) = self.infer(&discovery, &request).await?;
        let records = self.scoped_frontier(&discovery, &inference.scope);
        info!(
            content_selector = %inference.selector.content_selector,
            frontier = records.len(),
            "Frontier scoped"
        );

        if let Some(collaborator) = collaborator.as_ref().filter(|c| c.refines()) {
            info!("Stage 4/6: sample crawl and refinement");
            request.samples = self.sample_pages(&records, &inference.selector, mode).await;
            if !request.samples.is_empty() {
                match collaborator.refine(&inference, &request).await {
                    Ok(spec) => inference.selector = spec,
                    Err(e) => warn!(error = %e, "Selector refinement failed; keeping current spec"),
                }
            }
        }
        write_json(&out.join(INFERENCE_FILE), &inference).await?;

        info!("Stage 5/6: full crawl");
        let pass: Arc<dyn CrawlPass> = match &self.crawl_pass {
            Some(pass) => Arc::clone(pass),
            None => Arc::new(self.crawler(&out)),
        };
        let gate = QualityGate {
            min_success_rate: self.config.min_success_rate,
            retries: self.config.quality_retries,
        };
        let mut reinfer = PipelineReinfer {
            pipeline: self,
            discovery: &discovery,
            collaborator: collaborator.clone(),
            request: request.clone(),
            last: inference.clone(),
        };
        let plan = CrawlPlan {
            records,
            spec: inference.selector.clone(),
        };
        let frontier_len = plan.records.len();
        let (mut manifest, attempts) = gate.crawl(pass.as_ref(), plan, mode, &mut reinfer).await?;
        let inference = reinfer.last;
        if attempts > 1 {
            write_json(&out.join(INFERENCE_FILE), &inference).await?;
        }

        info!("Stage 6/6: dedup and index");
        let raw_dir = out.join(RAW_DIR);
        let dedup_config = self.config.dedup.clone();
        let dedup = tokio::task::spawn_blocking(move || dedupe_directory(&raw_dir, &dedup_config))
            .await
            .map_err(|e| ScrapeError::Io(std::io::Error::other(e)))??;
        if dedup.files_rewritten > 0 {
            refresh_entries(&out, &mut manifest).await;
        }
        manifest.start_url = self.config.start_url.clone();

        let manifest_path = out.join(MANIFEST_FILE);
        write_json(&manifest_path, &manifest).await?;
        let index_path = out.join(INDEX_FILE);
        let index = build_compact_index(&manifest, &site_name(&self.start_url));
        tokio::fs::write(&index_path, index).await?;

        info!(
            pages = manifest.total_files,
            attempts,
            index = %index_path.display(),
            "Pipeline finished"
        );

        Ok(PipelineReport {
            start_url: self.config.start_url.clone(),
            output_dir: out,
            engine: decision,
            discovery_strategy: discovery.strategy.clone(),
            discovered: discovery.frontier.len(),
            frontier: frontier_len,
            selector: inference.selector.clone(),
            scope: inference.scope.clone(),
            inference_source: inference.source.clone(),
            crawl_attempts: attempts,
            success_rate: manifest.success_rate(),
            pages_written: manifest.total_files,
            dedup,
            manifest_path,
            index_path,
        })
    }

    fn crawler(&self, output_dir: &Path) -> Crawler {
        Crawler::new(self.client.clone(), output_dir)
            .with_render(self.render.clone())
            .with_start_url(self.config.start_url.clone())
            .with_workers(self.config.workers)
            .with_min_content_chars(self.config.min_content_chars)
    }

    async fn inference_request(&self, discovery: &DiscoveryResult) -> InferenceRequest {
        let start_html = match discovery.evidence.first() {
            Some(page) => page.html.clone(),
            None if discovery.source == DiscoverySource::Repository => String::new(),
            None => match self.client.get_page(self.start_url.as_str()).await {
                Ok(page) => page.body,
                Err(e) => {
                    warn!(error = %e, "Start page unavailable for inference");
                    String::new()
                }
            },
        };
        let link_paths = discovery
            .frontier
            .iter()
            .take(INFERENCE_LINK_SAMPLE)
            .filter_map(|r| Url::parse(&r.url).ok())
            .map(|u| u.path().to_string())
            .collect();
        InferenceRequest {
            start_url: self.config.start_url.clone(),
            base_host: host_key(&self.start_url),
            start_html,
            link_paths,
            feedback: None,
            samples: Vec::new(),
        }
    }

    /// Selector spec and scope from the collaborator, the heuristic, or,
    /// for repository frontiers, neither
    async fn infer(
        &self,
        discovery: &DiscoveryResult,
        request: &InferenceRequest,
    ) -> Result<(Option<Arc<dyn ScopeInference>>, InferenceResult), ScrapeError> {
        if discovery.source == DiscoverySource::Repository {
            return Ok((
                None,
                InferenceResult {
                    selector: SelectorSpec {
                        notes: "repository markdown".to_string(),
                        ..Default::default()
                    },
                    scope: discovery.scope.clone(),
                    source: "repository".to_string(),
                },
            ));
        }

        if let Some(collaborator) = &self.inference {
            match collaborator.infer(request).await {
                Ok(result) => {
                    let scope = reconcile_scope(result.scope, &discovery.scope);
                    return Ok((
                        Some(Arc::clone(collaborator)),
                        InferenceResult { scope, ..result },
                    ));
                }
                Err(e) if self.config.heuristic_fallback => {
                    warn!(inference = collaborator.name(), error = %e, "Inference failed; using heuristic");
                }
                Err(e) => return Err(e),
            }
        } else if !self.config.heuristic_fallback {
            return Err(ScrapeError::Inference(
                "no inference collaborator configured".to_string(),
            ));
        }

        let heuristic = HeuristicInference::new().infer(request).await?;
        let scope = reconcile_scope(heuristic.scope, &discovery.scope);
        Ok((None, InferenceResult { scope, ..heuristic }))
    }

    /// Discovery frontier filtered by `scope` and capped. A scope that
    /// rejects everything is ignored in favor of the unfiltered frontier.
    fn scoped_frontier(&self, discovery: &DiscoveryResult, scope: &ScopeRule) -> Vec<UrlRecord> {
        let mut records: Vec<UrlRecord> = discovery
            .frontier
            .iter()
            .filter(|r| scope.matches_str(&r.url))
            .cloned()
            .collect();
        if records.is_empty() && !discovery.frontier.is_empty() {
            warn!(
                discovered = discovery.frontier.len(),
                "Inferred scope rejects every discovered URL; keeping the unfiltered discovery frontier"
            );
            records = discovery.frontier.records().to_vec();
        }
        if records.len() > self.config.max_pages {
            warn!(from = records.len(), to = self.config.max_pages, "Capping frontier");
            records.truncate(self.config.max_pages);
        }
        records
    }

    /// Crawl the first few URLs into a scratch directory and return their text
    async fn sample_pages(&self, records: &[UrlRecord], spec: &SelectorSpec, mode: EngineMode) -> Vec<String> {
        let sample_dir = self.config.output_dir.join(SAMPLE_DIR);
        let sample: Vec<UrlRecord> = records.iter().take(self.config.sample_size).cloned().collect();
        if sample.is_empty() {
            return Vec::new();
        }
        let crawler = self.crawler(&sample_dir);
        let texts = match crawler.run(&sample, spec, mode).await {
            Ok(manifest) => {
                info!(
                    written = manifest.total_files,
                    attempted = manifest.total_pages,
                    "Sample crawl finished"
                );
                let mut entries = manifest.entries;
                entries.sort_by(|a, b| a.path.cmp(&b.path));
                let mut texts = Vec::new();
                for entry in entries.iter().take(REFINE_SAMPLES) {
                    if let Ok(text) = tokio::fs::read_to_string(sample_dir.join(&entry.path)).await {
                        texts.push(text);
                    }
                }
                texts
            }
            Err(e) => {
                warn!(error = %e, "Sample crawl failed");
                Vec::new()
            }
        };
        if let Err(e) = tokio::fs::remove_dir_all(&sample_dir).await {
            debug!(error = %e, "Could not remove sample directory");
        }
        texts
    }
}

/// Re-inference through the pipeline's collaborator
struct PipelineReinfer<'a> {
    pipeline: &'a Pipeline,
    discovery: &'a DiscoveryResult,
    collaborator: Option<Arc<dyn ScopeInference>>,
    request: InferenceRequest,
    last: InferenceResult,
}

#[async_trait]
impl Reinfer for PipelineReinfer<'_> {
    async fn reinfer(&mut self, feedback: String) -> Option<CrawlPlan> {
        let collaborator: Arc<dyn ScopeInference> = match &self.collaborator {
            Some(c) => Arc::clone(c),
            None => Arc::new(HeuristicInference::new()),
        };
        let mut request = self.request.clone();
        request.feedback = Some(feedback);
        request.samples.clear();

        let result = match collaborator.infer(&request).await {
            Ok(result) => result,
            Err(e) => {
                warn!(inference = collaborator.name(), error = %e, "Re-inference failed");
                return None;
            }
        };
        let scope = reconcile_scope(result.scope, &self.discovery.scope);
        let next = InferenceResult { scope, ..result };
        if next.selector == self.last.selector && next.scope == self.last.scope {
            info!("Re-inference returned the same selector and scope; crawling again anyway");
        }
        let records = self.pipeline.scoped_frontier(self.discovery, &next.scope);
        info!(
            content_selector = %next.selector.content_selector,
            frontier = records.len(),
            "Re-inferred selector"
        );
        let spec = next.selector.clone();
        self.last = next;
        Some(CrawlPlan { records, spec })
    }
}

/// Inferred scope when it targets the discovery host, else the discovery scope
fn reconcile_scope(inferred: ScopeRule, discovered: &ScopeRule) -> ScopeRule {
    if inferred.base_host == discovered.base_host {
        inferred
    } else {
        debug!(
            inferred = %inferred.base_host,
            discovered = %discovered.base_host,
            "Inferred scope targets another host; keeping discovery scope"
        );
        discovered.clone()
    }
}

/// Recompute size and hash of entries after files were rewritten
async fn refresh_entries(output_dir: &Path, manifest: &mut Manifest) {
    for entry in &mut manifest.entries {
        match tokio::fs::read(output_dir.join(&entry.path)).await {
            Ok(bytes) => {
                entry.size_bytes = bytes.len() as u64;
                entry.content_hash = format!("{:x}", Sha256::digest(&bytes));
            }
            Err(e) => debug!(path = %entry.path, error = %e, "Could not refresh entry"),
        }
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ScrapeError> {
    let json = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, json).await?;
    debug!(path = %path.display(), "Wrote artifact");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ManifestEntry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays canned (written, attempted) results
    struct ScriptedPass {
        results: Mutex<Vec<(usize, usize)>>,
        calls: AtomicUsize,
    }

    impl ScriptedPass {
        fn new(results: &[(usize, usize)]) -> Self {
            Self {
                results: Mutex::new(results.iter().rev().copied().collect()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CrawlPass for ScriptedPass {
        async fn run(
            &self,
            _records: &[UrlRecord],
            _spec: &SelectorSpec,
            mode: EngineMode,
        ) -> Result<Manifest, ScrapeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (written, attempted) = self.results.lock().unwrap().pop().unwrap_or((0, 0));
            let mut manifest = Manifest::new("https://x.test/docs", mode);
            manifest.total_pages = attempted;
            manifest.total_files = written;
            manifest.entries = (0..written)
                .map(|i| ManifestEntry {
                    url: format!("https://x.test/docs/{i}"),
                    path: format!("md/raw/docs/{i}.md"),
                    size_bytes: 1,
                    headings: vec![],
                    content_hash: String::new(),
                })
                .collect();
            Ok(manifest)
        }
    }

    struct CountingReinfer {
        calls: usize,
        feedback: Vec<String>,
    }

    #[async_trait]
    impl Reinfer for CountingReinfer {
        async fn reinfer(&mut self, feedback: String) -> Option<CrawlPlan> {
            self.calls += 1;
            self.feedback.push(feedback);
            Some(plan("main"))
        }
    }

    fn plan(selector: &str) -> CrawlPlan {
        CrawlPlan {
            records: vec![UrlRecord::new("https://x.test/docs/a", DiscoverySource::Sitemap)],
            spec: SelectorSpec {
                content_selector: selector.to_string(),
                ..Default::default()
            },
        }
    }

    fn gate() -> QualityGate {
        QualityGate {
            min_success_rate: 0.20,
            retries: 1,
        }
    }

    #[tokio::test]
    async fn test_second_low_yield_pass_is_final() {
        let pass = ScriptedPass::new(&[(1, 10), (3, 20)]);
        let mut reinfer = CountingReinfer { calls: 0, feedback: vec![] };
        let (manifest, attempts) = gate()
            .crawl(&pass, plan(".missing"), EngineMode::PlainFetch, &mut reinfer)
            .await
            .unwrap();
        assert_eq!(pass.calls.load(Ordering::SeqCst), 2);
        assert_eq!(attempts, 2);
        assert_eq!(reinfer.calls, 1);
        assert!((manifest.success_rate() - 0.15).abs() < 1e-9);
        assert!(reinfer.feedback[0].contains("\".missing\""));
        assert!(reinfer.feedback[0].contains("1 of 10"));
    }

    #[tokio::test]
    async fn test_good_yield_needs_one_pass() {
        let pass = ScriptedPass::new(&[(2, 10)]);
        let mut reinfer = CountingReinfer { calls: 0, feedback: vec![] };
        let (_, attempts) = gate()
            .crawl(&pass, plan("main"), EngineMode::PlainFetch, &mut reinfer)
            .await
            .unwrap();
        assert_eq!(attempts, 1);
        assert_eq!(reinfer.calls, 0);
    }

    #[tokio::test]
    async fn test_zero_retry_budget() {
        let pass = ScriptedPass::new(&[(0, 10), (9, 10)]);
        let mut reinfer = CountingReinfer { calls: 0, feedback: vec![] };
        let gate = QualityGate {
            min_success_rate: 0.20,
            retries: 0,
        };
        let (manifest, attempts) = gate
            .crawl(&pass, plan("main"), EngineMode::PlainFetch, &mut reinfer)
            .await
            .unwrap();
        assert_eq!(attempts, 1);
        assert_eq!(manifest.total_files, 0);
        assert_eq!(pass.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reconcile_scope() {
        let discovered = ScopeRule::new("raw.githubusercontent.com").include("/acme/docs/");
        let inferred = ScopeRule::new("github.com").include("/acme/");
        assert_eq!(reconcile_scope(inferred, &discovered), discovered);

        let inferred = ScopeRule::new("raw.githubusercontent.com").include("/acme/docs/guide/");
        assert_eq!(reconcile_scope(inferred.clone(), &discovered), inferred);
    }

    #[test]
    fn test_builder_rejects_bad_urls() {
        assert!(matches!(
            Pipeline::builder("not a url").build(),
            Err(ScrapeError::InvalidUrl(_))
        ));
        assert!(matches!(
            Pipeline::builder("ftp://x.test/docs").build(),
            Err(ScrapeError::InvalidUrl(_))
        ));
    }

    fn discovery(urls: &[&str]) -> DiscoveryResult {
        let mut frontier = crate::types::Frontier::new();
        for url in urls {
            frontier.insert(UrlRecord::new(*url, DiscoverySource::Sitemap));
        }
        DiscoveryResult {
            frontier,
            scope: ScopeRule::new("x.test"),
            strategy: "sitemap".to_string(),
            source: DiscoverySource::Sitemap,
            target_locale: None,
            evidence: Vec::new(),
        }
    }

    #[test]
    fn test_scoped_frontier_filters_and_caps() {
        let pipeline = Pipeline::builder("https://x.test/docs/").max_pages(2).build().unwrap();
        let found = discovery(&[
            "https://x.test/docs/a",
            "https://x.test/blog/post",
            "https://x.test/docs/b",
            "https://x.test/docs/c",
        ]);
        let records = pipeline.scoped_frontier(&found, &ScopeRule::new("x.test").include("/docs/"));
        let urls: Vec<&str> = records.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://x.test/docs/a", "https://x.test/docs/b"]);
    }

    #[test]
    fn test_scoped_frontier_ignores_scope_that_rejects_everything() {
        let pipeline = Pipeline::builder("https://x.test/docs/").build().unwrap();
        let found = discovery(&["https://x.test/docs/a", "https://x.test/blog/post"]);
        let records = pipeline.scoped_frontier(&found, &ScopeRule::new("x.test").include("/guide/"));
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].url, "https://x.test/blog/post");
    }

    #[tokio::test]
    async fn test_inference_request_keeps_port_in_base_host() {
        let pipeline = Pipeline::builder("http://127.0.0.1:8000/docs/").build().unwrap();
        let mut found = discovery(&["http://127.0.0.1:8000/docs/setup"]);
        found.evidence.push(crate::types::EvidencePage {
            url: "http://127.0.0.1:8000/docs/".to_string(),
            html: "<main>Docs</main>".to_string(),
        });
        let request = pipeline.inference_request(&found).await;
        assert_eq!(request.base_host, "127.0.0.1:8000");
        assert_eq!(request.start_html, "<main>Docs</main>");
        assert_eq!(request.link_paths, vec!["/docs/setup".to_string()]);
    }

    #[tokio::test]
    async fn test_builder_config_keeps_start_url() {
        let pipeline = Pipeline::builder("https://x.test/docs")
            .config(PipelineConfig {
                max_pages: 7,
                ..Default::default()
            })
            .workers(0)
            .build()
            .unwrap();
        assert_eq!(pipeline.config().start_url, "https://x.test/docs");
        assert_eq!(pipeline.config().max_pages, 7);
        assert_eq!(pipeline.config().workers, 1);
    }
}
