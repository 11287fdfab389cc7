//! Content selector and scope inference
//!
//! The pipeline asks a [`ScopeInference`] collaborator which element holds
//! page content and which paths are documentation. [`LlmInference`] asks a
//! chat model; [`HeuristicInference`] derives both from the start URL and
//! a fixed candidate list.

use crate::config::LlmConfig;
use crate::error::ScrapeError;
use crate::retry::{FailureType, RetryDecision, RetryPolicy, RetryTracker};
use crate::types::{ScopeRule, SelectorSpec};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION};
use schemars::{schema_for, JsonSchema};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Candidate content roots, in preference order
pub const CONTENT_CANDIDATES: &[&str] = &["main", "article", ".content", "#content", ".documentation"];

/// Prune set issued by the heuristic
pub const FALLBACK_PRUNE_SELECTORS: &[&str] = &[
    "nav",
    "header",
    "footer",
    ".cookie-banner",
    ".newsletter",
    ".feedback",
    ".edit-page",
    ".breadcrumb",
    ".toc",
];

/// Paths excluded by the heuristic
pub const FALLBACK_EXCLUDES: &[&str] = &["/blog/", "/news/", "/pricing/", "/login/", "/changelog/"];

const HTML_PREVIEW_CHARS: usize = 15_000;
const SAMPLE_PREVIEW_CHARS: usize = 1_500;
const MAX_REFINE_SAMPLES: usize = 3;
const LINK_GROUP_PREVIEW: usize = 5;
const EXAMPLE_URLS: usize = 10;

/// Attempts per analysis when the returned scope rejects the start URL
const SCOPE_VALIDATION_ATTEMPTS: u32 = 2;

const CHAT_TIMEOUT: Duration = Duration::from_secs(90);
const CHAT_MAX_ATTEMPTS: u32 = 4;

/// Everything inference may look at
#[derive(Debug, Clone, Default)]
pub struct InferenceRequest {
    pub start_url: String,
    pub base_host: String,
    /// Start page HTML
    pub start_html: String,
    /// Paths of a bounded sample of frontier URLs
    pub link_paths: Vec<String>,
    /// Why a previous selector failed, on re-inference
    pub feedback: Option<String>,
    /// Extracted markdown from a sample crawl, on refinement
    pub samples: Vec<String>,
}

/// Selector spec plus scope rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub selector: SelectorSpec,
    pub scope: ScopeRule,
    /// Which collaborator produced this
    pub source: String,
}

/// Selector/scope inference collaborator
#[async_trait]
pub trait ScopeInference: Send + Sync {
    fn name(&self) -> &'static str;

    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResult, ScrapeError>;

    /// Whether [`refine`](Self::refine) uses sample pages. The pipeline
    /// skips the sample crawl otherwise.
    fn refines(&self) -> bool {
        false
    }

    /// Improve a selector spec using extracted sample pages. The default
    /// keeps the current spec.
    async fn refine(
        &self,
        current: &InferenceResult,
        _request: &InferenceRequest,
    ) -> Result<SelectorSpec, ScrapeError> {
        Ok(current.selector.clone())
    }
}

/// Start-URL and candidate-list heuristic
#[derive(Debug, Clone, Default)]
pub struct HeuristicInference;

impl HeuristicInference {
    pub fn new() -> Self {
        Self
    }

    /// Scope: the start URL's first path segment, minus common non-doc sections
    pub fn scope(start_url: &Url) -> ScopeRule {
        let mut scope = ScopeRule::for_url(start_url);
        if let Some(segment) = crate::canonical::first_segment(start_url.path()) {
            scope = scope.include(format!("/{}/", segment));
        }
        FALLBACK_EXCLUDES
            .iter()
            .fold(scope, |scope, pattern| scope.exclude(*pattern))
    }

    /// Selector: the first candidate root present in the page, else `body`
    pub fn selector(start_html: &str) -> SelectorSpec {
        let document = Html::parse_document(start_html);
        let content_selector = CONTENT_CANDIDATES
            .iter()
            .find(|raw| {
                Selector::parse(raw)
                    .map(|s| document.select(&s).next().is_some())
                    .unwrap_or(false)
            })
            .copied()
            .unwrap_or("body");
        SelectorSpec {
            content_selector: content_selector.to_string(),
            prune_selectors: FALLBACK_PRUNE_SELECTORS.iter().map(|s| s.to_string()).collect(),
            notes: "heuristic fallback".to_string(),
        }
    }
}

#[async_trait]
impl ScopeInference for HeuristicInference {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResult, ScrapeError> {
        let start = Url::parse(&request.start_url)
            .map_err(|e| ScrapeError::InvalidUrl(format!("{}: {}", request.start_url, e)))?;
        Ok(InferenceResult {
            selector: Self::selector(&request.start_html),
            scope: Self::scope(&start),
            source: self.name().to_string(),
        })
    }
}

/// Analysis returned by the model
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
struct Analysis {
    #[serde(default)]
    scope_rules: ScopeRules,
    #[serde(default)]
    selector_spec: Option<SelectorSpec>,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
struct ScopeRules {
    /// Path substrings of documentation pages, e.g. "/docs/"
    #[serde(default)]
    include_patterns: Vec<String>,
    /// Path substrings of non-documentation pages, e.g. "/blog/"
    #[serde(default)]
    exclude_patterns: Vec<String>,
}

/// Refinement returned by the model
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
struct Refinement {
    #[serde(default)]
    prune_selectors: Vec<String>,
    #[serde(default)]
    notes: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-model inference over an OpenAI-compatible endpoint
pub struct LlmInference {
    config: LlmConfig,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl LlmInference {
    /// `None` when the config carries no API key
    pub fn new(config: LlmConfig, http: reqwest::Client) -> Option<Self> {
        config.is_available().then(|| Self {
            config,
            http,
            retry: RetryPolicy::new(
                CHAT_MAX_ATTEMPTS,
                Duration::from_secs(3),
                Duration::from_secs(30),
                2.0,
            ),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// One chat completion, retried on transient failures and empty replies
    #[instrument(skip(self, system, prompt), fields(model = %self.config.model))]
    async fn chat(&self, system: &str, prompt: &str) -> Result<String, ScrapeError> {
        let body = json!({
            "model": self.config.model,
            "temperature": 0.1,
            "max_tokens": 2000,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
        });

        let mut tracker = RetryTracker::new(self.retry.clone());
        loop {
            tracker.begin_attempt();
            let error = match self.chat_once(&body).await {
                Ok(text) => {
                    tracker.record_success();
                    return Ok(text);
                }
                Err(e) => e,
            };
            let failure = match &error {
                ScrapeError::Inference(_) => FailureType::Transient,
                other => other.failure_type(),
            };
            match tracker.record_failure(failure) {
                RetryDecision::Retry { delay, attempt } => {
                    debug!(attempt, ?delay, error = %error, "Retrying chat completion");
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    warn!(%reason, error = %error, "Chat completion failed");
                    return Err(error);
                }
            }
        }
    }

    async fn chat_once(&self, body: &serde_json::Value) -> Result<String, ScrapeError> {
        let mut request = self
            .http
            .post(&self.config.endpoint)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .timeout(CHAT_TIMEOUT)
            .json(body);
        if let Some(key) = &self.config.api_key {
            request = request.header(AUTHORIZATION, format!("Bearer {}", key));
        }
        let response = request.send().await.map_err(ScrapeError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(ScrapeError::HttpStatus(response.status().as_u16()));
        }
        let parsed: ChatResponse = response.json().await.map_err(ScrapeError::from_reqwest)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ScrapeError::Inference("empty model response".to_string()))
    }

    fn analysis_prompt(&self, request: &InferenceRequest, feedback: Option<&str>) -> String {
        let start_path = Url::parse(&request.start_url)
            .map(|u| u.path().to_string())
            .unwrap_or_default();
        let mut examples: Vec<&String> = request.link_paths.iter().collect();
        examples.sort();
        let examples: Vec<String> = examples
            .into_iter()
            .take(EXAMPLE_URLS)
            .map(|p| format!("  {}", p))
            .collect();

        let mut prompt = format!(
            "Analyze this documentation website so it can be extracted programmatically.\n\n\
             Start URL: {}\nBase host: {}\n\nStart page HTML (truncated):\n```html\n{}\n```\n",
            request.start_url,
            request.base_host,
            sanitize_html(&request.start_html),
        );
        if let Some(feedback) = feedback.or(request.feedback.as_deref()) {
            prompt.push_str(&format!("\nFEEDBACK FROM PREVIOUS ATTEMPT:\n{}\n", feedback));
        }
        prompt.push_str(&format!(
            "\nLinks discovered on the site, grouped by first path segment:\n{}\n\n\
             Example paths:\n{}\n\n\
             Return scope_rules (include_patterns and exclude_patterns, matched as substrings \
             of the URL path, e.g. \"/docs/\"; never anchor with ^) and selector_spec \
             (content_selector for the main documentation container, prune_selectors for UI \
             elements inside it, notes). The include patterns MUST match the start path {:?}. \
             Exclude blog, news, pricing, login, downloads, and other languages.",
            link_summary(&request.link_paths),
            examples.join("\n"),
            start_path,
        ));
        prompt
    }

    fn refine_prompt(&self, current: &SelectorSpec, request: &InferenceRequest) -> String {
        let samples: String = request
            .samples
            .iter()
            .take(MAX_REFINE_SAMPLES)
            .enumerate()
            .map(|(i, s)| {
                let preview: String = s.chars().take(SAMPLE_PREVIEW_CHARS).collect();
                format!("\n--- SAMPLE PAGE {} ---\n{}\n", i + 1, preview)
            })
            .collect();
        format!(
            "These CSS selectors were chosen for a documentation site:\n\
             content_selector: {}\nprune_selectors: {:?}\n\n\
             Start page HTML (truncated):\n```html\n{}\n```\n\n\
             Markdown extracted with those selectors:{}\n\n\
             The output still contains repeated UI residue (navigation, breadcrumbs, badges, \
             keyboard hints). Return NEW prune_selectors targeting the HTML elements that \
             produce it, without removing documentation content, and notes on what was added.",
            current.content_selector,
            current.prune_selectors,
            sanitize_html(&request.start_html),
            samples,
        )
    }
}

#[async_trait]
impl ScopeInference for LlmInference {
    fn name(&self) -> &'static str {
        "llm"
    }

    fn refines(&self) -> bool {
        true
    }

    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResult, ScrapeError> {
        let start = Url::parse(&request.start_url)
            .map_err(|e| ScrapeError::InvalidUrl(format!("{}: {}", request.start_url, e)))?;
        let system = system_prompt::<Analysis>();
        let mut feedback: Option<String> = None;
        let mut last_selector: Option<SelectorSpec> = None;

        for attempt in 1..=SCOPE_VALIDATION_ATTEMPTS {
            let reply = self
                .chat(&system, &self.analysis_prompt(request, feedback.as_deref()))
                .await?;
            let analysis: Analysis = match parse_json_reply(&reply) {
                Ok(analysis) => analysis,
                Err(e) => {
                    warn!(attempt, error = %e, "Model returned invalid analysis JSON");
                    continue;
                }
            };
            let selector = analysis
                .selector_spec
                .filter(|s| !s.content_selector.trim().is_empty());
            let scope = scope_from_patterns(&start, &analysis.scope_rules);
            info!(
                attempt,
                include = ?scope.include,
                exclude = ?scope.exclude,
                content_selector = selector.as_ref().map(|s| s.content_selector.as_str()),
                "Model analysis"
            );

            if scope.matches(&start) {
                if let Some(selector) = selector {
                    return Ok(InferenceResult {
                        selector,
                        scope,
                        source: self.name().to_string(),
                    });
                }
            } else {
                warn!(attempt, "Model scope rejects the start URL");
            }
            feedback = Some(scope_feedback(&start, &scope, &request.link_paths));
            last_selector = selector.or(last_selector);
        }

        // keep whatever selector the model gave, with the start-URL scope
        let selector = last_selector
            .ok_or_else(|| ScrapeError::Inference("model produced no usable analysis".to_string()))?;
        Ok(InferenceResult {
            selector,
            scope: HeuristicInference::scope(&start),
            source: format!("{}+heuristic-scope", self.name()),
        })
    }

    async fn refine(
        &self,
        current: &InferenceResult,
        request: &InferenceRequest,
    ) -> Result<SelectorSpec, ScrapeError> {
        if request.samples.is_empty() {
            return Ok(current.selector.clone());
        }
        let system = system_prompt::<Refinement>();
        let reply = self
            .chat(&system, &self.refine_prompt(&current.selector, request))
            .await?;
        let refinement: Refinement = parse_json_reply(&reply)?;
        let added = refinement
            .prune_selectors
            .iter()
            .filter(|s| !current.selector.prune_selectors.contains(s))
            .count();
        info!(added, notes = %refinement.notes, "Refined prune selectors");
        Ok(current.selector.merged_with(&SelectorSpec {
            content_selector: current.selector.content_selector.clone(),
            prune_selectors: refinement.prune_selectors,
            notes: refinement.notes,
        }))
    }
}

fn system_prompt<T: JsonSchema>() -> String {
    let schema = serde_json::to_string(&schema_for!(T)).unwrap_or_default();
    format!(
        "You analyze documentation websites. Reply with a single JSON object matching this \
         JSON Schema and nothing else:\n{}",
        schema
    )
}

/// Parse a model reply, tolerating surrounding code fences
fn parse_json_reply<T: for<'de> Deserialize<'de>>(reply: &str) -> Result<T, ScrapeError> {
    Ok(serde_json::from_str(strip_code_fences(reply))?)
}

pub(crate) fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}

/// Turn model patterns into path substrings. Anchors and trailing
/// wildcards are dropped; anything still regex-like is discarded.
fn scope_from_patterns(start: &Url, rules: &ScopeRules) -> ScopeRule {
    let clean = |p: &String| -> Option<String> {
        let p = p.trim().trim_start_matches('^').trim_end_matches('$');
        let p = p.strip_suffix(".*").unwrap_or(p).replace("\\.", ".").replace("\\/", "/");
        let regex_like = p.chars().any(|c| matches!(c, '*' | '+' | '?' | '(' | ')' | '[' | ']' | '|' | '\\'));
        (!p.is_empty() && !regex_like).then_some(p)
    };
    let mut scope = ScopeRule::for_url(start);
    for p in rules.include_patterns.iter().filter_map(clean) {
        scope = scope.include(p);
    }
    for p in rules.exclude_patterns.iter().filter_map(clean) {
        scope = scope.exclude(p);
    }
    scope
}

fn scope_feedback(start: &Url, scope: &ScopeRule, link_paths: &[String]) -> String {
    let rejected: Vec<&String> = link_paths
        .iter()
        .filter(|p| !scope.matches_path(p))
        .take(EXAMPLE_URLS)
        .collect();
    let mut lines = vec![format!(
        "Your scope rules matched {} of {} discovered paths.",
        link_paths.len() - link_paths.iter().filter(|p| !scope.matches_path(p)).count(),
        link_paths.len()
    )];
    if !scope.matches(start) {
        lines.push(format!(
            "They reject the start path {:?}, which MUST match.",
            start.path()
        ));
    }
    if !rejected.is_empty() {
        lines.push("Rejected paths:".to_string());
        lines.extend(rejected.into_iter().map(|p| format!("  {}", p)));
    }
    lines.push("Use plain path substrings such as \"/docs/\", never ^-anchored regexes.".to_string());
    lines.join("\n")
}

/// Paths grouped by first segment, a few examples each
fn link_summary(paths: &[String]) -> String {
    let mut groups: BTreeMap<String, Vec<&String>> = BTreeMap::new();
    for path in paths {
        let key = crate::canonical::first_segment(path)
            .map(|s| format!("/{}/", s))
            .unwrap_or_else(|| "/".to_string());
        groups.entry(key).or_default().push(path);
    }
    let mut out = Vec::new();
    for (key, paths) in groups {
        out.push(format!("{} ({} URLs)", key, paths.len()));
        out.extend(paths.iter().take(LINK_GROUP_PREVIEW).map(|p| format!("  {}", p)));
        if paths.len() > LINK_GROUP_PREVIEW {
            out.push(format!("  ... and {} more", paths.len() - LINK_GROUP_PREVIEW));
        }
    }
    out.join("\n")
}

/// HTML without scripts and embeds, truncated for a prompt
fn sanitize_html(html: &str) -> String {
    let mut document = Html::parse_document(html);
    let mut doomed = Vec::new();
    if let Ok(selector) = Selector::parse("script, style, noscript, iframe, object, embed, svg") {
        doomed.extend(document.select(&selector).map(|el| el.id()));
    }
    for id in doomed {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }
    document
        .root_element()
        .html()
        .chars()
        .take(HTML_PREVIEW_CHARS)
        .collect()
}
