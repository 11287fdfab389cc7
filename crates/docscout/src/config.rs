//! Run configuration

use crate::canonical::detect_locale;
use crate::dedup::DedupConfig;
use crate::discovery::DiscoveryLimits;
use crate::engine::DEFAULT_LENGTH_THRESHOLD;
use crate::retry::RetryPolicy;
use std::path::PathBuf;
use std::str::FromStr;
use url::Url;

/// Default cap on pages crawled per run
pub const DEFAULT_MAX_PAGES: usize = 500;

/// Default crawl worker count in plain-fetch mode
pub const DEFAULT_WORKERS: usize = 10;

/// Crawl success rate below which the selector is re-inferred
pub const DEFAULT_MIN_SUCCESS_RATE: f64 = 0.20;

/// Full crawls repeated after a low success rate
pub const DEFAULT_QUALITY_RETRIES: u32 = 1;

/// Pages crawled to give inference real extracted evidence
pub const DEFAULT_SAMPLE_SIZE: usize = 5;

/// Pages whose cleaned text is shorter than this are dropped
pub const DEFAULT_MIN_CONTENT_CHARS: usize = 20;

pub const DEFAULT_LLM_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_LLM_MODEL: &str = "qwen/qwen3-coder-next";

/// Which locale discovery keeps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LocaleMode {
    /// Locale of the start URL, if it carries one
    #[default]
    Auto,
    Fixed(String),
    Off,
}

impl LocaleMode {
    /// Target locale for a run starting at `start_url`
    pub fn target(&self, start_url: &Url) -> Option<String> {
        match self {
            LocaleMode::Auto => detect_locale(start_url),
            LocaleMode::Fixed(code) => Some(code.to_lowercase()),
            LocaleMode::Off => None,
        }
    }
}

impl FromStr for LocaleMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "auto" => Ok(LocaleMode::Auto),
            "off" | "none" => Ok(LocaleMode::Off),
            code if !code.is_empty()
                && code.len() <= 8
                && code.chars().all(|c| c.is_ascii_alphabetic() || c == '-') =>
            {
                Ok(LocaleMode::Fixed(code.to_string()))
            }
            other => Err(format!("invalid locale: {other:?}")),
        }
    }
}

/// Every tunable of a pipeline run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub start_url: String,
    pub output_dir: PathBuf,
    pub max_pages: usize,
    pub workers: usize,
    pub min_success_rate: f64,
    pub quality_retries: u32,
    pub sample_size: usize,
    pub engine_threshold: f64,
    pub min_content_chars: usize,
    pub dedup: DedupConfig,
    pub locale: LocaleMode,
    pub user_agent: Option<String>,
    pub retry: RetryPolicy,
    pub discovery: DiscoveryLimits,
    /// Use heuristic inference when the inference collaborator fails or is absent
    pub heuristic_fallback: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            start_url: String::new(),
            output_dir: PathBuf::from("docscout-output"),
            max_pages: DEFAULT_MAX_PAGES,
            workers: DEFAULT_WORKERS,
            min_success_rate: DEFAULT_MIN_SUCCESS_RATE,
            quality_retries: DEFAULT_QUALITY_RETRIES,
            sample_size: DEFAULT_SAMPLE_SIZE,
            engine_threshold: DEFAULT_LENGTH_THRESHOLD,
            min_content_chars: DEFAULT_MIN_CONTENT_CHARS,
            dedup: DedupConfig::default(),
            locale: LocaleMode::Auto,
            user_agent: None,
            retry: RetryPolicy::default(),
            discovery: DiscoveryLimits::default(),
            heuristic_fallback: true,
        }
    }
}

/// OpenAI-compatible chat endpoint used for selector and scope inference
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Full chat-completions URL
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_LLM_ENDPOINT.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            api_key: None,
        }
    }
}

impl LlmConfig {
    /// Read `DOCSCOUT_LLM_API_KEY` (or `OPENROUTER_API_KEY`),
    /// `DOCSCOUT_LLM_MODEL`, and `DOCSCOUT_LLM_ENDPOINT`
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            endpoint: var("DOCSCOUT_LLM_ENDPOINT").unwrap_or_else(|| DEFAULT_LLM_ENDPOINT.to_string()),
            model: var("DOCSCOUT_LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            api_key: var("DOCSCOUT_LLM_API_KEY").or_else(|| var("OPENROUTER_API_KEY")),
        }
    }

    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}
