//! DocScout - documentation sites to per-page markdown for coding agents
//!
//! Given a start URL, DocScout picks a fetch engine, discovers the pages
//! that make up the documentation, infers where the content lives on each
//! page, and writes one cleaned markdown file per page plus a compact
//! `AGENTS.md` index.
//!
//! ## Pipeline
//!
//! [`Pipeline`] sequences the stages:
//!
//! 1. [`EngineSelector`] compares a plain fetch with a rendered one
//! 2. [`DiscoveryResolver`] tries repository, sitemap, navigation, and crawl
//!    strategies in order
//! 3. a [`ScopeInference`] collaborator issues the content selector and scope
//! 4. [`Crawler`] fetches, extracts, cleans, and writes pages; passes with
//!    too low a yield are retried once with re-inferred selectors
//! 5. [`dedupe_directory`] strips boilerplate repeated across pages
//!
//! ```no_run
//! # async fn run() -> Result<(), docscout::ScrapeError> {
//! let report = docscout::Pipeline::builder("https://docs.example.com/guide/")
//!     .output_dir("out")
//!     .max_pages(200)
//!     .build()?
//!     .run()
//!     .await?;
//! println!("{} pages in {}", report.pages_written, report.index_path.display());
//! # Ok(())
//! # }
//! ```

pub mod canonical;
pub mod clean;
pub mod client;
pub mod config;
pub mod convert;
pub mod crawler;
pub mod dedup;
pub mod discovery;
pub mod engine;
mod error;
pub mod extract;
pub mod index;
pub mod inference;
pub mod pipeline;
pub mod render;
pub mod retry;
pub mod scoring;
mod types;

pub use client::{ClientOptions, PageClient};
pub use config::{LlmConfig, LocaleMode, PipelineConfig};
pub use crawler::{CrawlPass, Crawler};
pub use dedup::{dedupe_directory, DedupConfig, DedupReport};
pub use discovery::{DiscoveryContext, DiscoveryResolver, DiscoveryResult, DiscoveryStrategy};
pub use engine::EngineSelector;
pub use error::ScrapeError;
pub use inference::{HeuristicInference, InferenceRequest, InferenceResult, LlmInference, ScopeInference};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineReport};
pub use render::{RenderEngine, RenderSession};
pub use retry::{RetryPolicy, RetryTracker};
pub use types::{
    DiscoverySource, EngineDecision, EngineMetrics, EngineMode, EvidencePage, Frontier, Manifest,
    ManifestEntry, PreviewMetrics, ScopeRule, SelectorSpec, UrlRecord,
};

#[cfg(feature = "chrome")]
pub use render::ChromeEngine;

/// Default User-Agent string
pub const DEFAULT_USER_AGENT: &str = "Everruns DocScout/1.0";
