//! DocScout CLI - turn a documentation site into per-page markdown

use clap::{Parser, Subcommand};
use docscout::{
    LlmConfig, LlmInference, LocaleMode, Pipeline, PipelineBuilder, PipelineReport,
    RenderEngine,
};
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// DocScout - documentation sites to markdown for coding agents
#[derive(Parser, Debug)]
#[command(name = "docscout")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scrape a documentation site into an output directory
    Run {
        /// Start URL of the documentation
        url: String,

        /// Output directory
        #[arg(long, short, default_value = "docscout-output")]
        output: PathBuf,

        /// Maximum pages to crawl
        #[arg(long, default_value_t = docscout::config::DEFAULT_MAX_PAGES)]
        max_pages: usize,

        /// Concurrent fetches in plain-fetch mode
        #[arg(long, default_value_t = docscout::config::DEFAULT_WORKERS)]
        workers: usize,

        /// Locale to keep: auto, off, or a code such as "de"
        #[arg(long, default_value = "auto")]
        locale: LocaleMode,

        /// Use the heuristic selector instead of a language model
        #[arg(long)]
        no_llm: bool,

        /// Chat model for selector inference
        #[arg(long, env = "DOCSCOUT_LLM_MODEL")]
        llm_model: Option<String>,

        /// OpenAI-compatible chat completions URL
        #[arg(long, env = "DOCSCOUT_LLM_ENDPOINT")]
        llm_endpoint: Option<String>,

        /// API key for the chat endpoint (OPENROUTER_API_KEY is also read)
        #[arg(long, env = "DOCSCOUT_LLM_API_KEY", hide_env_values = true)]
        llm_api_key: Option<String>,

        #[command(flatten)]
        common: CommonArgs,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the engine decision for a URL as JSON
    Engine {
        url: String,

        #[command(flatten)]
        common: CommonArgs,
    },
    /// Print the discovered frontier and scope
    Discover {
        url: String,

        /// Print JSON instead of one URL per line
        #[arg(long)]
        json: bool,

        /// Locale to keep: auto, off, or a code such as "de"
        #[arg(long, default_value = "auto")]
        locale: LocaleMode,

        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(clap::Args, Debug)]
struct CommonArgs {
    /// Custom User-Agent
    #[arg(long)]
    user_agent: Option<String>,

    /// Render pages in headless Chrome when the site needs it
    #[arg(long)]
    render: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            url,
            output,
            max_pages,
            workers,
            locale,
            no_llm,
            llm_model,
            llm_endpoint,
            llm_api_key,
            common,
            json,
        } => {
            let mut builder = builder(&url, &common)
                .output_dir(output)
                .max_pages(max_pages)
                .workers(workers)
                .locale(locale);
            if !no_llm {
                let mut llm = LlmConfig::from_env();
                if let Some(model) = llm_model {
                    llm.model = model;
                }
                if let Some(endpoint) = llm_endpoint {
                    llm.endpoint = endpoint;
                }
                if llm_api_key.is_some() {
                    llm.api_key = llm_api_key;
                }
                match LlmInference::new(llm, reqwest_client(&common)) {
                    Some(inference) => builder = builder.inference(Arc::new(inference)),
                    None => warn!("No LLM API key set; using heuristic selectors"),
                }
            }
            run_pipeline(builder, json).await
        }
        Commands::Engine { url, common } => run_engine(builder(&url, &common)).await,
        Commands::Discover {
            url,
            json,
            locale,
            common,
        } => run_discover(builder(&url, &common).locale(locale), json).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Log to stderr so stdout stays machine readable
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("docscout=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn builder(url: &str, common: &CommonArgs) -> PipelineBuilder {
    let mut builder = Pipeline::builder(url);
    if let Some(ua) = &common.user_agent {
        builder = builder.user_agent(ua.clone());
    }
    if common.render {
        if let Some(engine) = render_engine() {
            builder = builder.render_engine(engine);
        }
    }
    builder
}

fn reqwest_client(common: &CommonArgs) -> reqwest::Client {
    let ua = common
        .user_agent
        .clone()
        .unwrap_or_else(|| docscout::DEFAULT_USER_AGENT.to_string());
    reqwest::Client::builder()
        .user_agent(ua)
        .build()
        .unwrap_or_default()
}

#[cfg(feature = "chrome")]
fn render_engine() -> Option<Arc<dyn RenderEngine>> {
    let engine = docscout::ChromeEngine::new();
    if engine.is_available() {
        Some(Arc::new(engine))
    } else {
        warn!("Chrome not found; rendering disabled");
        None
    }
}

#[cfg(not(feature = "chrome"))]
fn render_engine() -> Option<Arc<dyn RenderEngine>> {
    warn!("Built without the chrome feature; rendering disabled");
    None
}

async fn run_pipeline(builder: PipelineBuilder, json: bool) -> Result<(), docscout::ScrapeError> {
    let report = builder.build()?.run().await?;
    if json {
        writeln_safe(&to_json(&report)?);
    } else {
        writeln_safe(&format_summary(&report));
    }
    Ok(())
}

async fn run_engine(builder: PipelineBuilder) -> Result<(), docscout::ScrapeError> {
    let decision = builder.build()?.select_engine().await;
    writeln_safe(&to_json(&decision)?);
    Ok(())
}

async fn run_discover(builder: PipelineBuilder, json: bool) -> Result<(), docscout::ScrapeError> {
    let pipeline = builder.build()?;
    let mode = pipeline.select_engine().await.mode;
    let result = pipeline.discover(mode).await?;
    if json {
        writeln_safe(&to_json(&result)?);
    } else {
        let mut lines = vec![format!(
            "# {} via {} (include: {:?}, exclude: {:?})",
            result.frontier.len(),
            result.strategy,
            result.scope.include,
            result.scope.exclude
        )];
        lines.extend(result.frontier.iter().map(|r| r.url.clone()));
        writeln_safe(&lines.join("\n"));
    }
    Ok(())
}

fn to_json<T: Serialize>(value: &T) -> Result<String, docscout::ScrapeError> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Short human-readable run summary
fn format_summary(report: &PipelineReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("Source:    {}\n", report.start_url));
    out.push_str(&format!(
        "Engine:    {} ({})\n",
        report.engine.mode, report.engine.reason
    ));
    out.push_str(&format!(
        "Discovery: {} URLs via {}, {} in scope\n",
        report.discovered, report.discovery_strategy, report.frontier
    ));
    out.push_str(&format!(
        "Selector:  {} [{}]\n",
        report.selector.content_selector, report.inference_source
    ));
    out.push_str(&format!(
        "Crawl:     {} pages written ({:.0}% success, {} pass{})\n",
        report.pages_written,
        report.success_rate * 100.0,
        report.crawl_attempts,
        if report.crawl_attempts == 1 { "" } else { "es" }
    ));
    out.push_str(&format!(
        "Dedup:     {} repeated blocks removed from {} files\n",
        report.dedup.blocks_removed, report.dedup.files_rewritten
    ));
    out.push_str(&format!("Index:     {}", report.index_path.display()));
    out
}

/// Write to stdout, exit silently on broken pipe
fn writeln_safe(s: &str) {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if let Err(e) = writeln!(handle, "{}", s) {
        if e.kind() == io::ErrorKind::BrokenPipe {
            std::process::exit(0);
        }
        eprintln!("Error writing to stdout: {}", e);
        std::process::exit(1);
    }
}
