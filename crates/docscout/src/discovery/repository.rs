//! GitHub repository shortcut
//!
//! Handles `https://github.com/{owner}/{repo}[/tree|blob/{branch}/{subpath}]`,
//! listing markdown files through the git trees API and emitting their raw
//! content URLs. When the API refuses, the HTML tree pages are scraped for
//! markdown blob links instead.

use super::sitemap::title_from_path;
use super::{DiscoveryContext, DiscoveryStrategy};
use crate::error::ScrapeError;
use crate::types::{host_key, DiscoverySource, ScopeRule, UrlRecord};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT};
use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// First-byte timeout for API requests
const API_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_API_BASE: &str = "https://api.github.com";
const DEFAULT_RAW_BASE: &str = "https://raw.githubusercontent.com";
const DEFAULT_WEB_BASE: &str = "https://github.com";
const FALLBACK_BRANCH: &str = "main";

/// Owner names that are GitHub pages, not accounts
const RESERVED_OWNERS: &[&str] = &[
    "settings",
    "explore",
    "trending",
    "collections",
    "events",
    "sponsors",
    "notifications",
    "marketplace",
    "pulls",
    "issues",
    "codespaces",
    "features",
    "enterprise",
    "organizations",
    "pricing",
    "about",
    "team",
    "security",
    "login",
    "join",
];

/// Directories never holding project documentation
const EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    "vendor",
    "test",
    "tests",
    "__pycache__",
    "dist",
    "build",
    "coverage",
];

/// Directories scraped by the HTML fallback; empty is the repository root
const FALLBACK_DIRS: &[&str] = &["docs", "documentation", "doc", ""];

/// Parsed repository URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RepoRef {
    pub owner: String,
    pub repo: String,
    pub branch: Option<String>,
    pub subpath: String,
}

/// GitHub API repository response (partial)
#[derive(Debug, Deserialize)]
struct GitHubRepo {
    default_branch: String,
}

/// GitHub git trees response
#[derive(Debug, Deserialize)]
struct GitTree {
    tree: Vec<GitTreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct GitTreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

/// Repository discovery through the GitHub API
pub struct RepositoryStrategy {
    api_base: String,
    raw_base: String,
    web_base: String,
}

impl RepositoryStrategy {
    pub fn new() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            raw_base: DEFAULT_RAW_BASE.to_string(),
            web_base: DEFAULT_WEB_BASE.to_string(),
        }
    }

    /// Point API calls elsewhere (GitHub Enterprise, test servers)
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_raw_base(mut self, base: impl Into<String>) -> Self {
        self.raw_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_web_base(mut self, base: impl Into<String>) -> Self {
        self.web_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Extract owner, repo, and optional branch/subpath from a GitHub URL
    pub(crate) fn parse_github_url(url: &Url) -> Option<RepoRef> {
        if !matches!(url.host_str(), Some("github.com") | Some("www.github.com")) {
            return None;
        }
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        if segments.len() < 2 {
            return None;
        }
        let owner = segments[0];
        let repo = segments[1].trim_end_matches(".git");
        if owner.is_empty() || repo.is_empty() || RESERVED_OWNERS.contains(&owner) {
            return None;
        }

        let (branch, subpath) = match segments.get(2) {
            None => (None, String::new()),
            Some(&"tree") | Some(&"blob") if segments.len() >= 4 => {
                (Some(segments[3].to_string()), segments[4..].join("/"))
            }
            // issues, pulls, wiki and friends are not documentation trees
            Some(_) => return None,
        };

        Some(RepoRef {
            owner: owner.to_string(),
            repo: repo.to_string(),
            branch,
            subpath,
        })
    }

    fn raw_url(&self, repo: &RepoRef, branch: &str, path: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.raw_base, repo.owner, repo.repo, branch, path
        )
    }

    async fn default_branch(&self, ctx: &DiscoveryContext, repo: &RepoRef) -> String {
        let url = format!("{}/repos/{}/{}", self.api_base, repo.owner, repo.repo);
        let response = ctx
            .client
            .http()
            .get(&url)
            .header(ACCEPT, HeaderValue::from_static("application/vnd.github+json"))
            .timeout(API_TIMEOUT)
            .send()
            .await;
        match response {
            Ok(r) if r.status().is_success() => match r.json::<GitHubRepo>().await {
                Ok(info) => info.default_branch,
                Err(e) => {
                    debug!(error = %e, "Unreadable repository metadata");
                    FALLBACK_BRANCH.to_string()
                }
            },
            Ok(r) => {
                debug!(status = r.status().as_u16(), "Repository metadata unavailable");
                FALLBACK_BRANCH.to_string()
            }
            Err(e) => {
                debug!(error = %e, "Repository metadata request failed");
                FALLBACK_BRANCH.to_string()
            }
        }
    }

    async fn from_tree_api(
        &self,
        ctx: &DiscoveryContext,
        repo: &RepoRef,
        branch: &str,
    ) -> Result<Vec<String>, ScrapeError> {
        let url = format!(
            "{}/repos/{}/{}/git/trees/{}?recursive=1",
            self.api_base, repo.owner, repo.repo, branch
        );
        let response = ctx
            .client
            .http()
            .get(&url)
            .header(ACCEPT, HeaderValue::from_static("application/vnd.github+json"))
            .timeout(API_TIMEOUT)
            .send()
            .await
            .map_err(ScrapeError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(ScrapeError::HttpStatus(response.status().as_u16()));
        }
        let tree: GitTree = response.json().await.map_err(ScrapeError::from_reqwest)?;
        if tree.truncated {
            warn!("Repository tree listing was truncated by the API");
        }
        Ok(tree
            .tree
            .into_iter()
            .filter(|entry| entry.kind == "blob")
            .map(|entry| entry.path)
            .collect())
    }

    async fn from_html_tree(
        &self,
        ctx: &DiscoveryContext,
        repo: &RepoRef,
        branch: &str,
    ) -> Vec<String> {
        let marker = format!("/{}/{}/blob/{}/", repo.owner, repo.repo, branch);
        let mut paths = Vec::new();
        for dir in FALLBACK_DIRS {
            let page = if dir.is_empty() {
                format!("{}/{}/{}", self.web_base, repo.owner, repo.repo)
            } else {
                format!(
                    "{}/{}/{}/tree/{}/{}",
                    self.web_base, repo.owner, repo.repo, branch, dir
                )
            };
            if let Some(html) = ctx.fetch_html(&page).await {
                paths.extend(blob_paths(&html, &marker));
            }
        }
        paths
    }
}

impl Default for RepositoryStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoveryStrategy for RepositoryStrategy {
    fn name(&self) -> &'static str {
        "repository"
    }

    fn source(&self) -> DiscoverySource {
        DiscoverySource::Repository
    }

    fn min_results(&self) -> usize {
        1
    }

    fn matches(&self, url: &Url) -> bool {
        Self::parse_github_url(url).is_some()
    }

    fn scope_for(&self, start_url: &Url) -> Option<ScopeRule> {
        let repo = Self::parse_github_url(start_url)?;
        let raw = Url::parse(&self.raw_base).ok()?;
        Some(ScopeRule::new(host_key(&raw)).include(format!("/{}/{}/", repo.owner, repo.repo)))
    }

    async fn discover(&self, ctx: &DiscoveryContext) -> Result<Vec<UrlRecord>, ScrapeError> {
        let repo = Self::parse_github_url(&ctx.start_url).ok_or_else(|| {
            ScrapeError::InvalidUrl(format!("not a GitHub repository: {}", ctx.start_url))
        })?;
        let branch = match &repo.branch {
            Some(branch) => branch.clone(),
            None => self.default_branch(ctx, &repo).await,
        };
        debug!(owner = %repo.owner, repo = %repo.repo, branch = %branch, "Listing repository");

        let paths = match self.from_tree_api(ctx, &repo, &branch).await {
            Ok(paths) => paths,
            Err(e) => {
                warn!(error = %e, "Tree API unavailable, scraping repository pages");
                self.from_html_tree(ctx, &repo, &branch).await
            }
        };

        let mut docs: Vec<(bool, String)> = paths
            .into_iter()
            .filter(|path| is_doc_file(path, &repo.subpath))
            .map(|path| (is_priority(&path), path))
            .collect();
        docs.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        let mut seen = HashSet::new();
        docs.retain(|(_, path)| seen.insert(path.clone()));

        info!(files = docs.len(), "Repository discovery finished");
        Ok(docs
            .into_iter()
            .map(|(_, path)| {
                UrlRecord::new(self.raw_url(&repo, &branch, &path), DiscoverySource::Repository)
                    .with_title(file_title(&path))
            })
            .collect())
    }
}

/// Markdown file under `subpath`, outside hidden and build directories
fn is_doc_file(path: &str, subpath: &str) -> bool {
    let lower = path.to_lowercase();
    if !(lower.ends_with(".md") || lower.ends_with(".mdx")) {
        return false;
    }
    let subpath = subpath.trim_matches('/');
    if !subpath.is_empty() && path != subpath && !path.starts_with(&format!("{}/", subpath)) {
        return false;
    }
    let parts: Vec<&str> = path.split('/').collect();
    if parts.iter().any(|p| p.starts_with('.')) {
        return false;
    }
    let dirs = &parts[..parts.len().saturating_sub(1)];
    !dirs
        .iter()
        .any(|d| EXCLUDED_DIRS.contains(&d.to_lowercase().as_str()))
}

fn is_priority(path: &str) -> bool {
    let lower = path.to_lowercase();
    lower.starts_with("docs/")
        || lower.starts_with("documentation/")
        || lower == "readme.md"
        || lower.contains("guide")
        || lower.contains("tutorial")
}

fn file_title(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    let stem = name
        .strip_suffix(".mdx")
        .or_else(|| name.strip_suffix(".md"))
        .unwrap_or(name);
    title_from_path(&stem.replace('_', "-"))
}

/// Repository-relative paths of markdown blob links on a GitHub HTML page
fn blob_paths(html: &str, marker: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(links) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    document
        .select(&links)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| href.split_once(marker).map(|(_, path)| path.to_string()))
        .filter(|path| path.to_lowercase().ends_with(".md"))
        .collect()
}
