//! Breadth-first crawl fallback

use super::{DiscoveryContext, DiscoveryStrategy};
use crate::error::ScrapeError;
use crate::extract::document_title;
use crate::types::{DiscoverySource, UrlRecord};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::{HashSet, VecDeque};
use std::sync::LazyLock;
use tracing::{debug, info};
use url::Url;

static LINKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

/// Follows in-scope links from the start URL until the page budget is spent
pub struct CrawlStrategy;

impl CrawlStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CrawlStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoveryStrategy for CrawlStrategy {
    fn name(&self) -> &'static str {
        "crawl"
    }

    fn source(&self) -> DiscoverySource {
        DiscoverySource::Crawl
    }

    fn min_results(&self) -> usize {
        1
    }

    async fn discover(&self, ctx: &DiscoveryContext) -> Result<Vec<UrlRecord>, ScrapeError> {
        let budget = ctx.limits.crawl_budget;
        let start = ctx
            .admit(&ctx.start_url, ctx.start_url.as_str())
            .unwrap_or_else(|| ctx.start_url.to_string());

        let mut queued: HashSet<String> = HashSet::from([start.clone()]);
        let mut queue = VecDeque::from([start]);
        let mut records = Vec::new();
        let mut prefetched = ctx.start_html.clone();

        while let Some(url) = queue.pop_front() {
            if records.len() >= budget {
                break;
            }
            // the start page is already in hand
            let html = match prefetched.take() {
                Some(html) => Some(html),
                None => ctx.fetch_html(&url).await,
            };
            let Some(html) = html else {
                continue;
            };
            let Ok(base) = Url::parse(&url) else {
                continue;
            };

            let (title, links) = page_links(&html);
            let mut record = UrlRecord::new(url.clone(), DiscoverySource::Crawl);
            if let Some(title) = title {
                record = record.with_title(title);
            }
            records.push(record);

            for href in links {
                if let Some(next) = ctx.admit(&base, &href) {
                    if queued.insert(next.clone()) {
                        queue.push_back(next);
                    }
                }
            }
            if records.len() % 20 == 0 {
                debug!(pages = records.len(), queued = queue.len(), "Crawl progress");
            }
        }

        info!(pages = records.len(), "Crawl discovery finished");
        Ok(records)
    }
}

/// First heading or `<title>`, and every href on the page
fn page_links(html: &str) -> (Option<String>, Vec<String>) {
    let document = Html::parse_document(html);
    let heading = Selector::parse("h1")
        .ok()
        .and_then(|h1| document.select(&h1).next())
        .map(|h| h.text().collect::<Vec<_>>().join(" "))
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty());
    let links = document
        .select(&LINKS)
        .filter_map(|a| a.value().attr("href"))
        .map(str::to_string)
        .collect();
    (heading.or_else(|| document_title(html)), links)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_links_prefers_heading() {
        let html = r#"<html><head><title>Site | Page</title></head>
            <body><h1> Install
            guide </h1><a href="/a">a</a><a href="b">b</a></body></html>"#;
        let (title, links) = page_links(html);
        assert_eq!(title.as_deref(), Some("Install guide"));
        assert_eq!(links, vec!["/a", "b"]);

        let (title, _) = page_links("<html><head><title>Only title</title></head></html>");
        assert_eq!(title.as_deref(), Some("Only title"));
    }
}
