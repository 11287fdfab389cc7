//! Sitemap discovery
//!
//! Locations come from `robots.txt` `Sitemap:` directives, else from the
//! first well-known path that answers. Index files are followed
//! breadth-first up to the depth limit; gzip bodies are inflated.

use super::{DiscoveryContext, DiscoveryStrategy};
use crate::client::FetchedBytes;
use crate::error::ScrapeError;
use crate::types::{DiscoverySource, UrlRecord};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::io::Read;
use std::sync::LazyLock;
use tracing::{debug, info, warn};
use url::Url;

/// Probed in order when robots.txt names no sitemap
const STANDARD_PATHS: &[&str] = &[
    "/sitemap.xml",
    "/sitemap_index.xml",
    "/sitemap-index.xml",
    "/sitemap1.xml",
];

const MIN_RESULTS: usize = 10;

static ROBOTS_SITEMAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*Sitemap:\s*(\S+)\s*$").expect("valid regex"));

static LOC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<loc>\s*(?:<!\[CDATA\[)?(.*?)(?:\]\]>)?\s*</loc>").expect("valid regex")
});

/// Sitemap-based discovery
pub struct SitemapStrategy;

impl SitemapStrategy {
    pub fn new() -> Self {
        Self
    }

    async fn locations(&self, ctx: &DiscoveryContext) -> Vec<(String, Option<FetchedBytes>)> {
        let origin = ctx.origin();
        let robots_url = format!("{}/robots.txt", origin);
        if let Some(robots) = ctx.fetch_html(&robots_url).await {
            let listed = parse_robots(&robots);
            if !listed.is_empty() {
                debug!(count = listed.len(), "Sitemaps listed in robots.txt");
                return listed.into_iter().map(|url| (url, None)).collect();
            }
        }

        for path in STANDARD_PATHS {
            let url = format!("{}{}", origin, path);
            match ctx.client.get_bytes(&url).await {
                Ok(body) => return vec![(url, Some(body))],
                Err(e) => debug!(url = %url, error = %e, "Sitemap probe failed"),
            }
        }
        Vec::new()
    }
}

impl Default for SitemapStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoveryStrategy for SitemapStrategy {
    fn name(&self) -> &'static str {
        "sitemap"
    }

    fn source(&self) -> DiscoverySource {
        DiscoverySource::Sitemap
    }

    fn min_results(&self) -> usize {
        MIN_RESULTS
    }

    async fn discover(&self, ctx: &DiscoveryContext) -> Result<Vec<UrlRecord>, ScrapeError> {
        let cap = ctx.limits.sitemap_max_urls;
        let max_depth = ctx.limits.sitemap_max_depth;
        let mut queue: VecDeque<(String, usize, Option<FetchedBytes>)> = self
            .locations(ctx)
            .await
            .into_iter()
            .map(|(url, body)| (url, 0, body))
            .collect();
        let mut visited = HashSet::new();
        let mut records = Vec::new();
        let mut seen = HashSet::new();

        while let Some((url, depth, body)) = queue.pop_front() {
            if records.len() >= cap {
                warn!(cap, "Sitemap URL cap reached");
                break;
            }
            if depth > max_depth || !visited.insert(url.clone()) {
                continue;
            }
            let body = match body {
                Some(body) => body,
                None => match ctx.client.get_bytes(&url).await {
                    Ok(body) => body,
                    Err(e) => {
                        debug!(url = %url, error = %e, "Sitemap fetch failed");
                        continue;
                    }
                },
            };
            let xml = decode_sitemap(&url, &body);
            let locs = extract_locs(&xml);

            if is_sitemap_index(&xml) {
                debug!(url = %url, children = locs.len(), "Sitemap index");
                queue.extend(locs.into_iter().map(|loc| (loc, depth + 1, None)));
                continue;
            }

            for loc in locs {
                if records.len() >= cap {
                    break;
                }
                let Ok(parsed) = Url::parse(&loc) else {
                    continue;
                };
                let Some(canonical) = ctx.admit(&parsed, &loc) else {
                    continue;
                };
                if seen.insert(canonical.clone()) {
                    records.push(
                        UrlRecord::new(canonical, DiscoverySource::Sitemap)
                            .with_title(title_from_path(parsed.path())),
                    );
                }
            }
        }

        info!(urls = records.len(), "Sitemap discovery finished");
        Ok(records)
    }
}

/// `Sitemap:` directives in a robots.txt body
pub(crate) fn parse_robots(body: &str) -> Vec<String> {
    ROBOTS_SITEMAP
        .captures_iter(body)
        .map(|c| c[1].to_string())
        .collect()
}

/// Sitemap text, inflating gzip when the URL or content type says so
pub(crate) fn decode_sitemap(url: &str, body: &FetchedBytes) -> String {
    let gzipped = url.ends_with(".gz")
        || body
            .content_type
            .as_deref()
            .map(|ct| ct.contains("gzip"))
            .unwrap_or(false);
    if gzipped {
        let mut text = String::new();
        match GzDecoder::new(&body.body[..]).read_to_string(&mut text) {
            Ok(_) => return text,
            // already inflated in transit
            Err(e) => debug!(url, error = %e, "Sitemap is not gzip, reading as text"),
        }
    }
    String::from_utf8_lossy(&body.body).into_owned()
}

pub(crate) fn is_sitemap_index(xml: &str) -> bool {
    xml.contains("<sitemapindex")
}

pub(crate) fn extract_locs(xml: &str) -> Vec<String> {
    LOC.captures_iter(xml)
        .map(|c| unescape_xml(c[1].trim()))
        .filter(|loc| !loc.is_empty())
        .collect()
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Human title from a URL path: `/docs/getting-started` → `Docs > Getting Started`
pub fn title_from_path(path: &str) -> String {
    let path = path.trim_matches('/');
    if path.is_empty() {
        return "Index".to_string();
    }
    let spaced = path.replace('/', " > ").replace('-', " ");
    let mut title = String::with_capacity(spaced.len());
    let mut previous_alpha = false;
    for c in spaced.chars() {
        if c.is_alphabetic() {
            if previous_alpha {
                title.extend(c.to_lowercase());
            } else {
                title.extend(c.to_uppercase());
            }
            previous_alpha = true;
        } else {
            title.push(c);
            previous_alpha = false;
        }
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_title_from_path() {
        assert_eq!(title_from_path("/docs/getting-started"), "Docs > Getting Started");
        assert_eq!(title_from_path("/"), "Index");
        assert_eq!(title_from_path("/api/v2x/"), "Api > V2X");
    }

    #[test]
    fn test_parse_robots() {
        let robots = "User-agent: *\nDisallow: /admin\nsitemap: https://x.test/a.xml\nSitemap:https://x.test/b.xml.gz\n";
        assert_eq!(
            parse_robots(robots),
            vec!["https://x.test/a.xml", "https://x.test/b.xml.gz"]
        );
    }

    #[test]
    fn test_extract_locs_and_index() {
        let index = r#"<?xml version="1.0"?>
            <sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <sitemap><loc>https://x.test/docs.xml</loc></sitemap>
              <sitemap><loc><![CDATA[https://x.test/api.xml]]></loc></sitemap>
            </sitemapindex>"#;
        assert!(is_sitemap_index(index));
        assert_eq!(
            extract_locs(index),
            vec!["https://x.test/docs.xml", "https://x.test/api.xml"]
        );

        let urlset = "<urlset><url><loc> https://x.test/a?x=1&amp;y=2 </loc></url></urlset>";
        assert!(!is_sitemap_index(urlset));
        assert_eq!(extract_locs(urlset), vec!["https://x.test/a?x=1&y=2"]);
    }

    #[test]
    fn test_decode_gzip_sitemap() {
        let xml = "<urlset><url><loc>https://x.test/a</loc></url></urlset>";
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(xml.as_bytes()).unwrap();
        let gz = encoder.finish().unwrap();
        let body = FetchedBytes {
            content_type: Some("application/x-gzip".to_string()),
            body: Bytes::from(gz),
        };
        assert_eq!(decode_sitemap("https://x.test/sitemap.xml", &body), xml);

        let plain = FetchedBytes {
            content_type: None,
            body: Bytes::from(xml),
        };
        assert_eq!(decode_sitemap("https://x.test/sitemap.xml.gz", &plain), xml);
    }
}
