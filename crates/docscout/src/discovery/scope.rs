//! Scope inference from the start URL and its navigation

use super::navigation::NAV_SELECTORS;
use crate::canonical::{canonicalize, first_segment};
use crate::scoring::{segment_bonus, LINK_WEIGHT};
use crate::types::{host_key, ScopeRule};
use scraper::{Html, Selector};
use std::collections::HashMap;
use url::Url;

/// Maximum scope prefixes kept for a root start URL
const MAX_PREFIXES: usize = 5;

/// Containers whose links vote on scope; navigation plus site headers
const SCOPE_EXTRA_SELECTORS: &[&str] = &["header", ".header"];

/// Infer the scope rule for a start URL.
///
/// A non-root start URL scopes to its own path. A root start URL buckets
/// navigation links by first path segment, scores each bucket, and keeps
/// the best positive ones. With nothing positive the whole host is in scope.
pub fn infer_scope(start_url: &Url, start_html: Option<&str>) -> ScopeRule {
    let rule = ScopeRule::for_url(start_url);
    let path = start_url.path().trim_end_matches('/');
    if !path.is_empty() {
        return rule.include(format!("{}/", path));
    }

    let Some(html) = start_html else {
        return rule;
    };
    score_prefixes(start_url, html)
        .into_iter()
        .fold(rule, |rule, prefix| rule.include(prefix))
}

fn score_prefixes(start_url: &Url, html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let host = host_key(start_url);
    let mut scores: HashMap<String, i32> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    let selectors = NAV_SELECTORS.iter().chain(SCOPE_EXTRA_SELECTORS);
    for raw in selectors {
        let Ok(container) = Selector::parse(raw) else {
            continue;
        };
        let Ok(links) = Selector::parse("a[href]") else {
            continue;
        };
        for nav in document.select(&container) {
            for a in nav.select(&links) {
                let Some(href) = a.value().attr("href") else {
                    continue;
                };
                let Some(url) = canonicalize(start_url, href).and_then(|u| Url::parse(&u).ok())
                else {
                    continue;
                };
                if host_key(&url) != host {
                    continue;
                }
                let Some(segment) = first_segment(url.path()) else {
                    continue;
                };
                let prefix = format!("/{}/", segment);
                let score = LINK_WEIGHT + segment_bonus(segment);
                if !scores.contains_key(&prefix) {
                    order.push(prefix.clone());
                }
                *scores.entry(prefix).or_insert(0) += score;
            }
        }
    }

    let mut positive: Vec<(String, i32)> = order
        .into_iter()
        .filter_map(|p| {
            let score = scores[&p];
            (score > 0).then_some((p, score))
        })
        .collect();
    // stable sort keeps first-seen order among ties
    positive.sort_by(|a, b| b.1.cmp(&a.1));
    positive
        .into_iter()
        .take(MAX_PREFIXES)
        .map(|(p, _)| p)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_root_scopes_to_path() {
        let url = Url::parse("https://x.test/en/5.0/").unwrap();
        let rule = infer_scope(&url, None);
        assert_eq!(rule.include, vec!["/en/5.0/".to_string()]);
        assert!(rule.matches_str("https://x.test/en/5.0/topics/db"));
        assert!(!rule.matches_str("https://x.test/el/5.0/topics/db"));
    }

    #[test]
    fn test_root_scores_navigation_buckets() {
        let url = Url::parse("https://x.test/").unwrap();
        let html = r#"<html><body>
            <nav>
              <a href="/docs/a">A</a><a href="/docs/b">B</a>
              <a href="/blog/x">Blog</a><a href="/blog/y">Blog 2</a>
              <a href="/products/z">Products</a>
              <a href="https://other.test/docs/q">Elsewhere</a>
            </nav>
        </body></html>"#;
        let rule = infer_scope(&url, Some(html));
        // docs: 2*(2+3)=10, products: 2, blog: 2*(2-5)<0
        assert_eq!(rule.include, vec!["/docs/".to_string(), "/products/".to_string()]);
    }

    #[test]
    fn test_root_without_navigation_matches_host() {
        let url = Url::parse("https://x.test/").unwrap();
        let rule = infer_scope(&url, Some("<html><body><p>hi</p></body></html>"));
        assert!(rule.include.is_empty());
        assert!(rule.matches_str("https://x.test/anything"));
    }
}
