//! URL canonicalization, document filtering, and locale handling

use regex::Regex;
use std::sync::LazyLock;
use url::{Position, Url};

/// Extensions that never hold documentation pages
const SKIP_EXTENSIONS: &[&str] = &[
    ".pdf", ".zip", ".tar", ".gz", ".tgz", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".css",
    ".js", ".mjs", ".woff", ".woff2", ".ttf", ".eot", ".ico", ".xml", ".json", ".mp4", ".mp3",
    ".webm", ".webp", ".avif", ".wasm",
];

/// Utility paths that never hold documentation pages
const SKIP_PATHS: &[&str] = &[
    "/search", "/login", "/logout", "/signin", "/signup", "/admin", "/api/", "/_", "/static/",
    "/cdn-cgi/",
];

/// Short first segments that look like locale codes but are not
const NON_LOCALE_SEGMENTS: &[&str] = &[
    "docs", "doc", "api", "blog", "about", "help", "search", "faq", "app", "cli", "sdk", "dev",
    "web", "ui", "js", "css", "img", "lib", "src", "pkg", "ref", "v1", "v2", "v3", "new", "top",
    "use", "get", "how", "all",
];

/// Locale codes recognized by the locale filter
pub const KNOWN_LOCALES: &[&str] = &[
    "ar", "bg", "cs", "da", "de", "el", "en", "es", "fa", "fi", "fr", "he", "hi", "hu", "id",
    "it", "ja", "ko", "nl", "no", "pl", "pt", "ro", "ru", "sv", "th", "tr", "uk", "vi", "zh",
];

static LOCALE_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2,3}(-[a-z]{2,4})?$").expect("valid regex"));

/// Resolve `href` against `base` and return its canonical form.
///
/// Canonical form is `scheme://host[:port]/path` with fragment and query
/// dropped and trailing slashes stripped (the root path stays `/`).
/// Returns `None` for non-HTTP schemes and unparseable input.
pub fn canonicalize(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }
    let joined = base.join(href).ok()?;
    canonical_form(&joined)
}

/// Canonicalize an absolute URL string
pub fn canonicalize_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    canonical_form(&parsed)
}

fn canonical_form(url: &Url) -> Option<String> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.host_str()?;
    let path = url.path().trim_end_matches('/');
    let path = if path.is_empty() { "/" } else { path };
    Some(format!("{}{}", &url[..Position::BeforePath], path))
}

/// Whether the URL plausibly points at a documentation page
pub fn is_doc_page(url: &Url) -> bool {
    let path = url.path().to_lowercase();
    if SKIP_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return false;
    }
    !SKIP_PATHS.iter().any(|skip| path.starts_with(skip))
}

/// First non-empty path segment
pub fn first_segment(path: &str) -> Option<&str> {
    path.split('/').find(|s| !s.is_empty())
}

/// Locale code carried by the first path segment, if any
pub fn detect_locale(url: &Url) -> Option<String> {
    let segment = first_segment(url.path())?.to_lowercase();
    if NON_LOCALE_SEGMENTS.contains(&segment.as_str()) {
        return None;
    }
    if !LOCALE_SEGMENT.is_match(&segment) {
        return None;
    }
    Some(segment)
}

/// Whether a URL survives the locale filter for `target`.
///
/// URLs that carry a different recognized locale anywhere in their path are
/// rejected. URLs with no locale segment are always kept.
pub fn locale_allows(url: &Url, target: &str) -> bool {
    let target = target.to_lowercase();
    let target_language = target.split('-').next().unwrap_or(&target);
    let path = format!("{}/", url.path().to_lowercase());
    !KNOWN_LOCALES
        .iter()
        .filter(|code| **code != target_language)
        .any(|code| path.contains(&format!("/{}/", code)))
}
