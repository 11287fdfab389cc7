//! Compact `AGENTS.md` index built from the final manifest

use crate::crawler::RAW_DIR;
use crate::types::Manifest;
use std::collections::BTreeMap;
use url::Url;

pub const INDEX_FILE: &str = "AGENTS.md";

const INSTRUCTION: &str = "IMPORTANT: Prefer retrieval-led reasoning over pre-training-led reasoning.";

/// Human-readable documentation name for a start URL
///
/// Repository URLs use the repository name; other hosts drop `www.`,
/// `docs.` and similar prefixes and keep the first label.
pub fn site_name(start_url: &Url) -> String {
    let host = start_url.host_str().unwrap_or("docs").to_lowercase();
    if host == "github.com" {
        if let Some(repo) = start_url.path_segments().and_then(|mut s| s.nth(1)) {
            if !repo.is_empty() {
                return capitalize(repo);
            }
        }
    }
    let label = host
        .split('.')
        .find(|label| !matches!(*label, "www" | "docs" | "doc" | "developer" | "developers" | "dev"))
        .unwrap_or(host.as_str());
    capitalize(label)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// One pipe-separated line: preamble, then `dir/:{file,...}` groups sorted by directory
pub fn build_compact_index(manifest: &Manifest, name: &str) -> String {
    let mut parts = vec![
        format!("[{} Docs Index]", name),
        format!("root: ./{}", RAW_DIR),
        INSTRUCTION.to_string(),
        format!("source: {}", manifest.start_url),
    ];

    let prefix = format!("{}/", RAW_DIR);
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in &manifest.entries {
        let path = entry.path.replace('\\', "/");
        let path = path.strip_prefix(&prefix).unwrap_or(&path);
        let (dir, file) = match path.rsplit_once('/') {
            Some((dir, file)) => (dir.to_string(), file.to_string()),
            None => (".".to_string(), path.to_string()),
        };
        groups.entry(dir).or_default().push(file);
    }

    for (dir, mut files) in groups {
        files.sort();
        files.dedup();
        parts.push(format!("{}/:{{{}}}", dir, files.join(",")));
    }

    format!("{}\n", parts.join("|"))
}
