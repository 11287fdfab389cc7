//! Cross-page boilerplate removal
//!
//! Text that repeats across many pages of one site is interface residue
//! (navigation, footers, edit links) that survived per-page extraction.
//! Blocks are counted by the number of distinct sampled pages containing
//! them; anything common enough is stripped from every output file.

use crate::clean::normalize_block;
use crate::error::ScrapeError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Deduplication thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Blocks shorter than this (normalized chars) are never removed
    pub min_block_chars: usize,
    /// Fewer output files than this and the pass is skipped
    pub min_files: usize,
    /// Fraction of sampled pages a block must appear in
    pub threshold_ratio: f64,
    /// Files read to find boilerplate
    pub sample_size: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            min_block_chars: 15,
            min_files: 3,
            threshold_ratio: 0.5,
            sample_size: 30,
        }
    }
}

impl DedupConfig {
    /// Page count a block needs to be boilerplate: `max(2, ceil(n * ratio))`
    pub fn page_threshold(&self, sampled: usize) -> usize {
        ((sampled as f64 * self.threshold_ratio).ceil() as usize).max(2)
    }
}

/// Outcome of one deduplication pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupReport {
    pub files_scanned: usize,
    pub sampled: usize,
    pub boilerplate_blocks: usize,
    pub files_rewritten: usize,
    pub blocks_removed: usize,
}

/// Split markdown into blocks at blank lines and before heading lines.
/// Fenced code stays in one block.
pub fn split_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_fence = false;

    let mut flush = |current: &mut Vec<&str>| {
        let block = current.join("\n");
        let block = block.trim();
        if !block.is_empty() {
            blocks.push(block.to_string());
        }
        current.clear();
    };

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            current.push(line);
            continue;
        }
        if in_fence {
            current.push(line);
        } else if trimmed.is_empty() {
            flush(&mut current);
        } else if is_heading(trimmed) {
            flush(&mut current);
            current.push(line);
        } else {
            current.push(line);
        }
    }
    flush(&mut current);
    blocks
}

fn is_heading(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes) && line[hashes..].starts_with(' ')
}

/// Normalized blocks present in at least `page_threshold` of `pages`
pub fn find_boilerplate<S: AsRef<str>>(pages: &[S], config: &DedupConfig) -> HashSet<String> {
    if pages.len() < config.min_files {
        return HashSet::new();
    }

    let mut page_counts: HashMap<String, usize> = HashMap::new();
    for page in pages {
        let distinct: HashSet<String> = split_blocks(page.as_ref())
            .iter()
            .map(|b| normalize_block(b))
            .filter(|n| n.chars().count() >= config.min_block_chars)
            .collect();
        for block in distinct {
            *page_counts.entry(block).or_default() += 1;
        }
    }

    let threshold = config.page_threshold(pages.len());
    page_counts
        .into_iter()
        .filter(|(_, count)| *count >= threshold)
        .map(|(block, _)| block)
        .collect()
}

/// Drop boilerplate blocks from one page. Returns `None` when nothing matched.
pub fn strip_boilerplate(
    text: &str,
    boilerplate: &HashSet<String>,
    config: &DedupConfig,
) -> Option<(String, usize)> {
    if boilerplate.is_empty() {
        return None;
    }
    let blocks = split_blocks(text);
    let before = blocks.len();
    let kept: Vec<String> = blocks
        .into_iter()
        .filter(|block| {
            let normalized = normalize_block(block);
            normalized.chars().count() < config.min_block_chars || !boilerplate.contains(&normalized)
        })
        .collect();
    let removed = before - kept.len();
    (removed > 0).then(|| (format!("{}\n", kept.join("\n\n").trim()), removed))
}

/// Deduplicate every `.md` file under `dir`
pub fn dedupe_directory(dir: &Path, config: &DedupConfig) -> Result<DedupReport, ScrapeError> {
    let mut files = Vec::new();
    collect_markdown(dir, &mut files)?;
    files.sort();

    let mut report = DedupReport {
        files_scanned: files.len(),
        ..Default::default()
    };
    if files.len() < config.min_files {
        debug!(files = files.len(), min = config.min_files, "Too few files for dedup");
        return Ok(report);
    }

    let sample: Vec<String> = files
        .iter()
        .take(config.sample_size)
        .filter_map(|path| read_lossy(path))
        .collect();
    report.sampled = sample.len();

    let boilerplate = find_boilerplate(&sample, config);
    report.boilerplate_blocks = boilerplate.len();
    if boilerplate.is_empty() {
        info!(sampled = report.sampled, "No repeated blocks found");
        return Ok(report);
    }

    let mut preview: Vec<&String> = boilerplate.iter().collect();
    preview.sort();
    for block in preview.iter().take(5) {
        debug!(block = %block.chars().take(80).collect::<String>(), "Repeated block");
    }

    for path in &files {
        let Some(text) = read_lossy(path) else {
            continue;
        };
        if let Some((cleaned, removed)) = strip_boilerplate(&text, &boilerplate, config) {
            fs::write(path, cleaned)?;
            report.files_rewritten += 1;
            report.blocks_removed += removed;
        }
    }

    info!(
        boilerplate = report.boilerplate_blocks,
        files = report.files_rewritten,
        blocks = report.blocks_removed,
        "Cross-page dedup finished"
    );
    Ok(report)
}

fn collect_markdown(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), ScrapeError> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_markdown(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "md") {
            out.push(path);
        }
    }
    Ok(())
}

fn read_lossy(path: &Path) -> Option<String> {
    match fs::read(path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable output file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn page(title: &str, body: &str) -> String {
        format!(
            "# {title}\n\nSource: https://x.test/docs/{title}\n\n{body}\n\n[Edit this page](https://github.com/acme/docs)\n"
        )
    }

    fn write_corpus(dir: &Path, pages: &[String]) -> Vec<PathBuf> {
        pages
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let path = dir.join(format!("page{i}.md"));
                fs::write(&path, text).unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn test_split_blocks() {
        let text = "intro line\n## Heading\nunder heading\n\n```\ncode\n\nmore code\n```\n\n\ntail";
        assert_eq!(
            split_blocks(text),
            vec![
                "intro line".to_string(),
                "## Heading\nunder heading".to_string(),
                "```\ncode\n\nmore code\n```".to_string(),
                "tail".to_string(),
            ]
        );
        assert!(!is_heading("#hashtag"));
    }

    #[test]
    fn test_page_threshold() {
        let config = DedupConfig::default();
        assert_eq!(config.page_threshold(3), 2);
        assert_eq!(config.page_threshold(5), 3);
        assert_eq!(config.page_threshold(30), 15);
        assert_eq!(config.page_threshold(2), 2);
    }

    #[test]
    fn test_edit_link_removed_from_all_pages() {
        let dir = TempDir::new().unwrap();
        let pages: Vec<String> = ["alpha", "beta", "gamma", "delta", "epsilon"]
            .iter()
            .map(|t| page(t, &format!("The {t} module does {t} things for you.")))
            .collect();
        let files = write_corpus(dir.path(), &pages);

        let report = dedupe_directory(dir.path(), &DedupConfig::default()).unwrap();
        assert_eq!(report.files_scanned, 5);
        assert_eq!(report.boilerplate_blocks, 1);
        assert_eq!(report.files_rewritten, 5);
        assert_eq!(report.blocks_removed, 5);

        for path in files {
            let text = fs::read_to_string(path).unwrap();
            assert!(!text.contains("Edit this page"));
            assert!(text.contains("things for you."));
            assert!(text.starts_with("# "));
        }
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let pages: Vec<String> = (0..6)
            .map(|i| page(&format!("p{i}"), &format!("Unique paragraph number {i} here.")))
            .collect();
        write_corpus(dir.path(), &pages);

        let first = dedupe_directory(dir.path(), &DedupConfig::default()).unwrap();
        assert!(first.files_rewritten > 0);
        let second = dedupe_directory(dir.path(), &DedupConfig::default()).unwrap();
        assert_eq!(second.files_rewritten, 0);
        assert_eq!(second.blocks_removed, 0);
    }

    #[test]
    fn test_short_blocks_never_removed() {
        let pages: Vec<String> = (0..4)
            .map(|i| format!("# Page {i}\n\nNext page\n\nBody text for page {i} only.\n"))
            .collect();
        let config = DedupConfig::default();
        let boilerplate = find_boilerplate(&pages, &config);
        assert!(boilerplate.is_empty());

        // even if listed explicitly, the guard keeps it
        let forced = HashSet::from(["next page".to_string()]);
        assert!(strip_boilerplate(&pages[0], &forced, &config).is_none());
    }

    #[test]
    fn test_counts_distinct_pages() {
        let repeated = "Subscribe to our newsletter today";
        let pages = vec![
            format!("{repeated}\n\n{repeated}\n\n{repeated}\n\nfirst page"),
            "second page body text".to_string(),
            "third page body text".to_string(),
        ];
        // three occurrences on one page are one page
        assert!(find_boilerplate(&pages, &DedupConfig::default()).is_empty());
    }

    #[test]
    fn test_too_few_files_is_noop() {
        let dir = TempDir::new().unwrap();
        let pages = vec![page("a", "one"), page("b", "two")];
        let files = write_corpus(dir.path(), &pages);
        let report = dedupe_directory(dir.path(), &DedupConfig::default()).unwrap();
        assert_eq!(report.files_rewritten, 0);
        assert_eq!(fs::read_to_string(&files[0]).unwrap(), pages[0]);
    }

    #[test]
    fn test_missing_directory() {
        let report =
            dedupe_directory(Path::new("/nonexistent/docscout-dedup"), &DedupConfig::default()).unwrap();
        assert_eq!(report, DedupReport::default());
    }
}
