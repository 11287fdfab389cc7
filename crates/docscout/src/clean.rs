//! Markdown cleaning pass
//!
//! [`clean_markdown`] runs [`PASSES`] in order. Each pass is a plain
//! `fn(&str) -> String`; passes that look at prose skip fenced code.

use crate::convert::tidy_markdown;
use crate::scoring::is_nav_line;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Share of nav-like lines above the first `# ` heading that marks them as residue
pub const NAV_RESIDUE_RATIO: f64 = 0.3;

/// Within-page duplicate blocks at or below this many normalized chars are kept
pub const MIN_DUPLICATE_BLOCK_CHARS: usize = 50;

type Pass = fn(&str) -> String;

/// Cleaning passes in execution order
pub const PASSES: &[(&str, Pass)] = &[
    ("nav_residue", strip_nav_residue),
    ("on_this_page", strip_on_this_page),
    ("code_languages", normalize_code_languages),
    ("ui_artifacts", strip_ui_artifacts),
    ("encoding", repair_encoding),
    ("permalinks", strip_heading_permalinks),
    ("duplicate_headings", collapse_duplicate_headings),
    ("duplicate_blocks", dedupe_page_blocks),
    ("empty_fences", drop_empty_code_fences),
    ("whitespace", tidy_markdown),
];

/// Fence tags mapped from highlighter class names
const CSS_CLASS_TO_LANGUAGE: &[(&str, &str)] = &[
    ("language-js", "javascript"),
    ("language-ts", "typescript"),
    ("language-py", "python"),
    ("language-rs", "rust"),
    ("language-sh", "bash"),
    ("language-shell", "bash"),
    ("language-shell-session", "bash"),
    ("language-shellscript", "bash"),
    ("language-console", "bash"),
    ("language-terminal", "bash"),
    ("language-yml", "yaml"),
    ("language-md", "markdown"),
    ("language-plaintext", "text"),
    ("language-txt", "text"),
    ("language-golang", "go"),
    ("language-cs", "csharp"),
    ("language-c++", "cpp"),
    ("highlight-source-js", "javascript"),
    ("highlight-source-shell", "bash"),
];

/// Short names mapped to canonical fence tags
const LANGUAGE_ALIASES: &[(&str, &str)] = &[
    ("js", "javascript"),
    ("mjs", "javascript"),
    ("cjs", "javascript"),
    ("ts", "typescript"),
    ("py", "python"),
    ("py3", "python"),
    ("rs", "rust"),
    ("sh", "bash"),
    ("shell", "bash"),
    ("zsh", "bash"),
    ("console", "bash"),
    ("shell-session", "bash"),
    ("yml", "yaml"),
    ("md", "markdown"),
    ("rb", "ruby"),
    ("kt", "kotlin"),
    ("golang", "go"),
    ("cs", "csharp"),
    ("c++", "cpp"),
    ("txt", "text"),
    ("plaintext", "text"),
];

/// Tags that are highlighter placeholders, not languages
const PLACEHOLDER_LANGUAGES: &[&str] = &[
    "sp-pre-placeholder",
    "shiki",
    "undefined",
    "language-undefined",
    "highlight",
    "code-block",
    "none",
    "null",
    "default",
];

/// Corrupted UTF-8 sequences and their repairs, longest first
const MOJIBAKE: &[(&str, &str)] = &[
    ("â€™", "'"),
    ("â€˜", "'"),
    ("â€œ", "\""),
    ("â€\u{9d}", "\""),
    ("â€“", "-"),
    ("â€”", "--"),
    ("â€¦", "..."),
    ("â€¢", "*"),
    ("Ã©", "é"),
    ("Ã¨", "è"),
    ("Ãª", "ê"),
    ("Ã¡", "á"),
    ("Ã\u{a0}", "à"),
    ("Ã¢", "â"),
    ("Ã³", "ó"),
    ("Ã¶", "ö"),
    ("Ã¼", "ü"),
    ("Ã¤", "ä"),
    ("Ã±", "ñ"),
    ("Ã§", "ç"),
    ("Ã\u{9f}", "ß"),
    ("Â©", "©"),
    ("Â®", "®"),
    ("Â\u{a0}", " "),
];

/// Typographic punctuation folded to ASCII
const SMART_PUNCTUATION: &[(char, &str)] = &[
    ('\u{2018}', "'"),
    ('\u{2019}', "'"),
    ('\u{201C}', "\""),
    ('\u{201D}', "\""),
    ('\u{2013}', "-"),
    ('\u{2014}', "--"),
    ('\u{2026}', "..."),
    ('\u{00A0}', " "),
    ('\u{200B}', ""),
];

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid regex")
}

static HEADING: LazyLock<Regex> = LazyLock::new(|| regex(r"^(#{1,6})\s+(.*)$"));
static FENCE_OPEN: LazyLock<Regex> =
    LazyLock::new(|| regex(r"^(\s*)```\s*([^\s`]+)?\s*(.*)$"));
static ON_THIS_PAGE: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"(?i)^\s*(?:#{1,6}\s*)?(?:\*\*)?(?:on this page|in this article|in this section|contents|table of contents)(?:\*\*)?\s*:?\s*$")
});
static ANCHOR_ITEM: LazyLock<Regex> =
    LazyLock::new(|| regex(r"^\s*(?:[-*+]|\d+\.)\s+\[[^\]]*\]\(#[^)]*\)\s*$"));

/// Whole lines removed as UI chrome
static UI_ARTIFACT_LINES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^\s*(?:copy to clipboard|copy code|copy|copied!?|copied to clipboard)\s*$",
        r"(?i)^\s*\[?\s*(?:✏️\s*)?edit (?:this page|on github)[^\]]*\]?(?:\([^)]*\))?\s*$",
        r"(?i)^\s*was this page helpful\??.*$",
        r"(?i)^.*\bwe use cookies\b.*$",
        r"(?i)^\s*(?:accept(?: all)? cookies|cookie policy|cookie settings|manage cookies)\s*$",
        r"(?i)^\s*(?:previous|next|previousnext|« previous|next »)\s*$",
        r"(?i)^\s*(?:\[\s*(?:«|←|‹)?\s*(?:previous|prev|next)\b[^\]]*\]\([^)]*\)\s*)+$",
        r"(?i)^\s*select version\s*$",
        r"(?i)^\s*version:\s*\[?[\w.\-]+\]?(?:\([^)]*\))?\s*$",
        r"(?i)^\s*skip to (?:main )?content\s*$",
    ]
    .iter()
    .map(|p| regex(p))
    .collect()
});

/// UI phrases removed wherever they appear in a line
static UI_ARTIFACT_INLINE: LazyLock<Regex> =
    LazyLock::new(|| regex(r"(?i)\s*\b(?:copy to clipboard|copy code)\b\s*"));

/// Permalink markers inside headings
static PERMALINKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\[\s*¶\s*\]\([^)]*\)",
        r"\[\s*#\s*\]\(#[^)]*\)",
        r"\[[\s\u{200B}]*\]\(#[^)]*\)",
        r"(?i)\[\s*(?:link|permalink|anchor)\s*\]\(#[^)]*\)",
        r"¶",
        r"\s+#\s*$",
    ]
    .iter()
    .map(|p| regex(p))
    .collect()
});

/// Run every cleaning pass in order
pub fn clean_markdown(markdown: &str) -> String {
    PASSES
        .iter()
        .fold(markdown.to_string(), |text, (_, pass)| pass(&text))
}

/// Apply `f` to lines outside fenced code; `None` drops the line
fn map_prose_lines(text: &str, mut f: impl FnMut(&str) -> Option<String>) -> String {
    let mut out = Vec::new();
    let mut in_fence = false;
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            out.push(line.to_string());
            continue;
        }
        if in_fence {
            out.push(line.to_string());
        } else if let Some(mapped) = f(line) {
            out.push(mapped);
        }
    }
    out.join("\n")
}

/// Blank-line separated blocks; fenced code stays in one block
pub(crate) fn paragraph_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_fence = false;
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        } else if !in_fence && line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
            continue;
        }
        current.push(line);
    }
    if !current.is_empty() {
        blocks.push(current.join("\n"));
    }
    blocks
}

/// Whitespace-collapsed, lowercased text
pub fn normalize_block(block: &str) -> String {
    block
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Drop everything above the first `# ` heading when it reads like navigation
pub fn strip_nav_residue(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let Some(first_h1) = lines.iter().position(|l| l.starts_with("# ")) else {
        return text.to_string();
    };
    let preceding: Vec<&str> = lines[..first_h1]
        .iter()
        .copied()
        .filter(|l| !l.trim().is_empty())
        .collect();
    if preceding.is_empty() {
        return text.to_string();
    }
    let nav = preceding.iter().filter(|l| is_nav_line(l)).count();
    if (nav as f64) / (preceding.len() as f64) >= NAV_RESIDUE_RATIO {
        lines[first_h1..].join("\n")
    } else {
        text.to_string()
    }
}

/// Drop an "On this page" anchor list right after the first heading
pub fn strip_on_this_page(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let Some(heading) = lines.iter().position(|l| HEADING.is_match(l)) else {
        return text.to_string();
    };

    let next_content = |from: usize| (from..lines.len()).find(|&i| !lines[i].trim().is_empty());

    let Some(mut cursor) = next_content(heading + 1) else {
        return text.to_string();
    };
    let start = cursor;
    let labelled = ON_THIS_PAGE.is_match(lines[cursor]);
    if labelled {
        cursor += 1;
    }

    let mut items = 0;
    let mut end = cursor;
    while let Some(i) = next_content(end) {
        if !ANCHOR_ITEM.is_match(lines[i]) {
            break;
        }
        items += 1;
        end = i + 1;
    }

    if items == 0 || (!labelled && items < 2) {
        return text.to_string();
    }

    let resume = next_content(end).unwrap_or(lines.len());
    let mut kept: Vec<&str> = lines[..start].to_vec();
    kept.extend_from_slice(&lines[resume..]);
    kept.join("\n")
}

/// Canonical fence tag for a raw tag; `None` drops the tag
pub fn normalize_language(tag: &str) -> Option<String> {
    let lower = tag.trim().to_lowercase();
    if lower.is_empty() || PLACEHOLDER_LANGUAGES.contains(&lower.as_str()) {
        return None;
    }
    if let Some((_, lang)) = CSS_CLASS_TO_LANGUAGE.iter().find(|(c, _)| *c == lower) {
        return Some(lang.to_string());
    }
    let bare = lower
        .strip_prefix("language-")
        .or_else(|| lower.strip_prefix("lang-"))
        .unwrap_or(&lower);
    if bare.is_empty() || PLACEHOLDER_LANGUAGES.contains(&bare) {
        return None;
    }
    let mapped = LANGUAGE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == bare)
        .map(|(_, lang)| lang.to_string())
        .unwrap_or_else(|| bare.to_string());
    Some(mapped)
}

/// Rewrite opening fence tags through the class and alias tables
pub fn normalize_code_languages(text: &str) -> String {
    let mut out = Vec::new();
    let mut in_fence = false;
    for line in text.lines() {
        if !line.trim_start().starts_with("```") {
            out.push(line.to_string());
            continue;
        }
        if in_fence {
            in_fence = false;
            out.push(line.to_string());
            continue;
        }
        in_fence = true;
        let rewritten = FENCE_OPEN.captures(line).map(|caps| {
            let indent = caps.get(1).map_or("", |m| m.as_str());
            let lang = caps
                .get(2)
                .and_then(|m| normalize_language(m.as_str()))
                .unwrap_or_default();
            format!("{}```{}", indent, lang)
        });
        out.push(rewritten.unwrap_or_else(|| line.to_string()));
    }
    out.join("\n")
}

/// Remove copy/edit/cookie/pagination/version-picker chrome
pub fn strip_ui_artifacts(text: &str) -> String {
    map_prose_lines(text, |line| {
        if UI_ARTIFACT_LINES.iter().any(|re| re.is_match(line)) {
            return None;
        }
        let cleaned = UI_ARTIFACT_INLINE.replace_all(line, " ");
        let cleaned = cleaned.trim_end();
        if cleaned.trim().is_empty() && !line.trim().is_empty() {
            return None;
        }
        Some(cleaned.to_string())
    })
}

/// Repair mojibake and fold smart punctuation to ASCII
pub fn repair_encoding(text: &str) -> String {
    let mut repaired = text.to_string();
    for (bad, good) in MOJIBAKE {
        if repaired.contains(bad) {
            repaired = repaired.replace(bad, good);
        }
    }
    let mut out = String::with_capacity(repaired.len());
    for c in repaired.chars() {
        match SMART_PUNCTUATION.iter().find(|(from, _)| *from == c) {
            Some((_, to)) => out.push_str(to),
            None => out.push(c),
        }
    }
    out
}

/// Strip permalink markers from headings, keeping inline code, and drop headings left empty
pub fn strip_heading_permalinks(text: &str) -> String {
    map_prose_lines(text, |line| {
        let Some(caps) = HEADING.captures(line) else {
            return Some(line.to_string());
        };
        let hashes = caps.get(1).map_or("#", |m| m.as_str());
        let body = caps.get(2).map_or("", |m| m.as_str());

        // odd segments are inline code
        let cleaned: Vec<String> = body
            .split('`')
            .enumerate()
            .map(|(i, segment)| {
                if i % 2 == 1 {
                    return segment.to_string();
                }
                PERMALINKS
                    .iter()
                    .fold(segment.to_string(), |s, re| re.replace_all(&s, "").into_owned())
            })
            .collect();
        let cleaned = cleaned.join("`");
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            None
        } else {
            Some(format!("{} {}", hashes, cleaned))
        }
    })
}

/// Drop a heading identical to the previous heading with only blank lines between
pub fn collapse_duplicate_headings(text: &str) -> String {
    let mut last_heading: Option<String> = None;
    map_prose_lines(text, |line| {
        if line.trim().is_empty() {
            return Some(line.to_string());
        }
        if HEADING.is_match(line) {
            let normalized = normalize_block(line);
            if last_heading.as_deref() == Some(normalized.as_str()) {
                return None;
            }
            last_heading = Some(normalized);
        } else {
            last_heading = None;
        }
        Some(line.to_string())
    })
}

/// Remove repeated blocks longer than [`MIN_DUPLICATE_BLOCK_CHARS`]; first occurrence wins
pub fn dedupe_page_blocks(text: &str) -> String {
    let mut seen = HashSet::new();
    paragraph_blocks(text)
        .into_iter()
        .filter(|block| {
            let normalized = normalize_block(block);
            normalized.chars().count() <= MIN_DUPLICATE_BLOCK_CHARS || seen.insert(normalized)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Remove fenced code blocks with no non-blank content
pub fn drop_empty_code_fences(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut fence: Option<Vec<&str>> = None;
    for line in text.lines() {
        let is_fence = line.trim_start().starts_with("```");
        match fence.as_mut() {
            None if is_fence => fence = Some(vec![line]),
            None => out.push(line),
            Some(block) => {
                block.push(line);
                if is_fence {
                    let has_content = block[1..block.len() - 1]
                        .iter()
                        .any(|l| !l.trim().is_empty());
                    if has_content {
                        out.extend(block.iter());
                    }
                    fence = None;
                }
            }
        }
    }
    // unterminated fence is kept as-is
    if let Some(block) = fence {
        out.extend(block);
    }
    out.join("\n")
}
