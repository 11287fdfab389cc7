//! Pattern → weight tables
//!
//! Heuristics that classify strings (path segments, markdown lines) are
//! expressed as [`ScoreTable`]s so the same engine serves every call site.

use regex::Regex;
use std::sync::LazyLock;

/// How a rule recognizes its input
pub enum Matcher {
    /// Case-insensitive substring
    Contains(&'static [&'static str]),
    /// Regular expression
    Pattern(Regex),
}

impl Matcher {
    fn is_match(&self, text: &str) -> bool {
        match self {
            Matcher::Contains(needles) => {
                let lower = text.to_lowercase();
                needles.iter().any(|n| lower.contains(n))
            }
            Matcher::Pattern(re) => re.is_match(text),
        }
    }
}

/// One table row; the weight applies once however many needles hit
pub struct ScoreRule {
    pub matcher: Matcher,
    pub weight: i32,
}

/// A list of weighted rules
pub struct ScoreTable {
    rules: Vec<ScoreRule>,
}

impl ScoreTable {
    pub fn new(rules: Vec<ScoreRule>) -> Self {
        Self { rules }
    }

    /// Sum of the weights of matching rules
    pub fn score(&self, text: &str) -> i32 {
        self.rules
            .iter()
            .filter(|rule| rule.matcher.is_match(text))
            .map(|rule| rule.weight)
            .sum()
    }

    /// True if any positively weighted rule matches
    pub fn flags(&self, text: &str) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.weight > 0 && rule.matcher.is_match(text))
    }
}

/// Segments that name documentation sections
pub const DOC_KEYWORDS: &[&str] = &[
    "docs",
    "documentation",
    "guide",
    "reference",
    "api",
    "learn",
    "tutorial",
    "handbook",
    "manual",
];

/// Segments that name marketing or community sections
pub const NON_DOC_KEYWORDS: &[&str] = &[
    "blog",
    "news",
    "community",
    "forum",
    "about",
    "contact",
    "pricing",
    "enterprise",
    "careers",
    "events",
];

/// Weight per navigation link in a path bucket
pub const LINK_WEIGHT: i32 = 2;

/// Bonus/penalty applied to a first path segment
pub static DOC_SEGMENT_TABLE: LazyLock<ScoreTable> = LazyLock::new(|| {
    ScoreTable::new(vec![
        ScoreRule {
            matcher: Matcher::Contains(DOC_KEYWORDS),
            weight: 3,
        },
        ScoreRule {
            matcher: Matcher::Contains(NON_DOC_KEYWORDS),
            weight: -5,
        },
    ])
});

/// Lines that look like navigation residue rather than prose
pub static NAV_LINE_TABLE: LazyLock<ScoreTable> = LazyLock::new(|| {
    let pattern = |re: &str| Matcher::Pattern(Regex::new(re).expect("valid regex"));
    ScoreTable::new(vec![
        // a bare link, optionally as a list item
        ScoreRule {
            matcher: pattern(r"^\s*(?:[-*+]\s+)?\[[^\]]*\]\([^)]*\)\s*$"),
            weight: 1,
        },
        // breadcrumb trails
        ScoreRule {
            matcher: pattern(r"^\s*[^\s].{0,40}\s(?:/|>|»|›)\s.{1,40}$"),
            weight: 1,
        },
        ScoreRule {
            matcher: pattern(
                r"(?i)^\s*(?:[-*+]\s+)?(?:skip to (?:main )?content|toggle (?:navigation|menu|sidebar|theme)|menu|search|search docs|home|log ?in|sign ?in|sign ?up|get started|github|main navigation|on this page|table of contents|previous|next|dark mode|light mode|ctrl\s*\+?\s*k|⌘\s*k)\s*$",
            ),
            weight: 1,
        },
        // short list items without sentence punctuation
        ScoreRule {
            matcher: pattern(r"^\s*[-*+]\s+[^.!?:]{1,30}$"),
            weight: 1,
        },
    ])
});

/// Score a first path segment for documentation-ness
pub fn segment_bonus(segment: &str) -> i32 {
    DOC_SEGMENT_TABLE.score(segment)
}

/// Whether a markdown line looks like navigation residue
pub fn is_nav_line(line: &str) -> bool {
    NAV_LINE_TABLE.flags(line)
}
