//! HTML to markdown conversion

use scraper::node::Element;
use scraper::{ElementRef, Html, Node, Selector};
use std::sync::LazyLock;

/// Elements whose content is never rendered
const SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "iframe", "svg", "template", "head", "title", "meta", "link",
    "button", "input", "select", "textarea", "canvas",
];

/// Elements rendered as paragraph-like blocks
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "header", "footer", "nav", "aside", "figure",
    "figcaption", "details", "summary", "dl", "dt", "dd", "form", "fieldset", "address",
];

/// Per-line wrappers emitted by syntax highlighters
const CODE_LINE_CLASSES: &[&str] = &["line", "token-line", "code-line", "highlight-line"];

static ROW_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr").expect("valid selector"));
static CELL_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("th, td").expect("valid selector"));

/// Check if content is HTML based on content type and body.
///
/// A markdown content type is trusted; `text/plain` and missing types fall
/// through to sniffing the body, since misconfigured servers label HTML
/// pages as plain text.
pub fn is_html(content_type: &Option<String>, body: &str) -> bool {
    if let Some(ct) = content_type {
        let ct_lower = ct.to_lowercase();
        if ct_lower.contains("text/html") || ct_lower.contains("application/xhtml") {
            return true;
        }
        if ct_lower.contains("markdown") {
            return false;
        }
    }

    let trimmed = body.trim_start();
    let head: String = trimmed.chars().take(15).collect::<String>().to_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

/// Convert an HTML document to markdown
pub fn html_to_markdown(html: &str) -> String {
    let document = Html::parse_document(html);
    element_to_markdown(document.root_element())
}

/// Convert one element subtree to markdown
pub fn element_to_markdown(root: ElementRef) -> String {
    let mut writer = MarkdownWriter::default();
    writer.element(root);
    tidy_markdown(&writer.out)
}

#[derive(Debug, Clone, Copy)]
enum ListKind {
    Unordered,
    Ordered(usize),
}

#[derive(Default)]
struct MarkdownWriter {
    out: String,
    lists: Vec<ListKind>,
}

impl MarkdownWriter {
    fn nested(&self) -> MarkdownWriter {
        MarkdownWriter {
            out: String::new(),
            lists: self.lists.clone(),
        }
    }

    fn children(&mut self, el: ElementRef) {
        for child in el.children() {
            match child.value() {
                Node::Text(text) => self.text(text),
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        self.element(child_el);
                    }
                }
                _ => {}
            }
        }
    }

    /// Children rendered on their own, newlines folded into spaces
    fn inline(&self, el: ElementRef) -> String {
        let mut sub = self.nested();
        sub.children(el);
        sub.out.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn text(&mut self, text: &str) {
        let at_line_start = self.out.is_empty() || self.out.ends_with('\n');
        let mut last_space = at_line_start || self.out.ends_with(' ');
        for c in text.chars() {
            if c.is_whitespace() {
                if !last_space {
                    self.out.push(' ');
                    last_space = true;
                }
            } else {
                self.out.push(c);
                last_space = false;
            }
        }
    }

    fn ensure_block(&mut self) {
        if self.out.is_empty() {
            return;
        }
        while self.out.ends_with(' ') {
            self.out.pop();
        }
        while !self.out.ends_with("\n\n") {
            self.out.push('\n');
        }
    }

    fn ensure_line(&mut self) {
        while self.out.ends_with(' ') {
            self.out.pop();
        }
        if !self.out.is_empty() && !self.out.ends_with('\n') {
            self.out.push('\n');
        }
    }

    fn element(&mut self, el: ElementRef) {
        let name = el.value().name();
        if SKIP_TAGS.contains(&name) {
            return;
        }

        match name {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = name[1..].parse::<usize>().unwrap_or(1);
                let text = self.inline(el);
                self.ensure_block();
                if !text.is_empty() {
                    self.out.push_str(&"#".repeat(level));
                    self.out.push(' ');
                    self.out.push_str(&text);
                    self.out.push_str("\n\n");
                }
            }
            "br" => {
                while self.out.ends_with(' ') {
                    self.out.pop();
                }
                self.out.push('\n');
            }
            "hr" => {
                self.ensure_block();
                self.out.push_str("---\n\n");
            }
            "ul" | "ol" | "menu" => {
                self.ensure_line();
                self.lists.push(if name == "ol" {
                    ListKind::Ordered(0)
                } else {
                    ListKind::Unordered
                });
                self.children(el);
                self.lists.pop();
                if self.lists.is_empty() {
                    self.ensure_block();
                } else {
                    self.ensure_line();
                }
            }
            "li" => self.list_item(el),
            "strong" | "b" => self.wrap_inline(el, "**"),
            "em" | "i" => self.wrap_inline(el, "*"),
            "del" | "s" => self.wrap_inline(el, "~~"),
            "code" | "kbd" | "samp" => {
                let text = el.text().collect::<String>();
                let text = text.trim();
                if !text.is_empty() {
                    let fence = if text.contains('`') { "``" } else { "`" };
                    self.out.push_str(fence);
                    self.out.push_str(text);
                    self.out.push_str(fence);
                }
            }
            "pre" => {
                let language = code_language(el).unwrap_or_default();
                let code = normalize_code_block(el);
                self.ensure_block();
                self.out.push_str("```");
                self.out.push_str(&language);
                self.out.push('\n');
                self.out.push_str(code.trim_end_matches(['\n', ' ']));
                self.out.push_str("\n```\n\n");
            }
            "a" => {
                let text = self.inline(el);
                let href = el.value().attr("href").map(str::trim).unwrap_or("");
                if text.is_empty() {
                    return;
                }
                if href.is_empty() || href.starts_with("javascript:") {
                    self.text(&text);
                } else {
                    self.out.push('[');
                    self.out.push_str(&text);
                    self.out.push_str("](");
                    self.out.push_str(href);
                    self.out.push(')');
                }
            }
            "img" => {
                let alt = el.value().attr("alt").unwrap_or("").trim();
                if let Some(src) = el.value().attr("src") {
                    if !alt.is_empty() {
                        self.out.push_str(&format!("![{}]({})", alt, src.trim()));
                    }
                }
            }
            "blockquote" => {
                let mut sub = self.nested();
                sub.children(el);
                let quoted = tidy_markdown(&sub.out);
                self.ensure_block();
                for line in quoted.lines() {
                    self.out.push('>');
                    if !line.is_empty() {
                        self.out.push(' ');
                        self.out.push_str(line);
                    }
                    self.out.push('\n');
                }
                self.out.push('\n');
            }
            "table" => self.table(el),
            _ if BLOCK_TAGS.contains(&name) => {
                self.ensure_block();
                self.children(el);
                self.ensure_block();
            }
            _ => self.children(el),
        }
    }

    fn wrap_inline(&mut self, el: ElementRef, marker: &str) {
        let text = self.inline(el);
        if text.is_empty() {
            return;
        }
        if !self.out.is_empty() && !self.out.ends_with([' ', '\n', '(', '[']) {
            self.out.push(' ');
        }
        self.out.push_str(marker);
        self.out.push_str(&text);
        self.out.push_str(marker);
    }

    fn list_item(&mut self, el: ElementRef) {
        let depth = self.lists.len().max(1);
        let marker = match self.lists.last_mut() {
            Some(ListKind::Ordered(n)) => {
                *n += 1;
                format!("{}. ", n)
            }
            _ => "- ".to_string(),
        };
        let indent = "  ".repeat(depth - 1);

        let mut sub = self.nested();
        sub.children(el);
        let body = tidy_markdown(&sub.out);

        self.ensure_line();
        self.out.push_str(&indent);
        self.out.push_str(&marker);
        let mut first = true;
        for line in body.lines().filter(|l| !l.trim().is_empty()) {
            if first {
                self.out.push_str(line.trim_start());
                first = false;
            } else {
                self.out.push('\n');
                if line.starts_with(' ') || is_list_marker(line) {
                    // nested list lines carry their own indentation
                    self.out.push_str(line);
                } else {
                    self.out.push_str(&"  ".repeat(depth));
                    self.out.push_str(line);
                }
            }
        }
        self.out.push('\n');
    }

    fn table(&mut self, el: ElementRef) {
        let rows: Vec<Vec<String>> = el
            .select(&ROW_SELECTOR)
            .map(|row| {
                row.select(&CELL_SELECTOR)
                    .map(|cell| self.inline(cell).replace('|', "\\|"))
                    .collect()
            })
            .filter(|cells: &Vec<String>| !cells.is_empty())
            .collect();
        if rows.is_empty() {
            return;
        }
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);

        self.ensure_block();
        for (i, row) in rows.iter().enumerate() {
            self.out.push('|');
            for col in 0..width {
                self.out.push(' ');
                self.out.push_str(row.get(col).map(String::as_str).unwrap_or(""));
                self.out.push_str(" |");
            }
            self.out.push('\n');
            if i == 0 {
                self.out.push('|');
                for _ in 0..width {
                    self.out.push_str(" --- |");
                }
                self.out.push('\n');
            }
        }
        self.out.push('\n');
    }
}

fn is_list_marker(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("- ")
        || trimmed
            .split_once(". ")
            .map(|(n, _)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false)
}

fn has_class(element: &Element, wanted: &[&str]) -> bool {
    element.classes().any(|c| wanted.contains(&c))
}

/// Language hint from `language-*`, `lang-*`, `highlight-source-*` classes or `data-language`
pub fn code_language(pre: ElementRef) -> Option<String> {
    let code = pre
        .children()
        .filter_map(ElementRef::wrap)
        .find(|c| c.value().name() == "code");
    let mut candidates = vec![pre];
    candidates.extend(code);

    for el in candidates {
        for attr in ["data-language", "data-lang"] {
            if let Some(value) = el.value().attr(attr) {
                let value = value.trim();
                if !value.is_empty() {
                    return Some(value.to_lowercase());
                }
            }
        }
        for class in el.value().classes() {
            for prefix in ["language-", "lang-", "highlight-source-"] {
                if let Some(lang) = class.strip_prefix(prefix) {
                    if !lang.is_empty() {
                        return Some(lang.to_lowercase());
                    }
                }
            }
        }
    }
    None
}

/// Plain text of a code block with highlighter markup normalized.
///
/// Per-line wrappers end with a newline, `<br>` becomes a newline, and
/// block children start on a new line.
pub fn normalize_code_block(pre: ElementRef) -> String {
    let mut out = String::new();
    collect_code_text(pre, &mut out);
    out
}

fn collect_code_text(el: ElementRef, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => {
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                match element.name() {
                    "br" => out.push('\n'),
                    "button" | "style" | "script" => {}
                    "div" | "p" | "li" | "tr" => {
                        if !out.is_empty() && !out.ends_with('\n') {
                            out.push('\n');
                        }
                        collect_code_text(child_el, out);
                    }
                    _ if has_class(element, CODE_LINE_CLASSES) => {
                        collect_code_text(child_el, out);
                        let next_is_newline = child
                            .next_sibling()
                            .and_then(|n| n.value().as_text().map(|t| t.starts_with('\n')))
                            .unwrap_or(false);
                        if !out.ends_with('\n') && !next_is_newline {
                            out.push('\n');
                        }
                    }
                    _ => collect_code_text(child_el, out),
                }
            }
            _ => {}
        }
    }
}

/// Trim trailing whitespace and keep at most one blank line between blocks.
///
/// Blank lines inside fenced code are kept as they are.
pub fn tidy_markdown(s: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut in_fence = false;
    let mut blank_run = 0;
    for line in s.lines() {
        let line = line.trim_end();
        let is_fence = line.trim_start().starts_with("```");
        if is_fence {
            in_fence = !in_fence;
            blank_run = 0;
        } else if !in_fence {
            if line.is_empty() {
                blank_run += 1;
                if blank_run > 1 {
                    continue;
                }
            } else {
                blank_run = 0;
            }
        }
        lines.push(line);
    }
    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pre_of(html: &str) -> String {
        let doc = Html::parse_fragment(html);
        let sel = Selector::parse("pre").unwrap();
        let pre = doc.select(&sel).next().unwrap();
        normalize_code_block(pre)
    }

    #[test]
    fn test_is_html_by_content_type() {
        assert!(is_html(&Some("text/html".to_string()), ""));
        assert!(is_html(&Some("text/html; charset=utf-8".to_string()), ""));
        assert!(!is_html(&Some("text/markdown".to_string()), ""));
        assert!(!is_html(&Some("text/markdown".to_string()), "<html><body>"));
    }

    #[test]
    fn test_is_html_sniffs_plain_text_bodies() {
        let plain = Some("text/plain; charset=utf-8".to_string());
        assert!(is_html(&plain, "<!DOCTYPE html><html><body>"));
        assert!(is_html(&plain, "\n  <html lang=\"en\">"));
        assert!(!is_html(&plain, "# Install\n\nRun the installer."));
        assert!(!is_html(&plain, "Plain notes mentioning <html> later"));
    }

    #[test]
    fn test_is_html_by_body() {
        assert!(is_html(&None, "<!DOCTYPE html><html>"));
        assert!(is_html(&None, "  <!doctype html>"));
        assert!(is_html(&None, "<html><body>"));
        assert!(!is_html(&None, "# Markdown title"));
    }

    #[test]
    fn test_html_to_markdown_headers() {
        let md = html_to_markdown("<h1>Title</h1><h2>Sub <code>title</code></h2>");
        assert!(md.contains("# Title"));
        assert!(md.contains("## Sub `title`"));
    }

    #[test]
    fn test_html_to_markdown_paragraphs() {
        let md = html_to_markdown("<p>First   paragraph</p><p>Second\nparagraph</p>");
        assert_eq!(md, "First paragraph\n\nSecond paragraph");
    }

    #[test]
    fn test_html_to_markdown_lists() {
        let md = html_to_markdown("<ul><li>Item 1</li><li>Item 2<ul><li>Nested</li></ul></li></ul>");
        assert!(md.contains("- Item 1"));
        assert!(md.contains("- Item 2"));
        assert!(md.contains("  - Nested"));

        let md = html_to_markdown("<ol><li>One</li><li>Two</li></ol>");
        assert!(md.contains("1. One"));
        assert!(md.contains("2. Two"));
    }

    #[test]
    fn test_html_to_markdown_links_and_emphasis() {
        let md = html_to_markdown(
            r#"<p>See <a href="/docs/intro">the intro</a> and <strong>bold</strong> <em>text</em></p>"#,
        );
        assert!(md.contains("[the intro](/docs/intro)"));
        assert!(md.contains("**bold**"));
        assert!(md.contains("*text*"));
    }

    #[test]
    fn test_html_to_markdown_skip_script() {
        let md = html_to_markdown("<p>Before</p><script>alert('bad');</script><p>After</p>");
        assert!(md.contains("Before"));
        assert!(md.contains("After"));
        assert!(!md.contains("alert"));
    }

    #[test]
    fn test_html_to_markdown_code_fence_with_language() {
        let md = html_to_markdown(
            r#"<pre class="language-rust"><code>fn main() {
    println!("hi");
}</code></pre>"#,
        );
        assert!(md.contains("```rust\nfn main() {\n    println!(\"hi\");\n}\n```"));
    }

    #[test]
    fn test_html_to_markdown_table() {
        let md = html_to_markdown(
            "<table><tr><th>Name</th><th>Type</th></tr><tr><td>id</td><td>int</td></tr></table>",
        );
        assert!(md.contains("| Name | Type |"));
        assert!(md.contains("| --- | --- |"));
        assert!(md.contains("| id | int |"));
    }

    #[test]
    fn test_normalize_code_block_line_spans() {
        let text = pre_of(
            r#"<pre><code><span class="line"><span>let a = 1;</span></span><span class="line"><span>let b = 2;</span></span></code></pre>"#,
        );
        assert_eq!(text, "let a = 1;\nlet b = 2;\n");
    }

    #[test]
    fn test_normalize_code_block_no_double_newlines() {
        let text = pre_of("<pre><code><span class=\"line\">a</span>\n<span class=\"line\">b</span>\n</code></pre>");
        assert_eq!(text, "a\nb\n");
    }

    #[test]
    fn test_normalize_code_block_br_and_divs() {
        let text = pre_of("<pre>one<br>two<div>three</div><div>four</div></pre>");
        assert_eq!(text, "one\ntwo\nthree\nfour");
    }

    #[test]
    fn test_code_language_sources() {
        let doc = Html::parse_fragment(r#"<pre data-language="TS"><code>x</code></pre>"#);
        let pre = doc.select(&Selector::parse("pre").unwrap()).next().unwrap();
        assert_eq!(code_language(pre), Some("ts".to_string()));

        let doc = Html::parse_fragment(r#"<pre><code class="hljs lang-py">x</code></pre>"#);
        let pre = doc.select(&Selector::parse("pre").unwrap()).next().unwrap();
        assert_eq!(code_language(pre), Some("py".to_string()));
    }

    #[test]
    fn test_tidy_markdown_collapses_blank_runs() {
        assert_eq!(tidy_markdown("line1\n\n\n\n\nline2  "), "line1\n\nline2");
    }

    #[test]
    fn test_tidy_markdown_keeps_blank_lines_in_fences() {
        assert_eq!(tidy_markdown("```\na\n\n\nb\n```"), "```\na\n\n\nb\n```");
    }

    #[test]
    fn test_tidy_markdown_keeps_code_indentation() {
        let input = "text   \n\n\n\n```\n    indented\n```\n";
        assert_eq!(tidy_markdown(input), "text\n\n```\n    indented\n```");
    }
}
