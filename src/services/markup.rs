// src/services/markup.rs

//! Wikitext analysis: prose/link word counts and chapter-link extraction.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;
use unicode_segmentation::UnicodeSegmentation;

use crate::utils::canonical_title;

static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("static regex"));

/// Innermost template; applied repeatedly to peel nested templates.
static TEMPLATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{[^{}]*\}\}").expect("static regex"));

static WIKI_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\]\[|]+)(?:\|([^\]\[]*))?\]\]").expect("static regex"));

static EXTERNAL_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(?:https?:)?//[^\s\]]+(?:\s+([^\]]*))?\]").expect("static regex"));

static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^=+[^=].*=+$").expect("static regex"));

/// A chapter unit followed by a numeral: `Liber IV`, `Periocha 12`, `Chapter 3`.
static CHAPTER_UNIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(liber|libri|book|chapter|capitulum|caput|periocha|epistula|epistola|carmen|satura|ode)\s+[ivxlcdm0-9]+\b",
    )
    .expect("static regex")
});

/// A bare numeral used as link text: `[[Aeneis/Liber I|I]]`.
static BARE_NUMERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[IVXLCDM]+|[0-9]+)\.?\s*$").expect("static regex"));

static REDIRECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*#(?:redirect|redirectio)\s*:?\s*\[\[([^\]|#]+)").expect("static regex"));

/// Namespaces whose links are never chapters and never count as text.
const SKIP_NAMESPACES: &[&str] = &[
    "category", "categoria", "file", "fasciculus", "image", "imago", "template", "formula",
    "help", "auxilium", "scriptor", "author", "wikisource", "vicifons", "special", "specialis",
    "user", "usor", "portal", "porta", "index", "pagina", "page",
];

/// Lines the export tool prepends to its output.
const EXPORT_BANNERS: &[&str] = &["exported by", "generated by", "wikisource export"];

/// Prose/link word counts of a payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextProfile {
    /// Words outside links and chapter-like lines
    pub prose_words: usize,
    /// Words of link anchor text, including chapter-like plain lines
    pub link_words: usize,
}

impl TextProfile {
    /// Share of link text in all counted text. Zero for empty text.
    pub fn link_ratio(&self) -> f64 {
        let total = self.prose_words + self.link_words;
        if total == 0 {
            0.0
        } else {
            self.link_words as f64 / total as f64
        }
    }
}

/// Drop export-tool banner lines.
pub fn strip_export_banner(text: &str) -> String {
    text.lines()
        .filter(|line| {
            let lower = line.to_lowercase();
            !EXPORT_BANNERS.iter().any(|marker| lower.contains(marker))
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Target of a redirect page, if the payload is one.
pub fn parse_redirect(text: &str) -> Option<String> {
    let first = text.lines().find(|l| !l.trim().is_empty())?;
    REDIRECT
        .captures(first)
        .map(|caps| canonical_title(caps[1].trim()))
        .filter(|target| !target.is_empty())
}

fn word_count(text: &str) -> usize {
    text.unicode_words().count()
}

/// Remove comments and (nested) templates.
fn strip_structure(text: &str) -> String {
    let mut out = COMMENT.replace_all(text, "").into_owned();
    loop {
        let next = TEMPLATE.replace_all(&out, "").into_owned();
        if next == out {
            return out;
        }
        out = next;
    }
}

/// Visible text of inline HTML (`<poem>`, `<ref>`, `<br/>`, entities).
fn strip_html(text: &str) -> String {
    if !text.contains('<') && !text.contains('&') {
        return text.to_string();
    }
    Html::parse_fragment(text)
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Namespace prefix of a link target, lower-cased (`Categoria:X` -> `categoria`).
fn namespace(target: &str) -> Option<String> {
    let (prefix, _) = target.trim_start_matches(':').split_once(':')?;
    Some(prefix.trim().to_lowercase())
}

/// Namespaced or interlanguage link (`[[Categoria:...]]`, `[[en:...]]`).
fn is_foreign_link(target: &str) -> bool {
    match namespace(target) {
        Some(ns) => {
            SKIP_NAMESPACES.contains(&ns.as_str())
                || (ns.len() <= 3 && ns.chars().all(|c| c.is_ascii_lowercase() || c == '-'))
        }
        None => false,
    }
}

fn is_list_line(line: &str) -> bool {
    matches!(line.trim_start().chars().next(), Some('*' | '#' | ':'))
}

/// A short line that reads like a table-of-contents entry.
fn is_chapter_like(line: &str, list_line: bool) -> bool {
    let words = word_count(line);
    if words == 0 || words > 8 {
        return false;
    }
    if CHAPTER_UNIT.is_match(line) {
        return true;
    }
    list_line && !line.contains(['.', '!', '?'])
}

/// Count prose and link words of a wikitext (or plain text) payload.
///
/// Headings, templates, comments, category and interlanguage links are
/// structure and count as neither. Link anchor text and short chapter-like
/// lines count as link words; everything else is prose.
pub fn profile(text: &str) -> TextProfile {
    let cleaned = strip_structure(text);
    let mut result = TextProfile::default();

    for raw_line in cleaned.lines() {
        let line = raw_line.trim();
        if line.is_empty() || HEADING.is_match(line) {
            continue;
        }
        let list_line = is_list_line(line);

        let mut anchors = 0;
        let without_links = WIKI_LINK.replace_all(line, |caps: &regex::Captures| {
            let target = &caps[1];
            if !is_foreign_link(target) {
                let anchor = caps.get(2).map_or(target, |m| m.as_str());
                anchors += word_count(&strip_html(anchor));
            }
            String::new()
        });
        let without_links = EXTERNAL_LINK.replace_all(&without_links, |caps: &regex::Captures| {
            anchors += caps.get(1).map_or(0, |m| word_count(m.as_str()));
            String::new()
        });
        result.link_words += anchors;

        let rest = strip_html(&without_links.replace("'''", "").replace("''", ""));
        let rest = rest.trim_start_matches(['*', '#', ':', ';']).trim();
        if rest.is_empty() {
            continue;
        }

        if is_chapter_like(rest, list_line) {
            result.link_words += word_count(rest);
        } else {
            result.prose_words += word_count(rest);
        }
    }

    result
}

/// Ordered chapter targets referenced by an index payload.
///
/// A link is a chapter when it sits on a list line, points to a subpage of
/// the work (`[[/Liber I]]`), names a chapter unit (`Liber IV`) or uses a
/// bare numeral as its text. Namespaced and interlanguage links never are.
/// Targets keep the order of first appearance.
pub fn chapter_links(text: &str, work_id: &str) -> Vec<String> {
    let work_id = canonical_title(work_id);
    let cleaned = strip_structure(text);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for line in cleaned.lines() {
        let list_line = is_list_line(line);

        for caps in WIKI_LINK.captures_iter(line) {
            let raw_target = caps[1].trim();
            let anchor = caps.get(2).map_or(raw_target, |m| m.as_str());

            // Section anchors point into a page, not at a chapter.
            let raw_target = raw_target.split('#').next().unwrap_or("").trim();
            if raw_target.is_empty() || raw_target.starts_with("../") || is_foreign_link(raw_target) {
                continue;
            }

            let subpage = raw_target.starts_with('/');
            let target = if subpage {
                canonical_title(&format!("{}{}", work_id, raw_target.trim_end_matches('/')))
            } else {
                canonical_title(raw_target.trim_start_matches(':'))
            };

            let is_chapter = list_line
                || subpage
                || CHAPTER_UNIT.is_match(&target)
                || CHAPTER_UNIT.is_match(anchor)
                || BARE_NUMERAL.is_match(anchor);

            if !is_chapter || target.chars().count() < 3 || target == work_id {
                continue;
            }
            if seen.insert(target.clone()) {
                links.push(target);
            }
        }
    }

    links
}
