//! Section boundary detection over the canonical text.
//!
//! An ordered rule set locates named sections (Items 1/1A/7/7A/8/9A) in the
//! primary document; exhibits are sectioned whole by filename. When a rule
//! matches more than once the last match wins, which steps over the table
//! of contents where every heading also appears.

use once_cell::sync::Lazy;
use regex::Regex;

use filing_spine_core::models::{NewFilingSection, SectionKey};

use crate::canonical::{canonicalize, word_count, CanonicalDocument};

/// A section-boundary rule. Lower priority value wins overlap conflicts.
struct SectionRule {
    key: SectionKey,
    priority: u8,
    pattern: &'static Lazy<Regex>,
}

macro_rules! heading {
    ($name:ident, $re:literal) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($re).expect("static section regex"));
    };
}

heading!(ITEM_1, r"(?im)^\s*item\s+1\s*[\.\:\u{2014}-]\s*business");
heading!(ITEM_1A, r"(?im)^\s*item\s+1a\s*[\.\:\u{2014}-]\s*risk\s+factors");
heading!(
    ITEM_7,
    r"(?im)^\s*item\s+7\s*[\.\:\u{2014}-]\s*management['\u{2019}s]*\s+discussion"
);
heading!(
    ITEM_7A,
    r"(?im)^\s*item\s+7a\s*[\.\:\u{2014}-]\s*quantitative\s+and\s+qualitative"
);
heading!(ITEM_8, r"(?im)^\s*item\s+8\s*[\.\:\u{2014}-]\s*financial\s+statements");
heading!(ITEM_9A, r"(?im)^\s*item\s+9a\s*[\.\:\u{2014}-]\s*controls\s+and\s+procedures");

// Fallback forms matching bare item headings in a table-of-contents scan
heading!(ITEM_1_BARE, r"(?im)^\s*item\s+1\s*$");
heading!(ITEM_1A_BARE, r"(?im)^\s*item\s+1a\s*$");
heading!(ITEM_7_BARE, r"(?im)^\s*item\s+7\s*$");

static RULES: &[SectionRule] = &[
    SectionRule { key: SectionKey::Item1, priority: 1, pattern: &ITEM_1 },
    SectionRule { key: SectionKey::Item1A, priority: 1, pattern: &ITEM_1A },
    SectionRule { key: SectionKey::Item7, priority: 1, pattern: &ITEM_7 },
    SectionRule { key: SectionKey::Item7A, priority: 1, pattern: &ITEM_7A },
    SectionRule { key: SectionKey::Item8, priority: 1, pattern: &ITEM_8 },
    SectionRule { key: SectionKey::Item9A, priority: 1, pattern: &ITEM_9A },
    SectionRule { key: SectionKey::Item1, priority: 2, pattern: &ITEM_1_BARE },
    SectionRule { key: SectionKey::Item1A, priority: 2, pattern: &ITEM_1A_BARE },
    SectionRule { key: SectionKey::Item7, priority: 2, pattern: &ITEM_7_BARE },
];

/// A defect surfaced during parsing; never fatal to the section pass
#[derive(Debug, Clone, PartialEq)]
pub struct ParseIssue {
    pub section_key: String,
    pub detail: String,
}

#[derive(Debug)]
struct Boundary {
    key: SectionKey,
    priority: u8,
    start: usize,
    title_end: usize,
}

/// Segments filing documents into named sections with offsets into the
/// canonical text buffer.
pub struct SectionParser {
    pub parser_version: String,
    pub max_section_bytes: usize,
}

impl SectionParser {
    pub fn new(parser_version: impl Into<String>, max_section_bytes: usize) -> Self {
        Self {
            parser_version: parser_version.into(),
            max_section_bytes,
        }
    }

    /// Parse the primary document into item sections. Missing sections are
    /// simply absent; same-priority overlaps surface as issues.
    pub fn parse_primary(
        &self,
        accession: &str,
        filename: &str,
        raw_html: &str,
    ) -> (CanonicalDocument, Vec<NewFilingSection>, Vec<ParseIssue>) {
        let doc = canonicalize(raw_html);
        let mut issues = Vec::new();

        let mut boundaries: Vec<Boundary> = Vec::new();
        for rule in RULES {
            // Last match skips the table-of-contents occurrence
            let Some(m) = rule.pattern.find_iter(doc.text()).last() else {
                continue;
            };
            if let Some(existing) = boundaries.iter_mut().find(|b| b.key == rule.key) {
                // Keep the higher-priority (lower value) rule for this key
                if rule.priority < existing.priority {
                    existing.priority = rule.priority;
                    existing.start = m.start();
                    existing.title_end = m.end();
                }
                continue;
            }
            boundaries.push(Boundary {
                key: rule.key,
                priority: rule.priority,
                start: m.start(),
                title_end: m.end(),
            });
        }

        boundaries.sort_by_key(|b| b.start);

        // Same-priority boundaries sharing a start are a parser defect
        for pair in boundaries.windows(2) {
            if pair[0].start == pair[1].start && pair[0].priority == pair[1].priority {
                issues.push(ParseIssue {
                    section_key: pair[1].key.as_str().to_string(),
                    detail: format!(
                        "overlapping section candidates at offset {} with equal priority",
                        pair[1].start
                    ),
                });
            }
        }
        boundaries.dedup_by_key(|b| b.start);

        let mut sections = Vec::with_capacity(boundaries.len());
        for (idx, boundary) in boundaries.iter().enumerate() {
            let end = boundaries
                .get(idx + 1)
                .map(|next| next.start)
                .unwrap_or_else(|| doc.len());
            if end <= boundary.start {
                continue;
            }
            let text = doc.slice(boundary.start, end).unwrap_or_default().to_string();
            let title = doc
                .slice(boundary.start, boundary.title_end)
                .map(|t| t.trim().to_string());

            if text.len() > self.max_section_bytes {
                issues.push(ParseIssue {
                    section_key: boundary.key.as_str().to_string(),
                    detail: format!(
                        "section of {} bytes exceeds threshold {}; downstream work is windowed",
                        text.len(),
                        self.max_section_bytes
                    ),
                });
            }

            sections.push(NewFilingSection {
                accession_number: accession.to_string(),
                section_key: boundary.key.as_str().to_string(),
                title,
                char_start: boundary.start as i32,
                char_end: end as i32,
                word_count: word_count(&text),
                text,
                document_filename: filename.to_string(),
                parser_version: self.parser_version.clone(),
            });
        }

        (doc, sections, issues)
    }

    /// Exhibits are one section each, keyed by filename
    pub fn parse_exhibit(
        &self,
        accession: &str,
        filename: &str,
        raw_html: &str,
    ) -> Option<(CanonicalDocument, NewFilingSection)> {
        let key = exhibit_key(filename)?;
        let doc = canonicalize(raw_html);
        if doc.is_empty() {
            return None;
        }

        let text = doc.text().to_string();
        let section = NewFilingSection {
            accession_number: accession.to_string(),
            section_key: key.as_str().to_string(),
            title: Some(filename.to_string()),
            char_start: 0,
            char_end: doc.len() as i32,
            word_count: word_count(&text),
            text,
            document_filename: filename.to_string(),
            parser_version: self.parser_version.clone(),
        };
        Some((doc, section))
    }
}

/// Section key for an exhibit filename (`ex21.htm`, `ex10_5.htm`, ...)
pub fn exhibit_key(filename: &str) -> Option<SectionKey> {
    let lower = filename.to_lowercase();
    let stem = lower.strip_prefix("ex")?;
    let stem = stem.trim_start_matches(['-', '_']);
    if stem.starts_with("21") {
        Some(SectionKey::Ex21)
    } else if stem.starts_with("10") {
        Some(SectionKey::Ex10)
    } else {
        None
    }
}

/// Split an oversized section into paragraph windows of at most
/// `max_bytes`, returned as (start, end) offsets relative to the section
/// text. Paragraphs are never split unless a single paragraph exceeds the
/// window by itself.
pub fn paragraph_windows(text: &str, max_bytes: usize) -> Vec<(usize, usize)> {
    if text.len() <= max_bytes {
        return vec![(0, text.len())];
    }

    let mut windows = Vec::new();
    let mut window_start = 0;
    let mut cursor = 0;

    for paragraph in text.split_inclusive("\n\n") {
        let para_end = cursor + paragraph.len();
        if para_end - window_start > max_bytes && cursor > window_start {
            windows.push((window_start, cursor));
            window_start = cursor;
        }
        cursor = para_end;
    }
    if cursor > window_start {
        windows.push((window_start, cursor));
    }

    windows
}
