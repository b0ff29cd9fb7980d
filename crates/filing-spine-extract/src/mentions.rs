//! Candidate entity mention extraction: a cascade of sources, each
//! reporting its method, reconciled by confidence then method priority.

use once_cell::sync::Lazy;
use regex::Regex;

use filing_spine_core::models::ExtractionMethod;

/// A span proposed by one extractor, with offsets into the canonical
/// document (section char_start plus the local offset).
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateMention {
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
    pub type_hint: TypeHint,
    pub confidence: f64,
    pub method: ExtractionMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeHint {
    Company,
    Person,
    Unknown,
}

/// A section's text and its base offset into the canonical document
#[derive(Debug, Clone)]
pub struct SectionText<'a> {
    pub section_key: &'a str,
    pub text: &'a str,
    pub base_offset: usize,
}

/// One rung of the extractor cascade
pub trait MentionSource: Send + Sync {
    fn method(&self) -> ExtractionMethod;
    fn extract(&self, section: &SectionText<'_>) -> Vec<CandidateMention>;
}

static COMPANY_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b([A-Z][A-Za-z0-9&.\-]*(?:\s+[A-Z][A-Za-z0-9&.\-]*){0,5},?\s+(?:Inc|Incorporated|Corp|Corporation|LLC|L\.P|Ltd|Limited|PLC|plc|N\.V|S\.A|A\.G|AG|Co|Company|Holdings|Group|Partners)\.?)",
    )
    .expect("static company suffix regex")
});

static EXECUTIVE_TITLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b([A-Z][a-z]+(?:\s+[A-Z]\.?)?\s+[A-Z][a-z]+),?\s+(?:our|the Company's|as)?\s*(?:Chief Executive Officer|Chief Financial Officer|Chief Operating Officer|President|Chairman|Chief Accounting Officer)",
    )
    .expect("static executive title regex")
});

/// Company-suffix and executive-title patterns
pub struct PatternExtractor;

impl MentionSource for PatternExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Pattern
    }

    fn extract(&self, section: &SectionText<'_>) -> Vec<CandidateMention> {
        let mut out = Vec::new();

        for m in COMPANY_SUFFIX.find_iter(section.text) {
            out.push(CandidateMention {
                text: m.as_str().to_string(),
                char_start: section.base_offset + m.start(),
                char_end: section.base_offset + m.end(),
                type_hint: TypeHint::Company,
                confidence: 0.85,
                method: ExtractionMethod::Pattern,
            });
        }

        for caps in EXECUTIVE_TITLE.captures_iter(section.text) {
            if let Some(name) = caps.get(1) {
                out.push(CandidateMention {
                    text: name.as_str().to_string(),
                    char_start: section.base_offset + name.start(),
                    char_end: section.base_offset + name.end(),
                    type_hint: TypeHint::Person,
                    confidence: 0.7,
                    method: ExtractionMethod::Pattern,
                });
            }
        }

        out
    }
}

/// Exact match against the hot cache of known names and aliases
pub struct DictionaryExtractor {
    names: Vec<String>,
}

impl DictionaryExtractor {
    /// Names should arrive longest-first so the most specific alias claims
    /// a span before a shorter prefix does; this constructor enforces it.
    pub fn new(mut names: Vec<String>) -> Self {
        names.retain(|n| n.len() >= 2);
        names.sort_by_key(|n| std::cmp::Reverse(n.len()));
        names.dedup();
        Self { names }
    }

    fn is_word_boundary(text: &str, start: usize, end: usize) -> bool {
        let before_ok = start == 0
            || !text[..start]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let after_ok = end == text.len()
            || !text[end..].chars().next().is_some_and(|c| c.is_alphanumeric());
        before_ok && after_ok
    }
}

impl MentionSource for DictionaryExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Dictionary
    }

    fn extract(&self, section: &SectionText<'_>) -> Vec<CandidateMention> {
        let mut out = Vec::new();
        for name in &self.names {
            let mut from = 0;
            while let Some(found) = section.text[from..].find(name.as_str()) {
                let start = from + found;
                let end = start + name.len();
                if Self::is_word_boundary(section.text, start, end) {
                    out.push(CandidateMention {
                        text: name.clone(),
                        char_start: section.base_offset + start,
                        char_end: section.base_offset + end,
                        type_hint: TypeHint::Company,
                        confidence: 0.98,
                        method: ExtractionMethod::Dictionary,
                    });
                }
                from = end;
            }
        }
        out
    }
}

/// Reconcile overlapping spans from different sources: highest confidence
/// wins, ties break on method priority.
pub fn reconcile(mut candidates: Vec<CandidateMention>) -> Vec<CandidateMention> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.method.priority().cmp(&b.method.priority()))
    });

    let mut kept: Vec<CandidateMention> = Vec::new();
    for candidate in candidates {
        let overlaps = kept
            .iter()
            .any(|k| candidate.char_start < k.char_end && k.char_start < candidate.char_end);
        if !overlaps {
            kept.push(candidate);
        }
    }

    kept.sort_by_key(|c| c.char_start);
    kept
}

/// Sentence and paragraph coordinates for a span inside section text
#[derive(Debug, Clone, PartialEq)]
pub struct SpanLocation {
    pub paragraph_index: i32,
    pub sentence_index: i32,
    pub sentence_start: usize,
    pub sentence_end: usize,
}

/// Locate the paragraph and sentence containing a local span offset.
/// Sentence splitting is intentionally simple: terminal punctuation
/// followed by whitespace; abbreviation-heavy sentences over-split, which
/// only narrows the quoted evidence.
pub fn locate_span(text: &str, local_start: usize) -> SpanLocation {
    let paragraph_index = text[..local_start].matches("\n\n").count() as i32;

    let para_start = text[..local_start].rfind("\n\n").map(|i| i + 2).unwrap_or(0);
    let para_end = text[local_start..]
        .find("\n\n")
        .map(|i| local_start + i)
        .unwrap_or(text.len());
    let paragraph = &text[para_start..para_end];

    let mut sentence_index = 0;
    let mut sentence_start = para_start;
    for (idx, _) in paragraph.match_indices(['.', '!', '?']) {
        let boundary = para_start + idx + 1;
        let followed_by_space = text[boundary..]
            .chars()
            .next()
            .is_none_or(|c| c.is_whitespace());
        if !followed_by_space || boundary > local_start {
            continue;
        }
        sentence_index += 1;
        sentence_start = boundary;
    }

    // Trim leading whitespace off the sentence
    let rel = &text[sentence_start..];
    let trimmed = rel.len() - rel.trim_start().len();
    let sentence_start = sentence_start + trimmed;

    let sentence_end = text[local_start..]
        .find(['.', '!', '?'])
        .map(|i| (local_start + i + 1).min(para_end))
        .unwrap_or(para_end);

    SpanLocation {
        paragraph_index,
        sentence_index,
        sentence_start,
        sentence_end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(text: &str) -> SectionText<'_> {
        SectionText {
            section_key: "ITEM_1A",
            text,
            base_offset: 45000,
        }
    }

    #[test]
    fn test_pattern_extractor_finds_company_suffixes() {
        // REQUIREMENT: Pattern rung matches company-suffix forms
        let text = "We compete with Samsung Electronics Co., Ltd. and Alphabet Inc. in several markets.";
        let found = PatternExtractor.extract(&section(text));

        assert!(found
            .iter()
            .any(|m| m.text.contains("Alphabet Inc") && m.type_hint == TypeHint::Company));
        assert!(found.iter().all(|m| m.method == ExtractionMethod::Pattern));
    }

    #[test]
    fn test_pattern_extractor_finds_executives() {
        let text = "Tim Cook, our Chief Executive Officer, announced the results.";
        let found = PatternExtractor.extract(&section(text));

        let person = found.iter().find(|m| m.type_hint == TypeHint::Person).unwrap();
        assert_eq!(person.text, "Tim Cook");
    }

    #[test]
    fn test_dictionary_extractor_byte_precise_spans() {
        // REQUIREMENT: Each span carries byte offsets into the canonical
        // document; document[start..end] == text (scenario: TSMC at
        // [45034, 45038) with section base 45000)
        let text = "We rely on TSMC for substantially all of our advanced logic wafer supply.";
        let dict = DictionaryExtractor::new(vec!["TSMC".to_string(), "Intel".to_string()]);

        let found = dict.extract(&section(text));
        assert_eq!(found.len(), 1);
        let m = &found[0];
        assert_eq!(m.text, "TSMC");
        assert_eq!(m.char_start, 45011);
        assert_eq!(m.char_end, 45015);
        // Offsets are base + local; local span slices back to the text
        assert_eq!(&text[m.char_start - 45000..m.char_end - 45000], "TSMC");
    }

    #[test]
    fn test_dictionary_respects_word_boundaries() {
        let dict = DictionaryExtractor::new(vec!["Arm".to_string()]);
        let found = dict.extract(&section("Armageddon is not Arm Holdings; Arm is."));

        // "Armageddon" must not match; bare "Arm" occurrences do
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|m| m.text == "Arm"));
    }

    #[test]
    fn test_reconcile_prefers_confidence_then_method() {
        // REQUIREMENT: Overlapping spans reconcile by confidence, ties by
        // Dictionary > Pattern > NER > LLM > Heuristic
        let overlapping = vec![
            CandidateMention {
                text: "TSMC".to_string(),
                char_start: 100,
                char_end: 104,
                type_hint: TypeHint::Company,
                confidence: 0.98,
                method: ExtractionMethod::Dictionary,
            },
            CandidateMention {
                text: "TSMC Ltd".to_string(),
                char_start: 100,
                char_end: 108,
                type_hint: TypeHint::Company,
                confidence: 0.85,
                method: ExtractionMethod::Pattern,
            },
            CandidateMention {
                text: "Apple Inc".to_string(),
                char_start: 200,
                char_end: 209,
                type_hint: TypeHint::Company,
                confidence: 0.85,
                method: ExtractionMethod::Pattern,
            },
        ];

        let kept = reconcile(overlapping);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].method, ExtractionMethod::Dictionary);
        assert_eq!(kept[1].text, "Apple Inc");

        // Equal confidence: dictionary outranks pattern
        let tied = vec![
            CandidateMention {
                text: "A".to_string(),
                char_start: 0,
                char_end: 1,
                type_hint: TypeHint::Company,
                confidence: 0.9,
                method: ExtractionMethod::Pattern,
            },
            CandidateMention {
                text: "A".to_string(),
                char_start: 0,
                char_end: 1,
                type_hint: TypeHint::Company,
                confidence: 0.9,
                method: ExtractionMethod::Dictionary,
            },
        ];
        let kept = reconcile(tied);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].method, ExtractionMethod::Dictionary);
    }

    #[test]
    fn test_locate_span_sentence_and_paragraph() {
        let text = "First paragraph intro. It has two sentences.\n\nWe rely on TSMC for wafers. Nothing else matters.";
        let tsmc_at = text.find("TSMC").unwrap();

        let loc = locate_span(text, tsmc_at);
        assert_eq!(loc.paragraph_index, 1);
        assert_eq!(loc.sentence_index, 0);
        assert_eq!(
            &text[loc.sentence_start..loc.sentence_end],
            "We rely on TSMC for wafers."
        );
    }

    #[test]
    fn test_locate_span_second_sentence() {
        let text = "One sentence here. Another with Apple in it.";
        let apple_at = text.find("Apple").unwrap();

        let loc = locate_span(text, apple_at);
        assert_eq!(loc.paragraph_index, 0);
        assert_eq!(loc.sentence_index, 1);
        assert_eq!(
            &text[loc.sentence_start..loc.sentence_end],
            "Another with Apple in it."
        );
    }
}
