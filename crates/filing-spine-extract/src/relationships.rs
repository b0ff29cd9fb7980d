//! Relationship and event planning from resolved mentions.
//!
//! The planner is pure: it takes a filing's sections and resolved mentions
//! and returns the edges and events to persist. The graph worker owns the
//! writes, so closure and evidence append run against the store in one
//! place.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use filing_spine_core::models::{EvidenceRef, RelationshipType};

/// A mention after resolution, as the planner consumes it
#[derive(Debug, Clone)]
pub struct ResolvedMention {
    pub mention_id: Uuid,
    pub entity_id: Option<Uuid>,
    pub entity_text: String,
    pub section_key: String,
    pub char_start: i32,
    pub char_end: i32,
    pub sentence_text: String,
}

/// An edge the graph worker should record
#[derive(Debug, Clone)]
pub struct PlannedRelationship {
    pub source_entity_id: Uuid,
    pub target_entity_id: Uuid,
    pub relationship_type: RelationshipType,
    pub valid_from: Option<NaiveDate>,
    pub confidence: f64,
    pub evidence: EvidenceRef,
}

/// An event row the graph worker should record
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedEvent {
    pub event_type: String,
    pub item_code: String,
    pub description: Option<String>,
}

/// Planner output for one filing
#[derive(Debug, Default)]
pub struct BuildOutput {
    pub relationships: Vec<PlannedRelationship>,
    pub events: Vec<PlannedEvent>,
    /// Subsidiary entity ids seen in EX-21 this filing; the worker closes
    /// open edges to ids not in this set
    pub subsidiaries_seen: Vec<Uuid>,
    pub saw_ex21: bool,
}

static SUPPLIER_CUES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(suppl(?:y|ies|ier|iers)|rely on|relies on|procure|sourc(?:e|ing)|manufactur(?:es|er|ing) for us|vendor)\b")
        .expect("static cue regex")
});
static CUSTOMER_CUES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(customer|customers|sell(?:s)? to|sales to|distributor for)\b")
        .expect("static cue regex")
});
static COMPETITOR_CUES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(compet(?:e|es|ition|itor|itors|ing)|rival)\b").expect("static cue regex")
});
static PARTNER_CUES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(partner(?:s|ship)?|collaborat(?:e|es|ion)|joint venture|alliance)\b")
        .expect("static cue regex")
});

/// Classify a narrative mention by sentence-level cue words. Untyped
/// mentions stay MENTIONED_IN.
pub fn classify_sentence(sentence: &str) -> RelationshipType {
    if SUPPLIER_CUES.is_match(sentence) {
        RelationshipType::SupplierTo
    } else if CUSTOMER_CUES.is_match(sentence) {
        RelationshipType::CustomerOf
    } else if COMPETITOR_CUES.is_match(sentence) {
        RelationshipType::CompetitorOf
    } else if PARTNER_CUES.is_match(sentence) {
        RelationshipType::PartnerOf
    } else {
        RelationshipType::MentionedIn
    }
}

/// One parsed row of an EX-21 subsidiary list
#[derive(Debug, Clone, PartialEq)]
pub struct SubsidiaryRow {
    pub name: String,
    pub jurisdiction: Option<String>,
    /// Byte offsets of the row within the exhibit section text
    pub char_start: usize,
    pub char_end: usize,
}

static ROW_WITH_PARENS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>.+?)\s*[\(\[](?P<jur>[A-Za-z][A-Za-z .,']{1,40})[\)\]]\s*$")
        .expect("static ex21 row regex")
});
static HEADER_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(name|subsidiar|state|jurisdiction|entity|list of|exhibit|organized|percent|ownership)")
        .expect("static ex21 header regex")
});

/// Parse an EX-21 subsidiary list from canonicalized exhibit text. Handles
/// name-with-parenthesized-jurisdiction rows and two-column layouts
/// separated by wide whitespace; header and boilerplate lines are skipped.
pub fn parse_ex21(text: &str) -> Vec<SubsidiaryRow> {
    let mut rows = Vec::new();
    let mut offset = 0;

    for line in text.split('\n') {
        let line_start = offset;
        offset += line.len() + 1;

        let trimmed = line.trim();
        if trimmed.len() < 4 || HEADER_WORDS.is_match(trimmed) {
            continue;
        }
        // A subsidiary row starts with a capitalized name
        if !trimmed.chars().next().is_some_and(|c| c.is_uppercase()) {
            continue;
        }

        let leading_ws = line.len() - line.trim_start().len();
        let row_start = line_start + leading_ws;
        let row_end = row_start + trimmed.len();

        if let Some(caps) = ROW_WITH_PARENS.captures(trimmed) {
            let name = caps.name("name").map(|m| m.as_str().trim()).unwrap_or("");
            if name.is_empty() {
                continue;
            }
            rows.push(SubsidiaryRow {
                name: name.to_string(),
                jurisdiction: caps.name("jur").map(|m| m.as_str().trim().to_string()),
                char_start: row_start,
                char_end: row_end,
            });
            continue;
        }

        // Two-column layout: name, then jurisdiction after a wide gap
        if let Some(gap) = trimmed.find("   ") {
            let (name, jurisdiction) = trimmed.split_at(gap);
            let jurisdiction = jurisdiction.trim();
            if !jurisdiction.is_empty() && jurisdiction.len() <= 40 {
                rows.push(SubsidiaryRow {
                    name: name.trim().to_string(),
                    jurisdiction: Some(jurisdiction.to_string()),
                    char_start: row_start,
                    char_end: row_end,
                });
                continue;
            }
        }

        rows.push(SubsidiaryRow {
            name: trimmed.to_string(),
            jurisdiction: None,
            char_start: row_start,
            char_end: row_end,
        });
    }

    rows
}

/// 8-K item codes to typed events
pub fn route_8k_item(item_code: &str) -> Option<&'static str> {
    match item_code {
        "1.01" => Some("MATERIAL_AGREEMENT"),
        "1.02" => Some("AGREEMENT_TERMINATION"),
        "2.01" => Some("ACQUISITION_OR_DISPOSITION"),
        "2.02" => Some("RESULTS_OF_OPERATIONS"),
        "4.01" => Some("AUDITOR_CHANGE"),
        "5.02" => Some("EXECUTIVE_CHANGE"),
        "7.01" => Some("REGULATION_FD"),
        "8.01" => Some("OTHER_EVENT"),
        _ => None,
    }
}

static ITEM_8K: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*item\s+(\d\.\d{2})\b[\.\:]?\s*(.{0,120})").expect("static 8-K regex"));

/// Scan an 8-K body for item headings and produce typed events
pub fn extract_8k_events(text: &str) -> Vec<PlannedEvent> {
    let mut events = Vec::new();
    for caps in ITEM_8K.captures_iter(text) {
        let item_code = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let Some(event_type) = route_8k_item(item_code) else {
            continue;
        };
        let description = caps
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty());
        events.push(PlannedEvent {
            event_type: event_type.to_string(),
            item_code: item_code.to_string(),
            description,
        });
    }
    events
}

/// Inputs the planner needs about the filing itself
#[derive(Debug, Clone)]
pub struct FilingContext {
    pub accession_number: String,
    pub form_type: String,
    pub filed_date: NaiveDate,
    /// Resolved filer entity; narrative edges need one
    pub filer_entity_id: Option<Uuid>,
}

/// Plan relationships and events for one filing.
///
/// Narrative sections (ITEM_1, ITEM_7) classify each resolved mention by
/// cue words; EX-21 rows become SUBSIDIARY_OF(parent -> subsidiary) with
/// valid_from = filed_date; EX-10 mentions become EXECUTIVE_OF; 8-K bodies
/// route to typed events.
pub fn build(
    filing: &FilingContext,
    mentions: &[ResolvedMention],
    eight_k_body: Option<&str>,
) -> BuildOutput {
    let mut out = BuildOutput::default();

    for mention in mentions {
        let Some(entity_id) = mention.entity_id else {
            continue;
        };
        let Some(filer_id) = filing.filer_entity_id else {
            continue;
        };
        if entity_id == filer_id {
            continue;
        }

        let evidence = EvidenceRef {
            accession_number: filing.accession_number.clone(),
            section_key: mention.section_key.clone(),
            char_start: mention.char_start,
            char_end: mention.char_end,
            sentence_text: mention.sentence_text.clone(),
        };

        match mention.section_key.as_str() {
            "ITEM_1" | "ITEM_7" | "ITEM_1A" => {
                let kind = classify_sentence(&mention.sentence_text);
                let (source, target) = match kind {
                    // "We rely on X for supply": X supplies the filer
                    RelationshipType::SupplierTo => (entity_id, filer_id),
                    // "X is a significant customer": X buys from the filer
                    RelationshipType::CustomerOf => (entity_id, filer_id),
                    _ => (entity_id, filer_id),
                };
                out.relationships.push(PlannedRelationship {
                    source_entity_id: source,
                    target_entity_id: target,
                    relationship_type: kind,
                    valid_from: None,
                    confidence: if kind == RelationshipType::MentionedIn {
                        0.5
                    } else {
                        0.8
                    },
                    evidence,
                });
            }
            "EX_21" => {
                out.saw_ex21 = true;
                out.subsidiaries_seen.push(entity_id);
                out.relationships.push(PlannedRelationship {
                    source_entity_id: filer_id,
                    target_entity_id: entity_id,
                    relationship_type: RelationshipType::SubsidiaryOf,
                    valid_from: Some(filing.filed_date),
                    confidence: 1.0,
                    evidence,
                });
            }
            "EX_10" => {
                out.relationships.push(PlannedRelationship {
                    source_entity_id: entity_id,
                    target_entity_id: filer_id,
                    relationship_type: RelationshipType::ExecutiveOf,
                    valid_from: Some(filing.filed_date),
                    confidence: 0.9,
                    evidence,
                });
            }
            _ => {}
        }
    }

    if filing.form_type.starts_with("8-K") {
        if let Some(body) = eight_k_body {
            out.events = extract_8k_events(body);
        }
    }

    out
}
