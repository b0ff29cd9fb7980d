//! Filing extraction: offset-preserving canonicalization, section boundary
//! detection, the mention extractor cascade and the relationship/event
//! planner.

pub mod canonical;
pub mod llm;
pub mod mentions;
pub mod relationships;
pub mod sections;

pub use canonical::{canonicalize, CanonicalDocument};
pub use llm::LlmExtractor;
pub use mentions::{
    reconcile, CandidateMention, DictionaryExtractor, MentionSource, PatternExtractor,
    SectionText, TypeHint,
};
pub use relationships::{
    build, classify_sentence, extract_8k_events, parse_ex21, BuildOutput, FilingContext,
    PlannedEvent, PlannedRelationship, ResolvedMention, SubsidiaryRow,
};
pub use sections::{exhibit_key, paragraph_windows, ParseIssue, SectionParser};
