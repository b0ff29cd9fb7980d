pub mod checkpoint;
pub mod claim;
pub mod entity;
pub mod event;
pub mod filing;
pub mod mention;
pub mod record;
pub mod relationship;
pub mod section;
pub mod task;
pub mod validation;

pub use checkpoint::FeedCheckpoint;
pub use claim::{ClaimStatus, IdentifierClaim, NewIdentifierClaim, OwnerType, Scheme};
pub use entity::{
    AliasKind, Entity, EntityAlias, EntityStatus, EntityType, EntityVersion, Listing, NewEntity,
    Security,
};
pub use event::{FilingEvent, NewFilingEvent};
pub use filing::{Filing, FilingFilter, NewFiling};
pub use mention::{
    EntityMention, ExtractionMethod, NewEntityMention, ResolutionMethod,
};
pub use record::{
    AdmitOutcome, AdmitResult, Layer, Record, RecordCandidate, RecordSighting,
    DEDUPE_WINDOW_SECONDS,
};
pub use relationship::{
    EntityRelationship, EvidenceRef, RelationshipEvidence, RelationshipType,
};
pub use section::{FilingSection, NewFilingSection, SectionKey};
pub use task::{
    queues, DeadLetterTask, NewQueueTask, QueueTask, TaskStatus, UpdateQueueTask,
};
pub use validation::ValidationEvent;
