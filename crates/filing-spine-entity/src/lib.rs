//! The entity spine: canonical identities, temporal identifier claims and
//! the resolution ladder that maps candidate spans to entities as of a
//! point in time.

pub mod cache;
pub mod normalize;
pub mod resolver;
pub mod snapshot;
pub mod spine;

pub use cache::NameCache;
pub use normalize::{canonical_name, normalize_ticker};
pub use resolver::{Resolution, ResolutionContext, ResolutionWarning, Resolver};
pub use snapshot::{OwnerClaim, SpineSnapshot};
pub use spine::EntitySpine;
