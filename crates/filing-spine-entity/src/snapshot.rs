//! Immutable point-in-time view of the entity spine.
//!
//! The resolver works over a snapshot loaded per batch: resolving the same
//! candidate against the same snapshot is deterministic, and readers never
//! observe half-applied symbology updates.

use chrono::NaiveDate;
use std::collections::HashMap;
use uuid::Uuid;

use filing_spine_core::models::{ClaimStatus, OwnerType, Scheme};
use filing_spine_core::{AppResult, DatabasePool};

use crate::normalize::canonical_name;

/// An identifier claim with its owner pre-resolved through the hierarchy
/// (listing -> security -> entity for tickers, security -> entity for
/// CUSIP/ISIN/FIGI), so ladder lookups land directly on the entity.
#[derive(Debug, Clone)]
pub struct OwnerClaim {
    pub entity_id: Uuid,
    /// Exchange of the owning listing; ticker collision tie-break input
    pub exchange: Option<String>,
    pub valid_from: NaiveDate,
    pub valid_to: Option<NaiveDate>,
    pub status: String,
}

impl OwnerClaim {
    pub fn covers(&self, as_of: NaiveDate) -> bool {
        self.status == ClaimStatus::Active.as_str()
            && self.valid_from <= as_of
            && self.valid_to.map_or(true, |end| as_of < end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasKindView {
    FormerName,
    Dba,
    Aka,
    Subsidiary,
}

impl AliasKindView {
    fn parse(s: &str) -> AliasKindView {
        match s {
            "FORMER_NAME" => AliasKindView::FormerName,
            "DBA" => AliasKindView::Dba,
            "SUBSIDIARY" => AliasKindView::Subsidiary,
            _ => AliasKindView::Aka,
        }
    }

    /// Alias confidence band per kind, within [0.9, 0.99]
    pub fn confidence(&self) -> f64 {
        match self {
            AliasKindView::FormerName => 0.97,
            AliasKindView::Dba => 0.93,
            AliasKindView::Aka => 0.92,
            AliasKindView::Subsidiary => 0.9,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AliasEntry {
    pub entity_id: Uuid,
    pub kind: AliasKindView,
}

/// A name available for fuzzy ranking
#[derive(Debug, Clone)]
pub struct FuzzyName {
    pub normalized: String,
    pub entity_id: Uuid,
}

#[derive(Debug, Default)]
pub struct SpineSnapshot {
    /// (scheme, normalized value) -> claims with resolved owners
    identifiers: HashMap<(Scheme, String), Vec<OwnerClaim>>,
    /// canonical_name(current or historical primary name) -> entity ids
    names: HashMap<String, Vec<Uuid>>,
    /// canonical_name(alias) -> alias entries
    aliases: HashMap<String, Vec<AliasEntry>>,
    /// deduplicated pool for the fuzzy rung
    fuzzy_pool: Vec<FuzzyName>,
    /// merged entity -> survivor
    redirects: HashMap<Uuid, Uuid>,
}

impl SpineSnapshot {
    pub fn identifier_claims(&self, scheme: Scheme, value: &str) -> &[OwnerClaim] {
        self.identifiers
            .get(&(scheme, value.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn entities_named(&self, name: &str) -> &[Uuid] {
        self.names
            .get(&canonical_name(name))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn alias_entries(&self, name: &str) -> &[AliasEntry] {
        self.aliases
            .get(&canonical_name(name))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn fuzzy_pool(&self) -> &[FuzzyName] {
        &self.fuzzy_pool
    }

    /// Follow merge redirects to the canonical survivor. A cycle is a data
    /// defect: the walk stops and reports it instead of spinning.
    pub fn resolve_redirect(&self, id: Uuid) -> (Uuid, bool) {
        let mut current = id;
        let mut hops = 0;
        while let Some(next) = self.redirects.get(&current) {
            hops += 1;
            if hops > self.redirects.len() {
                return (id, true);
            }
            current = *next;
        }
        (current, false)
    }

    /// Assemble a snapshot by hand; the unit-test entry point and the
    /// building block `load` uses.
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::default()
    }

    /// Load the full spine from the store
    pub async fn load(pool: &DatabasePool) -> AppResult<SpineSnapshot> {
        use diesel::prelude::*;
        use diesel_async::RunQueryDsl;
        use filing_spine_core::schema::{
            entities, entity_aliases, entity_versions, identifier_claims, listings, securities,
        };

        let mut conn = pool.get().await?;
        let mut builder = SpineSnapshot::builder();

        // Ownership chains for hierarchy traversal
        let security_owner: HashMap<Uuid, Uuid> = securities::dsl::securities
            .select((securities::dsl::id, securities::dsl::entity_id))
            .load::<(Uuid, Uuid)>(&mut conn)
            .await?
            .into_iter()
            .collect();
        let listing_owner: HashMap<Uuid, (Uuid, String)> = listings::dsl::listings
            .select((
                listings::dsl::id,
                listings::dsl::security_id,
                listings::dsl::exchange,
            ))
            .load::<(Uuid, Uuid, String)>(&mut conn)
            .await?
            .into_iter()
            .map(|(id, sec, exch)| (id, (sec, exch)))
            .collect();

        let claims: Vec<(String, Uuid, String, String, NaiveDate, Option<NaiveDate>, String)> =
            identifier_claims::dsl::identifier_claims
                .select((
                    identifier_claims::dsl::owner_type,
                    identifier_claims::dsl::owner_id,
                    identifier_claims::dsl::scheme,
                    identifier_claims::dsl::value,
                    identifier_claims::dsl::valid_from,
                    identifier_claims::dsl::valid_to,
                    identifier_claims::dsl::status,
                ))
                .load(&mut conn)
                .await?;

        for (owner_type, owner_id, scheme, value, valid_from, valid_to, status) in claims {
            let Some(scheme) = Scheme::parse(&scheme) else {
                continue;
            };
            let (entity_id, exchange) = match OwnerType::parse(&owner_type) {
                Some(OwnerType::Entity) => (Some(owner_id), None),
                Some(OwnerType::Security) => {
                    (security_owner.get(&owner_id).copied(), None)
                }
                Some(OwnerType::Listing) => {
                    let resolved = listing_owner.get(&owner_id).and_then(|(sec, exch)| {
                        security_owner.get(sec).map(|e| (*e, exch.clone()))
                    });
                    match resolved {
                        Some((entity, exch)) => (Some(entity), Some(exch)),
                        None => (None, None),
                    }
                }
                None => (None, None),
            };
            let Some(entity_id) = entity_id else { continue };

            builder = builder.claim(
                scheme,
                &value,
                OwnerClaim {
                    entity_id,
                    exchange,
                    valid_from,
                    valid_to,
                    status,
                },
            );
        }

        // Current names and redirects
        let entity_rows: Vec<(Uuid, String, Option<Uuid>)> = entities::dsl::entities
            .select((
                entities::dsl::id,
                entities::dsl::primary_name,
                entities::dsl::merged_into,
            ))
            .load(&mut conn)
            .await?;
        for (id, name, merged_into) in entity_rows {
            builder = builder.name(&name, id);
            if let Some(survivor) = merged_into {
                builder = builder.redirect(id, survivor);
            }
        }

        // Historical names from closed versions
        let version_rows: Vec<(Uuid, String)> = entity_versions::dsl::entity_versions
            .filter(entity_versions::dsl::valid_to.is_not_null())
            .select((
                entity_versions::dsl::entity_id,
                entity_versions::dsl::primary_name,
            ))
            .load(&mut conn)
            .await?;
        for (entity_id, name) in version_rows {
            builder = builder.name(&name, entity_id);
        }

        let alias_rows: Vec<(Uuid, String, String)> = entity_aliases::dsl::entity_aliases
            .select((
                entity_aliases::dsl::entity_id,
                entity_aliases::dsl::alias,
                entity_aliases::dsl::alias_kind,
            ))
            .load(&mut conn)
            .await?;
        for (entity_id, alias, kind) in alias_rows {
            builder = builder.alias(&alias, entity_id, AliasKindView::parse(&kind));
        }

        Ok(builder.build())
    }
}

#[derive(Default)]
pub struct SnapshotBuilder {
    snapshot: SpineSnapshot,
}

impl SnapshotBuilder {
    pub fn claim(mut self, scheme: Scheme, value: &str, claim: OwnerClaim) -> Self {
        self.snapshot
            .identifiers
            .entry((scheme, value.to_uppercase()))
            .or_default()
            .push(claim);
        self
    }

    pub fn name(mut self, name: &str, entity_id: Uuid) -> Self {
        let key = canonical_name(name);
        if key.is_empty() {
            return self;
        }
        let ids = self.snapshot.names.entry(key.clone()).or_default();
        if !ids.contains(&entity_id) {
            ids.push(entity_id);
        }
        self.snapshot.fuzzy_pool.push(FuzzyName {
            normalized: key,
            entity_id,
        });
        self
    }

    pub fn alias(mut self, alias: &str, entity_id: Uuid, kind: AliasKindView) -> Self {
        let key = canonical_name(alias);
        if key.is_empty() {
            return self;
        }
        self.snapshot
            .aliases
            .entry(key.clone())
            .or_default()
            .push(AliasEntry { entity_id, kind });
        self.snapshot.fuzzy_pool.push(FuzzyName {
            normalized: key,
            entity_id,
        });
        self
    }

    pub fn redirect(mut self, from: Uuid, to: Uuid) -> Self {
        self.snapshot.redirects.insert(from, to);
        self
    }

    pub fn build(mut self) -> SpineSnapshot {
        // Deduplicate the fuzzy pool on (name, entity)
        self.snapshot
            .fuzzy_pool
            .sort_by(|a, b| a.normalized.cmp(&b.normalized).then(a.entity_id.cmp(&b.entity_id)));
        self.snapshot
            .fuzzy_pool
            .dedup_by(|a, b| a.normalized == b.normalized && a.entity_id == b.entity_id);
        self.snapshot
    }
}
