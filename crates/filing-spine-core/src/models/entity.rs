use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::database::DatabasePool;
use crate::error::{AppError, AppResult};
use crate::schema::{entities, entity_aliases, entity_versions, listings, securities};

/// Canonical entity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityType {
    CompanyPublic,
    CompanyPrivate,
    Person,
    Fund,
    Government,
    Other,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::CompanyPublic => "COMPANY_PUBLIC",
            EntityType::CompanyPrivate => "COMPANY_PRIVATE",
            EntityType::Person => "PERSON",
            EntityType::Fund => "FUND",
            EntityType::Government => "GOVERNMENT",
            EntityType::Other => "OTHER",
        }
    }
}

impl From<String> for EntityType {
    fn from(s: String) -> Self {
        match s.to_uppercase().as_str() {
            "COMPANY_PUBLIC" => EntityType::CompanyPublic,
            "COMPANY_PRIVATE" => EntityType::CompanyPrivate,
            "PERSON" => EntityType::Person,
            "FUND" => EntityType::Fund,
            "GOVERNMENT" => EntityType::Government,
            _ => EntityType::Other,
        }
    }
}

/// Entity lifecycle status. Merged entities keep their row and redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityStatus {
    Active,
    Inferred,
    Merged,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Active => "ACTIVE",
            EntityStatus::Inferred => "INFERRED",
            EntityStatus::Merged => "MERGED",
        }
    }
}

/// Kinds of alternate names tracked for the alias resolution rung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AliasKind {
    FormerName,
    Dba,
    Aka,
    Subsidiary,
}

impl AliasKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AliasKind::FormerName => "FORMER_NAME",
            AliasKind::Dba => "DBA",
            AliasKind::Aka => "AKA",
            AliasKind::Subsidiary => "SUBSIDIARY",
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = entities)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Entity {
    pub id: Uuid,
    pub entity_type: String,
    pub primary_name: String,
    pub source_system: String,
    pub source_id: String,
    pub status: String,
    pub merged_into: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Validate, Deserialize)]
#[diesel(table_name = entities)]
pub struct NewEntity {
    pub entity_type: String,
    #[validate(length(min = 1, max = 500))]
    pub primary_name: String,
    #[validate(length(min = 1, max = 50))]
    pub source_system: String,
    #[validate(length(min = 1, max = 100))]
    pub source_id: String,
    pub status: String,
}

/// Point-in-time snapshot of the mutable portion of an entity
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = entity_versions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct EntityVersion {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub primary_name: String,
    pub entity_type: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub source_record_ids: Vec<Option<Uuid>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = entity_versions)]
struct NewEntityVersion {
    entity_id: Uuid,
    primary_name: String,
    entity_type: String,
    valid_from: DateTime<Utc>,
    source_record_ids: Vec<Option<Uuid>>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = securities)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Security {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = listings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Listing {
    pub id: Uuid,
    pub security_id: Uuid,
    pub exchange: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = entity_aliases)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct EntityAlias {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub alias: String,
    pub alias_kind: String,
    pub created_at: DateTime<Utc>,
}

impl Entity {
    /// Create a canonical entity together with its opening version row
    pub async fn create(pool: &DatabasePool, new_entity: &NewEntity) -> AppResult<Entity> {
        use crate::schema::entities::dsl;

        new_entity.validate()?;

        let mut conn = pool.get().await?;
        let new_entity = new_entity.clone();

        conn.transaction::<Entity, AppError, _>(|conn| {
            async move {
                let entity: Entity = diesel::insert_into(dsl::entities)
                    .values(&new_entity)
                    .get_result(conn)
                    .await?;

                let version = NewEntityVersion {
                    entity_id: entity.id,
                    primary_name: entity.primary_name.clone(),
                    entity_type: entity.entity_type.clone(),
                    valid_from: entity.created_at,
                    source_record_ids: vec![],
                };
                diesel::insert_into(entity_versions::dsl::entity_versions)
                    .values(&version)
                    .execute(conn)
                    .await?;

                Ok(entity)
            }
            .scope_boxed()
        })
        .await
    }

    pub async fn find_by_id(pool: &DatabasePool, entity_id: Uuid) -> AppResult<Option<Entity>> {
        use crate::schema::entities::dsl;

        let mut conn = pool.get().await?;
        let entity = dsl::entities
            .filter(dsl::id.eq(entity_id))
            .first::<Entity>(&mut conn)
            .await
            .optional()?;
        Ok(entity)
    }

    pub async fn find_by_source(
        pool: &DatabasePool,
        source_system: &str,
        source_id: &str,
    ) -> AppResult<Option<Entity>> {
        use crate::schema::entities::dsl;

        let mut conn = pool.get().await?;
        let entity = dsl::entities
            .filter(dsl::source_system.eq(source_system))
            .filter(dsl::source_id.eq(source_id))
            .first::<Entity>(&mut conn)
            .await
            .optional()?;
        Ok(entity)
    }

    /// Rename: close the open version, append a new one, update the
    /// denormalized primary_name. The former name becomes an alias.
    pub async fn rename(
        pool: &DatabasePool,
        entity_id: Uuid,
        new_name: &str,
        source_record_ids: Vec<Uuid>,
    ) -> AppResult<Entity> {
        use crate::schema::entities::dsl;

        let mut conn = pool.get().await?;
        let new_name = new_name.to_string();

        conn.transaction::<Entity, AppError, _>(|conn| {
            async move {
                let entity: Entity = dsl::entities
                    .filter(dsl::id.eq(entity_id))
                    .for_update()
                    .first(conn)
                    .await?;

                if entity.primary_name == new_name {
                    return Ok(entity);
                }

                let now = Utc::now();
                diesel::update(
                    entity_versions::dsl::entity_versions
                        .filter(entity_versions::dsl::entity_id.eq(entity_id))
                        .filter(entity_versions::dsl::valid_to.is_null()),
                )
                .set(entity_versions::dsl::valid_to.eq(now))
                .execute(conn)
                .await?;

                let version = NewEntityVersion {
                    entity_id,
                    primary_name: new_name.clone(),
                    entity_type: entity.entity_type.clone(),
                    valid_from: now,
                    source_record_ids: source_record_ids.into_iter().map(Some).collect(),
                };
                diesel::insert_into(entity_versions::dsl::entity_versions)
                    .values(&version)
                    .execute(conn)
                    .await?;

                diesel::insert_into(entity_aliases::dsl::entity_aliases)
                    .values((
                        entity_aliases::dsl::entity_id.eq(entity_id),
                        entity_aliases::dsl::alias.eq(&entity.primary_name),
                        entity_aliases::dsl::alias_kind.eq(AliasKind::FormerName.as_str()),
                    ))
                    .execute(conn)
                    .await?;

                let entity = diesel::update(dsl::entities.filter(dsl::id.eq(entity_id)))
                    .set((dsl::primary_name.eq(&new_name), dsl::updated_at.eq(now)))
                    .get_result(conn)
                    .await?;
                Ok(entity)
            }
            .scope_boxed()
        })
        .await
    }

    /// Merge: the loser keeps its row and redirects to the survivor. Prior
    /// mentions keep their original resolved_entity_id; lookups follow the
    /// redirect chain.
    pub async fn merge_into(pool: &DatabasePool, loser: Uuid, survivor: Uuid) -> AppResult<()> {
        use crate::schema::entities::dsl;

        if loser == survivor {
            return Err(AppError::Validation(
                "entity cannot be merged into itself".to_string(),
            ));
        }

        let mut conn = pool.get().await?;

        let survivor_exists: i64 = dsl::entities
            .filter(dsl::id.eq(survivor))
            .count()
            .get_result(&mut conn)
            .await?;
        if survivor_exists == 0 {
            return Err(AppError::not_found(format!("entity {}", survivor)));
        }

        diesel::update(dsl::entities.filter(dsl::id.eq(loser)))
            .set((
                dsl::status.eq(EntityStatus::Merged.as_str()),
                dsl::merged_into.eq(survivor),
                dsl::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Version timeline, newest first
    pub async fn versions(pool: &DatabasePool, entity_id: Uuid) -> AppResult<Vec<EntityVersion>> {
        use crate::schema::entity_versions::dsl;

        let mut conn = pool.get().await?;
        let rows = dsl::entity_versions
            .filter(dsl::entity_id.eq(entity_id))
            .order(dsl::valid_from.desc())
            .load::<EntityVersion>(&mut conn)
            .await?;
        Ok(rows)
    }

    /// The open version (valid_to = null)
    pub async fn current_version(
        pool: &DatabasePool,
        entity_id: Uuid,
    ) -> AppResult<Option<EntityVersion>> {
        use crate::schema::entity_versions::dsl;

        let mut conn = pool.get().await?;
        let row = dsl::entity_versions
            .filter(dsl::entity_id.eq(entity_id))
            .filter(dsl::valid_to.is_null())
            .first::<EntityVersion>(&mut conn)
            .await
            .optional()?;
        Ok(row)
    }

    pub async fn add_alias(
        pool: &DatabasePool,
        entity_id: Uuid,
        alias: &str,
        kind: AliasKind,
    ) -> AppResult<()> {
        use crate::schema::entity_aliases::dsl;

        let mut conn = pool.get().await?;
        diesel::insert_into(dsl::entity_aliases)
            .values((
                dsl::entity_id.eq(entity_id),
                dsl::alias.eq(alias),
                dsl::alias_kind.eq(kind.as_str()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn aliases(pool: &DatabasePool, entity_id: Uuid) -> AppResult<Vec<EntityAlias>> {
        use crate::schema::entity_aliases::dsl;

        let mut conn = pool.get().await?;
        let rows = dsl::entity_aliases
            .filter(dsl::entity_id.eq(entity_id))
            .load::<EntityAlias>(&mut conn)
            .await?;
        Ok(rows)
    }

    /// Search by primary name or alias, case-insensitive substring
    pub async fn search_by_name(
        pool: &DatabasePool,
        needle: &str,
        limit: i64,
    ) -> AppResult<Vec<Entity>> {
        use crate::schema::entities::dsl;

        let mut conn = pool.get().await?;
        let pattern = format!("%{}%", needle);
        let rows = dsl::entities
            .filter(dsl::primary_name.ilike(pattern))
            .limit(limit)
            .load::<Entity>(&mut conn)
            .await?;
        Ok(rows)
    }
}

impl Security {
    pub async fn create(
        pool: &DatabasePool,
        entity_id: Uuid,
        description: Option<&str>,
    ) -> AppResult<Security> {
        use crate::schema::securities::dsl;

        let mut conn = pool.get().await?;
        let row = diesel::insert_into(dsl::securities)
            .values((
                dsl::entity_id.eq(entity_id),
                dsl::description.eq(description),
            ))
            .get_result(&mut conn)
            .await?;
        Ok(row)
    }

    pub async fn for_entity(pool: &DatabasePool, entity_id: Uuid) -> AppResult<Vec<Security>> {
        use crate::schema::securities::dsl;

        let mut conn = pool.get().await?;
        let rows = dsl::securities
            .filter(dsl::entity_id.eq(entity_id))
            .load::<Security>(&mut conn)
            .await?;
        Ok(rows)
    }
}

impl Listing {
    pub async fn create(
        pool: &DatabasePool,
        security_id: Uuid,
        exchange: &str,
    ) -> AppResult<Listing> {
        use crate::schema::listings::dsl;

        let mut conn = pool.get().await?;
        let row = diesel::insert_into(dsl::listings)
            .values((dsl::security_id.eq(security_id), dsl::exchange.eq(exchange)))
            .get_result(&mut conn)
            .await?;
        Ok(row)
    }

    /// Ticker resolution traverses listing -> security -> entity
    pub async fn owner_entity(pool: &DatabasePool, listing_id: Uuid) -> AppResult<Option<Entity>> {
        use crate::schema::{entities, listings, securities};

        let mut conn = pool.get().await?;
        let entity = listings::dsl::listings
            .inner_join(securities::dsl::securities.inner_join(entities::dsl::entities))
            .filter(listings::dsl::id.eq(listing_id))
            .select(Entity::as_select())
            .first::<Entity>(&mut conn)
            .await
            .optional()?;
        Ok(entity)
    }

    pub async fn find_by_id(pool: &DatabasePool, listing_id: Uuid) -> AppResult<Option<Listing>> {
        use crate::schema::listings::dsl;

        let mut conn = pool.get().await?;
        let row = dsl::listings
            .filter(dsl::id.eq(listing_id))
            .first::<Listing>(&mut conn)
            .await
            .optional()?;
        Ok(row)
    }

    pub async fn for_security(pool: &DatabasePool, security_id: Uuid) -> AppResult<Vec<Listing>> {
        use crate::schema::listings::dsl;

        let mut conn = pool.get().await?;
        let rows = dsl::listings
            .filter(dsl::security_id.eq(security_id))
            .load::<Listing>(&mut conn)
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestContainer;
    use serial_test::serial;

    pub(crate) fn apple() -> NewEntity {
        NewEntity {
            entity_type: EntityType::CompanyPublic.as_str().to_string(),
            primary_name: "Apple Inc.".to_string(),
            source_system: "sec".to_string(),
            source_id: "0000320193".to_string(),
            status: EntityStatus::Active.as_str().to_string(),
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_create_opens_version_and_rename_closes_it() {
        // REQUIREMENT: Mutable state is expressed by appending versions
        // PURPOSE: Verify the version timeline and alias capture on rename

        let container = TestContainer::new().await;
        let pool = container.pool();

        let entity = Entity::create(pool, &apple()).await.unwrap();

        let current = Entity::current_version(pool, entity.id).await.unwrap();
        assert_eq!(current.unwrap().primary_name, "Apple Inc.");

        let renamed = Entity::rename(pool, entity.id, "Apple Incorporated", vec![])
            .await
            .unwrap();
        assert_eq!(renamed.primary_name, "Apple Incorporated");

        let versions = Entity::versions(pool, entity.id).await.unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions[0].valid_to.is_none());
        assert!(versions[1].valid_to.is_some());

        // The former name survives as an alias
        let aliases = Entity::aliases(pool, entity.id).await.unwrap();
        assert!(aliases
            .iter()
            .any(|a| a.alias == "Apple Inc." && a.alias_kind == "FORMER_NAME"));
    }

    #[tokio::test]
    #[serial]
    async fn test_merge_redirects_without_destroying() {
        // REQUIREMENT: Entities are never destroyed; merges redirect
        // PURPOSE: Verify the loser keeps its row and points at the survivor

        let container = TestContainer::new().await;
        let pool = container.pool();

        let survivor = Entity::create(pool, &apple()).await.unwrap();
        let mut dup = apple();
        dup.source_id = "0000320194".to_string();
        let loser = Entity::create(pool, &dup).await.unwrap();

        Entity::merge_into(pool, loser.id, survivor.id).await.unwrap();

        let merged = Entity::find_by_id(pool, loser.id).await.unwrap().unwrap();
        assert_eq!(merged.status, "MERGED");
        assert_eq!(merged.merged_into, Some(survivor.id));

        // Self-merge is refused
        assert!(Entity::merge_into(pool, survivor.id, survivor.id)
            .await
            .is_err());
    }

    #[tokio::test]
    #[serial]
    async fn test_ticker_hierarchy_traversal() {
        // REQUIREMENT: Ticker -> Entity resolution traverses Listing -> Security -> Entity
        // PURPOSE: Verify the ownership chain joins back to the canonical entity

        let container = TestContainer::new().await;
        let pool = container.pool();

        let entity = Entity::create(pool, &apple()).await.unwrap();
        let security = Security::create(pool, entity.id, Some("Common Stock"))
            .await
            .unwrap();
        let listing = Listing::create(pool, security.id, "Nasdaq").await.unwrap();

        let owner = Listing::owner_entity(pool, listing.id).await.unwrap().unwrap();
        assert_eq!(owner.id, entity.id);
    }
}
