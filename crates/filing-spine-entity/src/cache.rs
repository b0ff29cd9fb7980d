//! Read-mostly hot cache of known names and aliases, feeding the
//! dictionary extraction rung. Refreshed under a cache-level lock on
//! symbology updates; readers clone an Arc and never block each other.

use std::sync::Arc;
use tokio::sync::RwLock;

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use filing_spine_core::{AppResult, DatabasePool};

#[derive(Debug, Default)]
pub struct NameCache {
    names: RwLock<Arc<Vec<String>>>,
}

impl NameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current name list; cheap to call on every section
    pub async fn names(&self) -> Arc<Vec<String>> {
        self.names.read().await.clone()
    }

    /// Reload primary names and aliases from the store, replacing the
    /// shared list atomically.
    pub async fn refresh(&self, pool: &DatabasePool) -> AppResult<usize> {
        use filing_spine_core::schema::{entities, entity_aliases};

        let mut conn = pool.get().await?;

        let mut names: Vec<String> = entities::dsl::entities
            .select(entities::dsl::primary_name)
            .load::<String>(&mut conn)
            .await?;
        let aliases: Vec<String> = entity_aliases::dsl::entity_aliases
            .select(entity_aliases::dsl::alias)
            .load::<String>(&mut conn)
            .await?;

        names.extend(aliases);
        names.retain(|n| n.len() >= 3);
        names.sort();
        names.dedup();

        let count = names.len();
        *self.names.write().await = Arc::new(names);

        tracing::debug!(count, "name cache refreshed");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filing_spine_core::models::{Entity, EntityStatus, EntityType, NewEntity};
    use filing_spine_core::test_utils::TestContainer;
    use serial_test::serial;

    #[tokio::test]
    #[serial]
    async fn test_refresh_replaces_names_atomically() {
        // REQUIREMENT: Read-mostly cache refreshed on symbology updates
        let container = TestContainer::new().await;
        let pool = container.pool();
        let cache = NameCache::new();

        assert!(cache.names().await.is_empty());

        let entity = Entity::create(
            pool,
            &NewEntity {
                entity_type: EntityType::CompanyPublic.as_str().to_string(),
                primary_name: "Apple Inc.".to_string(),
                source_system: "sec".to_string(),
                source_id: "0000320193".to_string(),
                status: EntityStatus::Active.as_str().to_string(),
            },
        )
        .await
        .unwrap();
        Entity::add_alias(
            pool,
            entity.id,
            "Apple Computer, Inc.",
            filing_spine_core::models::AliasKind::FormerName,
        )
        .await
        .unwrap();

        // A reader holding the old list is unaffected by the refresh
        let before = cache.names().await;
        let count = cache.refresh(pool).await.unwrap();
        assert_eq!(count, 2);
        assert!(before.is_empty());

        let after = cache.names().await;
        assert!(after.contains(&"Apple Inc.".to_string()));
        assert!(after.contains(&"Apple Computer, Inc.".to_string()));
    }
}
