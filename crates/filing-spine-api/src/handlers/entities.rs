use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use filing_spine_core::models::{Entity, IdentifierClaim, Listing, OwnerType, Security};
use filing_spine_core::AppError;
use filing_spine_entity::{ResolutionContext, ResolutionWarning, Resolver, SpineSnapshot};

use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct ResolveParams {
    pub q: Option<String>,
    pub as_of: Option<NaiveDate>,
}

/// GET /entities/resolve?q=...&as_of=...: run the resolution ladder.
/// Missing q is 400; an ambiguous outcome is 422.
pub async fn resolve_entity(
    state: AppState,
    params: ResolveParams,
) -> Result<impl warp::Reply, warp::Rejection> {
    let query = params
        .q
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| warp::reject::custom(AppError::bad_request("missing query parameter q")))?;
    let as_of = params.as_of.unwrap_or_else(|| chrono::Utc::now().date_naive());

    let snapshot = Arc::new(
        SpineSnapshot::load(&state.pool)
            .await
            .map_err(warp::reject::custom)?,
    );
    let resolver = Resolver::new(snapshot, state.config.resolver.clone());
    let resolution = resolver.resolve(&query, &ResolutionContext::default(), as_of);

    if resolution.entity_id.is_none()
        && resolution.warnings.contains(&ResolutionWarning::Ambiguous)
    {
        return Err(warp::reject::custom(AppError::UnprocessableEntity(format!(
            "ambiguous resolution for {:?}",
            query
        ))));
    }

    Ok(warp::reply::json(&json!({
        "data": {
            "query": query,
            "as_of": as_of,
            "entity_id": resolution.entity_id,
            "method": format!("{:?}", resolution.method).to_uppercase(),
            "confidence": resolution.confidence,
            "warnings": resolution.warnings,
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

/// GET /entities/{entity_id}: current version plus active claims across
/// the whole identifier hierarchy
pub async fn get_entity(
    entity_id: Uuid,
    state: AppState,
) -> Result<impl warp::Reply, warp::Rejection> {
    let entity = Entity::find_by_id(&state.pool, entity_id)
        .await
        .map_err(warp::reject::custom)?
        .ok_or_else(|| {
            warp::reject::custom(AppError::not_found(format!("entity {}", entity_id)))
        })?;

    let current_version = Entity::current_version(&state.pool, entity_id)
        .await
        .map_err(warp::reject::custom)?;

    // Claims at all three hierarchy levels
    let mut claims = IdentifierClaim::for_owner(&state.pool, OwnerType::Entity, entity_id)
        .await
        .map_err(warp::reject::custom)?;
    let securities = Security::for_entity(&state.pool, entity_id)
        .await
        .map_err(warp::reject::custom)?;
    for security in &securities {
        claims.extend(
            IdentifierClaim::for_owner(&state.pool, OwnerType::Security, security.id)
                .await
                .map_err(warp::reject::custom)?,
        );
        let listings = Listing::for_security(&state.pool, security.id)
            .await
            .map_err(warp::reject::custom)?;
        for listing in listings {
            claims.extend(
                IdentifierClaim::for_owner(&state.pool, OwnerType::Listing, listing.id)
                    .await
                    .map_err(warp::reject::custom)?,
            );
        }
    }

    let active: Vec<_> = claims
        .into_iter()
        .filter(|c| c.status == "ACTIVE" && c.valid_to.is_none())
        .collect();

    Ok(warp::reply::json(&json!({
        "data": {
            "entity": entity,
            "current_version": current_version,
            "active_claims": active,
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

/// GET /entities/{entity_id}/history: version timeline
pub async fn get_entity_history(
    entity_id: Uuid,
    state: AppState,
) -> Result<impl warp::Reply, warp::Rejection> {
    if Entity::find_by_id(&state.pool, entity_id)
        .await
        .map_err(warp::reject::custom)?
        .is_none()
    {
        return Err(warp::reject::custom(AppError::not_found(format!(
            "entity {}",
            entity_id
        ))));
    }

    let versions = Entity::versions(&state.pool, entity_id)
        .await
        .map_err(warp::reject::custom)?;

    Ok(warp::reply::json(&json!({
        "data": versions,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}
