use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use filing_spine_core::models::{Entity, EntityRelationship, RelationshipType};
use filing_spine_core::AppError;

use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct GraphParams {
    pub as_of: Option<NaiveDate>,
}

/// GET /graph/suppliers/{entity_id}: outgoing SUPPLIER_TO edges,
/// optionally restricted to those valid at as_of, each with its evidence.
pub async fn get_suppliers(
    entity_id: Uuid,
    state: AppState,
    params: GraphParams,
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

    let edges = EntityRelationship::outgoing(
        &state.pool,
        entity_id,
        RelationshipType::SupplierTo,
        params.as_of,
    )
    .await
    .map_err(warp::reject::custom)?;

    let mut enriched = Vec::with_capacity(edges.len());
    for edge in edges {
        let target = Entity::find_by_id(&state.pool, edge.target_entity_id)
            .await
            .map_err(warp::reject::custom)?;
        let evidence = EntityRelationship::evidence(&state.pool, edge.id)
            .await
            .map_err(warp::reject::custom)?;
        enriched.push(json!({
            "relationship": edge,
            "target": target.map(|t| json!({
                "entity_id": t.id,
                "primary_name": t.primary_name,
                "entity_type": t.entity_type,
            })),
            "evidence": evidence,
        }));
    }

    Ok(warp::reply::json(&json!({
        "data": enriched,
        "as_of": params.as_of,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}
