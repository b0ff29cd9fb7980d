use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use filing_spine_core::models::{
    Filing, FilingFilter, FilingSection, Scheme, SectionKey,
};
use filing_spine_core::AppError;
use filing_spine_entity::{ResolutionContext, Resolver, SpineSnapshot};

use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct FilingListParams {
    pub cik: Option<String>,
    pub ticker: Option<String>,
    pub form: Option<String>,
    pub filed_after: Option<NaiveDate>,
    pub filed_before: Option<NaiveDate>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /filings: list silver filings with filters. A ticker filter is
/// resolved to the filer's CIK through the spine before querying.
pub async fn list_filings(
    state: AppState,
    params: FilingListParams,
) -> Result<impl warp::Reply, warp::Rejection> {
    let mut cik = params.cik;

    if let Some(ticker) = &params.ticker {
        let snapshot = Arc::new(
            SpineSnapshot::load(&state.pool)
                .await
                .map_err(warp::reject::custom)?,
        );
        let resolver = Resolver::new(snapshot, state.config.resolver.clone());
        let as_of = chrono::Utc::now().date_naive();
        let resolution = resolver.resolve(ticker, &ResolutionContext::default(), as_of);

        let Some(entity_id) = resolution.entity_id else {
            return Err(warp::reject::custom(AppError::bad_request(format!(
                "unknown ticker {:?}",
                ticker
            ))));
        };
        // CIK claim of the resolved entity
        let claims = filing_spine_core::models::IdentifierClaim::for_owner(
            &state.pool,
            filing_spine_core::models::OwnerType::Entity,
            entity_id,
        )
        .await
        .map_err(warp::reject::custom)?;
        cik = claims
            .into_iter()
            .find(|c| c.scheme == Scheme::Cik.as_str())
            .map(|c| c.value);
        if cik.is_none() {
            return Err(warp::reject::custom(AppError::bad_request(format!(
                "ticker {:?} resolves to an entity without a CIK",
                ticker
            ))));
        }
    }

    let filter = FilingFilter {
        cik,
        form_type: params.form,
        filed_after: params.filed_after,
        filed_before: params.filed_before,
        limit: params.limit,
        offset: params.offset,
    };
    let filings = Filing::list(&state.pool, &filter)
        .await
        .map_err(warp::reject::custom)?;

    Ok(warp::reply::json(&json!({
        "data": filings,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

/// GET /filings/{accession}: full silver row plus the section index
pub async fn get_filing(
    accession: String,
    state: AppState,
) -> Result<impl warp::Reply, warp::Rejection> {
    let filing = Filing::find_by_accession(&state.pool, &accession)
        .await
        .map_err(warp::reject::custom)?
        .ok_or_else(|| warp::reject::custom(AppError::not_found(format!("filing {}", accession))))?;

    let sections = FilingSection::current_for(&state.pool, &accession)
        .await
        .map_err(warp::reject::custom)?;

    let section_index: Vec<_> = sections
        .iter()
        .map(|s| {
            json!({
                "section_key": s.section_key,
                "title": s.title,
                "char_start": s.char_start,
                "char_end": s.char_end,
                "word_count": s.word_count,
                "document_filename": s.document_filename,
                "parser_version": s.parser_version,
            })
        })
        .collect();

    Ok(warp::reply::json(&json!({
        "data": {
            "filing": filing,
            "sections": section_index,
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct ContextParams {
    pub char_start: i64,
    pub char_end: i64,
    /// Bytes of context either side of the span
    pub context: Option<i64>,
}

/// GET /filings/{accession}/sections/{key}/context: byte window
/// [char_start - context, char_end + context] around a span. Spans outside
/// the section are 416.
pub async fn get_section_context(
    accession: String,
    key: String,
    state: AppState,
    params: ContextParams,
) -> Result<impl warp::Reply, warp::Rejection> {
    let section_key = SectionKey::parse(&key).ok_or_else(|| {
        warp::reject::custom(AppError::bad_request(format!("unknown section key {:?}", key)))
    })?;

    let section = FilingSection::find(&state.pool, &accession, section_key)
        .await
        .map_err(warp::reject::custom)?
        .ok_or_else(|| {
            warp::reject::custom(AppError::not_found(format!(
                "section {} of {}",
                key, accession
            )))
        })?;

    if params.char_start < 0
        || params.char_end <= params.char_start
        || params.char_start < section.char_start as i64
        || params.char_end > section.char_end as i64
    {
        return Err(warp::reject::custom(AppError::RangeNotSatisfiable(format!(
            "span [{}, {}) outside section [{}, {})",
            params.char_start, params.char_end, section.char_start, section.char_end
        ))));
    }

    let context = params.context.unwrap_or(200).max(0);
    let window_start = (params.char_start - context).max(section.char_start as i64);
    let window_end = (params.char_end + context).min(section.char_end as i64);

    // Section text is indexed from the section's own start offset
    let local_start = (window_start - section.char_start as i64) as usize;
    let local_end = (window_end - section.char_start as i64) as usize;
    let window = section
        .text
        .get(local_start..local_end)
        .ok_or_else(|| {
            warp::reject::custom(AppError::RangeNotSatisfiable(
                "window does not fall on byte boundaries".to_string(),
            ))
        })?;

    Ok(warp::reply::json(&json!({
        "data": {
            "accession_number": accession,
            "section_key": section.section_key,
            "char_start": window_start,
            "char_end": window_end,
            "text": window,
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}
