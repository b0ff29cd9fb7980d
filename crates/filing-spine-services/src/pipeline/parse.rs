//! Bronze -> Silver: fetch the filing bundle, segment it into sections and
//! hand each section to the mention queue.

use std::sync::Arc;
use tracing::info;

use filing_spine_core::models::{
    queues, Filing, FilingSection, Layer, NewFiling, NewQueueTask, QueueTask, Record,
    ValidationEvent,
};
use filing_spine_core::{AppError, AppResult};
use filing_spine_extract::paragraph_windows;

use super::PipelineDeps;

pub async fn handle(deps: &Arc<PipelineDeps>, task: &QueueTask) -> AppResult<()> {
    let payload = &task.payload;
    let accession = payload
        .get("accession_number")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::Validation("parse task without accession_number".to_string()))?
        .to_string();
    let cik = payload
        .get("cik")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::Validation("parse task without cik".to_string()))?
        .to_string();
    let form_type = payload
        .get("form_type")
        .and_then(|v| v.as_str())
        .unwrap_or("UNKNOWN")
        .to_string();
    let filing_date = payload
        .get("filing_date")
        .and_then(|v| v.as_str())
        .and_then(|s| chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .unwrap_or_else(|| chrono::Utc::now().date_naive());
    let natural_key = payload
        .get("natural_key")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::Validation("parse task without natural_key".to_string()))?
        .to_string();

    let record = Record::find_by_natural_key(&deps.pool, &natural_key)
        .await?
        .ok_or_else(|| {
            AppError::IntegrityViolation(format!("no bronze record for {}", natural_key))
        })?;

    // Download under the global rate limit; transient failures bubble up
    // for retry, terminal ones quarantine this task.
    let bundle = deps.fetcher.fetch_bundle(&cik, &accession).await?;

    let parser = deps.section_parser();
    let primary_html = String::from_utf8_lossy(&bundle.primary_document.content);
    let (_doc, mut sections, issues) =
        parser.parse_primary(&accession, &bundle.primary_document.filename, &primary_html);

    for exhibit in &bundle.exhibits {
        let html = String::from_utf8_lossy(&exhibit.content);
        if let Some((_, section)) = parser.parse_exhibit(&accession, &exhibit.filename, &html) {
            sections.push(section);
        }
    }

    for issue in &issues {
        ValidationEvent::record(
            &deps.pool,
            "section_parser",
            Some(&accession),
            serde_json::json!({
                "section_key": issue.section_key,
                "detail": issue.detail,
            }),
        )
        .await?;
    }

    // Silver promotion: exactly one Filing row per accession regardless of
    // how many feeds delivered it. Filer identity prefers the index feed's
    // company name; the submissions endpoint is the authoritative fallback
    // (feed titles like "10-K - APPLE INC (0000320193)" are not names).
    let mut company_name = record
        .raw_payload
        .get("company_name")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    if company_name.is_none() {
        company_name = filing_spine_ingest::submissions::fetch_company(
            deps.fetcher.client(),
            &cik,
        )
        .await
        .ok()
        .map(|c| c.name);
    }
    let company_name = company_name.unwrap_or_else(|| format!("CIK {}", cik));

    let filer = deps.spine.ensure_filer(&cik, &company_name).await?;

    let new_filing = NewFiling {
        accession_number: accession.clone(),
        filer_cik: cik.clone(),
        form_type: form_type.clone(),
        filed_date: filing_date,
        acceptance_datetime: None,
        report_date: None,
        primary_document_url: Some(format!(
            "https://www.sec.gov/Archives/edgar/data/{}/{}/{}",
            cik.trim_start_matches('0'),
            accession,
            bundle.primary_document.filename
        )),
        source_record_ids: vec![],
    };
    let filing = Filing::upsert_from_record(&deps.pool, &new_filing, record.id).await?;
    Filing::set_entity(&deps.pool, filing.id, filer.id).await?;

    let section_count = sections.len();
    let stored =
        FilingSection::replace_current(&deps.pool, &accession, &deps.config.parser.version, sections)
            .await?;

    // Stores commit in topological order: sections are durable before any
    // mention task can observe them
    for section in &stored {
        enqueue_section(deps, &accession, section).await?;
    }

    Filing::mark_sections_extracted(&deps.pool, filing.id).await?;
    Record::promote(&deps.pool, record.id, Layer::Silver).await?;
    Record::mark_processed(&deps.pool, record.id).await?;

    info!(%accession, sections = section_count, "filing parsed");
    Ok(())
}

/// One mention task per section; oversized sections are windowed by
/// paragraph so no single task swallows the queue.
async fn enqueue_section(
    deps: &Arc<PipelineDeps>,
    accession: &str,
    section: &FilingSection,
) -> AppResult<()> {
    let max = deps.config.parser.max_section_bytes;
    let windows = paragraph_windows(&section.text, max);

    for (idx, (start, end)) in windows.iter().enumerate() {
        let task_key = if windows.len() == 1 {
            format!("{}:{}", accession, section.section_key)
        } else {
            format!("{}:{}:w{}", accession, section.section_key, idx)
        };
        QueueTask::enqueue(
            &deps.pool,
            &NewQueueTask {
                queue: queues::SECTIONS_MENTIONS.to_string(),
                task_key,
                payload: serde_json::json!({
                    "accession_number": accession,
                    "section_key": section.section_key,
                    "window_start": start,
                    "window_end": end,
                }),
                priority: 5,
                max_retries: deps.config.worker.max_attempts,
                scheduled_for: None,
            },
        )
        .await?;
    }
    Ok(())
}
