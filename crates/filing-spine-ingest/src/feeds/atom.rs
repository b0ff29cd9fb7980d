use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use filing_spine_core::models::RecordCandidate;
use filing_spine_core::{AppError, AppResult};

use super::{FeedAdapter, FeedBatch, PoisonRecord};
use crate::client::SecClient;
use crate::utils::{filing_natural_key, normalize_accession, pad_cik, EDGAR_CURRENT_FEED_URL};

/// The EDGAR current-filings Atom feed, giving minutes of latency.
/// The cursor is the `updated` timestamp of the newest entry admitted so
/// far; entries at or before it are skipped on the next poll.
pub struct RssFeedAdapter {
    client: SecClient,
    feed_url: String,
}

impl RssFeedAdapter {
    pub fn new(client: SecClient) -> Self {
        Self {
            client,
            feed_url: EDGAR_CURRENT_FEED_URL.to_string(),
        }
    }

    pub fn with_url(client: SecClient, feed_url: String) -> Self {
        Self { client, feed_url }
    }
}

/// Atom document as EDGAR's current feed emits it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomFeed {
    pub title: Option<String>,
    pub updated: Option<String>,
    #[serde(rename = "entry", default)]
    pub entries: Vec<AtomEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomEntry {
    pub title: Option<String>,
    /// Typically `urn:tag:sec.gov,2008:accession-number=0000320193-24-000081`
    pub id: Option<String>,
    pub updated: Option<String>,
    #[serde(rename = "link", default)]
    pub links: Vec<AtomLink>,
    #[serde(default)]
    pub category: Option<AtomCategory>,
    pub summary: Option<AtomSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomLink {
    #[serde(rename = "@href", default)]
    pub href: String,
    #[serde(rename = "@rel", default)]
    pub rel: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomCategory {
    #[serde(rename = "@term", default)]
    pub term: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomSummary {
    #[serde(rename = "$text", default)]
    pub value: String,
}

pub fn parse_atom_feed(xml: &str) -> AppResult<AtomFeed> {
    quick_xml::de::from_str(xml)
        .map_err(|e| AppError::FeedError(format!("malformed atom feed: {}", e)))
}

impl AtomEntry {
    /// Accession number from the entry id, dashless
    fn accession(&self) -> Option<String> {
        let id = self.id.as_deref()?;
        let raw = id.rsplit("accession-number=").next()?;
        normalize_accession(raw).ok()
    }

    /// Filer CIK from the title, e.g. "10-K - APPLE INC (0000320193) (Filer)"
    fn cik(&self) -> Option<String> {
        let title = self.title.as_deref()?;
        let open = title.find('(')?;
        let close = title[open..].find(')')? + open;
        let inner = &title[open + 1..close];
        if inner.chars().all(|c| c.is_ascii_digit()) && !inner.is_empty() {
            Some(pad_cik(inner))
        } else {
            None
        }
    }

    fn form_type(&self) -> Option<String> {
        self.category.as_ref().map(|c| c.term.clone()).or_else(|| {
            self.title
                .as_deref()
                .and_then(|t| t.split(" - ").next())
                .map(|s| s.trim().to_string())
        })
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Turn parsed entries into candidates, collecting unparseable rows as
/// poison instead of failing the batch.
pub fn entries_to_candidates(
    feed_name: &str,
    entries: &[AtomEntry],
    newer_than: Option<DateTime<Utc>>,
) -> (Vec<RecordCandidate>, Vec<PoisonRecord>, Option<DateTime<Utc>>) {
    let mut candidates = Vec::new();
    let mut poison = Vec::new();
    let mut high_water = newer_than;

    for entry in entries {
        let updated = entry.updated_at();
        if let (Some(updated), Some(cursor)) = (updated, newer_than) {
            if updated <= cursor {
                continue;
            }
        }
        if let Some(updated) = updated {
            if high_water.map_or(true, |hw| updated > hw) {
                high_water = Some(updated);
            }
        }

        let Some(accession) = entry.accession() else {
            poison.push(PoisonRecord {
                reason: "atom entry without accession number".to_string(),
                payload: serde_json::to_value(entry).unwrap_or(serde_json::Value::Null),
            });
            continue;
        };

        let source_url = entry
            .links
            .first()
            .map(|l| l.href.clone())
            .unwrap_or_default();

        let Ok(natural_key) = filing_natural_key(&accession) else {
            poison.push(PoisonRecord {
                reason: format!("unusable accession {:?}", accession),
                payload: serde_json::to_value(entry).unwrap_or(serde_json::Value::Null),
            });
            continue;
        };

        candidates.push(RecordCandidate {
            natural_key,
            feed_name: feed_name.to_string(),
            source_url,
            published_at: updated,
            source_updated_at: updated,
            raw_payload: serde_json::json!({
                "title": entry.title,
                "id": entry.id,
                "form_type": entry.form_type(),
                "summary": entry.summary.as_ref().map(|s| s.value.clone()),
            }),
            cik: entry.cik(),
            form_type: entry.form_type(),
            filing_date: updated.map(|u| u.date_naive()),
            accession_number: Some(accession),
        });
    }

    (candidates, poison, high_water)
}

#[async_trait]
impl FeedAdapter for RssFeedAdapter {
    fn feed_name(&self) -> &'static str {
        "rss"
    }

    async fn fetch(&self, cursor: Option<Vec<u8>>) -> AppResult<FeedBatch> {
        let newer_than = cursor
            .as_deref()
            .and_then(|b| std::str::from_utf8(b).ok())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let xml = self.client.get_text(&self.feed_url).await?;
        let feed = parse_atom_feed(&xml)?;

        let (candidates, poison, high_water) =
            entries_to_candidates(self.feed_name(), &feed.entries, newer_than);

        tracing::debug!(
            candidates = candidates.len(),
            poison = poison.len(),
            "polled current filings feed"
        );

        Ok(FeedBatch {
            candidates,
            poison,
            next_cursor: high_water.map(|hw| hw.to_rfc3339().into_bytes()),
            end_of_stream: true,
        })
    }
}
