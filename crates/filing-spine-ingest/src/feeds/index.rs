use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, Utc};

use filing_spine_core::models::RecordCandidate;
use filing_spine_core::{AppError, AppResult};

use super::{FeedAdapter, FeedBatch, PoisonRecord};
use crate::client::SecClient;
use crate::utils::{
    build_daily_index_url, build_document_url, build_full_index_url, filing_natural_key,
    pad_cik, parse_sec_date,
};

/// One row of a master index file
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub cik: String,
    pub company_name: String,
    pub form_type: String,
    pub date_filed: NaiveDate,
    pub filename: String,
}

impl IndexEntry {
    /// Accession number from the filename column,
    /// e.g. `edgar/data/320193/0000320193-24-000081.txt`
    pub fn accession(&self) -> Option<&str> {
        self.filename
            .rsplit('/')
            .next()?
            .strip_suffix(".txt")
            .or_else(|| self.filename.rsplit('/').next()?.strip_suffix(".idx"))
    }
}

/// Parse a pipe-delimited master index. Header lines run until a dashed
/// separator; rows that do not split into five fields are yielded
/// separately so the caller can quarantine them.
pub fn parse_master_index(body: &str) -> (Vec<IndexEntry>, Vec<PoisonRecord>) {
    let mut entries = Vec::new();
    let mut poison = Vec::new();
    let mut in_body = false;

    for line in body.lines() {
        if !in_body {
            if line.starts_with("---") {
                in_body = true;
            }
            continue;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() != 5 {
            poison.push(PoisonRecord {
                reason: format!("master index row has {} fields, expected 5", fields.len()),
                payload: serde_json::json!({ "line": line }),
            });
            continue;
        }

        let date_filed = match parse_sec_date(fields[3]) {
            Ok(d) => d,
            Err(_) => {
                poison.push(PoisonRecord {
                    reason: format!("unparseable date_filed {:?}", fields[3]),
                    payload: serde_json::json!({ "line": line }),
                });
                continue;
            }
        };

        entries.push(IndexEntry {
            cik: fields[0].trim().to_string(),
            company_name: fields[1].trim().to_string(),
            form_type: fields[2].trim().to_string(),
            date_filed,
            filename: fields[4].trim().to_string(),
        });
    }

    (entries, poison)
}

fn entry_to_candidate(feed_name: &str, entry: &IndexEntry) -> Result<RecordCandidate, PoisonRecord> {
    let accession = entry.accession().ok_or_else(|| PoisonRecord {
        reason: format!("no accession in filename {:?}", entry.filename),
        payload: serde_json::json!({
            "cik": entry.cik,
            "filename": entry.filename,
        }),
    })?;

    let natural_key = filing_natural_key(accession).map_err(|e| PoisonRecord {
        reason: e.to_string(),
        payload: serde_json::json!({ "filename": entry.filename }),
    })?;

    let source_url = build_document_url(
        &entry.cik,
        accession,
        entry
            .filename
            .rsplit('/')
            .next()
            .unwrap_or(&entry.filename),
    )
    .unwrap_or_else(|_| format!("https://www.sec.gov/Archives/{}", entry.filename));

    Ok(RecordCandidate {
        natural_key,
        feed_name: feed_name.to_string(),
        source_url,
        published_at: entry
            .date_filed
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc()),
        source_updated_at: None,
        raw_payload: serde_json::json!({
            "company_name": entry.company_name,
            "form_type": entry.form_type,
            "filename": entry.filename,
        }),
        cik: Some(pad_cik(&entry.cik)),
        form_type: Some(entry.form_type.clone()),
        filing_date: Some(entry.date_filed),
        accession_number: entry.accession().map(|a| a.replace('-', "")),
    })
}

fn collect_candidates(
    feed_name: &str,
    entries: &[IndexEntry],
) -> (Vec<RecordCandidate>, Vec<PoisonRecord>) {
    let mut candidates = Vec::new();
    let mut poison = Vec::new();
    for entry in entries {
        match entry_to_candidate(feed_name, entry) {
            Ok(c) => candidates.push(c),
            Err(p) => poison.push(p),
        }
    }
    (candidates, poison)
}

/// Daily master index adapter: one-day catch-up lag. The cursor is the last
/// fully processed date; each fetch advances one business day, skipping
/// days EDGAR has no index for (weekends, holidays).
pub struct DailyIndexAdapter {
    client: SecClient,
    /// Where backfill begins when no checkpoint exists
    pub start_date: NaiveDate,
    index_base: String,
}

impl DailyIndexAdapter {
    pub fn new(client: SecClient, start_date: NaiveDate) -> Self {
        Self {
            client,
            start_date,
            index_base: crate::utils::EDGAR_DAILY_INDEX_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, index_base: String) -> Self {
        self.index_base = index_base;
        self
    }

    fn index_url(&self, day: NaiveDate) -> String {
        let default = build_daily_index_url(day);
        default.replace(crate::utils::EDGAR_DAILY_INDEX_URL, &self.index_base)
    }
}

#[async_trait]
impl FeedAdapter for DailyIndexAdapter {
    fn feed_name(&self) -> &'static str {
        "daily_index"
    }

    async fn fetch(&self, cursor: Option<Vec<u8>>) -> AppResult<FeedBatch> {
        let last_done = cursor
            .as_deref()
            .and_then(|b| std::str::from_utf8(b).ok())
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());

        let today = Utc::now().date_naive();
        let mut day = last_done
            .map(|d| d + Duration::days(1))
            .unwrap_or(self.start_date);

        // Indexes are complete one day behind the clock
        while day < today {
            let url = self.index_url(day);
            match self.client.get_text(&url).await {
                Ok(body) => {
                    let (entries, mut poison) = parse_master_index(&body);
                    let (candidates, more_poison) = collect_candidates(self.feed_name(), &entries);
                    poison.extend(more_poison);

                    tracing::info!(%day, candidates = candidates.len(), "daily index fetched");

                    return Ok(FeedBatch {
                        candidates,
                        poison,
                        next_cursor: Some(day.format("%Y-%m-%d").to_string().into_bytes()),
                        end_of_stream: day + Duration::days(1) >= today,
                    });
                }
                // No index published for this day: advance past it
                Err(AppError::NotFound(_)) => {
                    day += Duration::days(1);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(FeedBatch {
            // Caught up; persist the skip over any trailing holiday gap
            next_cursor: last_done.map(|_| (day - Duration::days(1))
                .format("%Y-%m-%d")
                .to_string()
                .into_bytes()),
            end_of_stream: true,
            ..Default::default()
        })
    }
}

/// Quarterly full index adapter for backfill. The cursor is the last fully
/// processed quarter (`YYYY-Qn`); each fetch processes one completed
/// quarter, giving bounded redundancy against the daily feed.
pub struct FullIndexAdapter {
    client: SecClient,
    pub start_year: i32,
    pub start_quarter: u32,
}

impl FullIndexAdapter {
    pub fn new(client: SecClient, start_year: i32, start_quarter: u32) -> Self {
        Self {
            client,
            start_year,
            start_quarter,
        }
    }
}

fn parse_quarter_cursor(cursor: &[u8]) -> Option<(i32, u32)> {
    let s = std::str::from_utf8(cursor).ok()?;
    let (year, quarter) = s.split_once("-Q")?;
    Some((year.parse().ok()?, quarter.parse().ok()?))
}

fn next_quarter(year: i32, quarter: u32) -> (i32, u32) {
    if quarter >= 4 {
        (year + 1, 1)
    } else {
        (year, quarter + 1)
    }
}

fn current_quarter(today: NaiveDate) -> (i32, u32) {
    (today.year(), (today.month() + 2) / 3)
}

#[async_trait]
impl FeedAdapter for FullIndexAdapter {
    fn feed_name(&self) -> &'static str {
        "full_index"
    }

    async fn fetch(&self, cursor: Option<Vec<u8>>) -> AppResult<FeedBatch> {
        let (year, quarter) = match cursor.as_deref().and_then(parse_quarter_cursor) {
            Some(done) => next_quarter(done.0, done.1),
            None => (self.start_year, self.start_quarter),
        };

        let today = Utc::now().date_naive();
        let now_q = current_quarter(today);

        // Only completed quarters; the daily feed owns the open one
        if (year, quarter) >= now_q {
            return Ok(FeedBatch {
                end_of_stream: true,
                ..Default::default()
            });
        }

        let url = build_full_index_url(year, quarter);
        let body = self.client.get_text(&url).await?;
        let (entries, mut poison) = parse_master_index(&body);
        let (candidates, more_poison) = collect_candidates(self.feed_name(), &entries);
        poison.extend(more_poison);

        tracing::info!(year, quarter, candidates = candidates.len(), "full index fetched");

        Ok(FeedBatch {
            candidates,
            poison,
            next_cursor: Some(format!("{}-Q{}", year, quarter).into_bytes()),
            end_of_stream: next_quarter(year, quarter) >= now_q,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_INDEX: &str = "Description:           Master Index of EDGAR Dissemination Feed\n\
Last Data Received:    November 1, 2024\n\
\n\
CIK|Company Name|Form Type|Date Filed|Filename\n\
--------------------------------------------------------------------------------\n\
320193|APPLE INC|10-K|2024-11-01|edgar/data/320193/0000320193-24-000081.txt\n\
789019|MICROSOFT CORP|8-K|2024-11-01|edgar/data/789019/0000789019-24-000095.txt\n\
broken row without pipes\n\
320193|APPLE INC|10-K|not-a-date|edgar/data/320193/0000320193-24-000082.txt\n";

    #[test]
    fn test_parse_master_index_with_poison_rows() {
        // REQUIREMENT: Permanent parse errors quarantine individual rows
        // without stalling the cursor
        // PURPOSE: Verify header skipping, field splitting and poison capture

        let (entries, poison) = parse_master_index(SAMPLE_INDEX);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].cik, "320193");
        assert_eq!(entries[0].form_type, "10-K");
        assert_eq!(
            entries[0].accession(),
            Some("0000320193-24-000081")
        );

        assert_eq!(poison.len(), 2);
        assert!(poison[0].reason.contains("fields"));
        assert!(poison[1].reason.contains("date_filed"));
    }

    #[test]
    fn test_index_entry_to_candidate_natural_key() {
        // Two index feeds and the atom feed must agree on the natural key
        let (entries, _) = parse_master_index(SAMPLE_INDEX);
        let (candidates, poison) = collect_candidates("daily_index", &entries);

        assert!(poison.is_empty());
        assert_eq!(candidates[0].natural_key, "sec:filing:000032019324000081");
        assert_eq!(candidates[0].cik.as_deref(), Some("0000320193"));
        assert_eq!(
            candidates[0].filing_date,
            NaiveDate::from_ymd_opt(2024, 11, 1)
        );
        assert_eq!(
            candidates[0].accession_number.as_deref(),
            Some("000032019324000081")
        );
    }

    #[test]
    fn test_quarter_cursor_arithmetic() {
        assert_eq!(parse_quarter_cursor(b"2024-Q3"), Some((2024, 3)));
        assert_eq!(parse_quarter_cursor(b"garbage"), None);
        assert_eq!(next_quarter(2024, 4), (2025, 1));
        assert_eq!(next_quarter(2024, 2), (2024, 3));
        assert_eq!(
            current_quarter(NaiveDate::from_ymd_opt(2024, 11, 1).unwrap()),
            (2024, 4)
        );
    }

    #[tokio::test]
    async fn test_daily_adapter_skips_missing_days_and_checkpoints() {
        // REQUIREMENT: Missing index days (weekends, holidays) are skipped
        // without error; the cursor lands on the day actually processed
        // PURPOSE: Drive the real adapter against a mock EDGAR host

        use filing_spine_core::config::SecConfig;

        let mut server = mockito::Server::new_async().await;
        let today = Utc::now().date_naive();
        let day1 = today - Duration::days(3);
        let day2 = today - Duration::days(2);

        let day_path = |d: NaiveDate| {
            format!(
                "/{}/QTR{}/master.{}.idx",
                d.format("%Y"),
                (d.month() + 2) / 3,
                d.format("%Y%m%d")
            )
        };

        // day1 is a holiday (404), day2 has filings
        server
            .mock("GET", day_path(day1).as_str())
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", day_path(day2).as_str())
            .with_status(200)
            .with_body(SAMPLE_INDEX)
            .create_async()
            .await;

        let config = SecConfig {
            data_dir: std::path::PathBuf::from("/tmp"),
            user_agent: "filing-spine-test/0.1 (test@example.com)".to_string(),
            requests_per_second: 50,
            max_attempts: 2,
            backoff_base_ms: 10,
        };
        let client = SecClient::new(
            &config,
            crate::rate_limiter::SecRateLimiter::new(50).unwrap(),
        )
        .unwrap();

        let adapter = DailyIndexAdapter::new(client, day1).with_base_url(server.url());

        let batch = adapter.fetch(None).await.unwrap();
        assert_eq!(batch.candidates.len(), 2);
        assert_eq!(
            batch.next_cursor.as_deref(),
            Some(day2.format("%Y-%m-%d").to_string().as_bytes())
        );
    }
}
