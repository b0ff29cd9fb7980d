use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use filing_spine_core::models::{
    ClaimStatus, Entity, EntityStatus, EntityType, IdentifierClaim, Listing, NewEntity,
    NewIdentifierClaim, OwnerType, Scheme, Security,
};
use filing_spine_core::{AppResult, DatabasePool};

use crate::client::SecClient;
use crate::utils::{pad_cik, COMPANY_TICKERS_URL};

/// The SEC company tickers file: column names plus row tuples
#[derive(Debug, Deserialize)]
pub struct CompanyTickersFile {
    pub fields: Vec<String>,
    pub data: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickerRow {
    pub cik: String,
    pub name: String,
    pub ticker: String,
    pub exchange: Option<String>,
}

impl CompanyTickersFile {
    /// Project rows through the declared field order. Rows missing cik or
    /// ticker are skipped with a warning; the file is untrusted input.
    pub fn rows(&self) -> Vec<TickerRow> {
        let index_of = |field: &str| self.fields.iter().position(|f| f == field);
        let (Some(cik_idx), Some(name_idx), Some(ticker_idx)) =
            (index_of("cik"), index_of("name"), index_of("ticker"))
        else {
            warn!("company tickers file missing expected fields: {:?}", self.fields);
            return vec![];
        };
        let exchange_idx = index_of("exchange");

        let mut rows = Vec::with_capacity(self.data.len());
        for raw in &self.data {
            let cik = match raw.get(cik_idx) {
                Some(serde_json::Value::Number(n)) => n.to_string(),
                Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
                _ => continue,
            };
            let Some(ticker) = raw.get(ticker_idx).and_then(|v| v.as_str()) else {
                continue;
            };
            if ticker.is_empty() {
                continue;
            }
            let name = raw
                .get(name_idx)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let exchange = exchange_idx
                .and_then(|i| raw.get(i))
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string());

            rows.push(TickerRow {
                cik: pad_cik(&cik),
                name,
                ticker: ticker.to_uppercase(),
                exchange,
            });
        }
        rows
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct SymbologyStats {
    pub rows_seen: usize,
    pub entities_created: usize,
    pub claims_created: usize,
    pub claims_closed: usize,
}

/// Periodic symbology refresh from the SEC company tickers file. Creates
/// entities, securities, listings and CIK/TICKER claims; a ticker that
/// moved to a different listing closes the old claim and opens a new one.
pub struct SymbologyRefresher {
    client: SecClient,
    pool: DatabasePool,
    tickers_url: String,
}

impl SymbologyRefresher {
    pub fn new(client: SecClient, pool: DatabasePool) -> Self {
        Self {
            client,
            pool,
            tickers_url: COMPANY_TICKERS_URL.to_string(),
        }
    }

    pub fn with_url(mut self, tickers_url: String) -> Self {
        self.tickers_url = tickers_url;
        self
    }

    pub async fn refresh(&self) -> AppResult<SymbologyStats> {
        let file: CompanyTickersFile = self.client.get_json(&self.tickers_url).await?;
        let rows = file.rows();
        let mut stats = SymbologyStats {
            rows_seen: rows.len(),
            ..Default::default()
        };

        for row in rows {
            if let Err(e) = self.apply_row(&row, &mut stats).await {
                // One bad row must not abort the refresh
                warn!(ticker = %row.ticker, cik = %row.cik, error = %e, "symbology row skipped");
            }
        }

        info!(
            rows = stats.rows_seen,
            entities_created = stats.entities_created,
            claims_created = stats.claims_created,
            claims_closed = stats.claims_closed,
            "symbology refresh complete"
        );
        Ok(stats)
    }

    pub async fn apply_row(&self, row: &TickerRow, stats: &mut SymbologyStats) -> AppResult<()> {
        let today = Utc::now().date_naive();

        // Entity keyed by (sec, cik)
        let entity = match Entity::find_by_source(&self.pool, "sec", &row.cik).await? {
            Some(entity) => entity,
            None => {
                stats.entities_created += 1;
                Entity::create(
                    &self.pool,
                    &NewEntity {
                        entity_type: EntityType::CompanyPublic.as_str().to_string(),
                        primary_name: row.name.clone(),
                        source_system: "sec".to_string(),
                        source_id: row.cik.clone(),
                        status: EntityStatus::Active.as_str().to_string(),
                    },
                )
                .await?
            }
        };

        // CIK claim on the entity
        let cik_claims =
            IdentifierClaim::active_at(&self.pool, Scheme::Cik, &row.cik, today).await?;
        if cik_claims.is_empty() {
            IdentifierClaim::record(
                &self.pool,
                &NewIdentifierClaim {
                    owner_type: OwnerType::Entity.as_str().to_string(),
                    owner_id: entity.id,
                    scheme: Scheme::Cik.as_str().to_string(),
                    value: row.cik.clone(),
                    valid_from: today,
                    valid_to: None,
                    status: ClaimStatus::Active.as_str().to_string(),
                    source: "sec_tickers".to_string(),
                    confidence: 1.0,
                },
            )
            .await?;
            stats.claims_created += 1;
        }

        // Ticker claim on a listing under this entity
        let exchange = row.exchange.as_deref().unwrap_or("UNKNOWN");
        let listing = self.ensure_listing(entity.id, exchange).await?;

        let ticker_claims =
            IdentifierClaim::active_at(&self.pool, Scheme::Ticker, &row.ticker, today).await?;
        match ticker_claims.first() {
            Some(claim) if claim.owner_id == listing.id => {}
            Some(stale) => {
                // The ticker moved: close the old claim, then open the new one
                IdentifierClaim::close(&self.pool, stale.id, today, ClaimStatus::Superseded)
                    .await?;
                stats.claims_closed += 1;
                self.open_ticker_claim(listing.id, &row.ticker).await?;
                stats.claims_created += 1;
            }
            None => {
                self.open_ticker_claim(listing.id, &row.ticker).await?;
                stats.claims_created += 1;
            }
        }

        Ok(())
    }

    async fn ensure_listing(&self, entity_id: uuid::Uuid, exchange: &str) -> AppResult<Listing> {
        let securities = Security::for_entity(&self.pool, entity_id).await?;
        let security = match securities.into_iter().next() {
            Some(s) => s,
            None => Security::create(&self.pool, entity_id, Some("Common Stock")).await?,
        };

        // Reuse an existing listing on this exchange if the security has one
        let existing = Listing::for_security(&self.pool, security.id)
            .await?
            .into_iter()
            .find(|l| l.exchange == exchange);
        let listing = match existing {
            Some(l) => l,
            None => Listing::create(&self.pool, security.id, exchange).await?,
        };
        Ok(listing)
    }

    async fn open_ticker_claim(&self, listing_id: uuid::Uuid, ticker: &str) -> AppResult<()> {
        IdentifierClaim::record(
            &self.pool,
            &NewIdentifierClaim {
                owner_type: OwnerType::Listing.as_str().to_string(),
                owner_id: listing_id,
                scheme: Scheme::Ticker.as_str().to_string(),
                value: ticker.to_string(),
                valid_from: Utc::now().date_naive(),
                valid_to: None,
                status: ClaimStatus::Active.as_str().to_string(),
                source: "sec_tickers".to_string(),
                confidence: 1.0,
            },
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tickers_file_projection() {
        // REQUIREMENT: The tickers file is untrusted input and validated
        // PURPOSE: Verify field-order projection and bad-row skipping

        let file: CompanyTickersFile = serde_json::from_str(
            r#"{
                "fields": ["cik", "name", "ticker", "exchange"],
                "data": [
                    [320193, "Apple Inc.", "AAPL", "Nasdaq"],
                    [789019, "MICROSOFT CORP", "MSFT", "Nasdaq"],
                    [111111, "No Ticker Co", "", "NYSE"],
                    [null, "Bad Row Inc", "BAD", "NYSE"]
                ]
            }"#,
        )
        .unwrap();

        let rows = file.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            TickerRow {
                cik: "0000320193".to_string(),
                name: "Apple Inc.".to_string(),
                ticker: "AAPL".to_string(),
                exchange: Some("Nasdaq".to_string()),
            }
        );
    }

    #[test]
    fn test_tickers_file_with_unexpected_fields_is_empty() {
        let file: CompanyTickersFile = serde_json::from_str(
            r#"{"fields": ["a", "b"], "data": [[1, 2]]}"#,
        )
        .unwrap();
        assert!(file.rows().is_empty());
    }
}
