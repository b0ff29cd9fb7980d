//! EDGAR full-text search, used only for backfill: discovering filings
//! whose exhibits mention a term, so the collector can be pointed at the
//! accessions it missed.

use serde::{Deserialize, Serialize};

use filing_spine_core::AppResult;

use crate::client::SecClient;
use crate::utils::{normalize_accession, pad_cik};

pub const EDGAR_SEARCH_URL: &str = "https://efts.sec.gov/LATEST/search-index";

/// Query parameters accepted by the full-text search endpoint
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchQuery {
    /// Search phrase; quoted phrases and boolean operators pass through
    pub q: String,
    /// Form type filter, e.g. "10-K"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forms: Option<String>,
    #[serde(rename = "dateRange", skip_serializing_if = "Option::is_none")]
    pub date_range: Option<String>,
    #[serde(rename = "startdt", skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(rename = "enddt", skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

/// Trimmed Elasticsearch response envelope
#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub hits: SearchHits,
}

#[derive(Debug, Deserialize)]
pub struct SearchHits {
    pub total: TotalHits,
    #[serde(default)]
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
pub struct TotalHits {
    pub value: u32,
}

#[derive(Debug, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "_source")]
    pub source: SearchSource,
}

#[derive(Debug, Deserialize)]
pub struct SearchSource {
    /// Accession number, dashed
    pub adsh: String,
    #[serde(default)]
    pub ciks: Vec<String>,
    #[serde(default)]
    pub display_names: Vec<String>,
    #[serde(default)]
    pub form: String,
    #[serde(default)]
    pub file_date: String,
}

/// A discovered filing, ready to hand to the fetcher
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredFiling {
    pub accession_number: String,
    pub cik: String,
    pub display_name: String,
    pub form: String,
    pub file_date: String,
}

/// Full-text search client for exhibit discovery
#[derive(Debug, Clone)]
pub struct FullTextSearch {
    client: SecClient,
    search_url: String,
}

impl FullTextSearch {
    pub fn new(client: SecClient) -> Self {
        Self {
            client,
            search_url: EDGAR_SEARCH_URL.to_string(),
        }
    }

    pub fn with_url(mut self, search_url: String) -> Self {
        self.search_url = search_url;
        self
    }

    /// Run one search page and project the hits into fetchable filings.
    /// Hits without a CIK or a parseable accession are dropped.
    pub async fn discover(&self, query: &SearchQuery) -> AppResult<Vec<DiscoveredFiling>> {
        let mut url = format!(
            "{}?q={}",
            self.search_url,
            urlencode(&query.q)
        );
        if let Some(forms) = &query.forms {
            url.push_str(&format!("&forms={}", urlencode(forms)));
        }
        if let Some(start) = &query.start_date {
            url.push_str(&format!("&startdt={}", start));
        }
        if let Some(end) = &query.end_date {
            url.push_str(&format!("&enddt={}", end));
        }

        let response: SearchResponse = self.client.get_json(&url).await?;

        let mut discovered = Vec::with_capacity(response.hits.hits.len());
        for hit in response.hits.hits {
            let source = hit.source;
            let Ok(accession) = normalize_accession(&source.adsh) else {
                continue;
            };
            let Some(cik) = source.ciks.first() else {
                continue;
            };
            discovered.push(DiscoveredFiling {
                accession_number: accession,
                cik: pad_cik(cik),
                display_name: source.display_names.first().cloned().unwrap_or_default(),
                form: source.form,
                file_date: source.file_date,
            });
        }
        Ok(discovered)
    }
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::SecRateLimiter;
    use filing_spine_core::config::SecConfig;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_discover_projects_hits() {
        // REQUIREMENT: Full-text search is consumed only for
        // backfill/discovery of specific exhibits
        // PURPOSE: Verify the response projection drops unusable hits

        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "took": 12,
                    "hits": {
                        "total": {"value": 2, "relation": "eq"},
                        "hits": [
                            {"_source": {
                                "adsh": "0000320193-24-000081",
                                "ciks": ["320193"],
                                "display_names": ["Apple Inc.  (AAPL)  (CIK 0000320193)"],
                                "form": "10-K",
                                "file_date": "2024-11-01"
                            }},
                            {"_source": {
                                "adsh": "not-an-accession",
                                "ciks": [],
                                "display_names": [],
                                "form": "10-K",
                                "file_date": "2024-11-01"
                            }}
                        ]
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let config = SecConfig {
            data_dir: PathBuf::from("/tmp"),
            user_agent: "filing-spine-test/0.1 (test@example.com)".to_string(),
            requests_per_second: 50,
            max_attempts: 2,
            backoff_base_ms: 10,
        };
        let client = SecClient::new(&config, SecRateLimiter::new(50).unwrap()).unwrap();
        let search = FullTextSearch::new(client).with_url(server.url());

        let hits = search
            .discover(&SearchQuery {
                q: "\"Acme Widgets\"".to_string(),
                forms: Some("10-K".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].accession_number, "000032019324000081");
        assert_eq!(hits[0].cik, "0000320193");
        assert_eq!(hits[0].form, "10-K");
    }
}
