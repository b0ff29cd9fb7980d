use serde::Deserialize;

use filing_spine_core::AppResult;

use crate::client::SecClient;
use crate::utils::build_submissions_url;

/// The slice of the submissions endpoint response the spine consumes.
/// The endpoint is authoritative for filer identity: resolver-side entity
/// creation for a CIK goes through here.
#[derive(Debug, Clone, Deserialize)]
pub struct CompanySubmissions {
    pub name: String,
    #[serde(rename = "entityType", default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default)]
    pub exchanges: Vec<String>,
    #[serde(rename = "sicDescription", default)]
    pub sic_description: Option<String>,
}

/// Fetch the submissions profile for a CIK
pub async fn fetch_company(client: &SecClient, cik: &str) -> AppResult<CompanySubmissions> {
    client.get_json(&build_submissions_url(cik)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submissions_shape() {
        // Responses are untrusted input; only the consumed fields are bound
        let parsed: CompanySubmissions = serde_json::from_str(
            r#"{
                "cik": "320193",
                "entityType": "operating",
                "name": "Apple Inc.",
                "tickers": ["AAPL"],
                "exchanges": ["Nasdaq"],
                "sicDescription": "Electronic Computers",
                "filings": {"recent": {}}
            }"#,
        )
        .unwrap();

        assert_eq!(parsed.name, "Apple Inc.");
        assert_eq!(parsed.tickers, vec!["AAPL"]);
        assert_eq!(parsed.entity_type.as_deref(), Some("operating"));
    }
}
