use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, info};

use filing_spine_core::{AppError, AppResult};

use crate::client::SecClient;
use crate::storage::DocumentStore;
use crate::utils::{build_filing_index_url, normalize_accession, EDGAR_ARCHIVES_URL};

/// One downloaded document of a filing
#[derive(Debug, Clone)]
pub struct DocumentFile {
    pub filename: String,
    pub path: PathBuf,
    pub content: Vec<u8>,
}

/// A filing's primary document plus its exhibits
#[derive(Debug)]
pub struct FilingBundle {
    pub accession_number: String,
    pub cik: String,
    pub primary_document: DocumentFile,
    pub exhibits: Vec<DocumentFile>,
}

/// EDGAR directory listing for one filing (`.../<accession>/index.json`)
#[derive(Debug, Deserialize)]
pub struct FilingIndex {
    pub directory: FilingDirectory,
}

#[derive(Debug, Deserialize)]
pub struct FilingDirectory {
    #[serde(rename = "item", default)]
    pub items: Vec<DirectoryItem>,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryItem {
    pub name: String,
    #[serde(rename = "type", default)]
    pub item_type: String,
    #[serde(default)]
    pub size: String,
}

impl DirectoryItem {
    fn size_bytes(&self) -> u64 {
        self.size.trim().parse().unwrap_or(0)
    }

    fn is_html(&self) -> bool {
        let lower = self.name.to_lowercase();
        lower.ends_with(".htm") || lower.ends_with(".html")
    }

    fn is_exhibit(&self) -> bool {
        let lower = self.name.to_lowercase();
        lower.starts_with("ex") && self.is_html()
    }

    fn is_index_artifact(&self) -> bool {
        let lower = self.name.to_lowercase();
        lower.contains("-index") || lower == "index.json"
    }
}

/// Select the primary document: the largest non-exhibit, non-index HTML
/// file of the submission.
pub fn pick_primary(items: &[DirectoryItem]) -> Option<&DirectoryItem> {
    items
        .iter()
        .filter(|i| i.is_html() && !i.is_exhibit() && !i.is_index_artifact())
        .max_by_key(|i| i.size_bytes())
}

/// Select exhibit documents worth downloading (EX-21, EX-10.*, ...)
pub fn pick_exhibits(items: &[DirectoryItem]) -> Vec<&DirectoryItem> {
    items.iter().filter(|i| i.is_exhibit()).collect()
}

/// Downloads filing bundles under the global rate limit and stores them in
/// the content-addressable layout. Idempotent per accession: the fetcher
/// may be invoked arbitrarily often and re-writes byte-identical files.
#[derive(Debug, Clone)]
pub struct FilingFetcher {
    client: SecClient,
    store: DocumentStore,
    archives_base: String,
}

impl FilingFetcher {
    pub fn new(client: SecClient, store: DocumentStore) -> Self {
        Self {
            client,
            store,
            archives_base: EDGAR_ARCHIVES_URL.to_string(),
        }
    }

    pub fn client(&self) -> &SecClient {
        &self.client
    }

    pub fn with_base_url(mut self, archives_base: String) -> Self {
        self.archives_base = archives_base;
        self
    }

    fn url(&self, default_url: String) -> String {
        default_url.replace(EDGAR_ARCHIVES_URL, &self.archives_base)
    }

    /// Download the primary document and exhibits for an accession
    pub async fn fetch_bundle(&self, cik: &str, accession: &str) -> AppResult<FilingBundle> {
        let accession = normalize_accession(accession)?;

        let index_url = self.url(build_filing_index_url(cik, &accession)?);
        debug!(%index_url, "fetching filing directory");
        let index: FilingIndex = self.client.get_json(&index_url).await?;

        let primary = pick_primary(&index.directory.items).ok_or_else(|| {
            AppError::ParserError(format!(
                "filing {} has no identifiable primary document",
                accession
            ))
        })?;

        let primary_document = self.fetch_document(cik, &accession, &primary.name).await?;

        let mut exhibits = Vec::new();
        for item in pick_exhibits(&index.directory.items) {
            if item.name == primary.name {
                continue;
            }
            exhibits.push(self.fetch_document(cik, &accession, &item.name).await?);
        }

        info!(
            %accession,
            primary = %primary_document.filename,
            exhibits = exhibits.len(),
            "filing bundle downloaded"
        );

        Ok(FilingBundle {
            accession_number: accession,
            cik: crate::utils::pad_cik(cik),
            primary_document,
            exhibits,
        })
    }

    async fn fetch_document(
        &self,
        cik: &str,
        accession: &str,
        filename: &str,
    ) -> AppResult<DocumentFile> {
        let url = self.url(crate::utils::build_document_url(cik, accession, filename)?);
        let content = self.client.get_bytes(&url).await?;
        let path = self.store.write(cik, accession, filename, &content).await?;

        Ok(DocumentFile {
            filename: filename.to_string(),
            path,
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::SecRateLimiter;
    use filing_spine_core::config::SecConfig;

    fn items() -> Vec<DirectoryItem> {
        let item = |name: &str, size: &str| DirectoryItem {
            name: name.to_string(),
            item_type: "text.gif".to_string(),
            size: size.to_string(),
        };
        vec![
            item("0000320193-24-000081-index.htm", "2000"),
            item("aapl-20240928.htm", "1500000"),
            item("ex21.htm", "9000"),
            item("ex10_5.htm", "40000"),
            item("aapl-20240928_g1.jpg", "50000"),
            item("FilingSummary.xml", "60000"),
        ]
    }

    #[test]
    fn test_primary_and_exhibit_selection() {
        // REQUIREMENT: The bundle is primary document + exhibits
        // PURPOSE: Verify selection heuristics against a realistic directory

        let items = items();
        let primary = pick_primary(&items).unwrap();
        assert_eq!(primary.name, "aapl-20240928.htm");

        let exhibits: Vec<_> = pick_exhibits(&items).iter().map(|i| i.name.as_str()).collect();
        assert_eq!(exhibits, vec!["ex21.htm", "ex10_5.htm"]);
    }

    #[tokio::test]
    async fn test_fetch_bundle_is_idempotent() {
        // REQUIREMENT: Given the same accession the fetcher may run
        // arbitrarily often; the filesystem layout is content-addressable so
        // re-fetch overwrites are byte-identical
        // PURPOSE: Drive the fetcher twice against a mock archive

        let mut server = mockito::Server::new_async().await;
        let index_body = serde_json::json!({
            "directory": {
                "name": "/Archives/edgar/data/320193/000032019324000081",
                "item": [
                    {"name": "aapl-20240928.htm", "type": "text.gif", "size": "120"},
                    {"name": "ex21.htm", "type": "text.gif", "size": "60"}
                ]
            }
        });

        server
            .mock(
                "GET",
                "/edgar/data/320193/000032019324000081/index.json",
            )
            .with_status(200)
            .with_body(index_body.to_string())
            .expect(2)
            .create_async()
            .await;
        server
            .mock(
                "GET",
                "/edgar/data/320193/000032019324000081/aapl-20240928.htm",
            )
            .with_status(200)
            .with_body("<html>10-K body</html>")
            .expect(2)
            .create_async()
            .await;
        server
            .mock("GET", "/edgar/data/320193/000032019324000081/ex21.htm")
            .with_status(200)
            .with_body("<html>subsidiaries</html>")
            .expect(2)
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

        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(dir.path());
        let fetcher = FilingFetcher::new(client, store.clone()).with_base_url(server.url());

        let first = fetcher
            .fetch_bundle("320193", "0000320193-24-000081")
            .await
            .unwrap();
        assert_eq!(first.primary_document.content, b"<html>10-K body</html>");
        assert_eq!(first.exhibits.len(), 1);

        let second = fetcher
            .fetch_bundle("320193", "0000320193-24-000081")
            .await
            .unwrap();
        assert_eq!(second.primary_document.content, first.primary_document.content);

        let stored = store.list("320193", "000032019324000081").await.unwrap();
        assert_eq!(stored, vec!["aapl-20240928.htm", "ex21.htm"]);
    }
}
