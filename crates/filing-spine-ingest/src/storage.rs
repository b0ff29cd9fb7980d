use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;

use filing_spine_core::{AppError, AppResult};

use crate::utils::{normalize_accession, pad_cik};

/// Content-addressable filesystem store for downloaded filings.
///
/// Layout: `<data_dir>/filings/<cik-10>/<accession-dashless>/<file>`.
/// Writes are atomic (temp file + rename) and idempotent: re-fetching the
/// same accession overwrites with byte-identical content.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    data_dir: PathBuf,
}

impl DocumentStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Directory holding every document of one filing
    pub fn filing_dir(&self, cik: &str, accession: &str) -> AppResult<PathBuf> {
        Ok(self
            .data_dir
            .join("filings")
            .join(pad_cik(cik))
            .join(normalize_accession(accession)?))
    }

    pub fn document_path(&self, cik: &str, accession: &str, filename: &str) -> AppResult<PathBuf> {
        let name = Path::new(filename)
            .file_name()
            .ok_or_else(|| AppError::Validation(format!("invalid document name {:?}", filename)))?;
        Ok(self.filing_dir(cik, accession)?.join(name))
    }

    /// Atomic write: content lands under a temp name and is renamed into
    /// place, so readers never observe a half-written document.
    pub async fn write(
        &self,
        cik: &str,
        accession: &str,
        filename: &str,
        content: &[u8],
    ) -> AppResult<PathBuf> {
        let path = self.document_path(cik, accession, filename)?;
        let dir = path
            .parent()
            .ok_or_else(|| AppError::internal_error("document path has no parent"))?;
        fs::create_dir_all(dir).await?;

        let tmp = dir.join(format!(
            ".{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("doc")
        ));
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;

        Ok(path)
    }

    pub async fn read(&self, cik: &str, accession: &str, filename: &str) -> AppResult<Vec<u8>> {
        let path = self.document_path(cik, accession, filename)?;
        fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::not_found(format!("document {}", path.display()))
            } else {
                AppError::Io(e)
            }
        })
    }

    pub async fn exists(&self, cik: &str, accession: &str, filename: &str) -> AppResult<bool> {
        let path = self.document_path(cik, accession, filename)?;
        Ok(fs::try_exists(&path).await?)
    }

    /// Stored filenames for one filing
    pub async fn list(&self, cik: &str, accession: &str) -> AppResult<Vec<String>> {
        let dir = self.filing_dir(cik, accession)?;
        if !fs::try_exists(&dir).await? {
            return Ok(vec![]);
        }
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Integrity hash for a stored document
    pub fn content_hash(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hex::encode(hasher.finalize())
    }
}
