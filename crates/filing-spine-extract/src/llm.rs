//! Optional LLM-backed extraction for designated high-value sections.
//! The enrichment worker itself is an external collaborator; this client
//! only speaks the prompt/result contract and reports method LLM.

use serde::{Deserialize, Serialize};
use tracing::warn;

use filing_spine_core::config::LlmConfig;
use filing_spine_core::models::ExtractionMethod;
use filing_spine_core::{AppError, AppResult};

use crate::mentions::{CandidateMention, SectionText, TypeHint};

/// Sections worth spending model tokens on
pub const LLM_SECTION_KEYS: &[&str] = &["ITEM_1", "ITEM_1A", "ITEM_7"];

#[derive(Debug, Serialize)]
struct ExtractionRequest<'a> {
    model: &'a str,
    section_key: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExtractionResponse {
    #[serde(default)]
    mentions: Vec<LlmMention>,
}

#[derive(Debug, Deserialize)]
struct LlmMention {
    text: String,
    char_start: usize,
    char_end: usize,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

fn default_confidence() -> f64 {
    0.6
}

/// Client for the section-extraction prompt contract
pub struct LlmExtractor {
    client: reqwest::Client,
    provider_url: String,
    model: String,
}

impl LlmExtractor {
    /// Returns None when the LLM rung is disabled or unconfigured
    pub fn from_config(config: &LlmConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let provider_url = config.provider_url.clone()?;
        let model = config.model.clone()?;
        Some(Self {
            client: reqwest::Client::new(),
            provider_url,
            model,
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model
    }

    pub fn wants_section(section_key: &str) -> bool {
        LLM_SECTION_KEYS.contains(&section_key)
    }

    /// Ask the provider for mention spans. Spans whose offsets do not slice
    /// back to the claimed text are dropped: model output is untrusted.
    pub async fn extract(&self, section: &SectionText<'_>) -> AppResult<Vec<CandidateMention>> {
        let request = ExtractionRequest {
            model: &self.model,
            section_key: section.section_key,
            text: section.text,
        };

        let response = self
            .client
            .post(&self.provider_url)
            .json(&request)
            .send()
            .await
            .map_err(AppError::HttpClient)?;

        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "llm provider returned {}",
                response.status()
            )));
        }

        let parsed: ExtractionResponse = response.json().await.map_err(AppError::HttpClient)?;

        let mut out = Vec::new();
        for m in parsed.mentions {
            let valid = section
                .text
                .get(m.char_start..m.char_end)
                .is_some_and(|span| span == m.text);
            if !valid {
                warn!(
                    text = %m.text,
                    char_start = m.char_start,
                    char_end = m.char_end,
                    "llm mention span does not match section text, dropped"
                );
                continue;
            }
            out.push(CandidateMention {
                text: m.text,
                char_start: section.base_offset + m.char_start,
                char_end: section.base_offset + m.char_end,
                type_hint: TypeHint::Unknown,
                confidence: m.confidence.clamp(0.0, 1.0),
                method: ExtractionMethod::Llm,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> LlmConfig {
        LlmConfig {
            enabled: true,
            provider_url: Some(url.to_string()),
            model: Some("extraction-small".to_string()),
        }
    }

    #[test]
    fn test_disabled_config_yields_no_extractor() {
        let off = LlmConfig {
            enabled: false,
            provider_url: Some("http://localhost:9999".to_string()),
            model: Some("m".to_string()),
        };
        assert!(LlmExtractor::from_config(&off).is_none());

        let incomplete = LlmConfig {
            enabled: true,
            provider_url: None,
            model: None,
        };
        assert!(LlmExtractor::from_config(&incomplete).is_none());
    }

    #[test]
    fn test_section_gating() {
        assert!(LlmExtractor::wants_section("ITEM_1A"));
        assert!(!LlmExtractor::wants_section("EX_21"));
    }

    #[tokio::test]
    async fn test_extract_validates_model_spans() {
        // REQUIREMENT: Model responses are untrusted; spans that do not
        // slice back to their text are dropped
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/extract")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "mentions": [
                        {"text": "TSMC", "char_start": 11, "char_end": 15, "confidence": 0.8},
                        {"text": "Intel", "char_start": 0, "char_end": 5, "confidence": 0.9}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let extractor =
            LlmExtractor::from_config(&config(&format!("{}/extract", server.url()))).unwrap();

        let text = "We rely on TSMC for wafers.";
        let section = SectionText {
            section_key: "ITEM_1A",
            text,
            base_offset: 45000,
        };

        let found = extractor.extract(&section).await.unwrap();
        // "Intel" does not appear at [0,5) -> dropped; TSMC survives
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text, "TSMC");
        assert_eq!(found[0].char_start, 45011);
        assert_eq!(found[0].method, ExtractionMethod::Llm);
    }
}
