//! Helius token-metadata provider
//!
//! `POST {base}/v0/token-metadata?api-key=…` with a single mint per request.
//! Symbol and name come from the on-chain metadata account, falling back to
//! the off-chain JSON when the on-chain fields are blank.

use super::enricher::MetadataProvider;
use super::error::EnrichmentError;
use super::types::TokenMetadata;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

pub struct HeliusProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

fn text_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    current
        .as_str()
        .map(|s| s.trim_matches(char::from(0)).trim())
        .filter(|s| !s.is_empty())
}

/// Extract symbol and name from a token-metadata response body
pub fn metadata_from_response(token: &str, body: &Value) -> Result<TokenMetadata, EnrichmentError> {
    let entries = body
        .as_array()
        .ok_or_else(|| EnrichmentError::Decode("expected a JSON array".to_string()))?;
    let entry = entries
        .first()
        .ok_or_else(|| EnrichmentError::NotFound(token.to_string()))?;

    let on_chain = ["onChainMetadata", "metadata", "data"];
    let off_chain = ["offChainMetadata", "metadata"];

    let field = |name: &str| {
        let on: Vec<&str> = on_chain.iter().copied().chain(std::iter::once(name)).collect();
        let off: Vec<&str> = off_chain.iter().copied().chain(std::iter::once(name)).collect();
        text_at(entry, &on).or_else(|| text_at(entry, &off))
    };

    match (field("symbol"), field("name")) {
        (None, None) => Err(EnrichmentError::NotFound(token.to_string())),
        (symbol, name) => Ok(TokenMetadata::new(
            symbol.unwrap_or_default(),
            name.unwrap_or_default(),
        )),
    }
}

impl HeliusProvider {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, EnrichmentError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl MetadataProvider for HeliusProvider {
    fn name(&self) -> &'static str {
        "helius"
    }

    async fn fetch_metadata(&self, token: &str) -> Result<TokenMetadata, EnrichmentError> {
        let url = format!("{}/v0/token-metadata", self.base_url);
        let payload = json!({
            "mintAccounts": [token],
            "includeOffChain": true,
            "disableCache": false,
        });

        let response = self
            .client
            .post(&url)
            .query(&[("api-key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EnrichmentError::Http(response.status().as_u16()));
        }

        let body: Value = response.json().await?;
        metadata_from_response(token, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_chain_fields_preferred() {
        let body = json!([{
            "account": "mint1",
            "onChainMetadata": {"metadata": {"data": {"symbol": "ABC\u{0}\u{0}", "name": "Alpha Beta"}}},
            "offChainMetadata": {"metadata": {"symbol": "OFF", "name": "Off Chain"}}
        }]);

        let metadata = metadata_from_response("mint1", &body).unwrap();
        assert_eq!(metadata, TokenMetadata::new("ABC", "Alpha Beta"));
    }

    #[test]
    fn test_off_chain_fallback() {
        let body = json!([{
            "onChainMetadata": null,
            "offChainMetadata": {"metadata": {"symbol": "OFF", "name": "Off Chain"}}
        }]);

        let metadata = metadata_from_response("mint2", &body).unwrap();
        assert_eq!(metadata.symbol, "OFF");
        assert_eq!(metadata.name, "Off Chain");
    }

    #[test]
    fn test_empty_results_fail() {
        assert!(matches!(
            metadata_from_response("m", &json!([])),
            Err(EnrichmentError::NotFound(_))
        ));
        assert!(matches!(
            metadata_from_response("m", &json!([{"onChainMetadata": {}}])),
            Err(EnrichmentError::NotFound(_))
        ));
        assert!(matches!(
            metadata_from_response("m", &json!({"error": "bad"})),
            Err(EnrichmentError::Decode(_))
        ));
    }
}
