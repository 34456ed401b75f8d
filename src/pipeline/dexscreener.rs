//! DexScreener metadata provider
//!
//! Endpoint: `{base}/token-pairs/v1/{chain}/{token}`
//! Returns: array of trading pairs for the token
//!
//! The first pair quoted in SOL wins; when the token trades only against
//! other quotes, the first pair is used.

use super::enricher::MetadataProvider;
use super::error::EnrichmentError;
use super::types::TokenMetadata;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// DexScreener pair response structure
#[derive(Debug, Clone, Deserialize)]
pub struct DexScreenerPair {
    #[serde(rename = "baseToken")]
    pub base_token: PairToken,
    #[serde(rename = "quoteToken")]
    pub quote_token: QuoteToken,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairToken {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteToken {
    #[serde(default)]
    pub symbol: String,
}

/// Pick metadata out of a pairs payload
pub fn metadata_from_pairs(
    token: &str,
    pairs: &[DexScreenerPair],
) -> Result<TokenMetadata, EnrichmentError> {
    let pair = pairs
        .iter()
        .find(|p| p.quote_token.symbol == "SOL")
        .or_else(|| pairs.first())
        .ok_or_else(|| EnrichmentError::NotFound(token.to_string()))?;

    let symbol = pair.base_token.symbol.trim();
    let name = pair.base_token.name.trim();
    if symbol.is_empty() && name.is_empty() {
        return Err(EnrichmentError::Decode(format!(
            "pair for {} has no symbol or name",
            token
        )));
    }

    Ok(TokenMetadata::new(symbol, name))
}

pub struct DexScreenerProvider {
    client: reqwest::Client,
    base_url: String,
    chain: String,
}

impl DexScreenerProvider {
    pub fn new(base_url: &str, chain: &str, timeout: Duration) -> Result<Self, EnrichmentError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            chain: chain.to_string(),
        })
    }

    fn pairs_url(&self, token: &str) -> String {
        format!("{}/token-pairs/v1/{}/{}", self.base_url, self.chain, token)
    }
}

#[async_trait]
impl MetadataProvider for DexScreenerProvider {
    fn name(&self) -> &'static str {
        "dexscreener"
    }

    async fn fetch_metadata(&self, token: &str) -> Result<TokenMetadata, EnrichmentError> {
        let response = self.client.get(self.pairs_url(token)).send().await?;

        if !response.status().is_success() {
            return Err(EnrichmentError::Http(response.status().as_u16()));
        }

        let body = response.text().await?;
        let pairs: Vec<DexScreenerPair> =
            serde_json::from_str(&body).map_err(|e| EnrichmentError::Decode(e.to_string()))?;

        metadata_from_pairs(token, &pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAIRS_FIXTURE: &str = r#"[
        {"baseToken": {"name": "Bonk", "symbol": "BONK"}, "quoteToken": {"symbol": "USDC"}, "priceUsd": "0.00002"},
        {"baseToken": {"name": "Bonk", "symbol": "BONK"}, "quoteToken": {"symbol": "SOL"}, "priceUsd": "0.00002"}
    ]"#;

    #[test]
    fn test_prefers_sol_quote() {
        let pairs: Vec<DexScreenerPair> = serde_json::from_str(PAIRS_FIXTURE).unwrap();
        let metadata = metadata_from_pairs("bonkmint", &pairs).unwrap();

        assert_eq!(metadata, TokenMetadata::new("BONK", "Bonk"));
    }

    #[test]
    fn test_falls_back_to_first_pair() {
        let json = r#"[{"baseToken": {"name": "Wrapped", "symbol": "WRP "}, "quoteToken": {"symbol": "USDT"}}]"#;
        let pairs: Vec<DexScreenerPair> = serde_json::from_str(json).unwrap();

        let metadata = metadata_from_pairs("wrp", &pairs).unwrap();
        assert_eq!(metadata.symbol, "WRP");
    }

    #[test]
    fn test_empty_payload_is_not_found() {
        let result = metadata_from_pairs("nothing", &[]);
        assert!(matches!(result, Err(EnrichmentError::NotFound(_))));
    }

    #[test]
    fn test_url_shape() {
        let provider =
            DexScreenerProvider::new("https://api.dexscreener.com/", "solana", Duration::from_secs(5))
                .unwrap();

        assert_eq!(
            provider.pairs_url("MINT"),
            "https://api.dexscreener.com/token-pairs/v1/solana/MINT"
        );
    }

    #[tokio::test]
    #[ignore] // Run only when testing with live API
    async fn test_fetch_live_metadata() {
        let provider =
            DexScreenerProvider::new("https://api.dexscreener.com", "solana", Duration::from_secs(10))
                .unwrap();

        let metadata = provider
            .fetch_metadata("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v")
            .await
            .unwrap();
        assert!(!metadata.symbol.is_empty());
    }
}
