//! Metadata enrichment with bounded concurrency and per-run caching
//!
//! One `MetadataEnricher` lives for one process run. Every distinct token is
//! looked up at most once per run (successes and failures are both cached),
//! lookups run through `run_bounded` with the configured ceiling, and a token
//! that still fails after its retry budget gets `TokenMetadata::unknown()`.
//! Failures are logged, never returned.

use super::bounded::run_bounded;
use super::error::EnrichmentError;
use super::retry::RetryPolicy;
use super::types::TokenMetadata;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// External token metadata service
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &'static str;

    /// Look up symbol and name for one token
    async fn fetch_metadata(&self, token: &str) -> Result<TokenMetadata, EnrichmentError>;
}

/// Cached lookup result for one token
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub metadata: TokenMetadata,
    pub fetched_at: i64,
    /// false when the entry is the sentinel for a failed lookup
    pub resolved: bool,
}

/// Counters for one `enrich` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentSummary {
    pub requested: usize,
    pub cache_hits: usize,
    pub fetched: usize,
    pub failed: usize,
}

pub struct MetadataEnricher {
    provider: Arc<dyn MetadataProvider>,
    concurrency: usize,
    retry: RetryPolicy,
    cache: HashMap<String, CacheEntry>,
}

/// Transient failures worth another attempt
fn is_retryable(err: &EnrichmentError) -> bool {
    match err {
        EnrichmentError::Request(_) => true,
        EnrichmentError::Http(status) => *status == 429 || *status >= 500,
        EnrichmentError::Decode(_) | EnrichmentError::NotFound(_) => false,
    }
}

async fn fetch_with_retry(
    provider: &dyn MetadataProvider,
    token: &str,
    retry: RetryPolicy,
) -> Result<TokenMetadata, EnrichmentError> {
    let mut backoff = retry.backoff();

    loop {
        match provider.fetch_metadata(token).await {
            Ok(metadata) => return Ok(metadata),
            Err(e) if is_retryable(&e) => {
                if backoff.sleep().await.is_err() {
                    return Err(e);
                }
                log::debug!("🔁 Retrying {} lookup for {}: {}", provider.name(), token, e);
            }
            Err(e) => return Err(e),
        }
    }
}

impl MetadataEnricher {
    pub fn new(provider: Arc<dyn MetadataProvider>, concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            provider,
            concurrency: concurrency.max(1),
            retry,
            cache: HashMap::new(),
        }
    }

    /// Resolve metadata for every distinct token not already cached
    pub async fn enrich<I, S>(&mut self, tokens: I) -> EnrichmentSummary
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let distinct: BTreeSet<String> = tokens
            .into_iter()
            .map(Into::into)
            .filter(|t: &String| !t.is_empty())
            .collect();

        let mut summary = EnrichmentSummary {
            requested: distinct.len(),
            ..Default::default()
        };

        let missing: Vec<String> = distinct
            .into_iter()
            .filter(|t| !self.cache.contains_key(t))
            .collect();
        summary.cache_hits = summary.requested - missing.len();

        if missing.is_empty() {
            return summary;
        }

        log::debug!(
            "🔎 Fetching metadata for {} tokens via {} (concurrency {})",
            missing.len(),
            self.provider.name(),
            self.concurrency
        );

        let provider = self.provider.clone();
        let retry = self.retry;
        let results = run_bounded(missing, self.concurrency, |token| {
            let provider = provider.clone();
            async move {
                let result = fetch_with_retry(provider.as_ref(), &token, retry).await;
                (token, result)
            }
        })
        .await;

        let now = chrono::Utc::now().timestamp();
        for (token, result) in results {
            let entry = match result {
                Ok(metadata) => {
                    summary.fetched += 1;
                    CacheEntry {
                        metadata,
                        fetched_at: now,
                        resolved: true,
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    log::warn!(
                        "⚠️  Metadata lookup failed for {} ({}): {}; using {} sentinel",
                        token,
                        self.provider.name(),
                        e,
                        TokenMetadata::unknown().symbol
                    );
                    CacheEntry {
                        metadata: TokenMetadata::unknown(),
                        fetched_at: now,
                        resolved: false,
                    }
                }
            };
            self.cache.insert(token, entry);
        }

        summary
    }

    /// Metadata for a token, the sentinel when it failed or was never enriched
    pub fn metadata_for(&self, token: &str) -> TokenMetadata {
        self.cache
            .get(token)
            .map(|e| e.metadata.clone())
            .unwrap_or_else(TokenMetadata::unknown)
    }

    /// true when the token resolved to real metadata
    pub fn is_resolved(&self, token: &str) -> bool {
        self.cache.get(token).map(|e| e.resolved).unwrap_or(false)
    }

    pub fn cache_entry(&self, token: &str) -> Option<&CacheEntry> {
        self.cache.get(token)
    }

    pub fn cached_tokens(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::{sleep, Duration};

    /// Provider answering from a fixed table, counting calls per token
    pub(crate) struct ScriptedProvider {
        known: HashMap<String, TokenMetadata>,
        /// Tokens that fail this many times with 503 before answering
        flaky: HashMap<String, usize>,
        calls: Mutex<HashMap<String, usize>>,
        in_flight: AtomicUsize,
        pub(crate) peak_in_flight: AtomicUsize,
    }

    impl ScriptedProvider {
        pub(crate) fn new(known: &[(&str, &str, &str)]) -> Self {
            Self {
                known: known
                    .iter()
                    .map(|(t, s, n)| (t.to_string(), TokenMetadata::new(*s, *n)))
                    .collect(),
                flaky: HashMap::new(),
                calls: Mutex::new(HashMap::new()),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }
        }

        pub(crate) fn failing() -> Self {
            Self::new(&[])
        }

        fn with_flaky(mut self, token: &str, failures: usize) -> Self {
            self.flaky.insert(token.to_string(), failures);
            self
        }

        pub(crate) fn calls_for(&self, token: &str) -> usize {
            self.calls.lock().unwrap().get(token).copied().unwrap_or(0)
        }

        pub(crate) fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().values().sum()
        }
    }

    #[async_trait]
    impl MetadataProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch_metadata(&self, token: &str) -> Result<TokenMetadata, EnrichmentError> {
            let call_number = {
                let mut calls = self.calls.lock().unwrap();
                let count = calls.entry(token.to_string()).or_insert(0);
                *count += 1;
                *count
            };

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(2)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some(failures) = self.flaky.get(token) {
                if call_number <= *failures {
                    return Err(EnrichmentError::Http(503));
                }
            }

            self.known
                .get(token)
                .cloned()
                .ok_or_else(|| EnrichmentError::NotFound(token.to_string()))
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let provider = Arc::new(ScriptedProvider::new(&[("mintA", "AAA", "Token A")]));
        let mut enricher = MetadataEnricher::new(provider.clone(), 4, fast_retry());

        let first = enricher.enrich(vec!["mintA", "mintA"]).await;
        let second = enricher.enrich(vec!["mintA"]).await;

        assert_eq!(first.requested, 1);
        assert_eq!(first.fetched, 1);
        assert_eq!(second.cache_hits, 1);
        assert_eq!(provider.calls_for("mintA"), 1);
        assert_eq!(enricher.metadata_for("mintA"), TokenMetadata::new("AAA", "Token A"));
        assert!(enricher.cache_entry("mintA").unwrap().fetched_at > 0);
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_sentinel() {
        let provider = Arc::new(ScriptedProvider::new(&[("good", "GD", "Good")]));
        let mut enricher = MetadataEnricher::new(provider.clone(), 4, fast_retry());

        let summary = enricher.enrich(vec!["good", "missing"]).await;

        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.failed, 1);
        assert!(enricher.metadata_for("missing").is_unknown());
        assert!(!enricher.is_resolved("missing"));
        // NotFound is not retried
        assert_eq!(provider.calls_for("missing"), 1);

        // Failed tokens are cached for the rest of the run
        enricher.enrich(vec!["missing"]).await;
        assert_eq!(provider.calls_for("missing"), 1);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let provider = Arc::new(
            ScriptedProvider::new(&[("flaky", "FLK", "Flaky")]).with_flaky("flaky", 2),
        );
        let mut enricher = MetadataEnricher::new(provider.clone(), 2, fast_retry());

        let summary = enricher.enrich(vec!["flaky"]).await;

        assert_eq!(summary.fetched, 1);
        assert_eq!(provider.calls_for("flaky"), 3);
        assert_eq!(enricher.metadata_for("flaky").symbol, "FLK");
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let provider = Arc::new(
            ScriptedProvider::new(&[("down", "DWN", "Down")]).with_flaky("down", 10),
        );
        let mut enricher = MetadataEnricher::new(provider.clone(), 2, fast_retry());

        let summary = enricher.enrich(vec!["down"]).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(provider.calls_for("down"), 3);
        assert!(enricher.metadata_for("down").is_unknown());
    }

    #[tokio::test]
    async fn test_concurrency_ceiling_respected() {
        let tokens: Vec<String> = (0..25).map(|i| format!("mint{}", i)).collect();
        let known: Vec<(String, String, String)> = tokens
            .iter()
            .map(|t| (t.clone(), t.to_uppercase(), t.clone()))
            .collect();
        let known_refs: Vec<(&str, &str, &str)> = known
            .iter()
            .map(|(a, b, c)| (a.as_str(), b.as_str(), c.as_str()))
            .collect();
        let provider = Arc::new(ScriptedProvider::new(&known_refs));
        let mut enricher = MetadataEnricher::new(provider.clone(), 3, fast_retry());

        let summary = enricher.enrich(tokens.clone()).await;

        assert_eq!(summary.fetched, 25);
        assert_eq!(provider.total_calls(), 25);
        assert!(provider.peak_in_flight.load(Ordering::SeqCst) <= 3);
        assert_eq!(enricher.cached_tokens(), 25);
    }

    #[tokio::test]
    async fn test_all_failures_never_panic() {
        let provider = Arc::new(ScriptedProvider::failing());
        let mut enricher = MetadataEnricher::new(provider, 10, fast_retry());

        let summary = enricher.enrich(vec!["a", "b", "c", ""]).await;

        assert_eq!(summary.requested, 3);
        assert_eq!(summary.failed, 3);
        assert!(enricher.metadata_for("b").is_unknown());
        assert!(enricher.metadata_for("never-seen").is_unknown());
    }
}
