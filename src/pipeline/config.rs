//! Pipeline configuration from environment variables
//!
//! Environment variables (defaults in parentheses):
//! - `SOURCE_DB_PATH` (data/source.db)
//! - `PROCESSED_DB_PATH` (data/processed.db)
//! - `PROCESSED_SCHEMA` (processed)
//! - `PIPELINE_BATCH_SIZE` (5000)
//! - `METADATA_CONCURRENCY` (10)
//! - `METADATA_MAX_RETRIES` (3), `METADATA_RETRY_BASE_MS` (250), `METADATA_RETRY_MAX_MS` (4000)
//! - `METADATA_TIMEOUT_SECS` (10)
//! - `METADATA_PROVIDER` (dexscreener | helius)
//! - `DEXSCREENER_API_URL`, `DEXSCREENER_CHAIN` (solana)
//! - `HELIUS_API_URL`, `HELIUS_API_KEY` (required for helius)
//! - `SOURCE_FILLS_TABLE`, `SOURCE_ARB_TABLE`, `SOURCE_ARB_OPPORTUNITY_TABLE`, `SOURCE_COIN_INFO_TABLE`
//! - `RUN_LOCK_TTL_SECS` (3600)

use super::db::is_plain_identifier;
use super::dexscreener::DexScreenerProvider;
use super::enricher::MetadataProvider;
use super::helius::HeliusProvider;
use super::retry::RetryPolicy;
use super::runner::{RunSettings, SourceTables};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderKind {
    DexScreener,
    Helius,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub source_db_path: String,
    pub processed_db_path: String,
    pub schema: String,
    pub batch_size: usize,
    pub metadata_concurrency: usize,
    pub retry: RetryPolicy,
    pub metadata_timeout: Duration,
    pub provider: ProviderKind,
    pub dexscreener_url: String,
    pub dexscreener_chain: String,
    pub helius_url: String,
    pub helius_api_key: Option<String>,
    pub tables: SourceTables,
    pub run_lock_ttl_secs: i64,
}

/// Parse a number, falling back to the default with a warning
fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display + Copy,
{
    match raw {
        None => default,
        Some(s) => match s.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                log::warn!("Invalid {} '{}', defaulting to {}", key, s, default);
                default
            }
        },
    }
}

impl PipelineConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Load configuration from any variable lookup
    pub fn from_vars<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| {
            get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let identifier = |key: &str, default: &str| {
            let value = text(key, default);
            if is_plain_identifier(&value) {
                Ok(value)
            } else {
                Err(ConfigError::InvalidValue(format!(
                    "{} must be a plain identifier, got '{}'",
                    key, value
                )))
            }
        };

        let batch_size = parse_or(get("PIPELINE_BATCH_SIZE"), "PIPELINE_BATCH_SIZE", 5000_usize);
        if batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "PIPELINE_BATCH_SIZE must be greater than 0".to_string(),
            ));
        }

        let metadata_concurrency =
            parse_or(get("METADATA_CONCURRENCY"), "METADATA_CONCURRENCY", 10_usize);
        if metadata_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "METADATA_CONCURRENCY must be greater than 0".to_string(),
            ));
        }

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: parse_or(get("METADATA_MAX_RETRIES"), "METADATA_MAX_RETRIES", defaults.max_retries),
            initial_delay_ms: parse_or(
                get("METADATA_RETRY_BASE_MS"),
                "METADATA_RETRY_BASE_MS",
                defaults.initial_delay_ms,
            ),
            max_delay_ms: parse_or(
                get("METADATA_RETRY_MAX_MS"),
                "METADATA_RETRY_MAX_MS",
                defaults.max_delay_ms,
            ),
        };

        let provider = match text("METADATA_PROVIDER", "dexscreener").to_lowercase().as_str() {
            "dexscreener" => ProviderKind::DexScreener,
            "helius" => ProviderKind::Helius,
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "METADATA_PROVIDER must be dexscreener or helius, got '{}'",
                    other
                )))
            }
        };

        let helius_api_key = get("HELIUS_API_KEY")
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        if provider == ProviderKind::Helius && helius_api_key.is_none() {
            return Err(ConfigError::MissingVariable("HELIUS_API_KEY".to_string()));
        }

        Ok(Self {
            source_db_path: text("SOURCE_DB_PATH", "data/source.db"),
            processed_db_path: text("PROCESSED_DB_PATH", "data/processed.db"),
            schema: identifier("PROCESSED_SCHEMA", "processed")?,
            batch_size,
            metadata_concurrency,
            retry,
            metadata_timeout: Duration::from_secs(parse_or(
                get("METADATA_TIMEOUT_SECS"),
                "METADATA_TIMEOUT_SECS",
                10_u64,
            )),
            provider,
            dexscreener_url: text("DEXSCREENER_API_URL", "https://api.dexscreener.com"),
            dexscreener_chain: text("DEXSCREENER_CHAIN", "solana"),
            helius_url: text("HELIUS_API_URL", "https://api.helius.xyz"),
            helius_api_key,
            tables: SourceTables {
                fills: identifier("SOURCE_FILLS_TABLE", "btstransaction")?,
                arb_transactions: identifier("SOURCE_ARB_TABLE", "arbtransaction")?,
                arb_opportunities: identifier("SOURCE_ARB_OPPORTUNITY_TABLE", "arbopportunity")?,
                coin_info: identifier("SOURCE_COIN_INFO_TABLE", "btscoininfo")?,
            },
            run_lock_ttl_secs: parse_or(get("RUN_LOCK_TTL_SECS"), "RUN_LOCK_TTL_SECS", 3600_i64),
        })
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            batch_size: self.batch_size,
            metadata_concurrency: self.metadata_concurrency,
            retry: self.retry,
            run_lock_ttl_secs: self.run_lock_ttl_secs,
            tables: self.tables.clone(),
        }
    }

    /// Build the configured metadata provider
    pub fn metadata_provider(&self) -> Result<Arc<dyn MetadataProvider>, ConfigError> {
        let provider: Arc<dyn MetadataProvider> = match self.provider {
            ProviderKind::DexScreener => Arc::new(
                DexScreenerProvider::new(
                    &self.dexscreener_url,
                    &self.dexscreener_chain,
                    self.metadata_timeout,
                )
                .map_err(|e| ConfigError::InvalidValue(format!("DexScreener client: {}", e)))?,
            ),
            ProviderKind::Helius => {
                let key = self
                    .helius_api_key
                    .as_deref()
                    .ok_or_else(|| ConfigError::MissingVariable("HELIUS_API_KEY".to_string()))?;
                Arc::new(
                    HeliusProvider::new(&self.helius_url, key, self.metadata_timeout)
                        .map_err(|e| ConfigError::InvalidValue(format!("Helius client: {}", e)))?,
                )
            }
        };

        Ok(provider)
    }

    pub fn log_summary(&self) {
        log::info!("⚙️  Pipeline configuration");
        log::info!("   ├─ Source DB: {}", self.source_db_path);
        log::info!(
            "   ├─ Processed DB: {} (schema {})",
            self.processed_db_path,
            self.schema
        );
        log::info!("   ├─ Batch size: {}", self.batch_size);
        log::info!(
            "   ├─ Metadata: {:?}, concurrency {}, {} retries",
            self.provider,
            self.metadata_concurrency,
            self.retry.max_retries
        );
        log::info!("   └─ Run lock TTL: {}s", self.run_lock_ttl_secs);
    }
}
