use crate::batch::BatchConfig;
use crate::cache::{DEFAULT_MAX_ENTRIES, DEFAULT_TTL};
use crate::error::SyncError;
use crate::models::{ModelKeyMap, ModelKeys, ModelType};
use crate::rate_limit::RateLimitConfig;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // Translation service connection
    pub api_url: String,
    pub project_id: String,
    pub api_key: String,
    pub request_timeout: Duration,

    // Outbound access layer
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub rate_limit: RateLimitConfig,
    pub batch: BatchConfig,

    // Which model properties are translated
    pub model_keys: ModelKeyMap,

    // HTTP server
    pub admin_api_key: Option<String>,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| SyncError::Configuration(format!("{} not set", name)))
        };

        let rate_limit = RateLimitConfig::new(
            parse_or(&lookup, "RATE_LIMIT_MAX_REQUESTS", 10)?,
            Duration::from_millis(parse_or(&lookup, "RATE_LIMIT_WINDOW_MS", 1000)?),
        )?;

        let batch_timeout_ms: u64 = parse_or(&lookup, "BATCH_TIMEOUT_MS", 10_000)?;
        let batch = BatchConfig {
            batch_size: parse_or(&lookup, "BATCH_SIZE", 10)?,
            max_retries: parse_or(&lookup, "BATCH_MAX_RETRIES", 3)?,
            retry_delay: Duration::from_millis(parse_or(&lookup, "BATCH_RETRY_DELAY_MS", 1000)?),
            backoff_multiplier: parse_or(&lookup, "BATCH_BACKOFF_MULTIPLIER", 1.0)?,
            // 0 disables the per-call timeout
            timeout: (batch_timeout_ms > 0).then(|| Duration::from_millis(batch_timeout_ms)),
        };
        batch.validate()?;

        let cache_ttl = Duration::from_millis(parse_or(
            &lookup,
            "CACHE_TTL_MS",
            DEFAULT_TTL.as_millis() as u64,
        )?);
        if cache_ttl.is_zero() {
            return Err(SyncError::Configuration(
                "CACHE_TTL_MS must be greater than zero".to_string(),
            ));
        }

        let cache_max_entries = parse_or(&lookup, "CACHE_MAX_ENTRIES", DEFAULT_MAX_ENTRIES)?;
        if cache_max_entries == 0 {
            return Err(SyncError::Configuration(
                "CACHE_MAX_ENTRIES must be at least 1".to_string(),
            ));
        }

        let mut model_keys = ModelKeyMap::default();
        for model_type in ModelType::ALL {
            let suffix = model_type.as_str().to_uppercase();
            let defaults = ModelKeys::defaults_for(model_type);
            let properties = lookup(&format!("TRANSLATABLE_{}", suffix))
                .map(|value| split_list(&value))
                .unwrap_or(defaults.properties);
            let tags = lookup(&format!("TRANSLATION_TAGS_{}", suffix))
                .map(|value| split_list(&value))
                .unwrap_or(defaults.tags);
            model_keys.set(model_type, ModelKeys { properties, tags });
        }

        Ok(Self {
            api_url: required("TRANSLATION_API_URL")?,
            project_id: required("TRANSLATION_PROJECT_ID")?,
            api_key: required("TRANSLATION_API_KEY")?,
            request_timeout: Duration::from_millis(parse_or(
                &lookup,
                "REQUEST_TIMEOUT_MS",
                30_000,
            )?),
            cache_ttl,
            cache_max_entries,
            rate_limit,
            batch,
            model_keys,
            admin_api_key: lookup("ADMIN_API_KEY").filter(|key| !key.is_empty()),
            port: parse_or(&lookup, "PORT", 9000)?,
        })
    }
}

fn parse_or<T, F>(lookup: &F, name: &str, default: T) -> Result<T, SyncError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => value.trim().parse().map_err(|_| {
            SyncError::Configuration(format!("{} has an invalid value: '{}'", name, value))
        }),
        None => Ok(default),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}
