//! The single path from the service layer to the network.
//!
//! Every request first takes its place in the rate limiter queue, then is
//! answered from the response cache when possible and from the transport
//! otherwise. Identical reads already on the wire are joined instead of sent
//! again. Cache hits and joined reads are reported back to the limiter so
//! they don't count against the quota.

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::error::SyncError;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::transport::{ApiRequest, HttpTransport, Transport};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

/// Body of a response and whether it was replayed from the cache
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub body: Value,
    pub cached: bool,
}

/// Reads currently on the wire, by cache key
type InFlight = HashMap<String, Arc<OnceCell<Value>>>;

/// Client for one configured connection. Share it behind an `Arc`.
pub struct TranslationClient {
    transport: Arc<dyn Transport>,
    cache: ResponseCache,
    limiter: RateLimiter,
    in_flight: Mutex<InFlight>,
}

impl TranslationClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        rate_limit: RateLimitConfig,
        cache_ttl: Duration,
    ) -> Result<Self, SyncError> {
        Ok(Self::with_cache(
            transport,
            rate_limit,
            ResponseCache::new(cache_ttl)?,
        ))
    }

    fn with_cache(
        transport: Arc<dyn Transport>,
        rate_limit: RateLimitConfig,
        cache: ResponseCache,
    ) -> Self {
        Self {
            transport,
            cache,
            limiter: RateLimiter::new(rate_limit),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Build the HTTP-backed client described by `config`
    pub fn from_config(config: &Config) -> Result<Self, SyncError> {
        let transport = HttpTransport::new(
            &config.api_url,
            &config.project_id,
            &config.api_key,
            config.request_timeout,
        )?;
        let cache =
            ResponseCache::new(config.cache_ttl)?.with_max_entries(config.cache_max_entries)?;
        Ok(Self::with_cache(
            Arc::new(transport),
            config.rate_limit,
            cache,
        ))
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Run a request through the queue and the cache
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, SyncError> {
        let permit = self.limiter.enqueue().await?;

        let result = self.dispatch(&request).await;
        let cached = matches!(&result, Ok(response) if response.cached);
        self.limiter.complete(permit, cached);

        result
    }

    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse, SyncError> {
        if !request.is_cacheable() {
            let body = self.send(request).await?;
            return Ok(ApiResponse {
                body,
                cached: false,
            });
        }

        let key = request.cache_key();
        if let Some(body) = self.cache.get(&key) {
            return Ok(ApiResponse { body, cached: true });
        }

        let pending = Arc::clone(self.in_flight().entry(key.clone()).or_default());
        let sent = AtomicBool::new(false);
        let result = {
            let (sent, key) = (&sent, &key);
            pending
                .get_or_try_init(move || async move {
                    sent.store(true, Ordering::Relaxed);
                    let body = self.send(request).await?;
                    // Cached before the cell is set, so late arrivals find it there
                    self.cache.insert(key.clone(), body.clone());
                    Ok::<_, SyncError>(body)
                })
                .await
                .cloned()
        };

        {
            let mut in_flight = self.in_flight();
            if in_flight
                .get(&key)
                .is_some_and(|current| Arc::ptr_eq(current, &pending))
            {
                in_flight.remove(&key);
            }
        }

        let body = result?;
        let cached = !sent.load(Ordering::Relaxed);
        if cached {
            debug!(request = %request, "Joined in-flight request");
        }
        Ok(ApiResponse { body, cached })
    }

    fn in_flight(&self) -> MutexGuard<'_, InFlight> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn send(&self, request: &ApiRequest) -> Result<Value, SyncError> {
        debug!(request = %request, "Sending request to translation service");
        self.transport
            .send(request)
            .await
            .map_err(|e| SyncError::transport(request.to_string(), e))
    }

    pub async fn get(&self, request: ApiRequest) -> Result<Value, SyncError> {
        Ok(self.execute(request).await?.body)
    }
}
