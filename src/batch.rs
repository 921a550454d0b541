//! Bulk reads across many identifiers.
//!
//! Identifiers are split into contiguous batches that run one after the
//! other; the calls inside a batch run concurrently. Every call of a batch is
//! awaited, even once a sibling has failed, so responses already paid for land
//! in the cache before the retry. A failure anywhere in a batch retries the
//! whole batch, and a batch that runs out of attempts aborts the entire fetch.

use crate::error::{SyncError, TransportError};
use crate::retry::{with_retry, RetryConfig};
use futures::future::join_all;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Identifiers fetched concurrently per batch
    pub batch_size: usize,
    /// Attempts per batch, including the first
    pub max_retries: u32,
    /// Pause before retrying a failed batch
    pub retry_delay: Duration,
    /// Growth of the pause between consecutive retries (1.0 keeps it fixed)
    pub backoff_multiplier: f64,
    /// Upper bound for each individual call
    pub timeout: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            backoff_multiplier: 1.0,
            timeout: Some(Duration::from_millis(10_000)),
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.batch_size == 0 {
            return Err(SyncError::Configuration(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(SyncError::Configuration(
                "batch max retries must be at least 1".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(SyncError::Configuration(
                "batch backoff multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }

    fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.max_retries, self.retry_delay)
            .with_backoff_multiplier(self.backoff_multiplier)
            .with_max_delay(self.retry_delay.max(Duration::from_secs(30)))
    }
}

/// Fetch every id in `ids`, returning results in input order.
///
/// On exhaustion the error is [`SyncError::BatchExhausted`] carrying the
/// zero-based batch index and the last failure; results of earlier batches
/// are dropped.
pub async fn fetch_in_batches<T, F, Fut>(
    ids: &[String],
    config: &BatchConfig,
    operation_name: &str,
    fetch: F,
) -> Result<Vec<T>, SyncError>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let retry = config.retry_config();
    let batch_size = config.batch_size.max(1);
    let total = ids.len().div_ceil(batch_size);
    let mut results = Vec::with_capacity(ids.len());

    for (index, batch) in ids.chunks(batch_size).enumerate() {
        let label = format!("{} batch {}/{}", operation_name, index + 1, total);
        debug!("{}: fetching {} ids", label, batch.len());

        let fetched = with_retry(&retry, &label, || {
            let calls = join_all(
                batch
                    .iter()
                    .map(|id| fetch_one(&fetch, id.clone(), config.timeout)),
            );
            async move { calls.await.into_iter().collect::<Result<Vec<T>, SyncError>>() }
        })
        .await
        .map_err(|(source, attempts)| SyncError::BatchExhausted {
            batch: index,
            attempts,
            source: Box::new(source),
        })?;

        results.extend(fetched);
    }

    Ok(results)
}

async fn fetch_one<T, F, Fut>(fetch: &F, id: String, limit: Option<Duration>) -> Result<T, SyncError>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let Some(limit) = limit else {
        return fetch(id).await;
    };

    let context = format!("fetch {}", id);
    match tokio::time::timeout(limit, fetch(id)).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::transport(context, TransportError::Timeout(limit))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::time::{sleep, Instant};

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn config(batch_size: usize, max_retries: u32, retry_delay_ms: u64) -> BatchConfig {
        BatchConfig {
            batch_size,
            max_retries,
            retry_delay: Duration::from_millis(retry_delay_ms),
            ..BatchConfig::default()
        }
    }

    fn failure(id: &str) -> SyncError {
        SyncError::transport(
            format!("GET /translations/en?ns={}", id),
            TransportError::Status {
                status: 503,
                body: "unavailable".to_string(),
            },
        )
    }

    /// Records (id, start offset) for every call
    #[derive(Clone, Default)]
    struct CallLog(Arc<Mutex<Vec<(String, Duration)>>>);

    impl CallLog {
        fn record(&self, id: &str, start: Instant) -> usize {
            let mut calls = self.0.lock().unwrap();
            calls.push((id.to_string(), start.elapsed()));
            calls.iter().filter(|(seen, _)| seen == id).count()
        }

        fn ids(&self) -> Vec<String> {
            self.0.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
        }

        fn count(&self, id: &str) -> usize {
            self.0.lock().unwrap().iter().filter(|(seen, _)| seen == id).count()
        }

        fn started_at(&self) -> HashMap<String, Duration> {
            self.0.lock().unwrap().iter().cloned().collect()
        }
    }

    #[test]
    fn test_defaults() {
        let config = BatchConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(1000));
        assert_eq!(config.timeout, Some(Duration::from_millis(10_000)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let config = BatchConfig {
            batch_size: 0,
            ..BatchConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SyncError::Configuration(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_input_makes_no_calls() {
        let log = CallLog::default();
        let start = Instant::now();

        let result = fetch_in_batches(&[], &BatchConfig::default(), "test", |id| {
            let log = log.clone();
            async move {
                log.record(&id, start);
                Ok::<_, SyncError>(id)
            }
        })
        .await
        .unwrap();

        assert!(result.is_empty());
        assert!(log.ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retries_whole_batch() {
        let log = CallLog::default();
        let start = Instant::now();

        let result = fetch_in_batches(&ids(&["a", "b", "c"]), &config(3, 2, 0), "test", |id| {
            let log = log.clone();
            async move {
                let attempt = log.record(&id, start);
                if id == "a" && attempt == 1 {
                    return Err(failure(&id));
                }
                Ok(format!("{}-value", id))
            }
        })
        .await
        .unwrap();

        assert_eq!(result, vec!["a-value", "b-value", "c-value"]);
        assert_eq!(log.count("a"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_aborts_whole_fetch() {
        let log = CallLog::default();
        let start = Instant::now();

        let result = fetch_in_batches(
            &ids(&["a", "b", "c", "d", "e"]),
            &config(2, 3, 10),
            "test",
            |id| {
                let log = log.clone();
                async move {
                    log.record(&id, start);
                    if id == "c" {
                        return Err(failure(&id));
                    }
                    Ok(id)
                }
            },
        )
        .await;

        match result {
            Err(SyncError::BatchExhausted {
                batch,
                attempts,
                source,
            }) => {
                assert_eq!(batch, 1);
                assert_eq!(attempts, 3);
                assert_eq!(source.status(), Some(503));
            }
            other => panic!("expected BatchExhausted, got {:?}", other),
        }

        assert_eq!(log.count("a"), 1);
        assert_eq!(log.count("b"), 1);
        assert_eq!(log.count("c"), 3);
        assert_eq!(log.count("e"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_call_waits_for_its_siblings() {
        let log = CallLog::default();
        let finished = CallLog::default();
        let start = Instant::now();

        let result = fetch_in_batches(&ids(&["a", "b"]), &config(2, 2, 0), "test", |id| {
            let (log, finished) = (log.clone(), finished.clone());
            async move {
                let attempt = log.record(&id, start);
                if id == "a" {
                    sleep(Duration::from_millis(10)).await;
                    if attempt == 1 {
                        return Err(failure(&id));
                    }
                } else {
                    sleep(Duration::from_millis(50)).await;
                }
                finished.record(&id, start);
                Ok(id)
            }
        })
        .await
        .unwrap();

        assert_eq!(result, ids(&["a", "b"]));
        // b's first response was awaited, not dropped when a failed
        assert_eq!(finished.count("b"), 2);
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_run_sequentially_and_calls_concurrently() {
        let log = CallLog::default();
        let start = Instant::now();

        let result = fetch_in_batches(
            &ids(&["a", "b", "c", "d", "e"]),
            &config(2, 1, 0),
            "test",
            |id| {
                let log = log.clone();
                async move {
                    log.record(&id, start);
                    sleep(Duration::from_millis(100)).await;
                    Ok::<_, SyncError>(id)
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(result, ids(&["a", "b", "c", "d", "e"]));

        let started = log.started_at();
        assert_eq!(started["a"], Duration::ZERO);
        assert_eq!(started["b"], Duration::ZERO);
        assert_eq!(started["c"], Duration::from_millis(100));
        assert_eq!(started["d"], Duration::from_millis(100));
        assert_eq!(started["e"], Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_follow_input_order_not_completion_order() {
        let result = fetch_in_batches(&ids(&["slow", "mid", "fast"]), &config(3, 1, 0), "test", |id| async move {
            let delay = match id.as_str() {
                "slow" => 300,
                "mid" => 200,
                _ => 100,
            };
            sleep(Duration::from_millis(delay)).await;
            Ok::<_, SyncError>(id)
        })
        .await
        .unwrap();

        assert_eq!(result, ids(&["slow", "mid", "fast"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_for_delay() {
        let log = CallLog::default();
        let start = Instant::now();

        fetch_in_batches(&ids(&["a"]), &config(1, 2, 1000), "test", |id| {
            let log = log.clone();
            async move {
                if log.record(&id, start) == 1 {
                    return Err(failure(&id));
                }
                Ok(id)
            }
        })
        .await
        .unwrap();

        assert_eq!(start.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let config = BatchConfig {
            batch_size: 1,
            max_retries: 1,
            retry_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            timeout: Some(Duration::from_secs(10)),
        };
        let start = Instant::now();

        let result = fetch_in_batches(&ids(&["a"]), &config, "test", |id| async move {
            sleep(Duration::from_secs(20)).await;
            Ok::<_, SyncError>(id)
        })
        .await;

        match result {
            Err(SyncError::BatchExhausted { source, .. }) => assert!(matches!(
                *source,
                SyncError::Transport {
                    source: TransportError::Timeout(_),
                    ..
                }
            )),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }
}
