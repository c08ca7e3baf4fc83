// SPDX-License-Identifier: Apache-2.0

use crate::cache::limiter::ConcurrencyLimiter;
use crate::telemetry::metrics::CacheMetrics;
use crate::{RemoteError, RetrieveError};
use pacsproxy_model::{ResourceKey, RetrieveReport};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub type Outcome<T> = Result<T, RetrieveError>;

type Flight<T> = watch::Receiver<Option<Outcome<T>>>;
type FlightTable<T> = Arc<Mutex<HashMap<ResourceKey, Flight<T>>>>;

fn lock_table<T>(table: &FlightTable<T>) -> MutexGuard<'_, HashMap<ResourceKey, Flight<T>>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Single-flight execution of remote operations keyed by [`ResourceKey`].
///
/// The first caller for a key starts the operation on its own task; callers
/// arriving while it runs subscribe to the same outcome. The table entry is
/// removed and the outcome published in one critical section, so a caller
/// either joins a running operation or starts a fresh one.
pub struct FetchCoordinator<T> {
    inflight: FlightTable<T>,
    limiter: ConcurrencyLimiter,
    timeout: Option<Duration>,
    metrics: Arc<CacheMetrics>,
}

/// Removes the table entry and publishes the outcome exactly once; publishes
/// [`RetrieveError::Aborted`] if the retrieval task goes away first.
struct FlightGuard<T> {
    key: ResourceKey,
    inflight: FlightTable<T>,
    publisher: Option<watch::Sender<Option<Outcome<T>>>>,
}

impl<T> FlightGuard<T> {
    /// Removes the entry and publishes in one critical section; the caller
    /// releases its slot afterwards.
    fn finish(&mut self, outcome: Outcome<T>) {
        if let Some(publisher) = self.publisher.take() {
            let mut table = lock_table(&self.inflight);
            table.remove(&self.key);
            publisher.send_replace(Some(outcome));
        }
    }
}

impl<T> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        if self.publisher.is_some() {
            warn!(key = %self.key, "retrieval task dropped before completion");
            self.finish(Err(RetrieveError::Aborted));
        }
    }
}

enum Role<T> {
    Leader(Flight<T>, watch::Sender<Option<Outcome<T>>>),
    Joiner(Flight<T>),
}

impl<T> FetchCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(
        limiter: ConcurrencyLimiter,
        timeout: Option<Duration>,
        metrics: Arc<CacheMetrics>,
    ) -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            limiter,
            timeout,
            metrics,
        }
    }

    /// Runs `operation` for `key` unless one is already running, and returns
    /// the outcome shared by every caller of that run.
    pub async fn retrieve<F, Fut>(&self, key: &ResourceKey, operation: F) -> Outcome<T>
    where
        F: FnOnce(ResourceKey) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, RemoteError>> + Send + 'static,
    {
        let role = {
            let mut table = lock_table(&self.inflight);
            match table.get(key) {
                Some(flight) => Role::Joiner(flight.clone()),
                None => {
                    let (publisher, flight) = watch::channel(None);
                    table.insert(key.clone(), flight.clone());
                    Role::Leader(flight, publisher)
                }
            }
        };
        let flight = match role {
            Role::Joiner(flight) => {
                CacheMetrics::incr(&self.metrics.retrievals_joined);
                debug!(key = %key, "joining in-flight retrieval");
                flight
            }
            Role::Leader(flight, publisher) => {
                self.launch(key.clone(), publisher, operation);
                flight
            }
        };
        wait_outcome(flight).await
    }

    fn launch<F, Fut>(
        &self,
        key: ResourceKey,
        publisher: watch::Sender<Option<Outcome<T>>>,
        operation: F,
    ) where
        F: FnOnce(ResourceKey) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, RemoteError>> + Send + 'static,
    {
        let mut guard = FlightGuard {
            key: key.clone(),
            inflight: Arc::clone(&self.inflight),
            publisher: Some(publisher),
        };
        let limiter = self.limiter.clone();
        let limit = self.timeout;
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            let slot = match limiter.acquire().await {
                Ok(slot) => slot,
                Err(e) => {
                    guard.finish(Err(e));
                    return;
                }
            };
            CacheMetrics::incr(&metrics.retrievals_started);
            info!(key = %key, "retrieval start");
            let started = Instant::now();
            let outcome = run_with_deadline(operation(key.clone()), limit).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &outcome {
                Ok(_) => info!(key = %key, elapsed_ms, "retrieval finished"),
                Err(e) => {
                    CacheMetrics::incr(&metrics.retrievals_failed);
                    if matches!(e, RetrieveError::Timeout(_)) {
                        CacheMetrics::incr(&metrics.retrievals_timed_out);
                    }
                    warn!(key = %key, elapsed_ms, error = %e, "retrieval failed");
                }
            }
            guard.finish(outcome);
            drop(slot);
        });
    }

    /// Number of retrievals currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        lock_table(&self.inflight).len()
    }

    #[must_use]
    pub fn is_in_flight(&self, key: &ResourceKey) -> bool {
        lock_table(&self.inflight).contains_key(key)
    }

    #[must_use]
    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }
}

impl FetchCoordinator<RetrieveReport> {
    /// [`Self::retrieve`] for bulk transfers: failure statuses become errors.
    pub async fn retrieve_payload<F, Fut>(
        &self,
        key: &ResourceKey,
        operation: F,
    ) -> Outcome<RetrieveReport>
    where
        F: FnOnce(ResourceKey) -> Fut + Send + 'static,
        Fut: Future<Output = Result<RetrieveReport, RemoteError>> + Send + 'static,
    {
        self.retrieve(key, move |key| async move {
            operation(key).await.and_then(classify_report)
        })
        .await
    }
}

/// Success and partial-success reports complete a retrieval; anything else
/// is a failure.
pub fn classify_report(report: RetrieveReport) -> Result<RetrieveReport, RemoteError> {
    if report.status.is_completed() {
        Ok(report)
    } else {
        Err(RemoteError::Status {
            code: report.code,
            detail: report.detail,
        })
    }
}

async fn run_with_deadline<T, Fut>(operation: Fut, limit: Option<Duration>) -> Outcome<T>
where
    Fut: Future<Output = Result<T, RemoteError>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, operation).await {
            Ok(result) => result.map_err(RetrieveError::from),
            Err(_) => Err(RetrieveError::Timeout(limit.as_millis() as u64)),
        },
        None => operation.await.map_err(RetrieveError::from),
    }
}

async fn wait_outcome<T: Clone>(mut flight: Flight<T>) -> Outcome<T> {
    let published = flight
        .wait_for(Option::is_some)
        .await
        .map(|value| (*value).clone());
    match published {
        Ok(Some(outcome)) => outcome,
        Ok(None) | Err(_) => Err(RetrieveError::Aborted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacsproxy_model::Uid;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(s: &str) -> ResourceKey {
        ResourceKey::series(Uid::parse("1.1").expect("study"), Uid::parse(s).expect("series"))
    }

    fn coordinator(capacity: usize, timeout: Option<Duration>) -> Arc<FetchCoordinator<u32>> {
        Arc::new(FetchCoordinator::new(
            ConcurrencyLimiter::new(capacity),
            timeout,
            Arc::new(CacheMetrics::default()),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_operation() {
        let coord = coordinator(4, None);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut joins = Vec::new();
        for _ in 0..16 {
            let c = Arc::clone(&coord);
            let calls = Arc::clone(&calls);
            joins.push(tokio::spawn(async move {
                c.retrieve(&key("2.1"), move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(7)
                })
                .await
            }));
        }
        for j in joins {
            assert_eq!(j.await.expect("join caller"), Ok(7));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coord.in_flight(), 0);
        assert_eq!(coord.metrics.retrievals_joined.load(Ordering::Relaxed), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn joined_callers_receive_identical_failure() {
        let coord = coordinator(2, None);
        let first = {
            let c = Arc::clone(&coord);
            tokio::spawn(async move {
                c.retrieve(&key("2.2"), |_| async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Err(RemoteError::Transport("timeout".to_string()))
                })
                .await
            })
        };
        tokio::task::yield_now().await;
        assert!(coord.is_in_flight(&key("2.2")));
        let second = coord
            .retrieve(&key("2.2"), |_| async { Ok(1) })
            .await;
        let first = first.await.expect("join first");
        assert_eq!(first, second);
        let err = second.expect_err("shared failure");
        assert!(err.to_string().contains("timeout"), "{err}");

        let later = coord.retrieve(&key("2.2"), |_| async { Ok(3) }).await;
        assert_eq!(later, Ok(3), "later call starts a fresh attempt");
    }

    #[tokio::test]
    async fn completed_key_is_not_treated_as_in_flight() {
        let coord = coordinator(1, None);
        let calls = Arc::new(AtomicUsize::new(0));
        for expected in 1..=3 {
            let calls = Arc::clone(&calls);
            let out = coord
                .retrieve(&key("2.3"), move |_| async move {
                    Ok(calls.fetch_add(1, Ordering::SeqCst) as u32 + 1)
                })
                .await;
            assert_eq!(out, Ok(expected));
            assert!(!coord.is_in_flight(&key("2.3")));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_bounds_parallel_retrievals_across_keys() {
        let coord = coordinator(2, None);
        let started = tokio::time::Instant::now();
        let mut joins = Vec::new();
        for k in ["3.1", "3.2", "3.3"] {
            let c = Arc::clone(&coord);
            joins.push(tokio::spawn(async move {
                c.retrieve(&key(k), |_| async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(0)
                })
                .await
            }));
        }
        for j in joins {
            j.await.expect("join retrieval").expect("retrieval ok");
        }
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(300), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_run_in_parallel() {
        let coord = coordinator(8, None);
        let started = tokio::time::Instant::now();
        let mut joins = Vec::new();
        for i in 0..8 {
            let c = Arc::clone(&coord);
            joins.push(tokio::spawn(async move {
                c.retrieve(&key(&format!("4.{i}")), |_| async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(0)
                })
                .await
            }));
        }
        for j in joins {
            j.await.expect("join retrieval").expect("retrieval ok");
        }
        assert!(started.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_turns_hung_operation_into_timeout() {
        let coord = coordinator(1, Some(Duration::from_secs(5)));
        let out = coord
            .retrieve(&key("5.1"), |_| std::future::pending::<Result<u32, RemoteError>>())
            .await;
        assert_eq!(out, Err(RetrieveError::Timeout(5_000)));
        assert_eq!(coord.in_flight(), 0);
        assert_eq!(coord.limiter().available(), 1, "slot released after timeout");
    }

    #[tokio::test]
    async fn panicking_operation_is_reported_as_aborted() {
        let coord = coordinator(1, None);
        let out = coord
            .retrieve(&key("5.2"), |_| async {
                if true {
                    panic!("remote adapter bug");
                }
                Ok(0)
            })
            .await;
        assert_eq!(out, Err(RetrieveError::Aborted));
        assert!(!coord.is_in_flight(&key("5.2")));
        assert_eq!(coord.limiter().available(), 1);
    }

    #[tokio::test]
    async fn abandoned_caller_does_not_cancel_shared_retrieval() {
        let coord = coordinator(1, None);
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let leader = {
            let c = Arc::clone(&coord);
            tokio::spawn(async move {
                c.retrieve(&key("5.3"), move |_| async move {
                    let _ = release_rx.await;
                    Ok(9)
                })
                .await
            })
        };
        tokio::task::yield_now().await;
        leader.abort();
        let _ = leader.await;
        assert!(coord.is_in_flight(&key("5.3")));

        let c = Arc::clone(&coord);
        let joiner = tokio::spawn(async move { c.retrieve(&key("5.3"), |_| async { Ok(0) }).await });
        tokio::task::yield_now().await;
        release_tx.send(()).expect("release operation");
        assert_eq!(joiner.await.expect("join joiner"), Ok(9));
    }

    #[tokio::test]
    async fn partial_success_completes_and_failure_status_fails() {
        let coord: FetchCoordinator<RetrieveReport> = FetchCoordinator::new(
            ConcurrencyLimiter::new(1),
            None,
            Arc::new(CacheMetrics::default()),
        );
        let partial = coord
            .retrieve_payload(&key("6.1"), |_| async {
                Ok(RetrieveReport::partial("nothing new", 0))
            })
            .await
            .expect("partial completes");
        assert_eq!(partial.code, 2);

        let failed = coord
            .retrieve_payload(&key("6.1"), |_| async {
                Ok(RetrieveReport::failure(0xA702, "out of resources"))
            })
            .await;
        assert_eq!(
            failed,
            Err(RetrieveError::Remote(RemoteError::Status {
                code: 0xA702,
                detail: "out of resources".to_string()
            }))
        );
    }
}
