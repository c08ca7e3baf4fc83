// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub mod cache;
pub mod config;
mod error;
mod http;
mod middleware;
pub mod remote;
mod service;
pub mod store;
pub mod telemetry;

pub use cache::{ConcurrencyLimiter, FetchCoordinator, MetadataCache};
pub use config::{validate_startup_config, ApiConfig, CacheConfig, RemoteConfig};
pub use error::{ConfigError, RemoteError, RetrieveError, ServiceError, StoreError};
pub use remote::{
    DicomWebChannel, FakeChannel, InstanceFilter, LocalArchiveChannel, RetrievalChannel,
    RetryPolicy,
};
pub use service::{SeriesDetail, SeriesService};
pub use store::{ContentStore, FsContentStore, PayloadPath};
pub use telemetry::metrics::CacheMetrics;

pub const CRATE_NAME: &str = "pacsproxy-server";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SeriesService>,
    pub api: ApiConfig,
    pub ready: Arc<AtomicBool>,
    pub accepting_requests: Arc<AtomicBool>,
    pub(crate) request_id_seed: Arc<AtomicU64>,
}

impl AppState {
    #[must_use]
    pub fn new(service: Arc<SeriesService>) -> Self {
        Self::with_config(service, ApiConfig::default())
    }

    #[must_use]
    pub fn with_config(service: Arc<SeriesService>, api: ApiConfig) -> Self {
        Self {
            service,
            api,
            ready: Arc::new(AtomicBool::new(true)),
            accepting_requests: Arc::new(AtomicBool::new(true)),
            request_id_seed: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Fails readiness and stops new remote operations. Retrievals already
    /// holding a slot run to completion.
    pub fn begin_shutdown_drain(&self) {
        self.accepting_requests.store(false, Ordering::Relaxed);
        self.service.shutdown();
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(http::handlers::landing_handler))
        .route("/healthz", get(http::handlers::healthz_handler))
        .route("/readyz", get(http::handlers::readyz_handler))
        .route(
            "/metrics",
            get(telemetry::metrics_endpoint::metrics_handler),
        )
        .route(
            "/series/:series_uid",
            get(http::handlers::series_detail_handler),
        )
        .route(
            "/series/:series_uid/metadata",
            get(http::handlers::series_metadata_handler),
        )
        .route(
            "/metadata/:series_uid",
            get(http::handlers::series_metadata_handler),
        )
        .route("/rois/:series_uid", get(http::handlers::rois_handler))
        .route(
            "/files/:study_uid/:series_uid/:instance_uid",
            get(http::handlers::payload_handler),
        )
        .route(
            "/payload/:study_uid/:series_uid/:instance_uid",
            get(http::handlers::payload_handler),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::request_tracing::request_tracing_middleware,
        ))
        .with_state(state)
}


#[cfg(test)]
mod drain_tests {
    use super::test_support::fake_state;
    use super::*;

    #[tokio::test]
    async fn shutdown_drain_fails_readiness_and_closes_limiter() {
        let (state, _tmp) = fake_state();
        state.begin_shutdown_drain();
        assert!(!state.accepting_requests.load(Ordering::Relaxed));
        assert!(state.service.limiter().is_closed());
        assert!(state.service.limiter().try_acquire().is_none());
    }
}
