// SPDX-License-Identifier: Apache-2.0

use crate::cache::{ConcurrencyLimiter, FetchCoordinator, MetadataCache};
use crate::config::CacheConfig;
use crate::remote::{InstanceFilter, RetrievalChannel};
use crate::store::{ContentStore, FsContentStore, PayloadPath};
use crate::telemetry::metrics::CacheMetrics;
use crate::{RemoteError, RetrieveError, ServiceError};
use pacsproxy_model::{InstanceRef, Level, MetadataRecord, ResourceKey, RetrieveReport, Uid};
use futures::future::try_join_all;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Series record with the URLs of its images and of the segmentations that
/// reference it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesDetail {
    #[serde(flatten)]
    pub record: MetadataRecord,
    pub images: Vec<String>,
    pub segmentations: Vec<String>,
}

pub struct SeriesService {
    metadata: MetadataCache,
    limiter: ConcurrencyLimiter,
    coordinator: FetchCoordinator<RetrieveReport>,
    store: Arc<dyn ContentStore>,
    channel: Arc<dyn RetrievalChannel>,
    metrics: Arc<CacheMetrics>,
    server_uri: String,
    query_timeout: Duration,
}

impl SeriesService {
    #[must_use]
    pub fn new(
        config: &CacheConfig,
        server_uri: &str,
        store: Arc<dyn ContentStore>,
        channel: Arc<dyn RetrievalChannel>,
    ) -> Self {
        let metrics = Arc::new(CacheMetrics::default());
        let limiter = ConcurrencyLimiter::new(config.max_associations);
        Self {
            metadata: MetadataCache::new(config.metadata_ttl, config.metadata_cache_entries),
            coordinator: FetchCoordinator::new(
                limiter.clone(),
                config.retrieve_timeout,
                Arc::clone(&metrics),
            ),
            limiter,
            store,
            channel,
            metrics,
            server_uri: server_uri.trim_end_matches('/').to_string(),
            query_timeout: config.query_timeout,
        }
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    #[must_use]
    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    #[must_use]
    pub fn coordinator(&self) -> &FetchCoordinator<RetrieveReport> {
        &self.coordinator
    }

    #[must_use]
    pub fn metadata_cache(&self) -> &MetadataCache {
        &self.metadata
    }

    #[must_use]
    pub fn channel_tag(&self) -> &'static str {
        self.channel.channel_tag()
    }

    /// Runs one remote query under a limiter slot and the query deadline.
    async fn guarded<T, Fut>(&self, call: Fut) -> Result<T, ServiceError>
    where
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let _slot = self.limiter.acquire().await?;
        match tokio::time::timeout(self.query_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(RetrieveError::Timeout(self.query_timeout.as_millis() as u64).into()),
        }
    }

    async fn cached_metadata(
        &self,
        level: Level,
        key: ResourceKey,
    ) -> Result<MetadataRecord, ServiceError> {
        if let Some(record) = self.metadata.get(&key) {
            CacheMetrics::incr(&self.metrics.metadata_hits);
            return Ok(record);
        }
        CacheMetrics::incr(&self.metrics.metadata_misses);
        debug!(key = %key, level = %level, "metadata cache miss");
        let record = match self
            .guarded(self.channel.query_metadata(level, &key))
            .await
        {
            Ok(record) => record,
            Err(e) => {
                CacheMetrics::incr(&self.metrics.metadata_query_failures);
                return Err(e);
            }
        };
        if let Some(evicted) = self.metadata.put(key, record.clone()) {
            CacheMetrics::incr(&self.metrics.metadata_evictions);
            debug!(evicted = %evicted, "metadata cache eviction");
        }
        Ok(record)
    }

    pub async fn series_metadata(&self, series: &Uid) -> Result<MetadataRecord, ServiceError> {
        self.cached_metadata(Level::Series, ResourceKey::single(series.clone()))
            .await
    }

    async fn study_of(&self, series: &Uid) -> Result<Uid, ServiceError> {
        let record = self.series_metadata(series).await?;
        let raw = record.study_instance_uid().ok_or_else(|| {
            RemoteError::Malformed(format!("series {series} has no StudyInstanceUID"))
        })?;
        Uid::parse(raw).map_err(|e| RemoteError::Malformed(e.to_string()).into())
    }

    #[must_use]
    pub fn instance_url(&self, study: &Uid, series: &Uid, instance: &Uid) -> String {
        format!("{}/files/{study}/{series}/{instance}", self.server_uri)
    }

    pub async fn images_of_series(&self, series: &Uid) -> Result<Vec<String>, ServiceError> {
        let study = self.study_of(series).await?;
        let refs = self
            .guarded(self.channel.query_instances(series, InstanceFilter::All))
            .await?;
        Ok(refs
            .iter()
            .map(|r| self.instance_url(&study, &r.series_uid, &r.instance_uid))
            .collect())
    }

    /// URLs of segmentation instances referencing `series`, each resolved to
    /// the study its own series belongs to.
    pub async fn segmentations_of_series(
        &self,
        series: &Uid,
    ) -> Result<Vec<String>, ServiceError> {
        let refs: Vec<InstanceRef> = self
            .guarded(self.channel.query_instances(series, InstanceFilter::SegmentationsOf))
            .await?;
        let seg_series = refs
            .iter()
            .map(|r| &r.series_uid)
            .collect::<BTreeSet<_>>();
        let resolved = try_join_all(seg_series.iter().map(|uid| self.study_of(uid))).await?;
        let studies = seg_series
            .into_iter()
            .zip(resolved)
            .collect::<HashMap<_, _>>();
        Ok(refs
            .iter()
            .filter_map(|r| {
                studies
                    .get(&r.series_uid)
                    .map(|study| self.instance_url(study, &r.series_uid, &r.instance_uid))
            })
            .collect())
    }

    pub async fn series_detail(&self, series: &Uid) -> Result<SeriesDetail, ServiceError> {
        let record = self.series_metadata(series).await?;
        let images = self.images_of_series(series).await?;
        let segmentations = self.segmentations_of_series(series).await?;
        Ok(SeriesDetail {
            record,
            images,
            segmentations,
        })
    }

    /// Makes sure the payload for `instance` is in the local store, retrieving
    /// the whole `[study, series]` through the coordinator when it is not.
    pub async fn ensure_payload(
        &self,
        study: &Uid,
        series: &Uid,
        instance: &Uid,
    ) -> Result<PayloadPath, ServiceError> {
        let path = FsContentStore::path_for(study, instance);
        if self.store.exists(&path).await {
            CacheMetrics::incr(&self.metrics.payload_hits);
            return Ok(path);
        }
        CacheMetrics::incr(&self.metrics.payload_misses);
        let key = ResourceKey::series(study.clone(), series.clone());
        let channel = Arc::clone(&self.channel);
        let store = Arc::clone(&self.store);
        let report = self
            .coordinator
            .retrieve_payload(&key, move |key| async move {
                channel.retrieve_payload(&key, store.as_ref()).await
            })
            .await?;
        info!(
            key = %key,
            status = report.status.as_str(),
            transferred = report.transferred,
            "payload retrieval completed"
        );
        if self.store.exists(&path).await {
            return Ok(path);
        }
        CacheMetrics::incr(&self.metrics.payload_not_found);
        Err(ServiceError::PayloadMissing(path.to_string()))
    }

    pub async fn open_payload(
        &self,
        study: &Uid,
        series: &Uid,
        instance: &Uid,
    ) -> Result<Vec<u8>, ServiceError> {
        let path = self.ensure_payload(study, series, instance).await?;
        self.store
            .open(&path)
            .await?
            .ok_or_else(|| ServiceError::PayloadMissing(path.to_string()))
    }

    /// Stops new remote operations; running ones finish.
    pub fn shutdown(&self) {
        self.limiter.close();
    }
}
