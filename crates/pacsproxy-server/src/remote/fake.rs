// SPDX-License-Identifier: Apache-2.0

use super::{study_and_series, InstanceFilter, RetrievalChannel};
use crate::store::{ContentStore, FsContentStore};
use crate::RemoteError;
use async_trait::async_trait;
use pacsproxy_model::{InstanceRef, Level, MetadataRecord, ResourceKey, RetrieveReport, Uid};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Scripted in-memory archive with call counters.
#[derive(Default)]
pub struct FakeChannel {
    pub metadata: Mutex<HashMap<(Level, Uid), MetadataRecord>>,
    pub instances: Mutex<HashMap<Uid, Vec<InstanceRef>>>,
    pub segmentations: Mutex<HashMap<Uid, Vec<InstanceRef>>>,
    pub payloads: Mutex<HashMap<Uid, Vec<u8>>>,
    pub query_failure: Mutex<Option<RemoteError>>,
    pub retrieve_failure: Mutex<Option<RemoteError>>,
    /// Returned as-is by `retrieve_payload` without transferring anything.
    pub retrieve_report: Mutex<Option<RetrieveReport>>,
    pub query_calls: AtomicU64,
    pub retrieve_calls: AtomicU64,
    pub delay: Duration,
}

impl FakeChannel {
    #[must_use]
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Registers a series with its metadata record and instance payloads.
    pub async fn add_series(
        &self,
        study: &Uid,
        series: &Uid,
        modality: &str,
        instances: Vec<(Uid, Vec<u8>)>,
    ) {
        let record: MetadataRecord = [
            ("StudyInstanceUID".to_string(), study.to_string()),
            ("SeriesInstanceUID".to_string(), series.to_string()),
            ("Modality".to_string(), modality.to_string()),
        ]
        .into_iter()
        .collect();
        self.metadata
            .lock()
            .await
            .insert((Level::Series, series.clone()), record);
        let mut refs = Vec::with_capacity(instances.len());
        let mut payloads = self.payloads.lock().await;
        for (instance_uid, bytes) in instances {
            payloads.insert(instance_uid.clone(), bytes);
            refs.push(InstanceRef {
                series_uid: series.clone(),
                instance_uid,
            });
        }
        self.instances.lock().await.insert(series.clone(), refs);
    }

    /// Marks the instances of `seg_series` as segmentations of `target`.
    pub async fn add_segmentation(&self, target: &Uid, seg_series: &Uid) {
        let refs = self
            .instances
            .lock()
            .await
            .get(seg_series)
            .cloned()
            .unwrap_or_default();
        self.segmentations
            .lock()
            .await
            .entry(target.clone())
            .or_default()
            .extend(refs);
    }

    pub fn query_count(&self) -> u64 {
        self.query_calls.load(Ordering::Relaxed)
    }

    pub fn retrieve_count(&self) -> u64 {
        self.retrieve_calls.load(Ordering::Relaxed)
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl RetrievalChannel for FakeChannel {
    fn channel_tag(&self) -> &'static str {
        "fake"
    }

    async fn query_metadata(
        &self,
        level: Level,
        key: &ResourceKey,
    ) -> Result<MetadataRecord, RemoteError> {
        self.query_calls.fetch_add(1, Ordering::Relaxed);
        self.pause().await;
        if let Some(err) = self.query_failure.lock().await.clone() {
            return Err(err);
        }
        self.metadata
            .lock()
            .await
            .get(&(level, key.leaf().clone()))
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(key.to_string()))
    }

    async fn query_instances(
        &self,
        series: &Uid,
        filter: InstanceFilter,
    ) -> Result<Vec<InstanceRef>, RemoteError> {
        self.query_calls.fetch_add(1, Ordering::Relaxed);
        self.pause().await;
        if let Some(err) = self.query_failure.lock().await.clone() {
            return Err(err);
        }
        let table = match filter {
            InstanceFilter::All => self.instances.lock().await,
            InstanceFilter::SegmentationsOf => self.segmentations.lock().await,
        };
        Ok(table.get(series).cloned().unwrap_or_default())
    }

    async fn retrieve_payload(
        &self,
        key: &ResourceKey,
        store: &dyn ContentStore,
    ) -> Result<RetrieveReport, RemoteError> {
        self.retrieve_calls.fetch_add(1, Ordering::Relaxed);
        self.pause().await;
        if let Some(err) = self.retrieve_failure.lock().await.clone() {
            return Err(err);
        }
        if let Some(report) = self.retrieve_report.lock().await.clone() {
            return Ok(report);
        }
        let (study, series) = study_and_series(key)?;
        let refs = self
            .instances
            .lock()
            .await
            .get(series)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("series {key}")))?;
        let mut transferred = 0_u64;
        for r in refs {
            let target = FsContentStore::path_for(study, &r.instance_uid);
            if store.exists(&target).await {
                continue;
            }
            let bytes = self
                .payloads
                .lock()
                .await
                .get(&r.instance_uid)
                .cloned()
                .unwrap_or_default();
            store
                .write_atomic(&target, bytes)
                .await
                .map_err(|e| RemoteError::Transport(e.to_string()))?;
            transferred += 1;
        }
        if transferred == 0 {
            return Ok(RetrieveReport::partial("nothing new to transfer", 0));
        }
        Ok(RetrieveReport::success(transferred))
    }
}
