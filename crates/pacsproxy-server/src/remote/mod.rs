// SPDX-License-Identifier: Apache-2.0

use crate::store::ContentStore;
use crate::RemoteError;
use async_trait::async_trait;
use pacsproxy_model::{InstanceRef, Level, MetadataRecord, ResourceKey, RetrieveReport, Uid};

mod dicomweb;
mod fake;
mod local_archive;

pub use dicomweb::{DicomWebChannel, RetryPolicy};
pub use fake::FakeChannel;
pub use local_archive::LocalArchiveChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceFilter {
    /// Every instance of the series.
    All,
    /// Segmentation instances whose referenced series is the given one.
    SegmentationsOf,
}

/// Queries and bulk transfers against one remote archive.
///
/// Callers hold a limiter slot for the duration of every call.
#[async_trait]
pub trait RetrievalChannel: Send + Sync + 'static {
    fn channel_tag(&self) -> &'static str {
        "unknown"
    }

    /// Attributes of the object named by `key.leaf()` at `level`.
    /// An empty response is [`RemoteError::NotFound`].
    async fn query_metadata(
        &self,
        level: Level,
        key: &ResourceKey,
    ) -> Result<MetadataRecord, RemoteError>;

    /// Instances selected by `filter` for `series`; empty when none match.
    async fn query_instances(
        &self,
        series: &Uid,
        filter: InstanceFilter,
    ) -> Result<Vec<InstanceRef>, RemoteError>;

    /// Transfers every instance of the `[study, series]` key into `store`
    /// at `join(study, instance)` before returning.
    async fn retrieve_payload(
        &self,
        key: &ResourceKey,
        store: &dyn ContentStore,
    ) -> Result<RetrieveReport, RemoteError>;
}

/// Splits a payload key into `(study, series)`.
pub(crate) fn study_and_series(key: &ResourceKey) -> Result<(&Uid, &Uid), RemoteError> {
    match key.segments() {
        [study, series] => Ok((study, series)),
        _ => Err(RemoteError::Malformed(format!(
            "payload key must be study/series, got {key}"
        ))),
    }
}
