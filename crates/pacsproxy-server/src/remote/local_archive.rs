// SPDX-License-Identifier: Apache-2.0

use super::{study_and_series, InstanceFilter, RetrievalChannel};
use crate::store::{ContentStore, FsContentStore};
use crate::RemoteError;
use async_trait::async_trait;
use pacsproxy_model::{
    record_from_dicom_json, InstanceRef, Level, MetadataRecord, ResourceKey, RetrieveReport, Uid,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

const STUDY_FILE: &str = "study.json";
const SERIES_FILE: &str = "series.json";
const REFERENCES_FILE: &str = "references.json";
const INSTANCE_EXT: &str = "dcm";

struct SeriesDir {
    study: Uid,
    series: Uid,
    path: PathBuf,
}

/// Archive kept on a local directory:
///
/// ```text
/// <root>/<study>/study.json            optional DICOM JSON
/// <root>/<study>/<series>/series.json  optional DICOM JSON
/// <root>/<study>/<series>/<sop>.dcm    one file per instance
/// <root>/<study>/<series>/references.json  series UIDs a SEG refers to
/// ```
pub struct LocalArchiveChannel {
    root: PathBuf,
}

fn io_failure(path: &Path, e: &std::io::Error) -> RemoteError {
    RemoteError::Transport(format!("archive read failed at {}: {e}", path.display()))
}

fn uid_name(path: &Path) -> Option<Uid> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| Uid::parse(n).ok())
}

async fn child_dirs(dir: &Path) -> Result<Vec<(Uid, PathBuf)>, RemoteError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| io_failure(dir, &e))?;
    let mut out = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| io_failure(dir, &e))? {
        let path = entry.path();
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        if let (true, Some(uid)) = (is_dir, uid_name(&path)) {
            out.push((uid, path));
        }
    }
    out.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
    Ok(out)
}

async fn read_json(path: &Path) -> Result<Option<Value>, RemoteError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            RemoteError::Malformed(format!("{} is not valid json: {e}", path.display()))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_failure(path, &e)),
    }
}

async fn instance_files(dir: &Path) -> Result<Vec<(Uid, PathBuf)>, RemoteError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| io_failure(dir, &e))?;
    let mut out = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| io_failure(dir, &e))? {
        let path = entry.path();
        if path.extension().and_then(|x| x.to_str()) != Some(INSTANCE_EXT) {
            continue;
        }
        if let Some(uid) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| Uid::parse(s).ok())
        {
            out.push((uid, path));
        }
    }
    out.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
    Ok(out)
}

/// Parses an optional DICOM JSON file, filling identifying attributes the
/// directory layout already names.
async fn record_file(
    path: &Path,
    level: Level,
    defaults: &[(&str, &Uid)],
) -> Result<MetadataRecord, RemoteError> {
    let mut attributes = match read_json(path).await? {
        Some(json) => record_from_dicom_json(level, &json)?.into_inner(),
        None => Default::default(),
    };
    for (name, uid) in defaults {
        attributes
            .entry((*name).to_string())
            .or_insert_with(|| uid.to_string());
    }
    Ok(MetadataRecord::new(attributes))
}

impl LocalArchiveChannel {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn series_dirs(&self) -> Result<Vec<SeriesDir>, RemoteError> {
        let mut out = Vec::new();
        for (study, study_path) in child_dirs(&self.root).await? {
            for (series, path) in child_dirs(&study_path).await? {
                out.push(SeriesDir {
                    study: study.clone(),
                    series,
                    path,
                });
            }
        }
        Ok(out)
    }

    async fn find_series(&self, series: &Uid) -> Result<Option<SeriesDir>, RemoteError> {
        Ok(self
            .series_dirs()
            .await?
            .into_iter()
            .find(|dir| &dir.series == series))
    }

    async fn refs_of(dir: &SeriesDir) -> Result<Vec<InstanceRef>, RemoteError> {
        Ok(instance_files(&dir.path)
            .await?
            .into_iter()
            .map(|(instance_uid, _)| InstanceRef {
                series_uid: dir.series.clone(),
                instance_uid,
            })
            .collect())
    }

    async fn references(dir: &SeriesDir) -> Result<Vec<String>, RemoteError> {
        let path = dir.path.join(REFERENCES_FILE);
        match read_json(&path).await? {
            None => Ok(Vec::new()),
            Some(json) => serde_json::from_value(json).map_err(|e| {
                RemoteError::Malformed(format!("{} must list series uids: {e}", path.display()))
            }),
        }
    }

    async fn study_record(&self, study: &Uid) -> Result<MetadataRecord, RemoteError> {
        let dir = self.root.join(study.as_str());
        if !tokio::fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(RemoteError::NotFound(format!("study {study}")));
        }
        record_file(
            &dir.join(STUDY_FILE),
            Level::Study,
            &[("StudyInstanceUID", study)],
        )
        .await
    }

    async fn series_record(&self, series: &Uid) -> Result<MetadataRecord, RemoteError> {
        let dir = self
            .find_series(series)
            .await?
            .ok_or_else(|| RemoteError::NotFound(format!("series {series}")))?;
        record_file(
            &dir.path.join(SERIES_FILE),
            Level::Series,
            &[("StudyInstanceUID", &dir.study), ("SeriesInstanceUID", &dir.series)],
        )
        .await
    }

    async fn instance_record(&self, instance: &Uid) -> Result<MetadataRecord, RemoteError> {
        for dir in self.series_dirs().await? {
            let found = instance_files(&dir.path)
                .await?
                .into_iter()
                .any(|(uid, _)| &uid == instance);
            if found {
                return Ok([
                    ("SeriesInstanceUID".to_string(), dir.series.to_string()),
                    ("SOPInstanceUID".to_string(), instance.to_string()),
                ]
                .into_iter()
                .collect());
            }
        }
        Err(RemoteError::NotFound(format!("instance {instance}")))
    }
}

#[async_trait]
impl RetrievalChannel for LocalArchiveChannel {
    fn channel_tag(&self) -> &'static str {
        "local"
    }

    #[instrument(name = "archive_query_metadata", skip_all, fields(key = %key))]
    async fn query_metadata(
        &self,
        level: Level,
        key: &ResourceKey,
    ) -> Result<MetadataRecord, RemoteError> {
        let record = match level {
            Level::Study => self.study_record(key.leaf()).await?,
            Level::Series => self.series_record(key.leaf()).await?,
            Level::Instance => self.instance_record(key.leaf()).await?,
        };
        if record.is_empty() {
            return Err(RemoteError::NotFound(key.to_string()));
        }
        Ok(record)
    }

    #[instrument(name = "archive_query_instances", skip_all, fields(series = %series))]
    async fn query_instances(
        &self,
        series: &Uid,
        filter: InstanceFilter,
    ) -> Result<Vec<InstanceRef>, RemoteError> {
        match filter {
            InstanceFilter::All => match self.find_series(series).await? {
                Some(dir) => Self::refs_of(&dir).await,
                None => Ok(Vec::new()),
            },
            InstanceFilter::SegmentationsOf => {
                let mut out = Vec::new();
                for dir in self.series_dirs().await? {
                    let record = record_file(&dir.path.join(SERIES_FILE), Level::Series, &[])
                        .await?;
                    if record.modality() != Some("SEG") {
                        continue;
                    }
                    if Self::references(&dir)
                        .await?
                        .iter()
                        .any(|r| r.trim() == series.as_str())
                    {
                        out.extend(Self::refs_of(&dir).await?);
                    }
                }
                Ok(out)
            }
        }
    }

    #[instrument(name = "archive_retrieve_payload", skip_all, fields(key = %key))]
    async fn retrieve_payload(
        &self,
        key: &ResourceKey,
        store: &dyn ContentStore,
    ) -> Result<RetrieveReport, RemoteError> {
        let (study, series) = study_and_series(key)?;
        let dir = self.root.join(study.as_str()).join(series.as_str());
        if !tokio::fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(RemoteError::NotFound(format!("series {key}")));
        }
        let mut transferred = 0_u64;
        for (instance, source) in instance_files(&dir).await? {
            let target = FsContentStore::path_for(study, &instance);
            if store.exists(&target).await {
                continue;
            }
            let bytes = tokio::fs::read(&source)
                .await
                .map_err(|e| io_failure(&source, &e))?;
            store
                .write_atomic(&target, bytes)
                .await
                .map_err(|e| RemoteError::Transport(e.to_string()))?;
            transferred += 1;
        }
        debug!(key = %key, transferred, "archive transfer done");
        if transferred == 0 {
            return Ok(RetrieveReport::partial("nothing new to transfer", 0));
        }
        Ok(RetrieveReport::success(transferred))
    }
}
