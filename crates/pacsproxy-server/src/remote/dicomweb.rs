// SPDX-License-Identifier: Apache-2.0

use super::{study_and_series, InstanceFilter, RetrievalChannel};
use crate::store::{ContentStore, FsContentStore};
use crate::RemoteError;
use async_trait::async_trait;
use pacsproxy_model::{
    instance_refs, query_attributes, record_from_dicom_json, InstanceRef, Level, MetadataRecord,
    ResourceKey, RetrieveReport, Uid, TAG_MODALITY, TAG_QUERY_RETRIEVE_LEVEL,
    TAG_REFERENCED_SERIES_SEQUENCE, TAG_SERIES_INSTANCE_UID, TAG_SOP_INSTANCE_UID,
    TAG_STUDY_INSTANCE_UID,
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::{instrument, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 120,
        }
    }
}

/// QIDO-RS for queries, WADO-URI for instance transfers.
pub struct DicomWebChannel {
    qido_base: String,
    wado_uri: String,
    auth_bearer: Option<String>,
    retry: RetryPolicy,
    client: reqwest::Client,
}

fn resource_path(level: Level) -> &'static str {
    match level {
        Level::Study => "studies",
        Level::Series => "series",
        Level::Instance => "instances",
    }
}

/// Search parameters for a QIDO query: the identifying attribute as match
/// key and the rest of the level's dictionary as `includefield`.
fn qido_params(level: Level, uid: &Uid) -> Vec<(String, String)> {
    let search = query_attributes(level, uid.as_str());
    let include = search
        .keys()
        .filter(|tag| {
            tag.as_str() != TAG_QUERY_RETRIEVE_LEVEL && tag.as_str() != level.identifying_tag()
        })
        .cloned()
        .collect::<Vec<_>>()
        .join(",");
    vec![
        (level.identifying_tag().to_string(), uid.to_string()),
        ("includefield".to_string(), include),
    ]
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

impl DicomWebChannel {
    pub fn new(
        qido_base: String,
        wado_uri: String,
        auth_bearer: Option<String>,
        retry: RetryPolicy,
        request_timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| RemoteError::Transport(format!("http client build failed: {e}")))?;
        Ok(Self {
            qido_base: qido_base.trim_end_matches('/').to_string(),
            wado_uri: wado_uri.trim_end_matches('/').to_string(),
            auth_bearer: auth_bearer.filter(|t| !t.is_empty()),
            retry,
            client,
        })
    }

    fn validate_url(url: &str) -> Result<(), RemoteError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| RemoteError::Transport(format!("invalid remote url {url}: {e}")))?;
        if parsed.host_str().is_none() {
            return Err(RemoteError::Transport(format!("remote url missing host: {url}")));
        }
        Ok(())
    }

    fn auth_headers(&self, accept: &'static str) -> Result<HeaderMap, RemoteError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(accept));
        if let Some(token) = &self.auth_bearer {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| RemoteError::Transport(format!("invalid auth header: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// GET with linear backoff. `Ok(None)` for 204 and 404 responses.
    #[instrument(name = "dicomweb_get_with_retry", skip(self, query))]
    async fn get_with_retry(
        &self,
        url: &str,
        query: &[(String, String)],
        accept: &'static str,
    ) -> Result<Option<Vec<u8>>, RemoteError> {
        Self::validate_url(url)?;
        let headers = self.auth_headers(accept)?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let req = self.client.get(url).query(query).headers(headers.clone());
            match req.send().await {
                Ok(resp) if resp.status() == StatusCode::NO_CONTENT => return Ok(None),
                Ok(resp) if resp.status() == StatusCode::NOT_FOUND => return Ok(None),
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .bytes()
                        .await
                        .map(|b| Some(b.to_vec()))
                        .map_err(|e| RemoteError::Transport(format!("read body failed: {e}")));
                }
                Ok(resp) => {
                    let status = resp.status();
                    if !is_retryable(status) || attempt >= self.retry.max_attempts {
                        return Err(RemoteError::Transport(format!(
                            "request failed status={status} url={url}"
                        )));
                    }
                }
                Err(e) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(RemoteError::Transport(format!(
                            "request failed url={url}: {e}"
                        )));
                    }
                }
            }
            warn!(url, attempt, "remote request failed, retrying");
            tokio::time::sleep(Duration::from_millis(
                self.retry.base_backoff_ms.saturating_mul(attempt as u64),
            ))
            .await;
        }
    }

    async fn qido(
        &self,
        resource: &str,
        query: &[(String, String)],
    ) -> Result<Value, RemoteError> {
        let url = format!("{}/{resource}", self.qido_base);
        match self
            .get_with_retry(&url, query, "application/dicom+json")
            .await?
        {
            None => Ok(Value::Array(Vec::new())),
            Some(bytes) if bytes.is_empty() => Ok(Value::Array(Vec::new())),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| RemoteError::Malformed(format!("qido response is not json: {e}"))),
        }
    }

    async fn list_instances(
        &self,
        query: Vec<(String, String)>,
    ) -> Result<Vec<InstanceRef>, RemoteError> {
        let mut query = query;
        query.push((
            "includefield".to_string(),
            format!("{TAG_SERIES_INSTANCE_UID},{TAG_SOP_INSTANCE_UID}"),
        ));
        let json = self.qido("instances", &query).await?;
        Ok(instance_refs(&json)?)
    }

    async fn fetch_instance(
        &self,
        study: &Uid,
        series: &Uid,
        instance: &Uid,
    ) -> Result<Vec<u8>, RemoteError> {
        let query = [
            ("requestType", "WADO"),
            ("studyUID", study.as_str()),
            ("seriesUID", series.as_str()),
            ("objectUID", instance.as_str()),
            ("contentType", "application/dicom"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<Vec<_>>();
        self.get_with_retry(&self.wado_uri, &query, "application/dicom")
            .await?
            .ok_or_else(|| RemoteError::NotFound(format!("instance {instance}")))
    }
}

#[async_trait]
impl RetrievalChannel for DicomWebChannel {
    fn channel_tag(&self) -> &'static str {
        "dicomweb"
    }

    async fn query_metadata(
        &self,
        level: Level,
        key: &ResourceKey,
    ) -> Result<MetadataRecord, RemoteError> {
        let json = self
            .qido(resource_path(level), &qido_params(level, key.leaf()))
            .await?;
        let record = record_from_dicom_json(level, &json)?;
        if record.is_empty() {
            return Err(RemoteError::NotFound(key.to_string()));
        }
        Ok(record)
    }

    async fn query_instances(
        &self,
        series: &Uid,
        filter: InstanceFilter,
    ) -> Result<Vec<InstanceRef>, RemoteError> {
        let query = match filter {
            InstanceFilter::All => vec![(TAG_SERIES_INSTANCE_UID.to_string(), series.to_string())],
            InstanceFilter::SegmentationsOf => vec![
                (TAG_MODALITY.to_string(), "SEG".to_string()),
                (
                    format!("{TAG_REFERENCED_SERIES_SEQUENCE}.{TAG_SERIES_INSTANCE_UID}"),
                    series.to_string(),
                ),
            ],
        };
        self.list_instances(query).await
    }

    #[instrument(name = "dicomweb_retrieve_payload", skip_all, fields(key = %key))]
    async fn retrieve_payload(
        &self,
        key: &ResourceKey,
        store: &dyn ContentStore,
    ) -> Result<RetrieveReport, RemoteError> {
        let (study, series) = study_and_series(key)?;
        let refs = self
            .list_instances(vec![
                (TAG_STUDY_INSTANCE_UID.to_string(), study.to_string()),
                (TAG_SERIES_INSTANCE_UID.to_string(), series.to_string()),
            ])
            .await?;
        if refs.is_empty() {
            return Err(RemoteError::NotFound(format!("series {key}")));
        }
        let mut transferred = 0_u64;
        let mut failures = Vec::new();
        for r in &refs {
            let target = FsContentStore::path_for(study, &r.instance_uid);
            if store.exists(&target).await {
                continue;
            }
            match self.fetch_instance(study, series, &r.instance_uid).await {
                Ok(bytes) => {
                    store
                        .write_atomic(&target, bytes)
                        .await
                        .map_err(|e| RemoteError::Transport(e.to_string()))?;
                    transferred += 1;
                }
                Err(e) => {
                    warn!(instance = %r.instance_uid, error = %e, "instance transfer failed");
                    failures.push(e);
                }
            }
        }
        // Instances that did transfer stay in the store for the next attempt.
        match (transferred, failures.pop()) {
            (0, Some(last)) => Err(last),
            (_, Some(last)) => Err(RemoteError::Transport(format!(
                "{} of {} instances failed, last: {last}",
                failures.len() + 1,
                refs.len()
            ))),
            (0, None) => Ok(RetrieveReport::partial("nothing new to transfer", 0)),
            (n, None) => Ok(RetrieveReport::success(n)),
        }
    }
}
