// SPDX-License-Identifier: Apache-2.0

use crate::remote::{DicomWebChannel, LocalArchiveChannel, RetrievalChannel, RetryPolicy};
use crate::ConfigError;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const CONFIG_SCHEMA_VERSION: &str = "1";

/// Upper bound on concurrent remote associations. Stays well below
/// `tokio::sync::Semaphore::MAX_PERMITS`.
pub const MAX_ASSOCIATIONS: usize = 1024;

#[derive(Debug, Clone, Serialize)]
pub struct CacheConfig {
    pub storage_root: PathBuf,
    pub max_associations: usize,
    pub metadata_cache_entries: usize,
    pub metadata_ttl: Duration,
    pub retrieve_timeout: Option<Duration>,
    pub query_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("data/storage"),
            max_associations: 4,
            metadata_cache_entries: 1024,
            metadata_ttl: Duration::from_secs(300),
            retrieve_timeout: Some(Duration::from_secs(120)),
            query_timeout: Duration::from_secs(15),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_associations == 0 {
            return Err(ConfigError::Invalid {
                field: "max_associations",
                reason: "must be > 0".to_string(),
            });
        }
        if self.max_associations > MAX_ASSOCIATIONS {
            return Err(ConfigError::Invalid {
                field: "max_associations",
                reason: format!("must be <= {MAX_ASSOCIATIONS}"),
            });
        }
        if self.metadata_cache_entries == 0 {
            return Err(ConfigError::Invalid {
                field: "metadata_cache_entries",
                reason: "must be > 0".to_string(),
            });
        }
        if self.metadata_ttl.is_zero() {
            return Err(ConfigError::Invalid {
                field: "metadata_ttl",
                reason: "must be > 0".to_string(),
            });
        }
        if self.query_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "query_timeout",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteConfig {
    Local {
        root: PathBuf,
    },
    DicomWeb {
        base_url: String,
        wado_uri: String,
        #[serde(skip_serializing)]
        auth_bearer: Option<String>,
        retry_attempts: usize,
        retry_base_ms: u64,
    },
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self::Local {
            root: PathBuf::from("data/archive"),
        }
    }
}

impl RemoteConfig {
    /// Parses `local:<dir>` or `dicomweb:<url>`. The WADO-URI endpoint
    /// defaults to `<url>/wado`.
    pub fn parse(
        value: &str,
        wado_uri: Option<String>,
        auth_bearer: Option<String>,
        retry: &RetryPolicy,
    ) -> Result<Self, ConfigError> {
        let value = value.trim();
        if let Some(dir) = value.strip_prefix("local:") {
            if dir.is_empty() {
                return Err(ConfigError::Invalid {
                    field: "remote",
                    reason: "local archive path is empty".to_string(),
                });
            }
            return Ok(Self::Local {
                root: PathBuf::from(dir),
            });
        }
        if let Some(url) = value.strip_prefix("dicomweb:") {
            let base_url = url.trim_end_matches('/').to_string();
            if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                return Err(ConfigError::Invalid {
                    field: "remote",
                    reason: format!("dicomweb url must be http(s): {url}"),
                });
            }
            let wado_uri = wado_uri
                .filter(|w| !w.trim().is_empty())
                .unwrap_or_else(|| format!("{base_url}/wado"));
            return Ok(Self::DicomWeb {
                base_url,
                wado_uri,
                auth_bearer,
                retry_attempts: retry.max_attempts,
                retry_base_ms: retry.base_backoff_ms,
            });
        }
        Err(ConfigError::Invalid {
            field: "remote",
            reason: format!("expected local:<dir> or dicomweb:<url>, got {value}"),
        })
    }

    pub fn build_channel(
        &self,
        request_timeout: Duration,
    ) -> Result<Arc<dyn RetrievalChannel>, ConfigError> {
        let channel: Arc<dyn RetrievalChannel> = match self {
            Self::Local { root } => Arc::new(LocalArchiveChannel::new(root.clone())),
            Self::DicomWeb {
                base_url,
                wado_uri,
                auth_bearer,
                retry_attempts,
                retry_base_ms,
            } => Arc::new(DicomWebChannel::new(
                base_url.clone(),
                wado_uri.clone(),
                auth_bearer.clone(),
                RetryPolicy {
                    max_attempts: (*retry_attempts).max(1),
                    base_backoff_ms: *retry_base_ms,
                },
                request_timeout,
            )
            .map_err(|e| ConfigError::Invalid {
                field: "remote",
                reason: e.to_string(),
            })?),
        };
        Ok(channel)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiConfig {
    pub server_uri: String,
    pub shutdown_drain: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            server_uri: "http://localhost:3000".to_string(),
            shutdown_drain: Duration::from_secs(2),
        }
    }
}

pub fn validate_startup_config(api: &ApiConfig, cache: &CacheConfig) -> Result<(), ConfigError> {
    cache.validate()?;
    if api.server_uri.trim().is_empty() {
        return Err(ConfigError::Invalid {
            field: "server_uri",
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}
