// SPDX-License-Identifier: Apache-2.0

use crate::StoreError;
use async_trait::async_trait;
use pacsproxy_model::Uid;
use std::fmt::{Display, Formatter};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Relative location of one payload, `join(parent, leaf)` built from UIDs.
///
/// UIDs cannot contain a path separator or `..`, so every `PayloadPath`
/// stays below the store root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PayloadPath {
    parent: Uid,
    leaf: Uid,
}

impl PayloadPath {
    #[must_use]
    pub fn new(parent: Uid, leaf: Uid) -> Self {
        Self { parent, leaf }
    }

    #[must_use]
    pub fn parent(&self) -> &Uid {
        &self.parent
    }

    #[must_use]
    pub fn leaf(&self) -> &Uid {
        &self.leaf
    }

    #[must_use]
    pub fn under(&self, root: &Path) -> PathBuf {
        root.join(self.parent.as_str()).join(self.leaf.as_str())
    }
}

impl Display for PayloadPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.parent, self.leaf)
    }
}

/// Payloads fetched earlier. Presence of a file is its only validity signal.
#[async_trait]
pub trait ContentStore: Send + Sync + 'static {
    async fn exists(&self, path: &PayloadPath) -> bool;

    /// Full payload bytes, or `None` when the file is absent.
    async fn open(&self, path: &PayloadPath) -> Result<Option<Vec<u8>>, StoreError>;

    /// Publishes `bytes` at `path`; readers see either no file or all of it.
    async fn write_atomic(&self, path: &PayloadPath, bytes: Vec<u8>) -> Result<(), StoreError>;
}

pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn path_for(study: &Uid, instance: &Uid) -> PayloadPath {
        PayloadPath::new(study.clone(), instance.clone())
    }
}

fn io_error(path: &Path, e: &std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

fn write_atomic_file(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().ok_or_else(|| StoreError::Io {
        path: path.display().to_string(),
        message: "atomic write missing parent".to_string(),
    })?;
    std::fs::create_dir_all(parent).map_err(|e| io_error(parent, &e))?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".partial-")
        .tempfile_in(parent)
        .map_err(|e| io_error(parent, &e))?;
    tmp.write_all(bytes).map_err(|e| io_error(tmp.path(), &e))?;
    tmp.as_file().sync_all().map_err(|e| io_error(path, &e))?;
    tmp.persist(path).map_err(|e| io_error(path, &e.error))?;
    if let Ok(dir) = std::fs::File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn exists(&self, path: &PayloadPath) -> bool {
        tokio::fs::metadata(path.under(&self.root))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    async fn open(&self, path: &PayloadPath) -> Result<Option<Vec<u8>>, StoreError> {
        let full = path.under(&self.root);
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&full, &e)),
        }
    }

    async fn write_atomic(&self, path: &PayloadPath, bytes: Vec<u8>) -> Result<(), StoreError> {
        let full = path.under(&self.root);
        debug!(path = %path, bytes = bytes.len(), "store write");
        let target = full.clone();
        tokio::task::spawn_blocking(move || write_atomic_file(&target, &bytes))
            .await
            .map_err(|e| StoreError::Io {
                path: full.display().to_string(),
                message: format!("write task failed: {e}"),
            })?
    }
}
