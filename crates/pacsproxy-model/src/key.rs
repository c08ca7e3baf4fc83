// SPDX-License-Identifier: Apache-2.0

use crate::uid::{Uid, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Hierarchical identifier used for metadata cache and in-flight lookups.
///
/// Equality and hashing are segment-wise. The canonical string joins the
/// segments with `/`, which is unambiguous because a [`Uid`] never contains
/// one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "Vec<Uid>", try_from = "Vec<Uid>")]
pub struct ResourceKey {
    segments: Vec<Uid>,
}

impl ResourceKey {
    pub fn new(segments: Vec<Uid>) -> Result<Self, ValidationError> {
        if segments.is_empty() {
            return Err(ValidationError(
                "resource key needs at least one segment".to_string(),
            ));
        }
        Ok(Self { segments })
    }

    #[must_use]
    pub fn single(uid: Uid) -> Self {
        Self {
            segments: vec![uid],
        }
    }

    #[must_use]
    pub fn series(study: Uid, series: Uid) -> Self {
        Self {
            segments: vec![study, series],
        }
    }

    pub fn from_canonical_string(input: &str) -> Result<Self, ValidationError> {
        let segments = input
            .trim()
            .split('/')
            .map(Uid::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(segments)
    }

    #[must_use]
    pub fn segments(&self) -> &[Uid] {
        &self.segments
    }

    /// The most specific identifier of the key.
    #[must_use]
    pub fn leaf(&self) -> &Uid {
        // Non-empty by construction.
        &self.segments[self.segments.len() - 1]
    }

    /// The parent identifier, absent for single-segment keys.
    #[must_use]
    pub fn parent(&self) -> Option<&Uid> {
        self.segments
            .len()
            .checked_sub(2)
            .map(|idx| &self.segments[idx])
    }

    #[must_use]
    pub fn canonical_string(&self) -> String {
        self.segments
            .iter()
            .map(Uid::as_str)
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl TryFrom<Vec<Uid>> for ResourceKey {
    type Error = ValidationError;

    fn try_from(segments: Vec<Uid>) -> Result<Self, Self::Error> {
        Self::new(segments)
    }
}

impl From<ResourceKey> for Vec<Uid> {
    fn from(key: ResourceKey) -> Self {
        key.segments
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical_string())
    }
}
