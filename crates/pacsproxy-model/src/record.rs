// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

pub const TAG_PATIENT_NAME: &str = "00100010";
pub const TAG_PATIENT_ID: &str = "00100020";
pub const TAG_STUDY_INSTANCE_UID: &str = "0020000D";
pub const TAG_SERIES_INSTANCE_UID: &str = "0020000E";
pub const TAG_SOP_INSTANCE_UID: &str = "00080018";
pub const TAG_MODALITY: &str = "00080060";
pub const TAG_SERIES_DESCRIPTION: &str = "0008103E";
pub const TAG_SERIES_NUMBER: &str = "00200011";
pub const TAG_NUMBER_OF_SERIES_RELATED_INSTANCES: &str = "00201209";
pub const TAG_IMAGES_IN_ACQUISITION: &str = "00201002";
pub const TAG_IMAGES_IN_SERIES: &str = "00201003";
pub const TAG_QUERY_RETRIEVE_LEVEL: &str = "00080052";
pub const TAG_REFERENCED_SERIES_SEQUENCE: &str = "00081115";

const STUDY_ATTRIBUTES: &[(&str, &str)] = &[
    (TAG_PATIENT_NAME, "PatientName"),
    (TAG_PATIENT_ID, "PatientID"),
    (TAG_STUDY_INSTANCE_UID, "StudyInstanceUID"),
];

const SERIES_ATTRIBUTES: &[(&str, &str)] = &[
    (TAG_STUDY_INSTANCE_UID, "StudyInstanceUID"),
    (TAG_SERIES_INSTANCE_UID, "SeriesInstanceUID"),
    (TAG_MODALITY, "Modality"),
    (TAG_SERIES_DESCRIPTION, "SeriesDescription"),
    (TAG_SERIES_NUMBER, "SeriesNumber"),
    (TAG_NUMBER_OF_SERIES_RELATED_INSTANCES, "NumberOfSeriesRelatedInstances"),
    (TAG_IMAGES_IN_ACQUISITION, "ImagesInAcquisition"),
    (TAG_IMAGES_IN_SERIES, "ImagesInSeries"),
];

const INSTANCE_ATTRIBUTES: &[(&str, &str)] = &[
    (TAG_SERIES_INSTANCE_UID, "SeriesInstanceUID"),
    (TAG_SOP_INSTANCE_UID, "SOPInstanceUID"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Study,
    Series,
    #[serde(rename = "IMAGE")]
    Instance,
}

impl Level {
    /// `(tag, attribute name)` pairs that records of this level carry.
    #[must_use]
    pub fn attributes(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Study => STUDY_ATTRIBUTES,
            Self::Series => SERIES_ATTRIBUTES,
            Self::Instance => INSTANCE_ATTRIBUTES,
        }
    }

    /// Human readable name for a tag, falling back to the tag itself.
    #[must_use]
    pub fn attribute_name(self, tag: &str) -> &str {
        self.attributes()
            .iter()
            .find(|(t, _)| t.eq_ignore_ascii_case(tag))
            .map_or(tag, |(_, name)| *name)
    }

    /// Value of the QueryRetrieveLevel attribute.
    #[must_use]
    pub fn as_query_level(self) -> &'static str {
        match self {
            Self::Study => "STUDY",
            Self::Series => "SERIES",
            Self::Instance => "IMAGE",
        }
    }

    #[must_use]
    pub fn identifying_tag(self) -> &'static str {
        match self {
            Self::Study => TAG_STUDY_INSTANCE_UID,
            Self::Series => TAG_SERIES_INSTANCE_UID,
            Self::Instance => TAG_SOP_INSTANCE_UID,
        }
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_query_level())
    }
}

/// Query attribute set for `level`: every dictionary attribute as an empty
/// return key, the identifying attribute bound to `uid`, and the level.
#[must_use]
pub fn query_attributes(level: Level, uid: &str) -> BTreeMap<String, String> {
    let mut search: BTreeMap<String, String> = level
        .attributes()
        .iter()
        .map(|(tag, _)| ((*tag).to_string(), String::new()))
        .collect();
    search.insert(level.identifying_tag().to_string(), uid.to_string());
    search.insert(
        TAG_QUERY_RETRIEVE_LEVEL.to_string(),
        level.as_query_level().to_string(),
    );
    search
}

/// Named attributes describing one study, series or instance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataRecord {
    attributes: BTreeMap<String, String>,
}

impl MetadataRecord {
    #[must_use]
    pub fn new(attributes: BTreeMap<String, String>) -> Self {
        Self { attributes }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn study_instance_uid(&self) -> Option<&str> {
        self.get("StudyInstanceUID").filter(|v| !v.is_empty())
    }

    #[must_use]
    pub fn series_instance_uid(&self) -> Option<&str> {
        self.get("SeriesInstanceUID").filter(|v| !v.is_empty())
    }

    #[must_use]
    pub fn modality(&self) -> Option<&str> {
        self.get("Modality").filter(|v| !v.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.attributes
    }
}

impl FromIterator<(String, String)> for MetadataRecord {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            attributes: iter.into_iter().collect(),
        }
    }
}
