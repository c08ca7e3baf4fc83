// SPDX-License-Identifier: Apache-2.0

//! Translation from DICOM JSON (PS3.18 F.2) datasets to [`MetadataRecord`]s.

use crate::record::{Level, MetadataRecord, TAG_SERIES_INSTANCE_UID, TAG_SOP_INSTANCE_UID};
use crate::uid::Uid;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DicomJsonError {
    #[error("dicom json must be an array of datasets")]
    NotAnArray,
    #[error("dicom json dataset {index} is not an object")]
    NotAnObject { index: usize },
    #[error("dicom json dataset {index} is missing {tag}")]
    MissingAttribute { index: usize, tag: &'static str },
    #[error("dicom json dataset {index} has invalid uid in {tag}: {reason}")]
    InvalidUid {
        index: usize,
        tag: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceRef {
    pub series_uid: Uid,
    pub instance_uid: Uid,
}

fn datasets(value: &Value) -> Result<&[Value], DicomJsonError> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or(DicomJsonError::NotAnArray)
}

/// First value of an attribute rendered as a scalar string.
///
/// Person names collapse to their alphabetic group; attributes present
/// without a value become the empty string.
fn first_value(element: &Value) -> String {
    match element.get("Value").and_then(|v| v.get(0)) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Object(pn)) => pn
            .get("Alphabetic")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

/// Folds every dataset of a query response into one record keyed by
/// attribute name. Later datasets override earlier ones.
pub fn record_from_dicom_json(
    level: Level,
    value: &Value,
) -> Result<MetadataRecord, DicomJsonError> {
    let mut out = std::collections::BTreeMap::new();
    for (index, dataset) in datasets(value)?.iter().enumerate() {
        let object = dataset
            .as_object()
            .ok_or(DicomJsonError::NotAnObject { index })?;
        for (tag, element) in object {
            out.insert(level.attribute_name(tag).to_string(), first_value(element));
        }
    }
    Ok(MetadataRecord::new(out))
}

fn required_uid(dataset: &Value, index: usize, tag: &'static str) -> Result<Uid, DicomJsonError> {
    let raw = dataset
        .get(tag)
        .and_then(|e| e.get("Value"))
        .and_then(|v| v.get(0))
        .and_then(Value::as_str)
        .ok_or(DicomJsonError::MissingAttribute { index, tag })?;
    Uid::parse(raw).map_err(|e| DicomJsonError::InvalidUid {
        index,
        tag,
        reason: e.to_string(),
    })
}

/// Series/instance pairs from an instance-level query response.
pub fn instance_refs(value: &Value) -> Result<Vec<InstanceRef>, DicomJsonError> {
    datasets(value)?
        .iter()
        .enumerate()
        .map(|(index, dataset)| {
            if !dataset.is_object() {
                return Err(DicomJsonError::NotAnObject { index });
            }
            Ok(InstanceRef {
                series_uid: required_uid(dataset, index, TAG_SERIES_INSTANCE_UID)?,
                instance_uid: required_uid(dataset, index, TAG_SOP_INSTANCE_UID)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn series_response_maps_tags_to_names() {
        let body = json!([{
            "0020000D": {"vr": "UI", "Value": ["1.2"]},
            "0020000E": {"vr": "UI", "Value": ["1.2.3"]},
            "00080060": {"vr": "CS", "Value": ["CT"]},
            "00200011": {"vr": "IS", "Value": [4]},
            "0008103E": {"vr": "LO"},
            "00080052": {"vr": "CS", "Value": ["SERIES"]}
        }]);
        let record = record_from_dicom_json(Level::Series, &body).expect("parse record");
        assert_eq!(record.study_instance_uid(), Some("1.2"));
        assert_eq!(record.series_instance_uid(), Some("1.2.3"));
        assert_eq!(record.get("SeriesNumber"), Some("4"));
        assert_eq!(record.get("SeriesDescription"), Some(""));
        assert_eq!(record.get("00080052"), Some("SERIES"));
        assert_eq!(record.get("ImagesInSeries"), None);
    }

    #[test]
    fn person_name_uses_alphabetic_group() {
        let body = json!([{"00100010": {"vr": "PN", "Value": [{"Alphabetic": "Doe^Jane"}]}}]);
        let record = record_from_dicom_json(Level::Study, &body).expect("parse record");
        assert_eq!(record.get("PatientName"), Some("Doe^Jane"));
    }

    #[test]
    fn empty_response_yields_empty_record() {
        let record = record_from_dicom_json(Level::Series, &json!([])).expect("parse record");
        assert!(record.is_empty());
        assert_eq!(
            record_from_dicom_json(Level::Series, &json!({})),
            Err(DicomJsonError::NotAnArray)
        );
    }

    #[test]
    fn instance_refs_require_both_uids() {
        let body = json!([
            {"0020000E": {"Value": ["1.2"]}, "00080018": {"Value": ["1.2.1"]}},
            {"0020000E": {"Value": ["1.2"]}, "00080018": {"Value": ["1.2.2"]}}
        ]);
        let refs = instance_refs(&body).expect("parse refs");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1].instance_uid.as_str(), "1.2.2");

        let missing = json!([{"0020000E": {"Value": ["1.2"]}}]);
        assert_eq!(
            instance_refs(&missing),
            Err(DicomJsonError::MissingAttribute {
                index: 0,
                tag: TAG_SOP_INSTANCE_UID
            })
        );
    }

    #[test]
    fn instance_refs_reject_path_like_uids() {
        let body = json!([{"0020000E": {"Value": ["1.2"]}, "00080018": {"Value": ["../etc"]}}]);
        assert!(matches!(
            instance_refs(&body),
            Err(DicomJsonError::InvalidUid { index: 0, .. })
        ));
    }
}
