// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
//! Identifiers and records shared by the pacsproxy crates.

mod dicom_json;
mod key;
mod record;
mod transfer;
mod uid;

pub const CRATE_NAME: &str = "pacsproxy-model";

pub use dicom_json::{instance_refs, record_from_dicom_json, DicomJsonError, InstanceRef};
pub use key::ResourceKey;
pub use record::{
    query_attributes, Level, MetadataRecord, TAG_IMAGES_IN_ACQUISITION, TAG_IMAGES_IN_SERIES,
    TAG_MODALITY, TAG_NUMBER_OF_SERIES_RELATED_INSTANCES, TAG_PATIENT_ID, TAG_PATIENT_NAME,
    TAG_QUERY_RETRIEVE_LEVEL, TAG_REFERENCED_SERIES_SEQUENCE, TAG_SERIES_DESCRIPTION,
    TAG_SERIES_INSTANCE_UID, TAG_SERIES_NUMBER, TAG_SOP_INSTANCE_UID, TAG_STUDY_INSTANCE_UID,
};
pub use transfer::{RetrieveReport, TransferStatus, STATUS_CODE_PARTIAL, STATUS_CODE_SUCCESS};
pub use uid::{parse_uid, Uid, ValidationError, UID_MAX_LEN};
