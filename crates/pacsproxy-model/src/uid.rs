// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

pub const UID_MAX_LEN: usize = 64;

pub fn parse_uid(input: &str) -> Result<Uid, ValidationError> {
    Uid::parse(input)
}

/// A DICOM unique identifier (study, series or SOP instance).
///
/// Only digits and dots are accepted, so a `Uid` can always be used as a
/// single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct Uid(String);

impl Uid {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(ValidationError("uid must not be empty".to_string()));
        }
        if s.len() > UID_MAX_LEN {
            return Err(ValidationError(format!(
                "uid exceeds max length {UID_MAX_LEN}"
            )));
        }
        if !s.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return Err(ValidationError(
                "uid must match [0-9.]+ (e.g. 1.2.840.10008)".to_string(),
            ));
        }
        if s.split('.').any(str::is_empty) {
            return Err(ValidationError(
                "uid must not start/end with '.' or contain '..'".to_string(),
            ));
        }
        Ok(Self(s.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Display for Uid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Uid {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Uid> for String {
    fn from(value: Uid) -> Self {
        value.0
    }
}

impl AsRef<str> for Uid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_full_length_dicom_uid() {
        let raw = "1.3.6.1.4.1.14519.5.2.1.2744.7002.117357550898198415937979788256";
        assert_eq!(raw.len(), UID_MAX_LEN);
        let uid = Uid::parse(raw).expect("valid uid");
        assert_eq!(uid.as_str(), raw);
    }

    #[test]
    fn trims_surrounding_whitespace() {
        let uid = Uid::parse("  1.2.3 ").expect("valid uid");
        assert_eq!(uid.as_str(), "1.2.3");
    }

    #[test]
    fn rejects_path_like_and_malformed_values() {
        for bad in ["", "1.2/3", "../1.2", "1..2", ".1.2", "1.2.", "1.2.a", "1.2 3"] {
            assert!(Uid::parse(bad).is_err(), "{bad:?} should be rejected");
        }
        let too_long = format!("1.{}", "2".repeat(UID_MAX_LEN));
        assert!(Uid::parse(&too_long).is_err());
    }

    #[test]
    fn serde_rejects_invalid_uid() {
        let ok: Uid = serde_json::from_str("\"1.2.3\"").expect("decode uid");
        assert_eq!(ok.as_str(), "1.2.3");
        assert!(serde_json::from_str::<Uid>("\"1/2\"").is_err());
    }
}
