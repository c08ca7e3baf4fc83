// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

pub const STATUS_CODE_SUCCESS: i64 = 0;
pub const STATUS_CODE_PARTIAL: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Success,
    /// Completed with warnings, including "nothing new to transfer".
    PartialSuccess,
    Failure,
}

impl TransferStatus {
    #[must_use]
    pub fn from_code(code: i64) -> Self {
        match code {
            STATUS_CODE_SUCCESS => Self::Success,
            STATUS_CODE_PARTIAL => Self::PartialSuccess,
            _ => Self::Failure,
        }
    }

    #[must_use]
    pub fn is_completed(self) -> bool {
        matches!(self, Self::Success | Self::PartialSuccess)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialSuccess => "partial_success",
            Self::Failure => "failure",
        }
    }
}

/// Result of one bulk retrieval as reported by the remote channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrieveReport {
    pub status: TransferStatus,
    pub code: i64,
    pub detail: String,
    pub transferred: u64,
}

impl RetrieveReport {
    #[must_use]
    pub fn from_code(code: i64, detail: impl Into<String>, transferred: u64) -> Self {
        Self {
            status: TransferStatus::from_code(code),
            code,
            detail: detail.into(),
            transferred,
        }
    }

    #[must_use]
    pub fn success(transferred: u64) -> Self {
        Self::from_code(STATUS_CODE_SUCCESS, "completed", transferred)
    }

    #[must_use]
    pub fn partial(detail: impl Into<String>, transferred: u64) -> Self {
        Self::from_code(STATUS_CODE_PARTIAL, detail, transferred)
    }

    /// A failed transfer. The status is `Failure` whatever `code` says.
    #[must_use]
    pub fn failure(code: i64, detail: impl Into<String>) -> Self {
        Self {
            status: TransferStatus::Failure,
            code,
            detail: detail.into(),
            transferred: 0,
        }
    }
}
