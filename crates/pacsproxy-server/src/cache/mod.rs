// SPDX-License-Identifier: Apache-2.0

pub mod coalesce;
pub mod limiter;
pub mod metadata;

pub use coalesce::{classify_report, FetchCoordinator, Outcome};
pub use limiter::{ConcurrencyLimiter, Slot};
pub use metadata::MetadataCache;
