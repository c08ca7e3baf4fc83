// SPDX-License-Identifier: Apache-2.0

mod content;

pub use content::{ContentStore, FsContentStore, PayloadPath};
