//! CLI command implementations.

pub mod inspect;
pub mod verify;

use catidx_core::{Config, CoreResult, PartStore};
use std::path::Path;

/// Opens an existing part file without creating it.
pub(crate) fn open_existing(path: &Path) -> CoreResult<PartStore> {
    PartStore::open_file(path, Config::default().create_if_missing(false))
}
