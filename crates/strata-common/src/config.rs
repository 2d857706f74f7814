//! Configuration structures for Strata.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for segment files.
    pub data_dir: PathBuf,
    /// Page size in bytes. The same for every page of an engine instance.
    pub page_size: usize,
    /// Maximum number of pages resident in memory at the same time.
    pub page_count: usize,
    /// Enable fsync after segment writes.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            page_size: 4096,
            page_count: 1024, // 4 MB buffer with 4 KB pages
            fsync_enabled: true,
        }
    }
}

impl StorageConfig {
    /// Returns the total size of the page buffer in bytes.
    pub fn buffer_bytes(&self) -> usize {
        self.page_size * self.page_count
    }
}
