//! CacheEntry - 1 つの Signature に対して以前に作った成果物

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::link::file_name_of;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub filename: String,
    pub artifact_path: PathBuf,
    pub artifact_size_mb: f64,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(artifact_path: PathBuf, artifact_size_mb: f64, created_at: DateTime<Utc>) -> Self {
        Self {
            filename: file_name_of(&artifact_path),
            artifact_path,
            artifact_size_mb,
            created_at,
        }
    }

    /// Lazy coherency check: a hit only counts while the file is still there.
    pub fn is_present(&self) -> bool {
        self.artifact_path.is_file()
    }
}
