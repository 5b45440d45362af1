//! Minimal read-only file access for pipeline audio (spec.md §9
//! Non-goals: the upload/management surface for file storage is explicitly
//! out of scope, but a runner still needs to read the bytes behind a
//! listing's `audio_file` reference to run the Voice-Rx pipeline).
//!
//! Ported from
//! `examples/original_source/backend/app/services/file_storage.py`'s local
//! backend. The Azure Blob backend named alongside it there is part of the
//! upload surface this expansion deliberately does not carry — see
//! DESIGN.md.

use crate::config::{Config, FileStorageType};
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct FileStorage {
    config: Config,
}

impl FileStorage {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn read(&self, storage_path: &str) -> Result<Vec<u8>> {
        match self.config.file_storage_type {
            FileStorageType::Local => self.read_local(storage_path).await,
            FileStorageType::AzureBlob => Err(Error::internal(
                "azure blob storage reads are not implemented; set FILE_STORAGE_TYPE=local",
            )),
        }
    }

    async fn read_local(&self, storage_path: &str) -> Result<Vec<u8>> {
        let base = self.config.file_storage_path.as_deref().unwrap_or("./storage");
        let path = std::path::Path::new(base).join(storage_path);
        tokio::fs::read(&path).await.map_err(|e| Error::internal(format!("reading {}: {e}", path.display())))
    }
}
