// dbarchive/src/storage/mod.rs
//! Storage backends. The backup pipeline only talks to [`Storage`].

pub(crate) mod local;
pub(crate) mod s3;

use async_trait::async_trait;

use crate::backup::archive::ArchiveFile;
use crate::config::StorageConfig;
use crate::errors::StorageError;

pub use local::LocalStorage;
pub use s3::S3Storage;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Human readable location of the backup directory.
    fn location(&self) -> String;

    /// Stores `archive` under `name`. Whether an existing entry is replaced
    /// or rejected is up to the backend.
    async fn write_archive(&self, name: &str, archive: &mut ArchiveFile) -> Result<(), StorageError>;

    /// Names of the entries in the backup directory, in no particular order.
    async fn list_entries(&self) -> Result<Vec<String>, StorageError>;

    async fn delete_entry(&self, name: &str) -> Result<(), StorageError>;
}

/// Builds the backend selected in the configuration.
pub async fn open_storage(config: &StorageConfig) -> Box<dyn Storage> {
    match config {
        StorageConfig::Local { directory } => Box::new(LocalStorage::new(directory.clone())),
        StorageConfig::S3(spaces_config) => Box::new(S3Storage::connect(spaces_config).await),
    }
}

/// Entry names are plain file names; anything that could escape the backup
/// directory is refused.
pub(crate) fn check_entry_name(backend: &'static str, name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        return Err(StorageError::new(
            backend,
            format!("use entry name {:?}", name),
            "entry names must be plain file names",
        ));
    }
    Ok(())
}
