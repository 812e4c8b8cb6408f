// dbarchive/src/storage/local.rs
use async_trait::async_trait;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::debug;

use super::{Storage, check_entry_name};
use crate::backup::archive::ArchiveFile;
use crate::errors::StorageError;

const BACKEND: &str = "local";
const PARTIAL_SUFFIX: &str = ".partial";

/// Archives kept in a directory on a locally mounted filesystem.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    directory: PathBuf,
}

impl LocalStorage {
    pub fn new(directory: PathBuf) -> Self {
        LocalStorage { directory }
    }

    fn error(action: impl Into<String>, cause: io::Error) -> StorageError {
        StorageError::new(BACKEND, action, cause)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn location(&self) -> String {
        self.directory.display().to_string()
    }

    async fn write_archive(&self, name: &str, archive: &mut ArchiveFile) -> Result<(), StorageError> {
        check_entry_name(BACKEND, name)?;
        tokio::fs::create_dir_all(&self.directory).await.map_err(|e| {
            Self::error(format!("create backup directory {}", self.directory.display()), e)
        })?;

        // written under a temporary name first so listings never see half an archive
        let final_path = self.directory.join(name);
        let partial_path = self.directory.join(format!("{}{}", name, PARTIAL_SUFFIX));
        let copied = (|| -> io::Result<u64> {
            archive.rewind()?;
            let mut file = File::create(&partial_path)?;
            let copied = io::copy(&mut *archive, &mut file)?;
            file.flush()?;
            file.sync_all()?;
            Ok(copied)
        })();
        let copied = match copied {
            Ok(copied) => copied,
            Err(e) => {
                let _ = std::fs::remove_file(&partial_path);
                return Err(Self::error(format!("write {}", partial_path.display()), e));
            }
        };

        if let Err(e) = tokio::fs::rename(&partial_path, &final_path).await {
            let _ = tokio::fs::remove_file(&partial_path).await;
            return Err(Self::error(format!("move archive into place at {}", final_path.display()), e));
        }
        debug!("Wrote {} bytes to {}", copied, final_path.display());
        Ok(())
    }

    async fn list_entries(&self) -> Result<Vec<String>, StorageError> {
        let mut read_dir = match tokio::fs::read_dir(&self.directory).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::error(format!("list {}", self.directory.display()), e)),
        };

        let mut names = Vec::new();
        loop {
            let entry = match read_dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Err(Self::error(format!("list {}", self.directory.display()), e)),
            };
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| Self::error(format!("inspect {}", entry.path().display()), e))?;
            if !file_type.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.ends_with(PARTIAL_SUFFIX) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    async fn delete_entry(&self, name: &str) -> Result<(), StorageError> {
        check_entry_name(BACKEND, name)?;
        let path = self.directory.join(name);
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| Self::error(format!("delete {}", path.display()), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::archive::{Compression, build_archive};
    use crate::backup::db_dump::DumpBuffer;

    fn small_archive() -> anyhow::Result<ArchiveFile> {
        let mut dump = DumpBuffer::new(1024);
        dump.write_all(b"CREATE TABLE t (id int);")?;
        Ok(build_archive(dump, &[], Compression::Gzip, 1024)?)
    }

    #[tokio::test]
    async fn test_write_list_delete() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = LocalStorage::new(dir.path().join("backups"));
        assert!(storage.list_entries().await?.is_empty());

        let mut archive = small_archive()?;
        storage.write_archive("app-20240301120000.tar.gz", &mut archive).await?;
        storage.write_archive("app-20240302120000.tar.gz", &mut archive).await?;

        let mut names = storage.list_entries().await?;
        names.sort();
        assert_eq!(names, vec!["app-20240301120000.tar.gz", "app-20240302120000.tar.gz"]);

        let stored = std::fs::read(dir.path().join("backups").join("app-20240302120000.tar.gz"))?;
        assert_eq!(stored.len() as u64, archive.len());

        storage.delete_entry("app-20240301120000.tar.gz").await?;
        assert_eq!(storage.list_entries().await?, vec!["app-20240302120000.tar.gz"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_listing_skips_partials_and_directories() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("app-20240301120000.tar.bz2.partial"), b"half")?;
        std::fs::create_dir(dir.path().join("nested"))?;
        std::fs::write(dir.path().join("app-20240301120000.tar.bz2"), b"full")?;

        let storage = LocalStorage::new(dir.path().to_path_buf());
        assert_eq!(storage.list_entries().await?, vec!["app-20240301120000.tar.bz2"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_errors_are_storage_errors() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = LocalStorage::new(dir.path().to_path_buf());

        let missing = storage.delete_entry("app-20240301120000.tar.bz2").await.unwrap_err();
        assert_eq!(missing.backend, "local");

        let escape = storage.delete_entry("../etc/passwd").await.unwrap_err();
        assert!(escape.to_string().contains("plain file names"));
        Ok(())
    }
}
