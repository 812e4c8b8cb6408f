// dbarchive/src/storage/s3.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use s3::types::{CompletedMultipartUpload, CompletedPart};
use std::io::{self, Read};
use tracing::{info, warn};

use super::{Storage, check_entry_name};
use crate::backup::archive::ArchiveFile;
use crate::config::SpacesConfig;
use crate::errors::StorageError;
use crate::utils::handle_size;

const BACKEND: &str = "s3";
/// Multipart chunk size; every part but the last must be at least 5 MiB.
const PART_SIZE: usize = 8 * 1024 * 1024;

/// Archives kept in an S3-compatible bucket (AWS, DigitalOcean Spaces, MinIO).
pub struct S3Storage {
    client: s3::Client,
    bucket: String,
    endpoint: String,
    folder_prefix: Option<String>,
}

fn s3_error(action: impl Into<String>, err: impl std::error::Error) -> StorageError {
    StorageError::new(BACKEND, action, DisplayErrorContext(err).to_string())
}

/// Reads up to `limit` bytes; a short result means the source is exhausted.
fn read_part(reader: &mut impl Read, limit: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(limit);
    reader.take(limit as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

impl S3Storage {
    pub async fn connect(spaces_config: &SpacesConfig) -> Self {
        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .endpoint_url(&spaces_config.endpoint_url)
            .region(Region::new(spaces_config.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &spaces_config.access_key_id,
                &spaces_config.secret_access_key,
                None,     // session_token
                None,     // expiry
                "Static", // provider_name
            ))
            .load()
            .await;

        S3Storage {
            client: s3::Client::new(&sdk_config),
            bucket: spaces_config.bucket_name.clone(),
            endpoint: spaces_config.endpoint_url.clone(),
            folder_prefix: spaces_config.folder_prefix.clone(),
        }
    }

    fn key_for(&self, name: &str) -> String {
        match &self.folder_prefix {
            Some(prefix) => format!("{}/{}", prefix, name),
            None => name.to_string(),
        }
    }

    fn list_prefix(&self) -> Option<String> {
        self.folder_prefix.as_ref().map(|prefix| format!("{}/", prefix))
    }

    async fn put_single(&self, key: &str, archive: &mut ArchiveFile) -> Result<(), StorageError> {
        let body = read_part(archive, PART_SIZE)
            .map_err(|e| StorageError::new(BACKEND, format!("read archive for {}", key), e))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| s3_error(format!("upload {} to bucket {}", key, self.bucket), e))?;
        Ok(())
    }

    async fn put_multipart(&self, key: &str, archive: &mut ArchiveFile) -> Result<(), StorageError> {
        let upload = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| s3_error(format!("start multipart upload of {}", key), e))?;
        let upload_id = upload
            .upload_id()
            .ok_or_else(|| {
                StorageError::new(
                    BACKEND,
                    format!("start multipart upload of {}", key),
                    "response carried no upload id",
                )
            })?
            .to_string();

        let result = match self.upload_parts(key, &upload_id, archive).await {
            Ok(parts) => self
                .client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
                .send()
                .await
                .map(|_| ())
                .map_err(|e| s3_error(format!("complete multipart upload of {}", key), e)),
            Err(e) => Err(e),
        };

        if result.is_err() {
            if let Err(abort_err) = self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .send()
                .await
            {
                warn!(
                    "Could not abort multipart upload {} of {}: {}",
                    upload_id,
                    key,
                    DisplayErrorContext(abort_err)
                );
            }
        }
        result
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        archive: &mut ArchiveFile,
    ) -> Result<Vec<CompletedPart>, StorageError> {
        let mut parts = Vec::new();
        let mut part_number: i32 = 1;
        loop {
            let chunk = read_part(archive, PART_SIZE)
                .map_err(|e| StorageError::new(BACKEND, format!("read archive for {}", key), e))?;
            if chunk.is_empty() {
                break;
            }
            let last = chunk.len() < PART_SIZE;
            let response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| s3_error(format!("upload part {} of {}", part_number, key), e))?;
            parts.push(
                CompletedPart::builder()
                    .set_e_tag(response.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            if last {
                break;
            }
            part_number += 1;
        }
        Ok(parts)
    }
}

#[async_trait]
impl Storage for S3Storage {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn location(&self) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, self.folder_prefix.as_deref().unwrap_or(""))
    }

    async fn write_archive(&self, name: &str, archive: &mut ArchiveFile) -> Result<(), StorageError> {
        check_entry_name(BACKEND, name)?;
        let key = self.key_for(name);
        archive
            .rewind()
            .map_err(|e| StorageError::new(BACKEND, format!("read archive for {}", key), e))?;

        info!(
            "Uploading {} ({}) to bucket {}",
            key,
            handle_size(archive.len()),
            self.bucket
        );
        if archive.len() <= PART_SIZE as u64 {
            self.put_single(&key, archive).await
        } else {
            self.put_multipart(&key, archive).await
        }
    }

    async fn list_entries(&self) -> Result<Vec<String>, StorageError> {
        let prefix = self.list_prefix();
        let mut names = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_prefix(prefix.clone())
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| s3_error(format!("list bucket {}", self.bucket), e))?;

            for object in output.contents() {
                let Some(key) = object.key() else { continue };
                let name = match &prefix {
                    Some(prefix) => key.strip_prefix(prefix.as_str()).unwrap_or(key),
                    None => key,
                };
                // objects in nested "folders" belong to someone else
                if !name.is_empty() && !name.contains('/') {
                    names.push(name.to_string());
                }
            }

            match output.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(names)
    }

    async fn delete_entry(&self, name: &str) -> Result<(), StorageError> {
        check_entry_name(BACKEND, name)?;
        let key = self.key_for(name);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| s3_error(format!("delete {} from bucket {}", key, self.bucket), e))?;
        Ok(())
    }
}
