// dbarchive/src/backup/archive.rs
use bzip2::write::BzEncoder;
use chrono::Utc;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::str::FromStr;
use tar::{Builder, EntryType, Header};
use tempfile::SpooledTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::db_dump::DumpBuffer;
use crate::config::AuxDirectory;
use crate::errors::{BackupError, Result};
use crate::utils::handle_size;

pub const DUMP_ENTRY_NAME: &str = "dump.sql";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    None,
    Gzip,
    #[default]
    Bzip2,
    Zstd,
}

impl Compression {
    pub fn extension(self) -> &'static str {
        match self {
            Compression::None => "tar",
            Compression::Gzip => "tar.gz",
            Compression::Bzip2 => "tar.bz2",
            Compression::Zstd => "tar.zst",
        }
    }
}

impl FromStr for Compression {
    type Err = BackupError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Compression::None),
            "gz" | "gzip" => Ok(Compression::Gzip),
            "bz2" | "bzip2" => Ok(Compression::Bzip2),
            "zst" | "zstd" => Ok(Compression::Zstd),
            other => Err(BackupError::Config(format!(
                "Unknown compression codec {:?} (expected one of bz2, gz, zst, none)",
                other
            ))),
        }
    }
}

enum Encoder<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
    Bzip2(BzEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> Encoder<W> {
    fn new(inner: W, compression: Compression) -> io::Result<Self> {
        Ok(match compression {
            Compression::None => Encoder::Plain(inner),
            Compression::Gzip => Encoder::Gzip(GzEncoder::new(inner, flate2::Compression::default())),
            Compression::Bzip2 => Encoder::Bzip2(BzEncoder::new(inner, bzip2::Compression::best())),
            Compression::Zstd => Encoder::Zstd(zstd::stream::write::Encoder::new(inner, 0)?),
        })
    }

    fn finish(self) -> io::Result<W> {
        match self {
            Encoder::Plain(inner) => Ok(inner),
            Encoder::Gzip(enc) => enc.finish(),
            Encoder::Bzip2(enc) => enc.finish(),
            Encoder::Zstd(enc) => enc.finish(),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Plain(inner) => inner.write(buf),
            Encoder::Gzip(enc) => enc.write(buf),
            Encoder::Bzip2(enc) => enc.write(buf),
            Encoder::Zstd(enc) => enc.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Plain(inner) => inner.flush(),
            Encoder::Gzip(enc) => enc.flush(),
            Encoder::Bzip2(enc) => enc.flush(),
            Encoder::Zstd(enc) => enc.flush(),
        }
    }
}

/// Remembers whether the wrapped source failed, so a tar error can be
/// attributed to the source rather than to the archive spool. A source that
/// ends before the size already written into the tar header counts as failed.
struct TrackedReader<R> {
    inner: io::Take<R>,
    remaining: u64,
    failed: bool,
}

impl<R: Read> TrackedReader<R> {
    fn new(inner: R, expected_len: u64) -> Self {
        TrackedReader {
            inner: inner.take(expected_len),
            remaining: expected_len,
            failed: false,
        }
    }
}

impl<R: Read> Read for TrackedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.remaining == 0 {
            return Ok(0);
        }
        match self.inner.read(buf) {
            Ok(0) => {
                self.failed = true;
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("source ended {} bytes short of its recorded size", self.remaining),
                ))
            }
            Ok(read) => {
                self.remaining -= read as u64;
                Ok(read)
            }
            Err(e) => {
                if e.kind() != io::ErrorKind::Interrupted {
                    self.failed = true;
                }
                Err(e)
            }
        }
    }
}

/// Appends one regular entry whose header already carries its size.
fn append_entry<W: Write, R: Read>(
    tar_builder: &mut Builder<W>,
    header: &mut Header,
    name: &Path,
    source: R,
    path: &Path,
) -> Result<()> {
    let mut source = TrackedReader::new(source, header.size().map_err(BackupError::ArchiveWrite)?);
    tar_builder
        .append_data(header, name, &mut source)
        .map_err(|e| attribute(e, source.failed, path))
}

/// A finished, compressed archive held in a spooled buffer.
pub struct ArchiveFile {
    file: SpooledTempFile,
    len: u64,
}

impl ArchiveFile {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Positions the archive at its first byte for a fresh read.
    pub fn rewind(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0)).map(|_| ())
    }
}

impl Read for ArchiveFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

/// Builds the compressed tar archive for one backup run.
///
/// `dump.sql` is always the first entry, followed by each auxiliary directory
/// tree under its label, in the given order. The archive is written to a
/// buffer that stays in memory up to `spool_max_size` bytes and moves to a
/// temporary file beyond that. On error everything built so far is dropped.
pub fn build_archive(
    dump: DumpBuffer,
    directories: &[AuxDirectory],
    compression: Compression,
    spool_max_size: usize,
) -> Result<ArchiveFile> {
    let (dump_reader, dump_len) = dump
        .into_reader()
        .map_err(|e| BackupError::source_read(DUMP_ENTRY_NAME, e))?;

    let encoder = Encoder::new(SpooledTempFile::new(spool_max_size), compression)
        .map_err(BackupError::ArchiveWrite)?;
    let mut tar_builder = Builder::new(encoder);
    tar_builder.follow_symlinks(false);

    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(dump_len);
    header.set_mode(0o644);
    header.set_mtime(Utc::now().timestamp().max(0) as u64);
    let dump_path = Path::new(DUMP_ENTRY_NAME);
    append_entry(&mut tar_builder, &mut header, dump_path, dump_reader, dump_path)?;
    debug!("Added {} ({})", DUMP_ENTRY_NAME, handle_size(dump_len));

    for directory in directories {
        append_directory(&mut tar_builder, directory)?;
    }

    let encoder = tar_builder.into_inner().map_err(BackupError::ArchiveWrite)?;
    let mut file = encoder.finish().map_err(BackupError::ArchiveWrite)?;
    let len = file.seek(SeekFrom::End(0)).map_err(BackupError::ArchiveWrite)?;
    file.seek(SeekFrom::Start(0)).map_err(BackupError::ArchiveWrite)?;

    info!(
        "Compressed tempfile created: {} ({})",
        compression.extension(),
        handle_size(len)
    );
    Ok(ArchiveFile { file, len })
}

fn attribute(error: io::Error, source_failed: bool, path: &Path) -> BackupError {
    if source_failed {
        BackupError::source_read(path, error)
    } else {
        BackupError::ArchiveWrite(error)
    }
}

/// Adds `directory.path` recursively, with entry names rooted at `directory.label`.
fn append_directory<W: Write>(tar_builder: &mut Builder<W>, directory: &AuxDirectory) -> Result<()> {
    let source_dir = &directory.path;
    let mut files = 0usize;

    for entry in WalkDir::new(source_dir).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source_dir.as_path()).to_path_buf();
            BackupError::source_read(path, io::Error::from(e))
        })?;
        let path = entry.path();
        let relative = path
            .strip_prefix(source_dir)
            .map_err(|e| BackupError::source_read(path, io::Error::other(e)))?;
        let name = Path::new(&directory.label).join(relative);

        if entry.file_type().is_file() {
            let file = File::open(path).map_err(|e| BackupError::source_read(path, e))?;
            let metadata = file.metadata().map_err(|e| BackupError::source_read(path, e))?;
            let mut header = Header::new_gnu();
            header.set_metadata(&metadata);
            append_entry(tar_builder, &mut header, &name, file, path)?;
            files += 1;
        } else {
            // directories and symlinks only need their header
            tar_builder
                .append_path_with_name(path, &name)
                .map_err(|e| BackupError::source_read(path, e))?;
        }
    }

    info!(
        "Added directory {} as {}/ ({} files)",
        source_dir.display(),
        directory.label,
        files
    );
    Ok(())
}
