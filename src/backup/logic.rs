// dbarchive/src/backup/logic.rs
use chrono::{NaiveDateTime, Utc};
use tracing::{debug, error, info, warn};

use super::BackupTarget;
use super::archive::build_archive;
use super::db_dump::{DumpBuffer, DumpRunner};
use super::filename::{ArchiveMatcher, ArchiveName};
use super::retention::compute_deletions;
use crate::config::BackupConfig;
use crate::errors::{BackupError, Result};
use crate::storage::Storage;
use crate::utils::handle_size;

/// What a successful target run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSummary {
    pub archive_name: String,
    pub archive_size: u64,
    pub deleted: Vec<String>,
}

#[derive(Debug)]
pub struct TargetReport {
    pub database: String,
    pub outcome: Result<TargetSummary>,
}

/// Outcome of every target attempted in one run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub targets: Vec<TargetReport>,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = (&str, &BackupError)> {
        self.targets.iter().filter_map(|report| match &report.outcome {
            Ok(_) => None,
            Err(e) => Some((report.database.as_str(), e)),
        })
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Runs dump, archive, upload and optional cleanup for each target in turn.
pub struct BackupOrchestrator<'a> {
    config: &'a BackupConfig,
    storage: &'a dyn Storage,
    dump_runner: &'a dyn DumpRunner,
    clean: bool,
}

impl<'a> BackupOrchestrator<'a> {
    pub fn new(
        config: &'a BackupConfig,
        storage: &'a dyn Storage,
        dump_runner: &'a dyn DumpRunner,
        clean: bool,
    ) -> Self {
        BackupOrchestrator {
            config,
            storage,
            dump_runner,
            clean,
        }
    }

    /// A failing target is recorded and the next one is still attempted.
    pub async fn run(&self, targets: &[BackupTarget]) -> RunReport {
        let mut report = RunReport::default();
        for target in targets {
            let outcome = self.run_target(target, Utc::now().naive_utc()).await;
            if let Err(e) = &outcome {
                error!(database = %target.label(), "❌ Backup failed: {}", e);
            }
            report.targets.push(TargetReport {
                database: target.label().to_string(),
                outcome,
            });
        }
        report
    }

    async fn run_target(&self, target: &BackupTarget, now: NaiveDateTime) -> Result<TargetSummary> {
        let prefix = self.config.filename_prefix.as_deref();
        let matcher = ArchiveMatcher::for_target(prefix, target, self.config.compression)?;
        let archive_name = ArchiveName::new(prefix, target, self.config.compression, now).to_string();

        let archive_size = self.save_new_backup(target, &archive_name).await?;
        let deleted = if self.clean {
            self.cleanup_old_backups(target, &matcher).await?
        } else {
            Vec::new()
        };

        Ok(TargetSummary {
            archive_name,
            archive_size,
            deleted,
        })
    }

    async fn save_new_backup(&self, target: &BackupTarget, archive_name: &str) -> Result<u64> {
        info!(database = %target.label(), "Backing Up Database: {}", target.label());

        let mut dump = DumpBuffer::new(self.config.spool_max_size);
        self.dump_runner.run(target, &mut dump)?;
        info!(
            database = %target.label(),
            "DB dump tempfile created: {}{}",
            handle_size(dump.len()),
            if dump.is_rolled() { " (spilled to disk)" } else { "" }
        );

        let mut archive = build_archive(
            dump,
            &self.config.backup_directories,
            self.config.compression,
            self.config.spool_max_size,
        )?;

        info!(
            database = %target.label(),
            archive = archive_name,
            "Writing file to {}: {}",
            self.storage.name(),
            self.storage.location()
        );
        self.storage.write_archive(archive_name, &mut archive).await?;
        Ok(archive.len())
    }

    /// Deletes everything but the most recent archives and the first-of-month
    /// ones, oldest first. Stops at the first delete that fails.
    async fn cleanup_old_backups(&self, target: &BackupTarget, matcher: &ArchiveMatcher) -> Result<Vec<String>> {
        info!(database = %target.label(), "Cleaning Old Backups for: {}", target.label());
        let entries = self.storage.list_entries().await?;
        let candidates = matcher.filter_candidates(&entries);
        debug!(
            database = %target.label(),
            "{} of {} stored entries belong to this target",
            candidates.len(),
            entries.len()
        );
        let deletions = compute_deletions(&candidates, matcher, self.config.keep_last);

        let mut deleted = Vec::with_capacity(deletions.len());
        for name in deletions {
            info!(database = %target.label(), "  Deleting: {}", name);
            if let Err(e) = self.storage.delete_entry(&name).await {
                if !deleted.is_empty() {
                    warn!(
                        database = %target.label(),
                        "Stopped cleanup after deleting {} archive(s)",
                        deleted.len()
                    );
                }
                return Err(e.into());
            }
            deleted.push(name);
        }
        Ok(deleted)
    }
}
