pub(crate) mod archive;
pub(crate) mod db_dump;
pub(crate) mod filename;
mod logic;
pub(crate) mod retention;

use anyhow::Result;
use tracing::info;

use crate::config::{BackupConfig, DatabaseSettings, RunOptions};
use crate::storage::open_storage;
use db_dump::CommandDumpRunner;
pub use logic::RunReport;
use logic::BackupOrchestrator;

/// One database to back up, with the server name that goes into its archive names.
#[derive(Debug, Clone)]
pub struct BackupTarget {
    pub database: DatabaseSettings,
    pub server_name: Option<String>,
}

impl BackupTarget {
    pub fn label(&self) -> &str {
        &self.database.name
    }
}

/// Public entry point for the backup process.
pub async fn run_backup_flow(config: &BackupConfig, options: &RunOptions) -> Result<RunReport> {
    let targets = config.targets(options)?;
    let storage = open_storage(&config.storage).await;
    info!(
        "Backing up {} database(s) to {} storage at {}",
        targets.len(),
        storage.name(),
        storage.location()
    );

    let runner = CommandDumpRunner;
    let orchestrator = BackupOrchestrator::new(config, storage.as_ref(), &runner, options.clean);
    Ok(orchestrator.run(&targets).await)
}
