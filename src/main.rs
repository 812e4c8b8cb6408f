//! Database Backup Archiver
//!
//! Dumps configured databases, bundles them with extra directories into a
//! compressed tarball and ships it to local or S3 storage.

// dbarchive/src/main.rs
mod backup;
mod config;
mod errors;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use config::{BackupConfig, RunOptions};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "dbarchive", version, about = "Backs up databases into compressed archives")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Remove old archives after a successful backup
    #[arg(short = 'c', long)]
    clean: bool,

    /// Back up only this configured database
    #[arg(short = 'd', long)]
    database: Option<String>,

    /// Server name used in archive names, overrides the config file
    #[arg(short = 's', long = "servername")]
    server_name: Option<String>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Main entry point for the backup tool
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = utils::logger::init(&cli.log_level) {
        eprintln!("❌ Error: {:?}", e);
        return ExitCode::FAILURE;
    }

    match run_app(cli).await {
        Ok(true) => {
            println!("✅ Backup completed successfully.");
            ExitCode::SUCCESS
        }
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: Cli) -> Result<bool> {
    let backup_config = BackupConfig::load_from_json(&cli.config)
        .with_context(|| format!("Failed to load backup configuration from {}", cli.config.display()))?;
    let options = RunOptions {
        clean: cli.clean,
        database: cli.database,
        server_name: cli.server_name,
    };

    println!("🚀 Starting Backup Process...");
    let report = backup::run_backup_flow(&backup_config, &options)
        .await
        .context("Backup process failed")?;

    for target in &report.targets {
        match &target.outcome {
            Ok(summary) => {
                println!(
                    "  {} -> {} ({})",
                    target.database,
                    summary.archive_name,
                    utils::handle_size(summary.archive_size)
                );
                for name in &summary.deleted {
                    println!("     removed {}", name);
                }
            }
            Err(e) => eprintln!("  {} failed: {}", target.database, e),
        }
    }

    let failed = report.failures().count();
    if failed > 0 {
        eprintln!("❌ {} of {} backup(s) failed.", failed, report.targets.len());
    }
    Ok(report.is_success())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from(["dbarchive", "-c", "-d", "app", "-s", "web1", "--config", "/etc/db.json"]);
        assert!(cli.clean);
        assert_eq!(cli.database.as_deref(), Some("app"));
        assert_eq!(cli.server_name.as_deref(), Some("web1"));
        assert_eq!(cli.config, PathBuf::from("/etc/db.json"));
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["dbarchive"]);
        assert!(!cli.clean);
        assert_eq!(cli.config, PathBuf::from("config.json"));
        assert!(cli.database.is_none());
    }
}
