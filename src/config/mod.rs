// dbarchive/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::backup::BackupTarget;
use crate::backup::archive::Compression;
use crate::errors::BackupError;

pub const DEFAULT_KEEP_LAST: usize = 10;
pub const DEFAULT_SPOOL_MAX_SIZE: usize = 10 * 1024 * 1024;
const DEFAULT_BACKUP_DIR: &str = "./backups";

// Structs for deserializing config.json
#[derive(Debug, Clone, Deserialize)]
pub struct JsonDatabase {
    pub name: Option<String>,
    pub engine: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub url: Option<String>,
    pub path: Option<PathBuf>,
    pub dump_command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonBackupDirectory {
    pub label: Option<String>,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonS3StorageConfig {
    pub bucket_name: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JsonStorageConfig {
    Local { directory: Option<PathBuf> },
    S3(JsonS3StorageConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawJsonConfig {
    pub databases: Option<Vec<JsonDatabase>>,
    pub server_name: Option<String>,
    pub filename_prefix: Option<String>,
    pub compression: Option<String>,
    pub keep_last: Option<usize>,
    pub spool_max_size: Option<usize>,
    pub backup_directories: Option<Vec<JsonBackupDirectory>>,
    pub storage: Option<JsonStorageConfig>,
}

// Application's internal configuration structs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Postgresql,
    Mysql,
    Sqlite,
}

impl FromStr for Engine {
    type Err = BackupError;

    /// Accepts short names as well as dotted backend paths such as
    /// `django.db.backends.postgresql_psycopg2`; only the last segment counts.
    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        let short = value.rsplit('.').next().unwrap_or(value).trim().to_ascii_lowercase();
        match short.as_str() {
            "postgresql" | "postgres" | "postgresql_psycopg2" => Ok(Engine::Postgresql),
            "mysql" => Ok(Engine::Mysql),
            "sqlite" | "sqlite3" => Ok(Engine::Sqlite),
            _ => Err(BackupError::Config(format!("Unsupported database engine: {}", value))),
        }
    }
}

/// Connection parameters for one database. Opaque to everything but the dump runner.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub name: String,
    pub engine: Engine,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub url: Option<String>,
    /// Database file for file-based engines; defaults to `name`.
    pub path: Option<PathBuf>,
    pub dump_command: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuxDirectory {
    pub label: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SpacesConfig {
    pub endpoint_url: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub enum StorageConfig {
    Local { directory: PathBuf },
    S3(SpacesConfig),
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub databases: Vec<DatabaseSettings>,
    pub server_name: Option<String>,
    pub filename_prefix: Option<String>,
    pub compression: Compression,
    pub keep_last: usize,
    pub spool_max_size: usize,
    pub backup_directories: Vec<AuxDirectory>,
    pub storage: StorageConfig,
}

/// Per-run flags taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub clean: bool,
    pub database: Option<String>,
    pub server_name: Option<String>,
}

/// Database identifiers, server labels and prefixes end up between `-`
/// separators in archive names, so they may not contain one.
pub fn validate_label(kind: &str, value: &str) -> std::result::Result<(), BackupError> {
    if value.is_empty() {
        return Err(BackupError::Config(format!("{} cannot be empty", kind)));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '_' && *c != '.')
    {
        return Err(BackupError::Config(format!(
            "Invalid character {:?} in {} {:?}: only ASCII letters, digits, '_' and '.' are allowed",
            bad, kind, value
        )));
    }
    Ok(())
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl BackupConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw_json_config: RawJsonConfig = serde_json::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })?;
        Self::from_raw(&raw_json_config)
    }

    pub fn from_raw(raw_config: &RawJsonConfig) -> Result<Self> {
        let json_databases = raw_config
            .databases
            .as_ref()
            .filter(|dbs| !dbs.is_empty())
            .context("databases must list at least one database in config.json")?;

        let mut seen = HashSet::new();
        let mut databases = Vec::with_capacity(json_databases.len());
        for (index, db) in json_databases.iter().enumerate() {
            let settings = parse_database(db)
                .with_context(|| format!("Invalid entry #{} in databases", index + 1))?;
            if !seen.insert(settings.name.clone()) {
                anyhow::bail!("Database {} is configured more than once", settings.name);
            }
            databases.push(settings);
        }

        let server_name = non_empty(&raw_config.server_name);
        if let Some(server) = &server_name {
            validate_label("server_name", server)?;
        }
        let filename_prefix = non_empty(&raw_config.filename_prefix);
        if let Some(prefix) = &filename_prefix {
            validate_label("filename_prefix", prefix)?;
        }

        let compression = match &raw_config.compression {
            Some(id) => id.parse::<Compression>()?,
            None => Compression::default(),
        };

        let keep_last = raw_config.keep_last.unwrap_or(DEFAULT_KEEP_LAST);
        if keep_last == 0 {
            return Err(BackupError::Config("keep_last must be at least 1".to_string()).into());
        }

        Ok(BackupConfig {
            databases,
            server_name,
            filename_prefix,
            compression,
            keep_last,
            spool_max_size: raw_config.spool_max_size.unwrap_or(DEFAULT_SPOOL_MAX_SIZE),
            backup_directories: parse_backup_directories(&raw_config.backup_directories)?,
            storage: parse_storage(&raw_config.storage)?,
        })
    }

    /// Resolves the databases selected for this run into backup targets.
    pub fn targets(&self, options: &RunOptions) -> Result<Vec<BackupTarget>> {
        let server_name = match non_empty(&options.server_name) {
            Some(server) => {
                validate_label("server name", &server)?;
                Some(server)
            }
            None => self.server_name.clone(),
        };

        let selected: Vec<&DatabaseSettings> = match &options.database {
            Some(wanted) => {
                let db = self
                    .databases
                    .iter()
                    .find(|db| &db.name == wanted)
                    .ok_or_else(|| BackupError::Config(format!("Database {} is not configured", wanted)))?;
                vec![db]
            }
            None => self.databases.iter().collect(),
        };

        Ok(selected
            .into_iter()
            .map(|db| BackupTarget {
                database: db.clone(),
                server_name: server_name.clone(),
            })
            .collect())
    }
}

fn parse_database(db: &JsonDatabase) -> Result<DatabaseSettings> {
    let name = non_empty(&db.name).context("name must be set for every database")?;
    validate_label("database name", &name)?;
    let engine: Engine = db
        .engine
        .as_deref()
        .with_context(|| format!("engine must be set for database {}", name))?
        .parse()?;

    let dump_command = match &db.dump_command {
        Some(cmd) if cmd.first().is_none_or(|program| program.trim().is_empty()) => {
            anyhow::bail!("dump_command for database {} must start with a program", name)
        }
        Some(cmd) => Some(cmd.clone()),
        None => None,
    };

    let url = non_empty(&db.url);
    if let Some(raw_url) = &url {
        url::Url::parse(raw_url)
            .with_context(|| format!("Invalid database URL format for database {}", name))?;
    }

    Ok(DatabaseSettings {
        name,
        engine,
        user: non_empty(&db.user),
        password: db.password.clone().filter(|p| !p.is_empty()),
        host: non_empty(&db.host),
        port: db.port,
        url,
        path: db.path.clone().filter(|p| !p.as_os_str().is_empty()),
        dump_command,
    })
}

fn parse_backup_directories(dirs: &Option<Vec<JsonBackupDirectory>>) -> Result<Vec<AuxDirectory>> {
    let mut parsed: Vec<AuxDirectory> = Vec::new();
    for dir in dirs.iter().flatten() {
        let label = non_empty(&dir.label).context("label must be set for every backup directory")?;
        if label == "dump.sql" || label.split('/').any(|part| part.is_empty() || part == "..") {
            anyhow::bail!("Invalid backup directory label: {}", label);
        }
        if parsed.iter().any(|existing| existing.label == label) {
            anyhow::bail!("Backup directory label {} is used more than once", label);
        }
        let path = dir
            .path
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .with_context(|| format!("path must be set for backup directory {}", label))?;
        parsed.push(AuxDirectory { label, path });
    }
    Ok(parsed)
}

fn parse_storage(storage: &Option<JsonStorageConfig>) -> Result<StorageConfig> {
    match storage {
        None => Ok(StorageConfig::Local {
            directory: PathBuf::from(DEFAULT_BACKUP_DIR),
        }),
        Some(JsonStorageConfig::Local { directory }) => Ok(StorageConfig::Local {
            directory: directory
                .clone()
                .filter(|d| !d.as_os_str().is_empty())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR)),
        }),
        Some(JsonStorageConfig::S3(s3_raw)) => {
            if let (Some(bucket), Some(region), Some(key_id), Some(secret), Some(endpoint)) = (
                non_empty(&s3_raw.bucket_name),
                non_empty(&s3_raw.region),
                non_empty(&s3_raw.access_key_id),
                non_empty(&s3_raw.secret_access_key),
                non_empty(&s3_raw.endpoint_url),
            ) {
                Ok(StorageConfig::S3(SpacesConfig {
                    bucket_name: bucket,
                    region,
                    access_key_id: key_id,
                    secret_access_key: secret,
                    endpoint_url: endpoint,
                    folder_prefix: non_empty(&s3_raw.folder_prefix)
                        .map(|p| p.trim_matches('/').to_string())
                        .filter(|p| !p.is_empty()),
                }))
            } else {
                Err(BackupError::Config(
                    "S3 storage requires bucket_name, region, access_key_id, secret_access_key and endpoint_url"
                        .to_string(),
                )
                .into())
            }
        }
    }
}
