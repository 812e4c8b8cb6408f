// dbarchive/src/backup/filename.rs
//! Canonical archive names: `[<prefix>--]<database>[-<server>]-<YYYYMMDDHHMMSS>.<ext>`.
//!
//! Every component is restricted by [`crate::config::validate_label`] to
//! characters other than `-`. The prefix is closed by a double `-` that no
//! other part of a name can produce, and the timestamp always sits right
//! before the extension, so names decode unambiguously.

use chrono::{NaiveDateTime, Timelike};
use regex::Regex;
use std::fmt;
use tracing::warn;

use super::BackupTarget;
use super::archive::Compression;
use crate::errors::{BackupError, FilenameError};

pub const DATE_FORMAT: &str = "%Y%m%d%H%M%S";
const PREFIX_SEPARATOR: &str = "--";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    pub prefix: Option<String>,
    pub database: String,
    pub server: Option<String>,
    pub timestamp: NaiveDateTime,
    pub extension: &'static str,
}

impl ArchiveName {
    /// Name for a new archive of `target`; sub-second precision is dropped.
    pub fn new(
        prefix: Option<&str>,
        target: &BackupTarget,
        compression: Compression,
        timestamp: NaiveDateTime,
    ) -> Self {
        ArchiveName {
            prefix: prefix.map(str::to_string),
            database: target.database.name.clone(),
            server: target.server_name.clone(),
            timestamp: timestamp.with_nanosecond(0).unwrap_or(timestamp),
            extension: compression.extension(),
        }
    }
}

impl fmt::Display for ArchiveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, "{}{}", prefix, PREFIX_SEPARATOR)?;
        }
        write!(f, "{}", self.database)?;
        if let Some(server) = &self.server {
            write!(f, "-{}", server)?;
        }
        write!(f, "-{}.{}", self.timestamp.format(DATE_FORMAT), self.extension)
    }
}

/// Matches the archive names of exactly one (prefix, database, server, codec) tuple.
#[derive(Debug, Clone)]
pub struct ArchiveMatcher {
    regex: Regex,
}

impl ArchiveMatcher {
    pub fn new(
        prefix: Option<&str>,
        database: &str,
        server: Option<&str>,
        extension: &str,
    ) -> Result<Self, BackupError> {
        let mut pattern = String::from("(?:^|/)");
        if let Some(prefix) = prefix {
            pattern.push_str(&regex::escape(prefix));
            pattern.push_str(PREFIX_SEPARATOR);
        }
        pattern.push_str(&regex::escape(database));
        if let Some(server) = server {
            pattern.push('-');
            pattern.push_str(&regex::escape(server));
        }
        pattern.push_str(r"-(\d{14})\.");
        pattern.push_str(&regex::escape(extension));
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|e| {
            BackupError::Config(format!("Cannot build archive name pattern {}: {}", pattern, e))
        })?;
        Ok(ArchiveMatcher { regex })
    }

    pub fn for_target(
        prefix: Option<&str>,
        target: &BackupTarget,
        compression: Compression,
    ) -> Result<Self, BackupError> {
        Self::new(
            prefix,
            &target.database.name,
            target.server_name.as_deref(),
            compression.extension(),
        )
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// `Ok(None)` for names belonging to something else, an error for names
    /// that look like ours but carry an impossible date.
    pub fn parse(&self, name: &str) -> Result<Option<NaiveDateTime>, FilenameError> {
        let Some(captures) = self.regex.captures(name) else {
            return Ok(None);
        };
        let value = &captures[1];
        NaiveDateTime::parse_from_str(value, DATE_FORMAT)
            .map(Some)
            .map_err(|_| FilenameError::MalformedTimestamp {
                name: name.to_string(),
                value: value.to_string(),
            })
    }

    /// Like [`parse`](Self::parse) but malformed names are logged and treated as foreign.
    pub fn decode(&self, name: &str) -> Option<NaiveDateTime> {
        match self.parse(name) {
            Ok(timestamp) => timestamp,
            Err(e) => {
                warn!("Ignoring {}: {}", name, e);
                None
            }
        }
    }

    pub fn filter_candidates<S: AsRef<str>>(&self, names: &[S]) -> Vec<String> {
        names
            .iter()
            .filter(|name| self.is_match(name.as_ref()))
            .map(|name| name.as_ref().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::tests::target;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(h, mi, s))
            .expect("valid fixture date")
    }

    #[test]
    fn test_encode_layouts() {
        let ts = at(2024, 3, 1, 12, 0, 5);
        let plain = ArchiveName::new(None, &target("app", None), Compression::Bzip2, ts);
        assert_eq!(plain.to_string(), "app-20240301120005.tar.bz2");

        let with_server = ArchiveName::new(None, &target("app", Some("web1")), Compression::Gzip, ts);
        assert_eq!(with_server.to_string(), "app-web1-20240301120005.tar.gz");

        let prefixed = ArchiveName::new(Some("nightly"), &target("app", Some("web1")), Compression::Zstd, ts);
        assert_eq!(prefixed.to_string(), "nightly--app-web1-20240301120005.tar.zst");
    }

    #[test]
    fn test_new_truncates_to_seconds() {
        let ts = at(2024, 3, 1, 12, 0, 5)
            .with_nanosecond(123_456_789)
            .expect("valid nanos");
        let name = ArchiveName::new(None, &target("app", None), Compression::Bzip2, ts);
        assert_eq!(name.timestamp, at(2024, 3, 1, 12, 0, 5));
    }

    #[test]
    fn test_round_trip_through_matcher() -> anyhow::Result<()> {
        let cases = [
            (None, "app", None),
            (None, "app", Some("web1")),
            (Some("nightly"), "shop.prod", Some("db_2")),
            (None, "20240101000000", Some("20240101000000")),
        ];
        let timestamps = [at(1999, 12, 31, 23, 59, 59), at(2024, 2, 29, 0, 0, 0), at(2030, 1, 1, 1, 1, 1)];

        for (prefix, db, server) in cases {
            let t = target(db, server);
            let matcher = ArchiveMatcher::for_target(prefix, &t, Compression::Bzip2)?;
            for ts in timestamps {
                let encoded = ArchiveName::new(prefix, &t, Compression::Bzip2, ts).to_string();
                assert!(matcher.is_match(&encoded), "{} should match", encoded);
                assert_eq!(matcher.decode(&encoded), Some(ts), "{}", encoded);
            }
        }
        Ok(())
    }

    #[test]
    fn test_prefix_never_reads_as_database_name() -> anyhow::Result<()> {
        let ts = at(2024, 3, 1, 12, 0, 0);
        let prefixed = ArchiveName::new(Some("nightly"), &target("app", None), Compression::Bzip2, ts).to_string();
        let server = ArchiveName::new(None, &target("nightly", Some("app")), Compression::Bzip2, ts).to_string();
        assert_ne!(prefixed, server);

        let prefixed_matcher = ArchiveMatcher::new(Some("nightly"), "app", None, "tar.bz2")?;
        let server_matcher = ArchiveMatcher::new(None, "nightly", Some("app"), "tar.bz2")?;
        assert!(prefixed_matcher.is_match(&prefixed) && !prefixed_matcher.is_match(&server));
        assert!(server_matcher.is_match(&server) && !server_matcher.is_match(&prefixed));
        Ok(())
    }

    #[test]
    fn test_matcher_accepts_directory_prefixes() -> anyhow::Result<()> {
        let matcher = ArchiveMatcher::new(None, "app", None, "tar.bz2")?;
        assert_eq!(
            matcher.decode("backups/db/app-20240301120000.tar.bz2"),
            Some(at(2024, 3, 1, 12, 0, 0))
        );
        assert!(!matcher.is_match("backups/db/myapp-20240301120000.tar.bz2"));
        Ok(())
    }

    #[test]
    fn test_filter_never_crosses_targets() -> anyhow::Result<()> {
        let listing = [
            "app-20240301120000.tar.bz2",
            "app-web1-20240301120000.tar.bz2",
            "app-web2-20240302120000.tar.bz2",
            "shop-20240301120000.tar.bz2",
            "shop-web1-20240301120000.tar.bz2",
            "old_app-20240301120000.tar.bz2",
            "app-20240302120000.tar.gz",
            "app-20240303120000.tar.bz2",
            "app-web1-20240304120000.tar.bz2",
            "app-2024030412000.tar.bz2",
            "notes.txt",
        ];

        let app = ArchiveMatcher::new(None, "app", None, "tar.bz2")?;
        assert_eq!(
            app.filter_candidates(&listing),
            vec!["app-20240301120000.tar.bz2", "app-20240303120000.tar.bz2"]
        );

        let app_web1 = ArchiveMatcher::new(None, "app", Some("web1"), "tar.bz2")?;
        assert_eq!(
            app_web1.filter_candidates(&listing),
            vec!["app-web1-20240301120000.tar.bz2", "app-web1-20240304120000.tar.bz2"]
        );

        let shop = ArchiveMatcher::new(None, "shop", None, "tar.bz2")?;
        assert_eq!(shop.filter_candidates(&listing), vec!["shop-20240301120000.tar.bz2"]);
        Ok(())
    }

    #[test]
    fn test_malformed_timestamp_is_reported_and_ignored() -> anyhow::Result<()> {
        let matcher = ArchiveMatcher::new(None, "app", None, "tar.bz2")?;
        let name = "app-20241399250000.tar.bz2";
        assert_eq!(
            matcher.parse(name),
            Err(FilenameError::MalformedTimestamp {
                name: name.to_string(),
                value: "20241399250000".to_string(),
            })
        );
        assert_eq!(matcher.decode(name), None);
        assert_eq!(matcher.parse("shop-20240101000000.tar.bz2"), Ok(None));
        Ok(())
    }
}
