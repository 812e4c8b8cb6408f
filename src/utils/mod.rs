pub mod logger;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use which::which;

/// Finds a dump program, either as given when it is a path or on the system PATH.
pub fn find_executable(program: &str) -> Result<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return Ok(candidate.to_path_buf());
    }
    which(program).with_context(|| {
        format!(
            "{} executable not found in PATH. Please ensure the database client tools are installed and in your PATH.",
            program
        )
    })
}

/// Formats a byte count the way it is shown in progress lines, e.g. `1.5 MiB`.
pub fn handle_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_size_units() {
        assert_eq!(handle_size(0), "0 B");
        assert_eq!(handle_size(1023), "1023 B");
        assert_eq!(handle_size(1536), "1.5 KiB");
        assert_eq!(handle_size(10 * 1024 * 1024), "10.0 MiB");
    }

    #[test]
    fn test_find_executable_keeps_explicit_paths() -> anyhow::Result<()> {
        let path = find_executable("/opt/pg/bin/pg_dump")?;
        assert_eq!(path, PathBuf::from("/opt/pg/bin/pg_dump"));
        Ok(())
    }

    #[test]
    fn test_find_executable_reports_missing_program() {
        let err = find_executable("definitely-not-a-dump-tool-xyz").unwrap_err();
        assert!(err.to_string().contains("not found in PATH"));
    }
}
