use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub fn file_exists(path: &Path) -> bool {
    path.is_file()
}

/// Formats a byte count for notification payloads, e.g. "14.2 MiB".
pub fn convert_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Strips exactly one trailing extension: "shop.sql.gz" -> "shop.sql".
pub fn remove_last_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) => &name[..idx],
        None => name,
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

/// Returns the first existing key file, checking the conventional locations
/// before the explicitly configured path.
pub fn find_key_file(configured: Option<&str>, conventional: &[PathBuf]) -> Option<PathBuf> {
    conventional
        .iter()
        .cloned()
        .chain(configured.map(PathBuf::from))
        .find(|candidate| candidate.is_file())
}

/// Deletes every file in the local working directory, leaving the directory
/// itself in place. Failures are logged, never escalated: a stale temp file
/// does not affect the correctness of a delivered artifact.
pub fn sweep_dir(dir: &Path) {
    info!("Cleaning up {} ...", dir.display());
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("Error reading {}: {}", dir.display(), err);
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            if let Err(err) = fs::remove_file(&path) {
                warn!("Error deleting {}: {}", path.display(), err);
            }
        }
    }
    info!("Cleaning up {} ... done", dir.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_bytes() {
        assert_eq!(convert_bytes(512), "512 B");
        assert_eq!(convert_bytes(1024), "1.0 KiB");
        assert_eq!(convert_bytes(1536), "1.5 KiB");
        assert_eq!(convert_bytes(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn test_remove_last_extension() {
        assert_eq!(remove_last_extension("shop.sql.gz.gpg"), "shop.sql.gz");
        assert_eq!(remove_last_extension("shop.sql"), "shop");
        assert_eq!(remove_last_extension("noext"), "noext");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(95)), "1m35s");
        assert_eq!(format_duration(Duration::from_secs(3700)), "1h1m40s");
    }

    #[test]
    fn test_find_key_file_prefers_conventional_locations() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let conventional = dir.path().join("public_key.asc");
        let configured = dir.path().join("other_key.asc");
        std::fs::write(&conventional, "key")?;
        std::fs::write(&configured, "key")?;

        let found = find_key_file(
            Some(configured.to_str().unwrap()),
            &[conventional.clone()],
        );
        assert_eq!(found, Some(conventional));
        Ok(())
    }

    #[test]
    fn test_find_key_file_missing() {
        let found = find_key_file(Some("/nonexistent/key.asc"), &[]);
        assert_eq!(found, None);
    }

    #[test]
    fn test_sweep_dir_removes_files_only() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("a.sql"), "data")?;
        fs::create_dir(dir.path().join("sub"))?;

        sweep_dir(dir.path());

        assert!(!dir.path().join("a.sql").exists());
        assert!(dir.path().join("sub").exists());
        Ok(())
    }
}
