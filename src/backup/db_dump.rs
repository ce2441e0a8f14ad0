use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use tracing::info;
use which::which;

use crate::config::DatabaseTarget;
use crate::errors::{AppError, Result};

/// Schemas excluded from backup-all runs.
pub const SYSTEM_SCHEMAS: [&str; 4] = ["information_schema", "performance_schema", "mysql", "sys"];

pub fn is_system_schema(name: &str) -> bool {
    SYSTEM_SCHEMAS.contains(&name)
}

pub(crate) fn find_client() -> Result<PathBuf> {
    which("mariadb").or_else(|_| which("mysql")).map_err(|_| {
        AppError::Config(
            "mysql client executable not found in PATH. Please ensure MySQL or MariaDB client tools are installed."
                .to_string(),
        )
    })
}

fn find_dump_tool() -> Result<PathBuf> {
    which("mariadb-dump")
        .or_else(|_| which("mysqldump"))
        .map_err(|_| {
            AppError::Config(
                "mysqldump executable not found in PATH. Please ensure MySQL or MariaDB client tools are installed."
                    .to_string(),
            )
        })
}

/// Drains a child's pipe to a string on its own thread, so the child can
/// never block writing it while the parent is busy with another pipe.
pub(crate) fn drain_on_thread<R>(pipe: Option<R>) -> thread::JoinHandle<String>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    })
}

fn connection_args(db: &DatabaseTarget) -> [String; 6] {
    [
        "-h".to_string(),
        db.host.clone(),
        "-P".to_string(),
        db.port.to_string(),
        "-u".to_string(),
        db.username.clone(),
    ]
}

/// Verifies the target accepts a trivial connection before any full dump or
/// load is attempted.
pub fn test_connection(db: &DatabaseTarget) -> Result<()> {
    let client = find_client()?;
    info!("Connecting to {} database ...", db.name);
    let output = Command::new(client)
        .args(connection_args(db))
        .arg(&db.name)
        .arg("-e")
        .arg("SELECT 1")
        .env("MYSQL_PWD", &db.password)
        .output()
        .map_err(|err| AppError::Connectivity(format!("Failed to run mysql client: {err}")))?;
    if !output.status.success() {
        return Err(AppError::Connectivity(format!(
            "Failed to connect to database {}: {}",
            db.name,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    info!("Successfully connected to {} database", db.name);
    Ok(())
}

/// Lists every database on the server, system schemas included; callers
/// filter with [`is_system_schema`].
pub fn list_databases(db: &DatabaseTarget) -> Result<Vec<String>> {
    let client = find_client()?;
    info!("Listing databases...");
    let output = Command::new(client)
        .args(connection_args(db))
        .arg("-N")
        .arg("-e")
        .arg("SHOW DATABASES")
        .env("MYSQL_PWD", &db.password)
        .output()
        .map_err(|err| AppError::Dump(format!("Failed to list databases: {err}")))?;
    if !output.status.success() {
        return Err(AppError::Dump(format!(
            "Failed to list databases: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

/// Dumps the target database (or, with `all_in_one`, every database in a
/// single combined dump) into `artifact`. With compression enabled the dump
/// subprocess stdout is streamed through a gzip encoder as it is produced,
/// so the full dump is never buffered in memory.
pub fn dump_database(
    db: &DatabaseTarget,
    all_in_one: bool,
    artifact: &Path,
    compression: bool,
) -> Result<()> {
    let dump_tool = find_dump_tool()?;
    info!("Starting database dump to {} ...", artifact.display());

    let mut cmd = Command::new(dump_tool);
    cmd.args(connection_args(db));
    if all_in_one {
        cmd.args(["--all-databases", "--single-transaction", "--routines", "--triggers"]);
    } else {
        cmd.arg("--single-transaction").arg(&db.name);
    }
    cmd.env("MYSQL_PWD", &db.password);
    stream_dump(cmd, artifact, compression)?;
    info!("Database has been dumped to {}", artifact.display());
    Ok(())
}

/// Runs the dump command, streaming its stdout into the artifact. stderr is
/// drained concurrently: a tool that emits more warnings than a pipe buffer
/// holds must not stall the dump.
fn stream_dump(mut cmd: Command, artifact: &Path, compression: bool) -> Result<()> {
    let mut child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| AppError::Dump(format!("Failed to execute mysqldump: {err}")))?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Dump("Failed to capture mysqldump stdout".to_string()))?;
    let stderr_reader = drain_on_thread(child.stderr.take());

    let file = File::create(artifact)?;
    let write_result: io::Result<()> = if compression {
        let mut encoder = GzEncoder::new(file, Compression::default());
        io::copy(&mut stdout, &mut encoder).and(encoder.finish()).map(|_| ())
    } else {
        let mut file = file;
        io::copy(&mut stdout, &mut file).map(|_| ())
    };

    let status = child
        .wait()
        .map_err(|err| AppError::Dump(format!("Failed to wait for mysqldump: {err}")))?;
    let stderr = stderr_reader.join().unwrap_or_default();

    if !status.success() {
        let _ = fs::remove_file(artifact);
        return Err(AppError::Command {
            stderr: format!("mysqldump exited with {status}: {}", stderr.trim()),
        });
    }
    write_result?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_schemas_are_excluded() {
        assert!(is_system_schema("information_schema"));
        assert!(is_system_schema("performance_schema"));
        assert!(is_system_schema("mysql"));
        assert!(is_system_schema("sys"));
        assert!(!is_system_schema("shop"));
        assert!(!is_system_schema("mysql_app"));
    }

    #[test]
    fn test_dump_survives_a_chatty_stderr() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let artifact = dir.path().join("shop.sql");

        // Emits well over a pipe buffer of stderr before any stdout, the way
        // a dump tool does when every table produces a warning.
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(
            "i=0; while [ $i -lt 2048 ]; do \
               echo 'Warning: a rather long diagnostic line that the dump tool repeats for every single table it touches during the run' >&2; \
               i=$((i+1)); \
             done; \
             echo '-- dump content'",
        );

        stream_dump(cmd, &artifact, false)?;
        assert_eq!(fs::read_to_string(&artifact)?.trim(), "-- dump content");
        Ok(())
    }

    #[test]
    fn test_dump_failure_removes_the_partial_artifact() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let artifact = dir.path().join("shop.sql");

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo partial; echo 'boom' >&2; exit 3");

        let result = stream_dump(cmd, &artifact, false);
        match result {
            Err(AppError::Command { stderr }) => assert!(stderr.contains("boom")),
            other => panic!("expected a command error, got {other:?}"),
        }
        assert!(!artifact.exists());
        Ok(())
    }
}
