use flate2::read::GzDecoder;
use std::fs::File;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::info;

use crate::backup::db_dump;
use crate::config::DatabaseTarget;
use crate::errors::{AppError, Result};
use crate::restore::logic::LoadPlan;

/// Streams the SQL artifact into the target database through the mysql
/// client's stdin, decompressing on the fly when the plan calls for it.
pub fn load_database(db: &DatabaseTarget, artifact: &Path, plan: LoadPlan) -> Result<()> {
    let client = db_dump::find_client()?;
    info!("Restoring database {} from {}", db.name, artifact.display());

    let mut cmd = Command::new(client);
    cmd.arg("-h")
        .arg(&db.host)
        .arg("-P")
        .arg(db.port.to_string())
        .arg("-u")
        .arg(&db.username)
        .arg(&db.name)
        .env("MYSQL_PWD", &db.password);
    run_load(cmd, artifact, plan)?;
    info!("Database {} has been restored", db.name);
    Ok(())
}

/// Runs the client command, feeding the artifact through its stdin. Both
/// output pipes are drained on their own threads while stdin is written: a
/// client that emits more than a pipe buffer of warnings before consuming
/// its input must not stall the load.
fn run_load(mut cmd: Command, artifact: &Path, plan: LoadPlan) -> Result<()> {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| AppError::Restore(format!("Failed to run mysql client: {err}")))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Restore("Failed to open mysql client stdin".to_string()))?;
    let stdout_reader = db_dump::drain_on_thread(child.stdout.take());
    let stderr_reader = db_dump::drain_on_thread(child.stderr.take());

    let file = File::open(artifact)?;
    let write_result: io::Result<u64> = match plan {
        LoadPlan::Decompress => io::copy(&mut GzDecoder::new(file), &mut stdin),
        LoadPlan::Plain => {
            let mut file = file;
            io::copy(&mut file, &mut stdin)
        }
    };
    // Closing stdin signals end of input to the client.
    drop(stdin);

    let status = child
        .wait()
        .map_err(|err| AppError::Restore(format!("Failed to wait for mysql client: {err}")))?;
    let _ = stdout_reader.join();
    let stderr = stderr_reader.join().unwrap_or_default();

    if !status.success() {
        return Err(AppError::Command {
            stderr: format!("mysql exited with {status}: {}", stderr.trim()),
        });
    }
    write_result?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_survives_a_chatty_stderr() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let artifact = dir.path().join("shop.sql");
        // Larger than a pipe buffer, so the writer cannot finish before the
        // client starts reading.
        fs::write(&artifact, "INSERT INTO t VALUES (1);\n".repeat(16_384))?;

        // Fills its stderr pipe before touching stdin, the way a client does
        // when connection warnings precede the load.
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(
            "i=0; while [ $i -lt 2048 ]; do \
               echo 'Warning: a rather long diagnostic line that the client repeats before it gets around to reading its input' >&2; \
               i=$((i+1)); \
             done; \
             cat > /dev/null",
        );

        run_load(cmd, &artifact, LoadPlan::Plain)?;
        Ok(())
    }

    #[test]
    fn test_load_failure_carries_the_client_stderr() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let artifact = dir.path().join("shop.sql");
        fs::write(&artifact, "INSERT INTO t VALUES (1);\n")?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("cat > /dev/null; echo 'access denied' >&2; exit 1");

        let result = run_load(cmd, &artifact, LoadPlan::Plain);
        match result {
            Err(AppError::Command { stderr }) => assert!(stderr.contains("access denied")),
            other => panic!("expected a command error, got {other:?}"),
        }
        Ok(())
    }
}
