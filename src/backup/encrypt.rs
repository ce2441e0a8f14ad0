//! GPG adapter: encryption and decryption of artifacts on local disk are
//! delegated to the `gpg` executable, consumed as an opaque capability.

use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;
use which::which;

use crate::config::EncryptionMode;
use crate::errors::{AppError, Result};
use crate::utils;

pub const GPG_EXTENSION: &str = "gpg";

fn find_gpg() -> Result<PathBuf> {
    which("gpg").map_err(|_| {
        AppError::Config(
            "gpg executable not found in PATH. Please ensure GnuPG is installed.".to_string(),
        )
    })
}

fn run_gpg(args: &[&str]) -> Result<()> {
    let gpg = find_gpg()?;
    let output = Command::new(gpg)
        .args(args)
        .output()
        .map_err(|err| AppError::Encryption(format!("Failed to execute gpg: {err}")))?;
    if !output.status.success() {
        return Err(AppError::Encryption(format!(
            "gpg exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Encrypts the named artifact in the working directory according to `mode`,
/// returning the name of the artifact the pipeline carries forward.
pub fn encrypt_file(working_dir: &Path, file_name: &str, mode: &EncryptionMode) -> Result<String> {
    let input = working_dir.join(file_name);
    let encrypted_name = format!("{file_name}.{GPG_EXTENSION}");
    let output = working_dir.join(&encrypted_name);
    let input_str = input.to_string_lossy().into_owned();
    let output_str = output.to_string_lossy().into_owned();

    match mode {
        EncryptionMode::None => return Ok(file_name.to_string()),
        EncryptionMode::Passphrase(passphrase) => {
            info!("Encrypting backup using passphrase...");
            run_gpg(&[
                "--batch",
                "--yes",
                "--pinentry-mode",
                "loopback",
                "--passphrase",
                passphrase,
                "--cipher-algo",
                "AES256",
                "--output",
                &output_str,
                "--symmetric",
                &input_str,
            ])?;
            info!("Encrypting backup using passphrase...done");
        }
        EncryptionMode::PublicKey(key_file) => {
            info!("Encrypting backup using public key...");
            let key_str = key_file.to_string_lossy().into_owned();
            run_gpg(&[
                "--batch",
                "--yes",
                "--trust-model",
                "always",
                "--recipient-file",
                &key_str,
                "--output",
                &output_str,
                "--encrypt",
                &input_str,
            ])?;
            info!("Encrypting backup using public key...done");
        }
    }
    Ok(encrypted_name)
}

/// Decrypts a `.gpg` artifact in the working directory, returning the
/// stripped artifact name. A private key takes precedence over a passphrase;
/// with neither configured the restore cannot proceed.
pub fn decrypt_file(
    working_dir: &Path,
    file_name: &str,
    passphrase: Option<&str>,
    private_key: Option<&Path>,
) -> Result<String> {
    let plain_name = utils::remove_last_extension(file_name).to_string();
    let input = working_dir.join(file_name).to_string_lossy().into_owned();
    let output = working_dir.join(&plain_name).to_string_lossy().into_owned();

    match (private_key, passphrase) {
        (Some(key_file), passphrase) => {
            info!("Decrypting backup using private key...");
            let key_str = key_file.to_string_lossy().into_owned();
            // Re-importing an already known key is a no-op.
            let _ = run_gpg(&["--batch", "--yes", "--import", &key_str]);
            let mut args = vec!["--batch", "--yes", "--pinentry-mode", "loopback"];
            if let Some(passphrase) = passphrase {
                args.extend(["--passphrase", passphrase]);
            }
            args.extend(["--output", output.as_str(), "--decrypt", input.as_str()]);
            run_gpg(&args)?;
            info!("Decrypting backup using private key...done");
        }
        (None, Some(passphrase)) => {
            info!("Decrypting backup using passphrase...");
            run_gpg(&[
                "--batch",
                "--yes",
                "--pinentry-mode",
                "loopback",
                "--passphrase",
                passphrase,
                "--output",
                &output,
                "--decrypt",
                &input,
            ])?;
            info!("Decrypting backup using passphrase...done");
        }
        (None, None) => {
            return Err(AppError::Config(
                "Passphrase or private key required for GPG file".to_string(),
            ));
        }
    }
    Ok(plain_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_none_keeps_artifact_name() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let name = encrypt_file(dir.path(), "shop.sql.gz", &EncryptionMode::None)?;
        assert_eq!(name, "shop.sql.gz");
        Ok(())
    }

    #[test]
    fn test_decrypt_without_key_material_is_a_config_error() {
        let result = decrypt_file(Path::new("/tmp"), "shop.sql.gz.gpg", None, None);
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
