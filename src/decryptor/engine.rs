//! # Decryption Engine
//!
//! Boundary to the external SOPS implementation.
//!
//! [`SopsCli`] pipes the document through the `sops` binary over
//! stdin/stdout so plaintext never touches disk. The child runs with a
//! cleared environment: only `PATH` and the credentials of the selected key
//! backends are visible to it.

use crate::decryptor::backend::EngineCredentials;
use crate::decryptor::error::{classify_sops_error, DecryptError};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Document encoding understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Value for `--input-type` / `--output-type`
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Json => "json",
            DocumentFormat::Yaml => "yaml",
        }
    }

    /// Human readable name used in error messages
    pub fn label(&self) -> &'static str {
        match self {
            DocumentFormat::Json => "JSON",
            DocumentFormat::Yaml => "YAML",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[async_trait]
pub trait SopsEngine: Send + Sync + fmt::Debug {
    /// Decrypt a complete sops document, returning it in the same format
    async fn decrypt(
        &self,
        document: Vec<u8>,
        format: DocumentFormat,
        credentials: &EngineCredentials,
    ) -> Result<Vec<u8>, DecryptError>;
}

/// `sops` binary driven over stdin/stdout
#[derive(Debug, Clone)]
pub struct SopsCli {
    binary: PathBuf,
}

impl SopsCli {
    /// Use the given binary, or find `sops` on `PATH`
    pub fn locate(binary: Option<&Path>) -> Result<Self, DecryptError> {
        let binary = match binary {
            Some(path) => path.to_path_buf(),
            None => which::which("sops").map_err(|e| DecryptError::BinaryNotFound(e.to_string()))?,
        };
        debug!("Using sops binary at {:?}", binary);
        Ok(Self { binary })
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

#[async_trait]
impl SopsEngine for SopsCli {
    async fn decrypt(
        &self,
        document: Vec<u8>,
        format: DocumentFormat,
        credentials: &EngineCredentials,
    ) -> Result<Vec<u8>, DecryptError> {
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.env_clear();
        // sops shells out to gpg for PGP keys
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        for (name, value) in credentials.iter() {
            cmd.env(name, value);
        }
        // the MAC covers the whole original document, not the single
        // re-wrapped item
        cmd.arg("--decrypt")
            .arg("--ignore-mac")
            .arg("--input-type")
            .arg(format.as_str())
            .arg("--output-type")
            .arg(format.as_str())
            .arg("/dev/stdin")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(DecryptError::Spawn)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&document).await.map_err(DecryptError::Spawn)?;
            stdin.shutdown().await.map_err(DecryptError::Spawn)?;
        }

        let output = child.wait_with_output().await.map_err(DecryptError::Spawn)?;

        if output.status.success() {
            return Ok(output.stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let exit_code = output.status.code();
        let reason = classify_sops_error(&stderr, exit_code);
        warn!(
            "sops exited with {:?} ({}): {}",
            exit_code,
            reason.as_str(),
            stderr
        );
        warn!("Remediation: {}", reason.remediation());
        Err(DecryptError::Engine {
            reason,
            message: stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_names() {
        assert_eq!(DocumentFormat::Json.as_str(), "json");
        assert_eq!(DocumentFormat::Yaml.to_string(), "YAML");
    }

    #[test]
    fn test_explicit_binary_is_used_verbatim() {
        let cli = SopsCli::locate(Some(Path::new("/opt/bin/sops"))).unwrap();
        assert_eq!(cli.binary(), Path::new("/opt/bin/sops"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_spawn_error() {
        let cli = SopsCli::locate(Some(Path::new("/nonexistent/sops"))).unwrap();
        let result = cli
            .decrypt(b"{}".to_vec(), DocumentFormat::Json, &EngineCredentials::default())
            .await;
        assert!(matches!(result, Err(DecryptError::Spawn(_))));
    }
}
