//! Artifact signing
//!
//! Produces a detached `<artifact>.sig` next to each built artifact.

use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

use crate::core::config::SignSettings;

/// Signing errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignError {
    /// Signing tool could not be started
    #[error("Failed to run signing tool '{command}': {error}")]
    Spawn { command: String, error: String },

    /// Signing tool exited unsuccessfully
    #[error("Signing '{path}' failed: {stderr}")]
    Failed { path: PathBuf, stderr: String },

    /// Signing tool reported success but wrote no signature
    #[error("Signature for '{path}' is missing")]
    MissingSignature { path: PathBuf },

    /// Signing requested without a key
    #[error("No signing key configured")]
    NoKey,
}

/// Signs artifact files
pub trait ArtifactSigner: Send + Sync {
    /// Sign `artifact`, returning the signature path
    fn sign(&self, artifact: &Path) -> Result<PathBuf, SignError>;
}

/// Signature file path for an artifact
pub fn signature_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_owned();
    name.push(".sig");
    PathBuf::from(name)
}

/// Detached signing with GnuPG
#[derive(Debug, Clone)]
pub struct GpgSigner {
    command: String,
    key: String,
}

impl GpgSigner {
    /// Create a signer using `key`
    pub fn new(command: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            key: key.into(),
        }
    }

    /// Create a signer from settings
    ///
    /// Returns `Ok(None)` when package signing is disabled.
    pub fn from_settings(settings: &SignSettings) -> Result<Option<Self>, SignError> {
        if !settings.signs_packages() {
            return Ok(None);
        }
        let key = settings.key.as_ref().ok_or(SignError::NoKey)?;
        Ok(Some(Self::new(settings.command.clone(), key.clone())))
    }

    /// Arguments passed to the signing tool
    pub fn args(&self, artifact: &Path) -> Vec<String> {
        vec![
            "-u".to_string(),
            self.key.clone(),
            "--batch".to_string(),
            "--yes".to_string(),
            "--detach-sign".to_string(),
            artifact.display().to_string(),
        ]
    }
}

impl ArtifactSigner for GpgSigner {
    fn sign(&self, artifact: &Path) -> Result<PathBuf, SignError> {
        tracing::debug!("Signing {}", artifact.display());
        let output = Command::new(&self.command)
            .args(self.args(artifact))
            .output()
            .map_err(|e| SignError::Spawn {
                command: self.command.clone(),
                error: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(SignError::Failed {
                path: artifact.to_path_buf(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let signature = signature_path(artifact);
        if !signature.exists() {
            return Err(SignError::MissingSignature {
                path: artifact.to_path_buf(),
            });
        }
        Ok(signature)
    }
}
