//! signtool command line for a single file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Digest algorithm passed to both `/fd` and `/td`.
pub const DIGEST_ALGORITHM: &str = "sha256";

/// One `signtool sign` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningCommand {
    pub target_file_path: PathBuf,
    /// SHA-1 thumbprint of the signing certificate (`/sha1`)
    pub fingerprint: String,
    /// RFC 3161 timestamp server (`/tr`)
    pub timestamp_server_url: String,
    /// File digest (`/fd`)
    pub file_digest: &'static str,
    /// Timestamp digest (`/td`)
    pub timestamp_digest: &'static str,
}

impl SigningCommand {
    pub fn new(
        target_file_path: impl Into<PathBuf>,
        fingerprint: impl Into<String>,
        timestamp_server_url: impl Into<String>,
    ) -> Self {
        Self {
            target_file_path: target_file_path.into(),
            fingerprint: fingerprint.into(),
            timestamp_server_url: timestamp_server_url.into(),
            file_digest: DIGEST_ALGORITHM,
            timestamp_digest: DIGEST_ALGORITHM,
        }
    }

    /// Arguments following the signtool executable.
    #[must_use]
    pub fn args(&self) -> Vec<OsString> {
        vec![
            "sign".into(),
            "/sha1".into(),
            self.fingerprint.clone().into(),
            "/tr".into(),
            self.timestamp_server_url.clone().into(),
            "/td".into(),
            self.timestamp_digest.into(),
            "/fd".into(),
            self.file_digest.into(),
            self.target_file_path.clone().into_os_string(),
        ]
    }

    /// Build the process command for `signtool`.
    pub fn to_command(&self, signtool: &Path) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(signtool);
        command.args(self.args());
        command
    }

    /// Human-readable rendering of the full command line.
    #[must_use]
    pub fn display(&self, signtool: &Path) -> String {
        let mut parts = vec![signtool.to_string_lossy().into_owned()];
        parts.extend(self.args().iter().map(|arg| arg.to_string_lossy().into_owned()));
        parts.join(" ")
    }
}
