//! Signing with signtool.exe
//!
//! - `command` - the per-file `signtool sign` invocation
//! - `drain` - runs a child while draining both pipes concurrently
//! - `batch` - sequential batch signing on a background task with callbacks
//! - `locate` - finds signtool.exe on `PATH` or in Windows SDK folders

pub mod batch;
pub mod command;
pub mod drain;
pub mod locate;

use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};

pub use batch::{BatchCallbacks, BatchEvent, BatchHandle, BatchSummary, FailedFile};
pub use command::SigningCommand;
pub use drain::{ERROR_PREFIX, LineSink};

/// Result of signing one file.
///
/// `exit_code` is `-1` when signtool could not be started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignOutcome {
    pub file_path: PathBuf,
    pub succeeded: bool,
    pub exit_code: i32,
    pub captured_output: String,
    pub captured_error: String,
}

impl SignOutcome {
    /// File name for display, falling back to the full path.
    #[must_use]
    pub fn file_name(&self) -> String {
        display_name(&self.file_path)
    }
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Executes a single [`SigningCommand`].
pub trait SignRunner: Send + Sync + 'static {
    fn sign(
        &self,
        command: &SigningCommand,
        on_line: &LineSink,
    ) -> impl Future<Output = SignOutcome> + Send;
}

/// Signs files by running signtool.exe.
#[derive(Debug, Clone)]
pub struct Signer {
    signtool_path: PathBuf,
}

impl Signer {
    pub fn new(signtool_path: impl Into<PathBuf>) -> Self {
        Self {
            signtool_path: signtool_path.into(),
        }
    }

    #[must_use]
    pub fn signtool_path(&self) -> &Path {
        &self.signtool_path
    }

    /// Sign one file and wait for the result.
    pub async fn sign_file(
        &self,
        file_path: impl Into<PathBuf>,
        fingerprint: &str,
        timestamp_url: &str,
        on_line: &LineSink,
    ) -> SignOutcome {
        let command = SigningCommand::new(file_path, fingerprint, timestamp_url);
        self.sign(&command, on_line).await
    }

    /// Sign `files` in order on a background task. See [`batch::sign_all`].
    pub fn sign_all(
        &self,
        files: Vec<PathBuf>,
        fingerprint: impl Into<String>,
        timestamp_url: impl Into<String>,
        callbacks: BatchCallbacks,
    ) -> BatchHandle {
        batch::sign_all(
            std::sync::Arc::new(self.clone()),
            files,
            fingerprint.into(),
            timestamp_url.into(),
            callbacks,
        )
    }
}

impl SignRunner for Signer {
    async fn sign(&self, command: &SigningCommand, on_line: &LineSink) -> SignOutcome {
        drain::run(
            &command.target_file_path,
            command.to_command(&self.signtool_path),
            &command.display(&self.signtool_path),
            on_line,
        )
        .await
    }
}
