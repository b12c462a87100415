//! Run a child process while draining stdout and stderr concurrently.
//!
//! Each pipe gets its own reader task so a child blocked on a full stderr pipe
//! can never stall behind a parent waiting on stdout (or the reverse). Both
//! readers are joined before the outcome is built.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::debug;

use super::SignOutcome;
use crate::error::SignitError;

/// Receives log lines as they are produced.
pub type LineSink = Arc<dyn Fn(String) + Send + Sync>;

/// Prefix for lines read from stdout.
pub const OUTPUT_PREFIX: &str = "  ";

/// Prefix for lines read from stderr and for launch failures.
pub const ERROR_PREFIX: &str = "  [ERROR] ";

/// Exit code reported when the process could not be started or awaited.
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = -1;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// A sink that drops every line.
#[must_use]
pub fn discard_lines() -> LineSink {
    Arc::new(|_| {})
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Stdout,
    Stderr,
}

impl Channel {
    fn prefix(self) -> &'static str {
        match self {
            Self::Stdout => OUTPUT_PREFIX,
            Self::Stderr => ERROR_PREFIX,
        }
    }
}

/// Read `stream` to EOF, keeping and forwarding every non-empty line.
async fn read_lines<R>(stream: R, channel: Channel, on_line: LineSink) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut lines = Vec::new();
    let mut raw = Vec::new();

    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {
                // signtool writes in the console code page; keep what decodes.
                let text = String::from_utf8_lossy(&raw);
                let line = text.trim_end_matches(['\n', '\r']);
                if line.is_empty() {
                    continue;
                }
                on_line(format!("{}{line}", channel.prefix()));
                lines.push(line.to_string());
            }
            Err(e) => {
                debug!(?channel, error = %e, "pipe read failed, stopping reader");
                break;
            }
        }
    }

    lines
}

fn spawn_reader<R>(stream: Option<R>, channel: Channel, on_line: &LineSink) -> JoinHandle<Vec<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let on_line = Arc::clone(on_line);
    tokio::spawn(async move {
        match stream {
            Some(stream) => read_lines(stream, channel, on_line).await,
            None => Vec::new(),
        }
    })
}

async fn join_reader(handle: JoinHandle<Vec<String>>) -> Vec<String> {
    handle.await.unwrap_or_else(|e| {
        debug!(error = %e, "pipe reader task failed");
        Vec::new()
    })
}

fn launch_failure(file_path: PathBuf, message: String, on_line: &LineSink) -> SignOutcome {
    on_line(format!("{ERROR_PREFIX}{message}"));
    SignOutcome {
        file_path,
        succeeded: false,
        exit_code: LAUNCH_FAILURE_EXIT_CODE,
        captured_output: String::new(),
        captured_error: message,
    }
}

/// Run `command` for `file_path`, streaming its output to `on_line`.
///
/// `description` is announced before launch. Never fails: launch problems
/// come back as an outcome with exit code `-1`.
pub async fn run(
    file_path: &Path,
    mut command: tokio::process::Command,
    description: &str,
    on_line: &LineSink,
) -> SignOutcome {
    on_line(format!("Command: {description}"));

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(windows)]
    command.creation_flags(CREATE_NO_WINDOW);

    let program = command.as_std().get_program().to_string_lossy().into_owned();
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let message = SignitError::SignProcessLaunch(format!("{program} not found")).to_string();
            return launch_failure(file_path.to_path_buf(), message, on_line);
        }
        Err(e) => {
            let message = format!("Unexpected error: {e}");
            return launch_failure(file_path.to_path_buf(), message, on_line);
        }
    };

    let stdout = spawn_reader(child.stdout.take(), Channel::Stdout, on_line);
    let stderr = spawn_reader(child.stderr.take(), Channel::Stderr, on_line);

    let status = child.wait().await;
    let stdout_lines = join_reader(stdout).await;
    let mut stderr_lines = join_reader(stderr).await;

    let exit_code = match status {
        Ok(status) => status.code().unwrap_or(LAUNCH_FAILURE_EXIT_CODE),
        Err(e) => {
            let message = format!("Unexpected error: {e}");
            on_line(format!("{ERROR_PREFIX}{message}"));
            stderr_lines.push(message);
            LAUNCH_FAILURE_EXIT_CODE
        }
    };

    debug!(file = %file_path.display(), exit_code, "signing process finished");

    SignOutcome {
        file_path: file_path.to_path_buf(),
        succeeded: exit_code == 0,
        exit_code,
        captured_output: stdout_lines.join("\n"),
        captured_error: stderr_lines.join("\n"),
    }
}
