//! PowerShell fallback for reading the certificate store
//!
//! Lists `Cert:\<scope>\My` through the `Cert:` drive, keeping only unexpired
//! certificates with a private key, and reads the result back as compact JSON.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tracing::debug;

use super::CredentialSource;
use crate::config::{DEFAULT_POWERSHELL, DEFAULT_SCRIPTED_TIMEOUT_SECS};
use crate::error::{Result, SignitError};
use crate::identity::{Identity, StoreScope};

/// Listing script; `{scope}` is replaced with the store scope.
///
/// Redirected output is forced to UTF-8; the console code page would mangle
/// non-ASCII subject names.
const LIST_SCRIPT: &str = r#"
[Console]::OutputEncoding = [System.Text.Encoding]::UTF8
$certs = Get-ChildItem -Path "Cert:\{scope}\My" |
    Where-Object { $_.HasPrivateKey -eq $true -and $_.NotAfter -gt (Get-Date) } |
    Select-Object Subject, Issuer, Thumbprint,
        @{Name='NotAfter'; Expression={$_.NotAfter.ToString('o')}}
$certs | ConvertTo-Json -Compress
"#;

/// `ConvertTo-Json` emits a bare object for a single result.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> From<OneOrMany<T>> for Vec<T> {
    fn from(value: OneOrMany<T>) -> Self {
        match value {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedCert {
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    issuer: Option<String>,
    #[serde(default)]
    thumbprint: Option<String>,
    not_after: String,
}

impl ListedCert {
    fn into_identity(self) -> Result<Identity> {
        Ok(Identity {
            subject: self.subject.unwrap_or_default(),
            issuer: self.issuer.unwrap_or_default(),
            fingerprint: self.thumbprint.unwrap_or_default(),
            expiry: parse_expiry(&self.not_after)?,
            // The listing script already filtered on HasPrivateKey.
            has_signing_key: true,
        })
    }
}

/// Parse a round-trip (`'o'`) timestamp. A value without an offset is UTC.
pub fn parse_expiry(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| SignitError::ExternalToolError(format!("unparseable NotAfter '{value}': {e}")))
}

/// Turn the script's stdout into identities.
///
/// Empty output and a literal `null` both mean "no certificates".
pub fn parse_listing(stdout: &str) -> Result<Vec<Identity>> {
    let output = stdout.trim();
    if output.is_empty() || output == "null" {
        return Ok(Vec::new());
    }

    let listed: Vec<ListedCert> = serde_json::from_str::<OneOrMany<ListedCert>>(output)?.into();
    listed.into_iter().map(ListedCert::into_identity).collect()
}

/// Run `command` to completion within `timeout`, returning its stdout.
///
/// Nonzero exit becomes [`SignitError::ExternalToolError`] carrying stderr;
/// the child is killed if the deadline passes.
pub async fn run_tool(
    mut command: tokio::process::Command,
    tool: &str,
    timeout: Duration,
) -> Result<String> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|e| {
        SignitError::ExternalToolError(format!("Failed to execute {tool}: {e}"))
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
            return Err(SignitError::ExternalToolTimeout {
                tool: tool.to_string(),
                seconds: timeout.as_secs(),
            });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SignitError::ExternalToolError(format!(
            "{tool} exited with {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// [`CredentialSource`] that shells out to PowerShell.
#[derive(Debug, Clone)]
pub struct ScriptedStoreReader {
    program: String,
    timeout: Duration,
}

impl Default for ScriptedStoreReader {
    fn default() -> Self {
        Self::new(DEFAULT_POWERSHELL, Duration::from_secs(DEFAULT_SCRIPTED_TIMEOUT_SECS))
    }
}

impl ScriptedStoreReader {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    #[must_use]
    pub fn script(scope: StoreScope) -> String {
        LIST_SCRIPT.replace("{scope}", scope.as_str())
    }

    fn command(&self, scope: StoreScope) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command.args(["-NoProfile", "-NonInteractive", "-Command"]);
        command.arg(Self::script(scope));
        command
    }
}

impl CredentialSource for ScriptedStoreReader {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn enumerate(&self, scope: StoreScope) -> Result<Vec<Identity>> {
        debug!(program = %self.program, %scope, "listing certificates via scripting host");
        let stdout = run_tool(self.command(scope), &self.program, self.timeout).await?;
        parse_listing(&stdout)
    }
}
