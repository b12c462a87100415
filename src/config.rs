//! Configuration structures for discovery and signing.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SignitError};
use crate::identity::StoreScope;

/// Default RFC 3161 timestamp server
pub const DEFAULT_TIMESTAMP_URL: &str = "http://timestamp.digicert.com";

/// Seconds allowed for the PowerShell store listing
pub const DEFAULT_SCRIPTED_TIMEOUT_SECS: u64 = 30;

/// Scripting host used by the fallback store reader
pub const DEFAULT_POWERSHELL: &str = "powershell";

/// Well-known timestamp servers as `(display name, url)`.
pub const TIMESTAMP_SERVERS: &[(&str, &str)] = &[
    ("DigiCert", "http://timestamp.digicert.com"),
    ("Sectigo", "http://timestamp.sectigo.com"),
    ("GlobalSign", "http://timestamp.globalsign.com/tsa/r6advanced1"),
    ("Comodo", "http://timestamp.comodoca.com/rfc3161"),
    ("SSL.com", "http://ts.ssl.com"),
    ("Entrust", "http://timestamp.entrust.net/TSS/RFC3161sha2TS"),
];

/// Resolve a timestamp preset name to its URL, or pass a URL through unchanged.
///
/// Preset names match case-insensitively. Anything containing `://` is taken
/// as a URL as-is.
pub fn resolve_timestamp_server(name_or_url: &str) -> Result<String> {
    let value = name_or_url.trim();
    if value.is_empty() {
        return Err(SignitError::InvalidConfig(
            "timestamp server must not be empty".to_string(),
        ));
    }

    if value.contains("://") {
        return Ok(value.to_string());
    }

    TIMESTAMP_SERVERS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(value))
        .map(|(_, url)| (*url).to_string())
        .ok_or_else(|| {
            let known: Vec<&str> = TIMESTAMP_SERVERS.iter().map(|(name, _)| *name).collect();
            SignitError::InvalidConfig(format!(
                "Unknown timestamp server '{value}'. Use a URL or one of: {}",
                known.join(", ")
            ))
        })
}

/// Settings shared by the `list` and `sign` commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignitConfig {
    /// Explicit path to signtool.exe (searched for when absent)
    #[serde(default)]
    pub signtool_path: Option<PathBuf>,

    #[serde(default = "default_timestamp_url")]
    pub timestamp_url: String,

    #[serde(default)]
    pub store: StoreScope,

    #[serde(default = "default_scripted_timeout_secs")]
    pub scripted_timeout_secs: u64,

    #[serde(default = "default_powershell")]
    pub powershell: String,
}

impl Default for SignitConfig {
    fn default() -> Self {
        Self {
            signtool_path: None,
            timestamp_url: default_timestamp_url(),
            store: StoreScope::default(),
            scripted_timeout_secs: default_scripted_timeout_secs(),
            powershell: default_powershell(),
        }
    }
}

impl SignitConfig {
    /// Load configuration from a TOML file.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        if config.scripted_timeout_secs == 0 {
            return Err(SignitError::InvalidConfig(
                "scripted_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }
}

fn default_timestamp_url() -> String {
    DEFAULT_TIMESTAMP_URL.to_string()
}

fn default_scripted_timeout_secs() -> u64 {
    DEFAULT_SCRIPTED_TIMEOUT_SECS
}

fn default_powershell() -> String {
    DEFAULT_POWERSHELL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = SignitConfig::from_toml("").unwrap();
        assert_eq!(config.timestamp_url, DEFAULT_TIMESTAMP_URL);
        assert_eq!(config.store, StoreScope::CurrentUser);
        assert_eq!(config.scripted_timeout_secs, 30);
        assert_eq!(config.powershell, "powershell");
        assert!(config.signtool_path.is_none());
    }

    #[test]
    fn toml_overrides_fields() {
        let config = SignitConfig::from_toml(
            r#"
            signtool_path = 'C:\Tools\signtool.exe'
            timestamp_url = "http://ts.ssl.com"
            store = "LocalMachine"
            scripted_timeout_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.store, StoreScope::LocalMachine);
        assert_eq!(config.scripted_timeout_secs, 5);
        assert_eq!(config.timestamp_url, "http://ts.ssl.com");
        assert_eq!(
            config.signtool_path,
            Some(PathBuf::from(r"C:\Tools\signtool.exe"))
        );
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = SignitConfig::from_toml("scripted_timeout_secs = 0").unwrap_err();
        assert!(matches!(err, SignitError::InvalidConfig(_)));
    }

    #[test]
    fn timestamp_presets_resolve_by_name() {
        assert_eq!(
            resolve_timestamp_server("sectigo").unwrap(),
            "http://timestamp.sectigo.com"
        );
        assert_eq!(
            resolve_timestamp_server("http://tsa.example.test/rfc3161").unwrap(),
            "http://tsa.example.test/rfc3161"
        );
        assert!(resolve_timestamp_server("nope").is_err());
        assert!(resolve_timestamp_server("  ").is_err());
    }
}
