//! Credential discovery
//!
//! Two interchangeable [`CredentialSource`]s read the system certificate store:
//! - `native` - direct platform API calls (fast, complete)
//! - `scripted` - PowerShell `Cert:` drive listing (works where the native path is blocked)
//!
//! [`CredentialDiscovery`] tries the primary source and, on any failure, returns
//! whatever the fallback returns. Results are never merged.

pub mod filetime;
pub mod native;
pub mod scripted;

#[cfg(windows)]
pub mod win32;

use std::future::Future;
use std::time::Duration;
use tracing::info;

use crate::config::SignitConfig;
use crate::error::Result;
use crate::identity::{Identity, StoreScope};

pub use native::{NativeStoreReader, StoreApi};
pub use scripted::ScriptedStoreReader;

/// A backend able to list signing identities for a store scope.
pub trait CredentialSource {
    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    /// List unexpired identities with a usable signing key.
    fn enumerate(&self, scope: StoreScope) -> impl Future<Output = Result<Vec<Identity>>> + Send;
}

/// Primary source with a silent fallback.
#[derive(Debug, Clone)]
pub struct CredentialDiscovery<P = NativeStoreReader, F = ScriptedStoreReader> {
    primary: P,
    fallback: F,
}

impl Default for CredentialDiscovery {
    fn default() -> Self {
        Self::new(NativeStoreReader::default(), ScriptedStoreReader::default())
    }
}

impl CredentialDiscovery {
    /// Native reader backed by the scripting host configured in `config`.
    #[must_use]
    pub fn from_config(config: &SignitConfig) -> Self {
        Self::new(
            NativeStoreReader::default(),
            ScriptedStoreReader::new(
                config.powershell.clone(),
                Duration::from_secs(config.scripted_timeout_secs),
            ),
        )
    }
}

impl<P, F> CredentialDiscovery<P, F>
where
    P: CredentialSource + Sync,
    F: CredentialSource + Sync,
{
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }

    /// List signing identities in `scope`.
    ///
    /// Errors only when both sources fail; the fallback's error is returned.
    pub async fn discover(&self, scope: StoreScope) -> Result<Vec<Identity>> {
        match self.primary.enumerate(scope).await {
            Ok(identities) => Ok(identities),
            Err(e) => {
                info!(
                    primary = self.primary.name(),
                    fallback = self.fallback.name(),
                    error = %e,
                    "primary certificate source failed, using fallback"
                );
                self.fallback.enumerate(scope).await
            }
        }
    }
}

/// Discover signing identities with the default native/PowerShell pair.
pub async fn discover(scope: StoreScope) -> Result<Vec<Identity>> {
    CredentialDiscovery::default().discover(scope).await
}
