//! Signing identities surfaced by credential discovery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SignitError;

/// Which system certificate store to read.
///
/// Both scopes always refer to the personal ("My") logical store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StoreScope {
    #[default]
    CurrentUser,
    LocalMachine,
}

impl StoreScope {
    /// Name used in PowerShell certificate drive paths (`Cert:\<scope>\My`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CurrentUser => "CurrentUser",
            Self::LocalMachine => "LocalMachine",
        }
    }
}

impl fmt::Display for StoreScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreScope {
    type Err = SignitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("currentuser") || s.eq_ignore_ascii_case("user") {
            Ok(Self::CurrentUser)
        } else if s.eq_ignore_ascii_case("localmachine") || s.eq_ignore_ascii_case("machine") {
            Ok(Self::LocalMachine)
        } else {
            Err(SignitError::InvalidConfig(format!(
                "Unknown certificate store '{s}' (expected CurrentUser or LocalMachine)"
            )))
        }
    }
}

/// A certificate with a usable private key, eligible for code signing.
///
/// Discovery only ever returns identities that are unexpired and have a
/// signing key; the record is rebuilt on every discovery call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub subject: String,
    pub issuer: String,
    /// Uppercase hex SHA-1 of the DER encoding; passed to `signtool /sha1`.
    pub fingerprint: String,
    pub expiry: DateTime<Utc>,
    pub has_signing_key: bool,
}

impl Identity {
    /// Expiry formatted for display (`dd.mm.yyyy HH:MM`).
    #[must_use]
    pub fn expiry_display(&self) -> String {
        self.expiry.format("%d.%m.%Y %H:%M").to_string()
    }
}
