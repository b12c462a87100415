//! Windows code signing: certificate discovery and batch signing with signtool
//!
//! - `certstore` - lists signing identities from the Windows "My" store, natively
//!   through CryptoAPI with a PowerShell fallback
//! - `signer` - runs signtool.exe per file and signs batches on a background task
//! - `config` - TOML settings and timestamp server presets
//! - `output` - colored terminal output for the `signit` binary
//! - `logging` - tracing subscriber setup

pub mod certstore;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod output;
pub mod signer;

// Re-export common types
pub use certstore::{CredentialDiscovery, CredentialSource, discover};
pub use config::SignitConfig;
pub use error::{Result, SignitError};
pub use identity::{Identity, StoreScope};
pub use signer::{BatchCallbacks, BatchHandle, BatchSummary, SignOutcome, Signer, SigningCommand};
