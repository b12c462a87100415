//! Native certificate store reader
//!
//! Enumerates the personal ("My") store through the platform certificate API.
//! The walk is written once against [`StoreApi`] so the handle discipline can be
//! checked without a real store; [`super::win32`] provides the Windows binding.
//!
//! # Handle ownership
//!
//! - The store handle is held by [`StoreGuard`] and closed exactly once on drop.
//! - Each certificate context returned by a find call is owned by [`CertCursor`].
//!   Passing it back as the "previous" context hands it to the API; only the
//!   context still held when the walk stops early is freed explicitly.
//! - A private key acquired while probing is held by [`KeyGuard`] and released
//!   on drop when the API reports caller ownership.
//!
//! Declaration order inside [`read_store`] makes every cursor and key guard drop
//! before the store guard.

use chrono::{DateTime, Utc};
use sha1::{Digest as _, Sha1};
use std::sync::Arc;
use tracing::debug;

use super::CredentialSource;
use super::filetime::filetime_to_datetime;
use crate::error::{Result, SignitError};
use crate::identity::{Identity, StoreScope};

/// Kind of key handle returned by a private-key acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// CNG key storage handle (`NCryptFreeObject`)
    KeyStorage,
    /// Legacy CSP handle (`CryptReleaseContext`)
    LegacyProvider,
}

/// Result of a successful private-key acquisition.
#[derive(Debug)]
pub struct AcquiredKey<K> {
    pub handle: K,
    pub kind: KeyKind,
    /// The caller must release `handle`
    pub caller_owns: bool,
}

/// Platform certificate-store calls used by [`read_store`].
///
/// Raw handles never leave an implementation of this trait except through the
/// guards in this module.
pub trait StoreApi {
    type Store;
    type Cert;
    type Key;

    /// Open the personal store for `scope`.
    fn open_store(&self, scope: StoreScope) -> std::result::Result<Self::Store, String>;

    /// Close a store handle. Returns false if the platform reported a failure.
    fn close_store(&self, store: Self::Store) -> bool;

    /// Find the next certificate after `prev` (any certificate matches).
    ///
    /// `prev` is consumed: the API frees it as part of the call.
    fn find_next(&self, store: &Self::Store, prev: Option<Self::Cert>) -> Option<Self::Cert>;

    /// Free a context that is not going to be passed back to [`StoreApi::find_next`].
    fn free_cert(&self, cert: Self::Cert) -> bool;

    /// Simple display name of the subject, or the issuer when `issuer` is set.
    fn display_name(&self, cert: &Self::Cert, issuer: bool) -> String;

    /// `NotAfter` as (low, high) halves of the 100ns tick count.
    fn not_after(&self, cert: &Self::Cert) -> (u32, u32);

    /// DER encoding of the certificate.
    fn encoded<'a>(&'a self, cert: &'a Self::Cert) -> &'a [u8];

    /// Silent, cached acquisition of the certificate's private key.
    fn acquire_key(&self, cert: &Self::Cert) -> Option<AcquiredKey<Self::Key>>;

    /// Release a key handle previously returned with `caller_owns` set.
    fn release_key(&self, key: Self::Key, kind: KeyKind) -> bool;
}

/// Owns an open store handle.
pub struct StoreGuard<'a, A: StoreApi> {
    api: &'a A,
    store: Option<A::Store>,
}

impl<'a, A: StoreApi> StoreGuard<'a, A> {
    pub fn open(api: &'a A, scope: StoreScope) -> Result<Self> {
        let store = api.open_store(scope).map_err(|e| {
            SignitError::StoreUnavailable(format!("{}\\My: {e}", scope.as_str()))
        })?;
        debug!(%scope, "opened certificate store");
        Ok(Self {
            api,
            store: Some(store),
        })
    }

    fn handle(&self) -> &A::Store {
        // Only `drop` takes the handle out.
        self.store.as_ref().unwrap_or_else(|| unreachable!("store guard used after close"))
    }
}

impl<A: StoreApi> Drop for StoreGuard<'_, A> {
    fn drop(&mut self) {
        if let Some(store) = self.store.take()
            && !self.api.close_store(store)
        {
            debug!("certificate store close reported failure");
        }
    }
}

/// Walks the certificates of an open store.
pub struct CertCursor<'s, 'a, A: StoreApi> {
    store: &'s StoreGuard<'a, A>,
    current: Option<A::Cert>,
}

impl<'s, 'a, A: StoreApi> CertCursor<'s, 'a, A> {
    pub fn new(store: &'s StoreGuard<'a, A>) -> Self {
        Self {
            store,
            current: None,
        }
    }

    /// Move to the next certificate, handing the current one back to the API.
    pub fn advance(&mut self) -> Option<&A::Cert> {
        let prev = self.current.take();
        self.current = self.store.api.find_next(self.store.handle(), prev);
        self.current.as_ref()
    }
}

impl<A: StoreApi> Drop for CertCursor<'_, '_, A> {
    fn drop(&mut self) {
        if let Some(cert) = self.current.take()
            && !self.store.api.free_cert(cert)
        {
            debug!("freeing terminal certificate context reported failure");
        }
    }
}

/// Releases a caller-owned private key handle on drop.
pub struct KeyGuard<'a, A: StoreApi> {
    api: &'a A,
    key: Option<AcquiredKey<A::Key>>,
}

impl<A: StoreApi> Drop for KeyGuard<'_, A> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take()
            && key.caller_owns
            && !self.api.release_key(key.handle, key.kind)
        {
            // Attempted once; a failed release does not fail discovery.
            debug!(kind = ?key.kind, "private key release reported failure");
        }
    }
}

/// Probe whether `cert` has a usable signing key, releasing whatever was acquired.
pub fn has_signing_key<A: StoreApi>(api: &A, cert: &A::Cert) -> bool {
    match api.acquire_key(cert) {
        Some(key) => {
            drop(KeyGuard {
                api,
                key: Some(key),
            });
            true
        }
        None => false,
    }
}

/// Uppercase hex SHA-1 of the encoded certificate.
#[must_use]
pub fn fingerprint(encoded: &[u8]) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(encoded);
    hex::encode_upper(sha1.finalize())
}

/// Enumerate signing identities in `scope` that are valid at `now`.
///
/// Fails only when the store cannot be opened.
pub fn read_store<A: StoreApi>(
    api: &A,
    scope: StoreScope,
    now: DateTime<Utc>,
) -> Result<Vec<Identity>> {
    let store = StoreGuard::open(api, scope)?;
    let mut cursor = CertCursor::new(&store);
    let mut identities = Vec::new();
    let mut seen = 0usize;

    while let Some(cert) = cursor.advance() {
        seen += 1;

        let (low, high) = api.not_after(cert);
        let expiry = filetime_to_datetime(low, high);
        if expiry <= now {
            continue;
        }
        if !has_signing_key(api, cert) {
            continue;
        }

        identities.push(Identity {
            subject: api.display_name(cert, false),
            issuer: api.display_name(cert, true),
            fingerprint: fingerprint(api.encoded(cert)),
            expiry,
            has_signing_key: true,
        });
    }

    debug!(%scope, seen, eligible = identities.len(), "native store walk finished");
    Ok(identities)
}

/// Stand-in for platforms without a native certificate store.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedStoreApi;

impl StoreApi for UnsupportedStoreApi {
    type Store = std::convert::Infallible;
    type Cert = std::convert::Infallible;
    type Key = std::convert::Infallible;

    fn open_store(&self, _scope: StoreScope) -> std::result::Result<Self::Store, String> {
        Err(format!(
            "native certificate store is not available on {}",
            std::env::consts::OS
        ))
    }

    fn close_store(&self, store: Self::Store) -> bool {
        match store {}
    }

    fn find_next(&self, store: &Self::Store, _prev: Option<Self::Cert>) -> Option<Self::Cert> {
        match *store {}
    }

    fn free_cert(&self, cert: Self::Cert) -> bool {
        match cert {}
    }

    fn display_name(&self, cert: &Self::Cert, _issuer: bool) -> String {
        match *cert {}
    }

    fn not_after(&self, cert: &Self::Cert) -> (u32, u32) {
        match *cert {}
    }

    fn encoded<'a>(&'a self, cert: &'a Self::Cert) -> &'a [u8] {
        match *cert {}
    }

    fn acquire_key(&self, cert: &Self::Cert) -> Option<AcquiredKey<Self::Key>> {
        match *cert {}
    }

    fn release_key(&self, key: Self::Key, _kind: KeyKind) -> bool {
        match key {}
    }
}

#[cfg(windows)]
pub type PlatformStoreApi = super::win32::Win32StoreApi;

#[cfg(not(windows))]
pub type PlatformStoreApi = UnsupportedStoreApi;

/// [`CredentialSource`] backed by the platform certificate API.
///
/// The walk runs on the blocking pool; a panic inside it surfaces as an error.
#[derive(Debug, Clone)]
pub struct NativeStoreReader<A = PlatformStoreApi> {
    api: Arc<A>,
}

impl Default for NativeStoreReader<PlatformStoreApi> {
    fn default() -> Self {
        Self::new(PlatformStoreApi::default())
    }
}

impl<A> NativeStoreReader<A> {
    pub fn new(api: A) -> Self {
        Self { api: Arc::new(api) }
    }

    #[cfg(test)]
    pub(crate) fn api(&self) -> &A {
        &self.api
    }
}

impl<A> CredentialSource for NativeStoreReader<A>
where
    A: StoreApi + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "native"
    }

    async fn enumerate(&self, scope: StoreScope) -> Result<Vec<Identity>> {
        let api = Arc::clone(&self.api);
        tokio::task::spawn_blocking(move || read_store(api.as_ref(), scope, Utc::now()))
            .await
            .map_err(|e| SignitError::StoreUnavailable(format!("native store reader aborted: {e}")))?
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Counting in-memory store used to check the handle discipline.

    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub struct FakeCert {
        pub subject: String,
        pub issuer: String,
        pub der: Vec<u8>,
        pub not_after: DateTime<Utc>,
        pub key: Option<KeyKind>,
        pub caller_owns: bool,
    }

    impl FakeCert {
        pub fn new(subject: &str, not_after: DateTime<Utc>, key: Option<KeyKind>) -> Self {
            Self {
                subject: subject.to_string(),
                issuer: format!("{subject} CA"),
                der: subject.as_bytes().to_vec(),
                not_after,
                key,
                caller_owns: true,
            }
        }
    }

    #[derive(Debug, Default, Clone, PartialEq, Eq)]
    pub struct Counters {
        pub opens: usize,
        pub closes: usize,
        pub contexts_returned: usize,
        pub contexts_consumed: usize,
        pub contexts_freed: usize,
        pub keys_acquired_owned: usize,
        pub keys_released: usize,
        pub released_kinds: Vec<KeyKind>,
    }

    #[derive(Debug, Default)]
    pub struct FakeStoreApi {
        pub certs: Vec<FakeCert>,
        pub fail_open: bool,
        pub counters: Mutex<Counters>,
    }

    impl FakeStoreApi {
        pub fn with_certs(certs: Vec<FakeCert>) -> Self {
            Self {
                certs,
                ..Self::default()
            }
        }

        pub fn counters(&self) -> Counters {
            self.counters.lock().unwrap().clone()
        }
    }

    pub struct FakeKey(pub KeyKind);

    impl StoreApi for FakeStoreApi {
        type Store = ();
        type Cert = usize;
        type Key = FakeKey;

        fn open_store(&self, _scope: StoreScope) -> std::result::Result<(), String> {
            if self.fail_open {
                return Err("access denied".to_string());
            }
            self.counters.lock().unwrap().opens += 1;
            Ok(())
        }

        fn close_store(&self, _store: ()) -> bool {
            self.counters.lock().unwrap().closes += 1;
            true
        }

        fn find_next(&self, _store: &(), prev: Option<usize>) -> Option<usize> {
            let mut counters = self.counters.lock().unwrap();
            let next = match prev {
                Some(index) => {
                    counters.contexts_consumed += 1;
                    index + 1
                }
                None => 0,
            };
            if next < self.certs.len() {
                counters.contexts_returned += 1;
                Some(next)
            } else {
                None
            }
        }

        fn free_cert(&self, _cert: usize) -> bool {
            self.counters.lock().unwrap().contexts_freed += 1;
            true
        }

        fn display_name(&self, cert: &usize, issuer: bool) -> String {
            let cert = &self.certs[*cert];
            if issuer {
                cert.issuer.clone()
            } else {
                cert.subject.clone()
            }
        }

        fn not_after(&self, cert: &usize) -> (u32, u32) {
            let dt = self.certs[*cert].not_after;
            let ticks = super::super::filetime::EPOCH_DELTA_TICKS
                + dt.timestamp() as u64 * super::super::filetime::TICKS_PER_SECOND;
            (ticks as u32, (ticks >> 32) as u32)
        }

        fn encoded<'a>(&'a self, cert: &'a usize) -> &'a [u8] {
            &self.certs[*cert].der
        }

        fn acquire_key(&self, cert: &usize) -> Option<AcquiredKey<FakeKey>> {
            let cert = &self.certs[*cert];
            let kind = cert.key?;
            if cert.caller_owns {
                self.counters.lock().unwrap().keys_acquired_owned += 1;
            }
            Some(AcquiredKey {
                handle: FakeKey(kind),
                kind,
                caller_owns: cert.caller_owns,
            })
        }

        fn release_key(&self, key: FakeKey, kind: KeyKind) -> bool {
            assert_eq!(key.0, kind);
            let mut counters = self.counters.lock().unwrap();
            counters.keys_released += 1;
            counters.released_kinds.push(kind);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::{FakeCert, FakeStoreApi};
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn only_unexpired_certificates_with_keys_are_returned() {
        let api = FakeStoreApi::with_certs(vec![
            FakeCert::new("Expired", now() - Duration::days(1), Some(KeyKind::KeyStorage)),
            FakeCert::new("No Key", now() + Duration::days(30), None),
            FakeCert::new("Signer", now() + Duration::days(30), Some(KeyKind::KeyStorage)),
        ]);

        let identities = read_store(&api, StoreScope::CurrentUser, now()).unwrap();

        assert_eq!(identities.len(), 1);
        let identity = &identities[0];
        assert_eq!(identity.subject, "Signer");
        assert_eq!(identity.issuer, "Signer CA");
        assert_eq!(identity.fingerprint, fingerprint(b"Signer"));
        assert_eq!(identity.expiry, now() + Duration::days(30));
        assert!(identity.has_signing_key);
    }

    #[test]
    fn expiry_equal_to_now_is_excluded() {
        let api = FakeStoreApi::with_certs(vec![FakeCert::new(
            "Boundary",
            now(),
            Some(KeyKind::LegacyProvider),
        )]);

        assert!(read_store(&api, StoreScope::CurrentUser, now()).unwrap().is_empty());
    }

    #[test]
    fn open_failure_is_store_unavailable() {
        let api = FakeStoreApi {
            fail_open: true,
            ..FakeStoreApi::default()
        };

        let err = read_store(&api, StoreScope::LocalMachine, now()).unwrap_err();
        assert!(matches!(err, SignitError::StoreUnavailable(ref msg) if msg.contains("LocalMachine\\My")));
        assert_eq!(api.counters().closes, 0);
    }

    #[test]
    fn store_is_closed_once_and_contexts_balance() {
        let api = FakeStoreApi::with_certs(vec![
            FakeCert::new("A", now() + Duration::days(1), Some(KeyKind::KeyStorage)),
            FakeCert::new("B", now() - Duration::days(1), None),
        ]);

        read_store(&api, StoreScope::CurrentUser, now()).unwrap();
        let counters = api.counters();

        assert_eq!(counters.opens, 1);
        assert_eq!(counters.closes, 1);
        // Every returned context was either handed back to find_next or freed.
        assert_eq!(
            counters.contexts_returned,
            counters.contexts_consumed + counters.contexts_freed
        );
        assert_eq!(counters.contexts_freed, 0);
    }

    #[test]
    fn early_exit_frees_the_held_context() {
        let api = FakeStoreApi::with_certs(vec![
            FakeCert::new("A", now() + Duration::days(1), None),
            FakeCert::new("B", now() + Duration::days(1), None),
        ]);

        {
            let store = StoreGuard::open(&api, StoreScope::CurrentUser).unwrap();
            let mut cursor = CertCursor::new(&store);
            assert!(cursor.advance().is_some());
        }

        let counters = api.counters();
        assert_eq!(counters.contexts_returned, 1);
        assert_eq!(counters.contexts_freed, 1);
        assert_eq!(counters.closes, 1);
    }

    #[test]
    fn key_release_routes_by_kind() {
        let api = FakeStoreApi::with_certs(vec![
            FakeCert::new("Cng", now() + Duration::days(1), Some(KeyKind::KeyStorage)),
            FakeCert::new("Csp", now() + Duration::days(1), Some(KeyKind::LegacyProvider)),
        ]);

        read_store(&api, StoreScope::CurrentUser, now()).unwrap();

        assert_eq!(
            api.counters().released_kinds,
            vec![KeyKind::KeyStorage, KeyKind::LegacyProvider]
        );
    }

    #[test]
    fn keys_not_owned_by_caller_are_not_released() {
        let mut cert = FakeCert::new("Cached", now() + Duration::days(1), Some(KeyKind::KeyStorage));
        cert.caller_owns = false;
        let api = FakeStoreApi::with_certs(vec![cert]);

        let identities = read_store(&api, StoreScope::CurrentUser, now()).unwrap();

        assert_eq!(identities.len(), 1);
        assert_eq!(api.counters().keys_released, 0);
    }

    #[test]
    fn acquired_keys_balance_over_many_cycles() {
        let api = FakeStoreApi::with_certs(vec![
            FakeCert::new("NoKey", now() + Duration::days(1), None),
            FakeCert::new("Cng", now() + Duration::days(1), Some(KeyKind::KeyStorage)),
            FakeCert::new("Csp", now() + Duration::days(1), Some(KeyKind::LegacyProvider)),
            FakeCert::new("Expired", now() - Duration::days(1), Some(KeyKind::KeyStorage)),
        ]);

        for _ in 0..1_000 {
            assert_eq!(read_store(&api, StoreScope::CurrentUser, now()).unwrap().len(), 2);
        }

        let counters = api.counters();
        assert_eq!(counters.keys_acquired_owned, 2_000);
        assert_eq!(counters.keys_acquired_owned, counters.keys_released);
        assert_eq!(counters.opens, counters.closes);
        assert_eq!(
            counters.contexts_returned,
            counters.contexts_consumed + counters.contexts_freed
        );
    }

    #[test]
    fn fingerprint_is_stable_uppercase_sha1() {
        let first = fingerprint(b"certificate bytes");
        let second = fingerprint(b"certificate bytes");

        assert_eq!(first, second);
        assert_eq!(first.len(), 40);
        assert!(first.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        // SHA-1("abc")
        assert_eq!(fingerprint(b"abc"), "A9993E364706816ABA3E25717850C26C9CD0D89D");
    }

    #[test]
    fn unsupported_platform_reports_store_unavailable() {
        let err = read_store(&UnsupportedStoreApi, StoreScope::CurrentUser, now()).unwrap_err();
        assert!(matches!(err, SignitError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn reader_runs_walk_on_blocking_pool() {
        let reader = NativeStoreReader::new(FakeStoreApi::with_certs(vec![FakeCert::new(
            "Signer",
            Utc::now() + Duration::days(365),
            Some(KeyKind::KeyStorage),
        )]));

        let identities = reader.enumerate(StoreScope::CurrentUser).await.unwrap();

        assert_eq!(identities.len(), 1);
        assert_eq!(reader.api().counters().closes, 1);
    }
}
