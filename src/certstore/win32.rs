//! CryptoAPI binding of [`StoreApi`].

use std::ffi::c_void;
use std::ptr::{self, NonNull};

use windows_sys::Win32::Foundation::BOOL;
use windows_sys::Win32::Security::Cryptography::*;

use super::native::{AcquiredKey, KeyKind, StoreApi};
use crate::identity::StoreScope;

const ENCODING: u32 = X509_ASN_ENCODING | PKCS_7_ASN_ENCODING;

/// Open `HCERTSTORE`.
pub struct StoreHandle(HCERTSTORE);

/// Certificate context returned by `CertFindCertificateInStore`.
pub struct CertContext(NonNull<CERT_CONTEXT>);

impl CertContext {
    fn as_ptr(&self) -> *const CERT_CONTEXT {
        self.0.as_ptr()
    }
}

/// `HCRYPTPROV` or `NCRYPT_KEY_HANDLE`, depending on [`KeyKind`].
pub struct KeyHandle(usize);

/// Reads the system "My" store with crypt32/ncrypt.
#[derive(Debug, Clone, Copy, Default)]
pub struct Win32StoreApi;

fn scope_flags(scope: StoreScope) -> u32 {
    match scope {
        StoreScope::CurrentUser => CERT_SYSTEM_STORE_CURRENT_USER,
        StoreScope::LocalMachine => CERT_SYSTEM_STORE_LOCAL_MACHINE,
    }
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(Some(0)).collect()
}

impl StoreApi for Win32StoreApi {
    type Store = StoreHandle;
    type Cert = CertContext;
    type Key = KeyHandle;

    fn open_store(&self, scope: StoreScope) -> std::result::Result<StoreHandle, String> {
        let name = wide("My");
        let store = unsafe {
            CertOpenStore(
                CERT_STORE_PROV_SYSTEM_W,
                0,
                0,
                scope_flags(scope),
                name.as_ptr().cast::<c_void>(),
            )
        };
        if store.is_null() {
            return Err(std::io::Error::last_os_error().to_string());
        }
        Ok(StoreHandle(store))
    }

    fn close_store(&self, store: StoreHandle) -> bool {
        unsafe { CertCloseStore(store.0, 0) != 0 }
    }

    fn find_next(&self, store: &StoreHandle, prev: Option<CertContext>) -> Option<CertContext> {
        // Ownership of `prev` moves into the call, which frees it.
        let prev = prev.map_or(ptr::null(), |ctx| ctx.as_ptr());
        let next = unsafe {
            CertFindCertificateInStore(store.0, ENCODING, 0, CERT_FIND_ANY, ptr::null(), prev)
        };
        NonNull::new(next).map(CertContext)
    }

    fn free_cert(&self, cert: CertContext) -> bool {
        unsafe { CertFreeCertificateContext(cert.as_ptr()) != 0 }
    }

    fn display_name(&self, cert: &CertContext, issuer: bool) -> String {
        let flags = if issuer { CERT_NAME_ISSUER_FLAG } else { 0 };
        unsafe {
            let len = CertGetNameStringW(
                cert.as_ptr(),
                CERT_NAME_SIMPLE_DISPLAY_TYPE,
                flags,
                ptr::null(),
                ptr::null_mut(),
                0,
            );
            if len <= 1 {
                return String::new();
            }

            let mut buf = vec![0u16; len as usize];
            let written = CertGetNameStringW(
                cert.as_ptr(),
                CERT_NAME_SIMPLE_DISPLAY_TYPE,
                flags,
                ptr::null(),
                buf.as_mut_ptr(),
                len,
            );
            // `written` counts the terminating NUL.
            let chars = (written as usize).saturating_sub(1).min(buf.len());
            String::from_utf16_lossy(&buf[..chars])
        }
    }

    fn not_after(&self, cert: &CertContext) -> (u32, u32) {
        unsafe {
            let info = (*cert.as_ptr()).pCertInfo;
            if info.is_null() {
                return (0, 0);
            }
            let ft = (*info).NotAfter;
            (ft.dwLowDateTime, ft.dwHighDateTime)
        }
    }

    fn encoded<'a>(&'a self, cert: &'a CertContext) -> &'a [u8] {
        unsafe {
            let ctx = &*cert.as_ptr();
            if ctx.pbCertEncoded.is_null() || ctx.cbCertEncoded == 0 {
                return &[];
            }
            std::slice::from_raw_parts(ctx.pbCertEncoded, ctx.cbCertEncoded as usize)
        }
    }

    fn acquire_key(&self, cert: &CertContext) -> Option<AcquiredKey<KeyHandle>> {
        let mut handle: usize = 0;
        let mut key_spec: u32 = 0;
        let mut caller_free: BOOL = 0;

        let ok = unsafe {
            CryptAcquireCertificatePrivateKey(
                cert.as_ptr(),
                CRYPT_ACQUIRE_SILENT_FLAG | CRYPT_ACQUIRE_CACHE_FLAG,
                ptr::null(),
                &mut handle,
                &mut key_spec,
                &mut caller_free,
            )
        };
        if ok == 0 {
            return None;
        }

        let kind = if key_spec == CERT_NCRYPT_KEY_SPEC {
            KeyKind::KeyStorage
        } else {
            KeyKind::LegacyProvider
        };

        Some(AcquiredKey {
            handle: KeyHandle(handle),
            kind,
            caller_owns: caller_free != 0 && handle != 0,
        })
    }

    fn release_key(&self, key: KeyHandle, kind: KeyKind) -> bool {
        unsafe {
            match kind {
                KeyKind::KeyStorage => NCryptFreeObject(key.0) == 0,
                KeyKind::LegacyProvider => CryptReleaseContext(key.0, 0) != 0,
            }
        }
    }
}
