//! Live managers that serve material from PEM files and reload it when
//! the files change on disk.
//!
//! Each live manager holds an immutable snapshot delegate behind an
//! [`ArcSwap`] and swaps in a freshly built delegate when a watched file
//! changes. Trait calls load the current delegate exactly once and
//! forward to it, so a handshake in flight keeps one consistent snapshot
//! and callers never block on a reload.
//!
//! A reload that fails to parse or fails consistency checks is logged
//! and discarded, leaving the last good snapshot in service. The
//! container runtime rotates the key and the certificates as separate
//! renames, so a transiently mismatched pair is expected; the rename of
//! the second file triggers another reload that lands the matched pair.

use arc_swap::ArcSwap;
use rustls::DistinguishedName;
use rustls::crypto::CryptoProvider;
use rustls::sign::SigningKey;
use rustls_pki_types::CertificateDer;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use crate::api::{Error, KeyManager, TrustManager};
use crate::config::KeyManagerAlgorithm;
use crate::store::{IdentityStore, StoreKeyManager, StoreTrustManager, TrustStore, default_provider};
use crate::{pem, watch};

fn arm<T, F>(this: &Arc<T>, path: &Path, reload: F) -> Option<watch::WatchHandle>
where
    T: Send + Sync + 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    let weak: Weak<T> = Arc::downgrade(this);
    match watch::watch(path.to_path_buf(), move || {
        if let Some(this) = weak.upgrade() {
            reload(this.as_ref());
        }
    }) {
        Ok(handle) => Some(handle),
        Err(e) => {
            log::warn!("Hot reload disabled for {}: {}", path.display(), e);
            None
        }
    }
}

/// A [`KeyManager`] over an on-disk certificate chain and private key,
/// hot-reloading both when either file changes.
#[derive(Debug)]
pub struct FileWatchingKeyManager {
    certificates: PathBuf,
    private_key: PathBuf,
    algorithm: KeyManagerAlgorithm,
    provider: Arc<CryptoProvider>,
    delegate: ArcSwap<StoreKeyManager>,
    watchers: Mutex<Vec<watch::WatchHandle>>,
}

impl FileWatchingKeyManager {
    /// Load the identity from `certificates` and `private_key` and start
    /// watching both files.
    ///
    /// The initial load is synchronous and its failure fails
    /// construction; a manager never serves before it has material. If a
    /// file watch cannot be registered the manager still serves the
    /// loaded material, without hot reload for that file.
    pub fn new(
        certificates: PathBuf,
        private_key: PathBuf,
        algorithm: KeyManagerAlgorithm,
    ) -> Result<Arc<Self>, Error> {
        let provider = default_provider();
        let initial = load_identity(&certificates, &private_key, algorithm, &provider)?;
        log::info!(
            "Initialized key manager for {} and {}",
            private_key.display(),
            certificates.display()
        );
        let manager = Arc::new(Self {
            certificates,
            private_key,
            algorithm,
            provider,
            delegate: ArcSwap::from_pointee(initial),
            watchers: Mutex::new(Vec::new()),
        });
        let watchers = [
            arm(&manager, &manager.certificates, Self::reload),
            arm(&manager, &manager.private_key, Self::reload),
        ]
        .into_iter()
        .flatten()
        .collect();
        *manager.watchers.lock().unwrap() = watchers;
        Ok(manager)
    }

    fn reload(&self) {
        match load_identity(
            &self.certificates,
            &self.private_key,
            self.algorithm,
            &self.provider,
        ) {
            Ok(fresh) => {
                self.delegate.store(Arc::new(fresh));
                log::info!(
                    "Updated key manager for {} and {}",
                    self.private_key.display(),
                    self.certificates.display()
                );
            }
            Err(e) => log::warn!(
                "Keeping previous identity; reload of {} and {} failed: {}",
                self.private_key.display(),
                self.certificates.display(),
                e
            ),
        }
    }
}

fn load_identity(
    certificates: &Path,
    private_key: &Path,
    algorithm: KeyManagerAlgorithm,
    provider: &CryptoProvider,
) -> Result<StoreKeyManager, Error> {
    let chain = pem::certificates(certificates)?;
    let key = pem::private_key(private_key)?;
    let store = IdentityStore::identity_from(chain, key, provider)?;
    Ok(StoreKeyManager::new(store, algorithm))
}

impl KeyManager for FileWatchingKeyManager {
    fn choose_client_alias(
        &self,
        key_types: &[&str],
        issuers: Option<&[DistinguishedName]>,
    ) -> Option<String> {
        self.delegate.load().choose_client_alias(key_types, issuers)
    }

    fn choose_server_alias(
        &self,
        key_type: &str,
        issuers: Option<&[DistinguishedName]>,
    ) -> Option<String> {
        self.delegate.load().choose_server_alias(key_type, issuers)
    }

    fn certificate_chain(&self, alias: &str) -> Option<Vec<CertificateDer<'static>>> {
        self.delegate.load().certificate_chain(alias)
    }

    fn private_key(&self, alias: &str) -> Option<Arc<dyn SigningKey>> {
        self.delegate.load().private_key(alias)
    }

    fn client_aliases(&self, key_type: &str, issuers: Option<&[DistinguishedName]>) -> Vec<String> {
        self.delegate.load().client_aliases(key_type, issuers)
    }

    fn server_aliases(&self, key_type: &str, issuers: Option<&[DistinguishedName]>) -> Vec<String> {
        self.delegate.load().server_aliases(key_type, issuers)
    }
}

/// A [`TrustManager`] over an on-disk CA bundle, hot-reloading it when
/// the file changes.
#[derive(Debug)]
pub struct FileWatchingTrustManager {
    ca_certificates: PathBuf,
    provider: Arc<CryptoProvider>,
    delegate: ArcSwap<StoreTrustManager>,
    watchers: Mutex<Vec<watch::WatchHandle>>,
}

impl FileWatchingTrustManager {
    /// Load the trust bundle from `ca_certificates` and start watching
    /// the file. Initial-load failure fails construction; a later watch
    /// registration failure leaves the manager serving without hot
    /// reload.
    pub fn new(ca_certificates: PathBuf) -> Result<Arc<Self>, Error> {
        let provider = default_provider();
        let initial = load_trust(&ca_certificates, &provider)?;
        log::info!("Initialized trust manager for {}", ca_certificates.display());
        let manager = Arc::new(Self {
            ca_certificates,
            provider,
            delegate: ArcSwap::from_pointee(initial),
            watchers: Mutex::new(Vec::new()),
        });
        let watchers = arm(&manager, &manager.ca_certificates, Self::reload)
            .into_iter()
            .collect();
        *manager.watchers.lock().unwrap() = watchers;
        Ok(manager)
    }

    fn reload(&self) {
        match load_trust(&self.ca_certificates, &self.provider) {
            Ok(fresh) => {
                self.delegate.store(Arc::new(fresh));
                log::info!(
                    "Updated trust manager for {}",
                    self.ca_certificates.display()
                );
            }
            Err(e) => log::warn!(
                "Keeping previous trust material; reload of {} failed: {}",
                self.ca_certificates.display(),
                e
            ),
        }
    }
}

fn load_trust(ca_certificates: &Path, provider: &CryptoProvider) -> Result<StoreTrustManager, Error> {
    let certs = pem::trust_certificates(ca_certificates)?;
    if certs.is_empty() {
        return Err(Error::NoTrustMaterial);
    }
    Ok(StoreTrustManager::new(
        TrustStore::trust_from(certs),
        provider,
    ))
}

impl TrustManager for FileWatchingTrustManager {
    fn check_client_trusted(
        &self,
        chain: &[CertificateDer<'_>],
        auth_type: &str,
    ) -> Result<(), Error> {
        self.delegate.load().check_client_trusted(chain, auth_type)
    }

    fn check_server_trusted(
        &self,
        chain: &[CertificateDer<'_>],
        auth_type: &str,
    ) -> Result<(), Error> {
        self.delegate.load().check_server_trusted(chain, auth_type)
    }

    fn accepted_issuers(&self) -> Vec<CertificateDer<'static>> {
        self.delegate.load().accepted_issuers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata;
    use crate::testdata::{CertAndKeyFiles, certs, wait_for};

    use std::time::Duration;

    const DEADLINE: Duration = Duration::from_secs(10);

    fn served_chain(manager: &FileWatchingKeyManager) -> Option<Vec<CertificateDer<'static>>> {
        let alias = manager.choose_client_alias(&["RSA"], None)?;
        manager.certificate_chain(&alias)
    }

    #[test]
    fn serves_initial_identity() {
        let files = CertAndKeyFiles::user1().expect("fixture");
        let manager = FileWatchingKeyManager::new(
            files.cert_path(),
            files.key_path(),
            KeyManagerAlgorithm::Strict,
        )
        .expect("manager");
        assert_eq!(manager.client_aliases("RSA", None).len(), 1);
        assert_eq!(
            served_chain(&manager).expect("chain"),
            certs(testdata::USER1_CERT)
        );
    }

    #[test]
    fn reloads_rotated_identity() {
        let files = CertAndKeyFiles::user1().expect("fixture");
        let manager = FileWatchingKeyManager::new(
            files.cert_path(),
            files.key_path(),
            KeyManagerAlgorithm::Strict,
        )
        .expect("manager");
        let initial_alias = manager.choose_client_alias(&["RSA"], None).expect("alias");

        files.replace("key", testdata::USER2_KEY).expect("rotate key");
        files
            .replace("cert", testdata::USER2_CERT)
            .expect("rotate cert");
        let expected = certs(testdata::USER2_CERT);
        assert!(wait_for(DEADLINE, || {
            served_chain(&manager).as_deref() == Some(&expected)
        }));
        // A fresh snapshot carries a fresh alias.
        assert_ne!(
            manager.choose_client_alias(&["RSA"], None).expect("alias"),
            initial_alias
        );
    }

    #[test]
    fn keeps_last_good_identity_on_bad_update() {
        let files = CertAndKeyFiles::user1().expect("fixture");
        let manager = FileWatchingKeyManager::new(
            files.cert_path(),
            files.key_path(),
            KeyManagerAlgorithm::Strict,
        )
        .expect("manager");

        files
            .replace("cert", "this is not pem material")
            .expect("corrupt cert");
        std::thread::sleep(Duration::from_millis(500));
        assert_eq!(
            served_chain(&manager).expect("chain"),
            certs(testdata::USER1_CERT)
        );

        files
            .replace("cert", testdata::USER2_CERT)
            .expect("restore cert");
        files.replace("key", testdata::USER2_KEY).expect("rotate key");
        let expected = certs(testdata::USER2_CERT);
        assert!(wait_for(DEADLINE, || {
            served_chain(&manager).as_deref() == Some(&expected)
        }));
    }

    #[test]
    fn missing_identity_file_fails_construction() {
        let files = CertAndKeyFiles::user1().expect("fixture");
        let result = FileWatchingKeyManager::new(
            files.dir.path().join("no-such-cert"),
            files.key_path(),
            KeyManagerAlgorithm::Strict,
        );
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn reloads_grown_trust_bundle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bundle = dir.path().join("ca-certificates.crt");
        std::fs::write(&bundle, testdata::BUNDLE_48).expect("write bundle");
        let manager = FileWatchingTrustManager::new(bundle.clone()).expect("manager");
        assert_eq!(manager.accepted_issuers().len(), 48);

        let tmp = dir.path().join("ca-certificates.crt.tmp");
        std::fs::write(&tmp, testdata::BUNDLE_173).expect("write tmp");
        std::fs::rename(&tmp, &bundle).expect("rename");
        assert!(wait_for(DEADLINE, || manager.accepted_issuers().len() == 173));
    }

    #[test]
    fn keeps_last_good_trust_on_empty_update() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bundle = dir.path().join("ca-certificates.crt");
        std::fs::write(&bundle, testdata::CACERT).expect("write bundle");
        let manager = FileWatchingTrustManager::new(bundle.clone()).expect("manager");
        assert_eq!(manager.accepted_issuers().len(), 1);

        std::fs::write(&bundle, "").expect("truncate bundle");
        std::thread::sleep(Duration::from_millis(500));
        assert_eq!(manager.accepted_issuers().len(), 1);
    }

    #[test]
    fn trust_checks_follow_reloaded_bundle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bundle = dir.path().join("ca-certificates.crt");
        std::fs::write(&bundle, testdata::BUNDLE_48).expect("write bundle");
        let manager = FileWatchingTrustManager::new(bundle.clone()).expect("manager");

        let chain = certs(testdata::USER1_CERT);
        assert!(manager.check_server_trusted(&chain, "RSA").is_err());

        let tmp = dir.path().join("ca-certificates.crt.tmp");
        std::fs::write(&tmp, testdata::CACERT).expect("write tmp");
        std::fs::rename(&tmp, &bundle).expect("rename");
        assert!(wait_for(DEADLINE, || {
            manager.check_server_trusted(&chain, "RSA").is_ok()
        }));
    }
}
