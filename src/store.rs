//! In-memory identity and trust stores, and the platform-backed managers
//! built over them.
//!
//! A store maps generated aliases to entries: one private-key entry with
//! its certificate chain for an identity store, one trusted certificate
//! per entry for a trust store. Aliases come from a process-wide monotonic
//! counter and exist only for downstream lookup; nothing cryptographic
//! hangs off them and they do not survive a restart.
//!
//! [`StoreKeyManager`] and [`StoreTrustManager`] are the immutable
//! delegates the live managers in [`crate::files`] swap atomically: each
//! is a complete snapshot built from one on-disk state.

use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::server::ParsedCertificate;
use rustls::sign::{CertifiedKey, SigningKey};
use rustls::{DistinguishedName, RootCertStore};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, UnixTime};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use x509_parser::prelude::{FromDer, X509Certificate};
use x509_parser::public_key::PublicKey;

use crate::api::{Error, KeyManager, TrustManager};
use crate::config::KeyManagerAlgorithm;

static ALIAS_COUNTER: AtomicU32 = AtomicU32::new(0);

fn next_alias() -> String {
    format!("container-{:03}", ALIAS_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// The process-default [`CryptoProvider`] if one is installed, otherwise
/// the `aws-lc-rs` default.
pub(crate) fn default_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

fn key_type_of(der: &CertificateDer<'_>) -> Option<&'static str> {
    let (_, cert) = X509Certificate::from_der(der.as_ref()).ok()?;
    match cert.public_key().parsed().ok()? {
        PublicKey::RSA(_) => Some("RSA"),
        PublicKey::EC(_) => Some("EC"),
        PublicKey::DSA(_) => Some("DSA"),
        _ => None,
    }
}

fn issuer_of(der: &CertificateDer<'_>) -> Option<Vec<u8>> {
    let (_, cert) = X509Certificate::from_der(der.as_ref()).ok()?;
    Some(cert.tbs_certificate.issuer.as_raw().to_vec())
}

#[derive(Debug)]
struct KeyEntry {
    alias: String,
    certified: Arc<CertifiedKey>,
    key_type: Option<&'static str>,
    /// DER-encoded issuer names of every certificate in the chain, for
    /// matching against a peer's acceptable-issuer hints.
    issuers: Vec<Vec<u8>>,
}

impl KeyEntry {
    fn matches(&self, key_type: &str, issuers: Option<&[DistinguishedName]>, strict: bool) -> bool {
        if self.key_type != Some(key_type) {
            return false;
        }
        if !strict {
            return true;
        }
        match issuers {
            None => true,
            Some(acceptable) => acceptable
                .iter()
                .any(|dn| self.issuers.iter().any(|issuer| issuer == dn.as_ref())),
        }
    }
}

/// A store holding private-key entries with their certificate chains.
#[derive(Debug, Default)]
pub struct IdentityStore {
    entries: Vec<KeyEntry>,
}

impl IdentityStore {
    /// A store with no entries. Backs the platform-default key manager
    /// until [`crate::factory::KeyManagerFactory::init`] supplies one.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a store with a single private-key entry from `chain`
    /// (end-entity first, order preserved) and `key`.
    ///
    /// Fails with [`Error::KeyMismatch`] if the public key in `chain[0]`
    /// does not correspond to `key`, and with [`Error::NoManagerAvailable`]
    /// if the platform crypto provider cannot load the key at all.
    pub fn identity_from(
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        provider: &CryptoProvider,
    ) -> Result<Self, Error> {
        let signing_key = provider
            .key_provider
            .load_private_key(key)
            .map_err(|_| Error::NoManagerAvailable)?;
        let key_type = chain.first().and_then(key_type_of);
        let issuers = chain.iter().filter_map(issuer_of).collect();
        let certified = CertifiedKey::new(chain, signing_key);
        certified.keys_match().map_err(|_| Error::KeyMismatch)?;
        Ok(Self {
            entries: vec![KeyEntry {
                alias: next_alias(),
                certified: Arc::new(certified),
                key_type,
                issuers,
            }],
        })
    }
}

/// A store holding one trusted CA certificate per entry.
#[derive(Debug, Default)]
pub struct TrustStore {
    entries: Vec<(String, CertificateDer<'static>)>,
}

impl TrustStore {
    /// Build a store with one entry per certificate, each under a fresh
    /// alias.
    pub fn trust_from(certs: Vec<CertificateDer<'static>>) -> Self {
        Self {
            entries: certs
                .into_iter()
                .map(|cert| (next_alias(), cert))
                .collect(),
        }
    }

    /// Number of trusted certificates in the store.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the store holds no certificates.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An immutable [`KeyManager`] over an [`IdentityStore`].
#[derive(Debug)]
pub struct StoreKeyManager {
    store: IdentityStore,
    algorithm: KeyManagerAlgorithm,
}

impl StoreKeyManager {
    /// Wrap `store` with the alias-selection behavior of `algorithm`.
    pub fn new(store: IdentityStore, algorithm: KeyManagerAlgorithm) -> Self {
        Self { store, algorithm }
    }

    fn aliases(&self, key_type: &str, issuers: Option<&[DistinguishedName]>) -> Vec<String> {
        let strict = self.algorithm == KeyManagerAlgorithm::Strict;
        self.store
            .entries
            .iter()
            .filter(|e| e.matches(key_type, issuers, strict))
            .map(|e| e.alias.clone())
            .collect()
    }

    fn entry(&self, alias: &str) -> Option<&KeyEntry> {
        self.store.entries.iter().find(|e| e.alias == alias)
    }
}

impl KeyManager for StoreKeyManager {
    fn choose_client_alias(
        &self,
        key_types: &[&str],
        issuers: Option<&[DistinguishedName]>,
    ) -> Option<String> {
        let strict = self.algorithm == KeyManagerAlgorithm::Strict;
        key_types.iter().find_map(|kt| {
            self.store
                .entries
                .iter()
                .find(|e| e.matches(kt, issuers, strict))
                .map(|e| e.alias.clone())
        })
    }

    fn choose_server_alias(
        &self,
        key_type: &str,
        issuers: Option<&[DistinguishedName]>,
    ) -> Option<String> {
        self.aliases(key_type, issuers).into_iter().next()
    }

    fn certificate_chain(&self, alias: &str) -> Option<Vec<CertificateDer<'static>>> {
        self.entry(alias).map(|e| e.certified.cert.clone())
    }

    fn private_key(&self, alias: &str) -> Option<Arc<dyn SigningKey>> {
        self.entry(alias).map(|e| Arc::clone(&e.certified.key))
    }

    fn client_aliases(&self, key_type: &str, issuers: Option<&[DistinguishedName]>) -> Vec<String> {
        self.aliases(key_type, issuers)
    }

    fn server_aliases(&self, key_type: &str, issuers: Option<&[DistinguishedName]>) -> Vec<String> {
        self.aliases(key_type, issuers)
    }
}

/// An immutable [`TrustManager`] over a [`TrustStore`], verifying peer
/// chains against the store's certificates as trust anchors.
#[derive(Debug)]
pub struct StoreTrustManager {
    store: TrustStore,
    roots: RootCertStore,
    supported_algs: WebPkiSupportedAlgorithms,
}

impl StoreTrustManager {
    /// Build the verifier over `store`. Certificates the anchor parser
    /// rejects stay listed in [`TrustManager::accepted_issuers`] but do
    /// not participate in verification.
    pub fn new(store: TrustStore, provider: &CryptoProvider) -> Self {
        let mut roots = RootCertStore::empty();
        for (alias, cert) in &store.entries {
            if let Err(e) = roots.add(cert.clone()) {
                log::warn!("Skipping unusable trust anchor {alias}: {e}");
            }
        }
        Self {
            store,
            roots,
            supported_algs: provider.signature_verification_algorithms,
        }
    }

    fn check(&self, chain: &[CertificateDer<'_>]) -> Result<(), Error> {
        let Some(end_entity) = chain.first() else {
            return Err(Error::CertificateInvalid(
                rustls::Error::NoCertificatesPresented,
            ));
        };
        let parsed = ParsedCertificate::try_from(end_entity).map_err(Error::CertificateInvalid)?;
        rustls::client::verify_server_cert_signed_by_trust_anchor(
            &parsed,
            &self.roots,
            &chain[1..],
            UnixTime::now(),
            self.supported_algs.all,
        )
        .map_err(Error::CertificateInvalid)
    }
}

impl TrustManager for StoreTrustManager {
    fn check_client_trusted(
        &self,
        chain: &[CertificateDer<'_>],
        _auth_type: &str,
    ) -> Result<(), Error> {
        self.check(chain)
    }

    fn check_server_trusted(
        &self,
        chain: &[CertificateDer<'_>],
        _auth_type: &str,
    ) -> Result<(), Error> {
        self.check(chain)
    }

    fn accepted_issuers(&self) -> Vec<CertificateDer<'static>> {
        self.store
            .entries
            .iter()
            .map(|(_, cert)| cert.clone())
            .collect()
    }
}
