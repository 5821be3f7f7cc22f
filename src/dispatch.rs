//! Multiplexers that fan one manager call out over an ordered list of
//! delegates.
//!
//! Key-manager selection is first-hit: delegates are consulted in list
//! order and the first non-empty answer wins, so an identity source
//! placed earlier shadows later ones for the same key type. The
//! enumeration calls instead collect every delegate's answer, preserving
//! delegate order.
//!
//! Trust checks are any-of: a chain is trusted if any delegate accepts
//! it. When every delegate rejects, the error surfaced is the last
//! delegate's, which in the usual platform-then-container arrangement is
//! the most specific one.

use rustls::DistinguishedName;
use rustls::sign::SigningKey;
use rustls_pki_types::CertificateDer;
use std::sync::Arc;

use crate::api::{Error, KeyManager, TrustManager};

/// A [`KeyManager`] delegating to an ordered list of managers.
#[derive(Debug)]
pub struct DelegatingKeyManager {
    delegates: Vec<Arc<dyn KeyManager>>,
}

impl DelegatingKeyManager {
    /// Wrap `delegates`, consulted in the order given.
    pub fn new(delegates: Vec<Arc<dyn KeyManager>>) -> Self {
        Self { delegates }
    }

    /// Number of delegates.
    pub fn len(&self) -> usize {
        self.delegates.len()
    }

    /// True if there are no delegates.
    pub fn is_empty(&self) -> bool {
        self.delegates.is_empty()
    }
}

impl KeyManager for DelegatingKeyManager {
    fn choose_client_alias(
        &self,
        key_types: &[&str],
        issuers: Option<&[DistinguishedName]>,
    ) -> Option<String> {
        self.delegates
            .iter()
            .find_map(|d| d.choose_client_alias(key_types, issuers))
    }

    fn choose_server_alias(
        &self,
        key_type: &str,
        issuers: Option<&[DistinguishedName]>,
    ) -> Option<String> {
        self.delegates
            .iter()
            .find_map(|d| d.choose_server_alias(key_type, issuers))
    }

    fn certificate_chain(&self, alias: &str) -> Option<Vec<CertificateDer<'static>>> {
        self.delegates.iter().find_map(|d| d.certificate_chain(alias))
    }

    fn private_key(&self, alias: &str) -> Option<Arc<dyn SigningKey>> {
        self.delegates.iter().find_map(|d| d.private_key(alias))
    }

    fn client_aliases(&self, key_type: &str, issuers: Option<&[DistinguishedName]>) -> Vec<String> {
        self.delegates
            .iter()
            .flat_map(|d| d.client_aliases(key_type, issuers))
            .collect()
    }

    fn server_aliases(&self, key_type: &str, issuers: Option<&[DistinguishedName]>) -> Vec<String> {
        self.delegates
            .iter()
            .flat_map(|d| d.server_aliases(key_type, issuers))
            .collect()
    }
}

/// A [`TrustManager`] delegating to an ordered list of managers.
#[derive(Debug)]
pub struct DelegatingTrustManager {
    delegates: Vec<Arc<dyn TrustManager>>,
}

impl DelegatingTrustManager {
    /// Wrap `delegates`, consulted in the order given.
    pub fn new(delegates: Vec<Arc<dyn TrustManager>>) -> Self {
        Self { delegates }
    }

    /// Number of delegates.
    pub fn len(&self) -> usize {
        self.delegates.len()
    }

    /// True if there are no delegates.
    pub fn is_empty(&self) -> bool {
        self.delegates.is_empty()
    }

    fn check(
        &self,
        check_one: impl Fn(&dyn TrustManager) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let mut last = None;
        for delegate in &self.delegates {
            match check_one(delegate.as_ref()) {
                Ok(()) => return Ok(()),
                Err(e) => last = Some(e),
            }
        }
        Err(last.unwrap_or(Error::NoTrustMaterial))
    }
}

impl TrustManager for DelegatingTrustManager {
    fn check_client_trusted(
        &self,
        chain: &[CertificateDer<'_>],
        auth_type: &str,
    ) -> Result<(), Error> {
        self.check(|d| d.check_client_trusted(chain, auth_type))
    }

    fn check_server_trusted(
        &self,
        chain: &[CertificateDer<'_>],
        auth_type: &str,
    ) -> Result<(), Error> {
        self.check(|d| d.check_server_trusted(chain, auth_type))
    }

    fn accepted_issuers(&self) -> Vec<CertificateDer<'static>> {
        self.delegates
            .iter()
            .flat_map(|d| d.accepted_issuers())
            .collect()
    }
}
