//! Contracts implemented by key and trust managers.
//!
//! A [`KeyManager`] is the per-handshake callback surface through which a
//! TLS engine selects a local identity: it chooses an alias, then looks up
//! the certificate chain and private key behind that alias. A
//! [`TrustManager`] is the symmetric surface for verifying the peer's
//! certificate chain.
//!
//! Both traits are object safe. The crate composes trait objects in two
//! ways: the live managers in [`crate::files`] delegate every call to an
//! atomically swappable snapshot, and the multiplexers in
//! [`crate::dispatch`] fan out over an ordered list of sub-managers.

use rustls::DistinguishedName;
use rustls::sign::SigningKey;
use rustls_pki_types::CertificateDer;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Error type returned throughout the crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A PEM input could not be decoded, contained a block type that is
    /// not acceptable for that input, or was missing a required block.
    #[error("malformed input in {0}: {1}")]
    MalformedInput(PathBuf, String),
    /// The public key in the first certificate of the chain does not match
    /// the supplied private key.
    #[error("certificate chain and private key do not match")]
    KeyMismatch,
    /// The platform TLS facility could not produce a usable manager.
    #[error("no manager available")]
    NoManagerAvailable,
    /// A trust multiplexer was asked to verify a peer with zero
    /// sub-managers.
    #[error("no trust material available")]
    NoTrustMaterial,
    /// Registering the OS file watch failed at startup.
    #[error("failed to watch {0}: {1}")]
    WatchSetup(PathBuf, notify::Error),
    /// An algorithm identifier did not resolve to any known factory.
    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),
    /// A peer certificate chain failed verification. Surfaced unmodified
    /// from the underlying verifier.
    #[error("{0}")]
    CertificateInvalid(rustls::Error),
    /// Wrapper for [`std::io::Error`].
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Per-handshake callback surface for selecting a local TLS identity.
///
/// Alias-choosing methods take the key types the peer will accept (for
/// example `"RSA"` or `"EC"`) and, optionally, the distinguished names of
/// certificate authorities acceptable to the peer. `None` issuers means
/// the peer expressed no preference and any issuer is acceptable.
pub trait KeyManager: Send + Sync + std::fmt::Debug {
    /// Choose an alias to present as the client side of a handshake.
    /// Returns the first alias compatible with any of `key_types`.
    fn choose_client_alias(
        &self,
        key_types: &[&str],
        issuers: Option<&[DistinguishedName]>,
    ) -> Option<String>;

    /// Choose an alias to present as the server side of a handshake.
    fn choose_server_alias(
        &self,
        key_type: &str,
        issuers: Option<&[DistinguishedName]>,
    ) -> Option<String>;

    /// The certificate chain behind `alias`, end-entity first.
    fn certificate_chain(&self, alias: &str) -> Option<Vec<CertificateDer<'static>>>;

    /// The private key behind `alias`, as a signing key usable by the
    /// TLS engine.
    fn private_key(&self, alias: &str) -> Option<Arc<dyn SigningKey>>;

    /// All aliases usable for client handshakes with the given key type.
    fn client_aliases(&self, key_type: &str, issuers: Option<&[DistinguishedName]>) -> Vec<String>;

    /// All aliases usable for server handshakes with the given key type.
    fn server_aliases(&self, key_type: &str, issuers: Option<&[DistinguishedName]>) -> Vec<String>;
}

/// Per-handshake callback surface for verifying a peer's certificate chain.
///
/// `chain` is ordered end-entity first. `auth_type` is the key exchange
/// algorithm negotiated for the handshake; it is carried through for
/// logging and interface compatibility and does not alter path validation.
pub trait TrustManager: Send + Sync + std::fmt::Debug {
    /// Verify a chain presented by a connecting client.
    fn check_client_trusted(&self, chain: &[CertificateDer<'_>], auth_type: &str)
    -> Result<(), Error>;

    /// Verify a chain presented by a server.
    fn check_server_trusted(&self, chain: &[CertificateDer<'_>], auth_type: &str)
    -> Result<(), Error>;

    /// The CA certificates this manager trusts.
    fn accepted_issuers(&self) -> Vec<CertificateDer<'static>>;
}
