//! Resolution of file paths and feature flags from the container
//! runtime's environment.
//!
//! The container runtime contract is three environment variables:
//! `CF_INSTANCE_CERT` and `CF_INSTANCE_KEY` point at the identity
//! material, and `CF_CA_CERTS` points at the trusted CA bundle (with the
//! conventional system bundle as its default). Two feature flags allow
//! the container-sourced managers to be switched off without removing
//! the factories.

use std::path::PathBuf;
use std::str::FromStr;

use crate::api::Error;

const CERTIFICATES_VAR: &str = "CF_INSTANCE_CERT";
const PRIVATE_KEY_VAR: &str = "CF_INSTANCE_KEY";
const CA_CERTIFICATES_VAR: &str = "CF_CA_CERTS";
const KEY_MANAGER_ENABLED_VAR: &str = "CONTAINER_TLS_KEYMANAGER_ENABLED";
const TRUST_MANAGER_ENABLED_VAR: &str = "CONTAINER_TLS_TRUSTMANAGER_ENABLED";

const DEFAULT_CA_CERTIFICATES: &str = "/etc/ssl/certs/ca-certificates.crt";

/// Resolved configuration for the factories in [`crate::factory`].
///
/// [`Config::from_env`] reads the container runtime contract;
/// constructing the struct directly bypasses the environment entirely.
#[derive(Clone, Debug)]
pub struct Config {
    /// Path to the PEM certificate chain of the container identity.
    pub certificates: Option<PathBuf>,
    /// Path to the PEM private key of the container identity.
    pub private_key: Option<PathBuf>,
    /// Path to the PEM CA bundle trusted by the container.
    pub ca_certificates: PathBuf,
    /// Whether the container key manager may be constructed.
    pub key_manager_enabled: bool,
    /// Whether the container trust manager may be constructed.
    pub trust_manager_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            certificates: None,
            private_key: None,
            ca_certificates: PathBuf::from(DEFAULT_CA_CERTIFICATES),
            key_manager_enabled: true,
            trust_manager_enabled: true,
        }
    }
}

/// Unset and empty mean enabled; anything else is compared
/// case-insensitively against `"true"`.
fn flag_enabled(value: Option<&str>) -> bool {
    match value {
        None => true,
        Some(v) if v.is_empty() => true,
        Some(v) => v.eq_ignore_ascii_case("true"),
    }
}

fn path_var(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

impl Config {
    /// Resolve the configuration from the process environment.
    pub fn from_env() -> Self {
        Self {
            certificates: path_var(CERTIFICATES_VAR),
            private_key: path_var(PRIVATE_KEY_VAR),
            ca_certificates: path_var(CA_CERTIFICATES_VAR)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CA_CERTIFICATES)),
            key_manager_enabled: flag_enabled(
                std::env::var(KEY_MANAGER_ENABLED_VAR).ok().as_deref(),
            ),
            trust_manager_enabled: flag_enabled(
                std::env::var(TRUST_MANAGER_ENABLED_VAR).ok().as_deref(),
            ),
        }
    }
}

/// Key-manager algorithm identifier.
///
/// Two behaviors are registered, mirroring the host platform's pair of
/// X.509 key-manager algorithms: a simple one that matches aliases on key
/// type only, and a strict one that additionally honors the peer's
/// acceptable-issuer hints.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KeyManagerAlgorithm {
    /// Alias selection by key type; issuer hints are ignored
    /// (`SunX509`, `X509`, `X.509`).
    Simple,
    /// Alias selection by key type and acceptable issuers
    /// (`NewSunX509`, with `PKIX` as an alias).
    Strict,
}

impl FromStr for KeyManagerAlgorithm {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Error> {
        if name.eq_ignore_ascii_case("SunX509")
            || name.eq_ignore_ascii_case("X509")
            || name.eq_ignore_ascii_case("X.509")
        {
            Ok(Self::Simple)
        } else if name.eq_ignore_ascii_case("NewSunX509") || name.eq_ignore_ascii_case("PKIX") {
            Ok(Self::Strict)
        } else {
            Err(Error::UnknownAlgorithm(name.to_owned()))
        }
    }
}

/// Trust-manager algorithm identifier.
///
/// All registered names (`PKIX`, `SunPKIX`, `X509`, `X.509`) resolve to
/// the same underlying verifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum TrustManagerAlgorithm {
    /// Path validation against the configured trust anchors.
    Pkix,
}

impl FromStr for TrustManagerAlgorithm {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Error> {
        if name.eq_ignore_ascii_case("PKIX")
            || name.eq_ignore_ascii_case("SunPKIX")
            || name.eq_ignore_ascii_case("X509")
            || name.eq_ignore_ascii_case("X.509")
        {
            Ok(Self::Pkix)
        } else {
            Err(Error::UnknownAlgorithm(name.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_unset_or_empty_is_enabled() {
        assert!(flag_enabled(None));
        assert!(flag_enabled(Some("")));
    }

    #[test]
    fn flag_parses_case_insensitively() {
        assert!(flag_enabled(Some("true")));
        assert!(flag_enabled(Some("TRUE")));
        assert!(flag_enabled(Some("True")));
        assert!(!flag_enabled(Some("false")));
        assert!(!flag_enabled(Some("FALSE")));
        assert!(!flag_enabled(Some("anything else")));
    }

    #[test]
    fn default_ca_bundle_path() {
        assert_eq!(
            Config::default().ca_certificates,
            PathBuf::from("/etc/ssl/certs/ca-certificates.crt")
        );
    }

    #[test]
    fn key_algorithm_aliases() {
        assert_eq!(
            "SunX509".parse::<KeyManagerAlgorithm>().unwrap(),
            KeyManagerAlgorithm::Simple
        );
        assert_eq!(
            "X.509".parse::<KeyManagerAlgorithm>().unwrap(),
            KeyManagerAlgorithm::Simple
        );
        assert_eq!(
            "NewSunX509".parse::<KeyManagerAlgorithm>().unwrap(),
            KeyManagerAlgorithm::Strict
        );
        assert_eq!(
            "pkix".parse::<KeyManagerAlgorithm>().unwrap(),
            KeyManagerAlgorithm::Strict
        );
        assert!(matches!(
            "NoSuchThing".parse::<KeyManagerAlgorithm>(),
            Err(Error::UnknownAlgorithm(_))
        ));
    }

    #[test]
    fn trust_algorithm_aliases_resolve_identically() {
        for name in ["PKIX", "SunPKIX", "X509", "X.509"] {
            assert_eq!(
                name.parse::<TrustManagerAlgorithm>().unwrap(),
                TrustManagerAlgorithm::Pkix
            );
        }
        assert!(matches!(
            "NoSuchThing".parse::<TrustManagerAlgorithm>(),
            Err(Error::UnknownAlgorithm(_))
        ));
    }
}
