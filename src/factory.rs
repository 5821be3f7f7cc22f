//! Factories assembling the platform-provided and container-provided
//! managers into the delegating managers handed to TLS stacks.
//!
//! Each factory produces one [`DelegatingKeyManager`] or
//! [`DelegatingTrustManager`] whose delegate list is the platform
//! manager followed, when the container contract is satisfied, by the
//! container manager. The container managers are process-wide
//! singletons: they own watcher threads, and every factory in the
//! process shares one instance per watched identity or bundle.
//!
//! The container manager is left out, without failing the factory, when
//! its feature flag is off, when the environment names no material, or
//! when the named files do not exist yet. A file that exists but cannot
//! be loaded is an error: material was promised and is broken.

use rustls::crypto::CryptoProvider;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::api::{Error, KeyManager, TrustManager};
use crate::config::{Config, KeyManagerAlgorithm, TrustManagerAlgorithm};
use crate::dispatch::{DelegatingKeyManager, DelegatingTrustManager};
use crate::files::{FileWatchingKeyManager, FileWatchingTrustManager};
use crate::store::{IdentityStore, StoreKeyManager, StoreTrustManager, TrustStore, default_provider};

/// Process-wide cache of the container-provided managers.
///
/// One per process in normal use ([`shared`]); tests leak private
/// instances to get isolated singletons.
struct ContainerManagers {
    key: Mutex<Option<Arc<FileWatchingKeyManager>>>,
    trust: Mutex<Option<Arc<FileWatchingTrustManager>>>,
}

impl ContainerManagers {
    const fn new() -> Self {
        Self {
            key: Mutex::new(None),
            trust: Mutex::new(None),
        }
    }
}

fn shared() -> &'static ContainerManagers {
    static SHARED: ContainerManagers = ContainerManagers::new();
    &SHARED
}

fn file_present(path: &Path) -> bool {
    if path.is_file() {
        return true;
    }
    log::debug!("No material at {} yet", path.display());
    false
}

/// Factory producing key managers that combine the platform identity
/// with the container identity.
pub struct KeyManagerFactory {
    algorithm: KeyManagerAlgorithm,
    config: Config,
    cache: &'static ContainerManagers,
    provider: Arc<CryptoProvider>,
    system: Mutex<Arc<StoreKeyManager>>,
}

impl KeyManagerFactory {
    /// A factory for the named algorithm, configured from the process
    /// environment.
    ///
    /// Fails with [`Error::UnknownAlgorithm`] for algorithm names outside
    /// the platform's X.509 set.
    pub fn new(algorithm: &str) -> Result<Self, Error> {
        Ok(Self::with_config(algorithm.parse()?, Config::from_env()))
    }

    /// A factory with explicit configuration, sharing the process-wide
    /// container managers.
    pub fn with_config(algorithm: KeyManagerAlgorithm, config: Config) -> Self {
        Self::with_cache(algorithm, config, shared())
    }

    fn with_cache(
        algorithm: KeyManagerAlgorithm,
        config: Config,
        cache: &'static ContainerManagers,
    ) -> Self {
        let provider = default_provider();
        log::debug!("Key manager factory using {algorithm:?} with {config:?}");
        Self {
            algorithm,
            config,
            cache,
            system: Mutex::new(Arc::new(StoreKeyManager::new(
                IdentityStore::empty(),
                algorithm,
            ))),
            provider,
        }
    }

    /// Replace the platform identity this factory serves alongside the
    /// container identity.
    ///
    /// Affects only managers produced by later [`Self::key_managers`]
    /// calls; already-produced managers keep the identity they were built
    /// with. The container manager is untouched.
    pub fn init(
        &self,
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Result<(), Error> {
        let store = IdentityStore::identity_from(chain, key, &self.provider)?;
        *self.system.lock().unwrap() = Arc::new(StoreKeyManager::new(store, self.algorithm));
        Ok(())
    }

    fn container_manager(&self) -> Result<Option<Arc<FileWatchingKeyManager>>, Error> {
        if !self.config.key_manager_enabled {
            log::debug!("Container key manager disabled by configuration");
            return Ok(None);
        }
        let (Some(certificates), Some(private_key)) =
            (&self.config.certificates, &self.config.private_key)
        else {
            log::debug!("No container identity configured");
            return Ok(None);
        };
        if !file_present(certificates) || !file_present(private_key) {
            return Ok(None);
        }
        let mut cached = self.cache.key.lock().unwrap();
        if let Some(manager) = &*cached {
            return Ok(Some(Arc::clone(manager)));
        }
        log::info!(
            "Adding key manager for {} and {}",
            private_key.display(),
            certificates.display()
        );
        let manager = FileWatchingKeyManager::new(
            certificates.clone(),
            private_key.clone(),
            self.algorithm,
        )?;
        *cached = Some(Arc::clone(&manager));
        Ok(Some(manager))
    }

    /// The combined manager: platform identity first, container identity
    /// second.
    pub fn delegating_key_manager(&self) -> Result<DelegatingKeyManager, Error> {
        let mut delegates: Vec<Arc<dyn KeyManager>> =
            vec![Arc::clone(&*self.system.lock().unwrap()) as Arc<dyn KeyManager>];
        if let Some(container) = self.container_manager()? {
            delegates.push(container);
        }
        Ok(DelegatingKeyManager::new(delegates))
    }

    /// The managers to hand to a TLS stack; always a single combined
    /// manager.
    pub fn key_managers(&self) -> Result<Vec<Arc<dyn KeyManager>>, Error> {
        Ok(vec![Arc::new(self.delegating_key_manager()?)])
    }
}

/// Factory producing trust managers that combine the platform trust
/// anchors with the container trust bundle.
pub struct TrustManagerFactory {
    config: Config,
    cache: &'static ContainerManagers,
    provider: Arc<CryptoProvider>,
    system: Mutex<Option<Arc<StoreTrustManager>>>,
}

impl TrustManagerFactory {
    /// A factory for the named algorithm, configured from the process
    /// environment.
    pub fn new(algorithm: &str) -> Result<Self, Error> {
        let _: TrustManagerAlgorithm = algorithm.parse()?;
        Ok(Self::with_config(Config::from_env()))
    }

    /// A factory with explicit configuration, sharing the process-wide
    /// container managers.
    pub fn with_config(config: Config) -> Self {
        Self::with_cache(config, shared())
    }

    fn with_cache(config: Config, cache: &'static ContainerManagers) -> Self {
        log::debug!("Trust manager factory with {config:?}");
        Self {
            config,
            cache,
            provider: default_provider(),
            system: Mutex::new(None),
        }
    }

    /// Replace the platform trust anchors this factory serves alongside
    /// the container bundle. Without this call the platform's native
    /// certificate store is loaded on first use.
    pub fn init(&self, certs: Vec<CertificateDer<'static>>) {
        *self.system.lock().unwrap() = Some(Arc::new(StoreTrustManager::new(
            TrustStore::trust_from(certs),
            &self.provider,
        )));
    }

    fn system_manager(&self) -> Arc<StoreTrustManager> {
        let mut cached = self.system.lock().unwrap();
        if let Some(manager) = &*cached {
            return Arc::clone(manager);
        }
        let result = rustls_native_certs::load_native_certs();
        for e in &result.errors {
            log::warn!("Skipping part of the native certificate store: {e}");
        }
        let manager = Arc::new(StoreTrustManager::new(
            TrustStore::trust_from(result.certs),
            &self.provider,
        ));
        *cached = Some(Arc::clone(&manager));
        manager
    }

    fn container_manager(&self) -> Result<Option<Arc<FileWatchingTrustManager>>, Error> {
        if !self.config.trust_manager_enabled {
            log::debug!("Container trust manager disabled by configuration");
            return Ok(None);
        }
        let ca_certificates = &self.config.ca_certificates;
        if !file_present(ca_certificates) {
            return Ok(None);
        }
        let mut cached = self.cache.trust.lock().unwrap();
        if let Some(manager) = &*cached {
            return Ok(Some(Arc::clone(manager)));
        }
        log::info!("Adding trust manager for {}", ca_certificates.display());
        let manager = FileWatchingTrustManager::new(ca_certificates.clone())?;
        *cached = Some(Arc::clone(&manager));
        Ok(Some(manager))
    }

    /// The combined manager: platform anchors first, container bundle
    /// second.
    pub fn delegating_trust_manager(&self) -> Result<DelegatingTrustManager, Error> {
        let mut delegates: Vec<Arc<dyn TrustManager>> =
            vec![self.system_manager() as Arc<dyn TrustManager>];
        if let Some(container) = self.container_manager()? {
            delegates.push(container);
        }
        Ok(DelegatingTrustManager::new(delegates))
    }

    /// The managers to hand to a TLS stack; always a single combined
    /// manager.
    pub fn trust_managers(&self) -> Result<Vec<Arc<dyn TrustManager>>, Error> {
        Ok(vec![Arc::new(self.delegating_trust_manager()?)])
    }
}
