//! TLS identity and trust material sourced from a container's filesystem.
//!
//! Container runtimes drop a client/server identity (a PEM certificate
//! chain plus a PEM private key) and a bundle of trusted CA certificates
//! into the container's filesystem and rotate them by atomically renaming
//! fresh files over the old ones. This crate watches those files and
//! exposes them to a TLS engine as live key and trust managers whose
//! contents track the disk without a process restart.
//!
//! The entry points are [`KeyManagerFactory`] and [`TrustManagerFactory`].
//! Each resolves its file paths from the container runtime's environment
//! variables (`CF_INSTANCE_CERT`, `CF_INSTANCE_KEY`, `CF_CA_CERTS`),
//! builds a platform-default manager, builds at most one process-wide
//! file-watching container manager, and returns both composed behind a
//! delegating multiplexer:
//!
//! ```no_run
//! use container_tls::{KeyManager, KeyManagerFactory};
//!
//! let factory = KeyManagerFactory::new("PKIX")?;
//! let managers = factory.key_managers()?;
//! for manager in &managers {
//!     let _ = manager.client_aliases("RSA", None);
//! }
//! # Ok::<(), container_tls::Error>(())
//! ```
//!
//! A TLS engine drives the returned managers through the per-handshake
//! callbacks on [`KeyManager`] and [`TrustManager`]. Those callbacks are
//! wait-free: a live manager performs a single atomic load of its current
//! delegate and then delegates, so a reload that lands mid-handshake is
//! observed as an instantaneous transition and never as a torn view. A
//! reload that fails to parse is logged and discarded; the last good
//! delegate keeps serving.

#![warn(missing_docs)]

pub mod api;
pub mod config;
pub mod dispatch;
pub mod factory;
pub mod files;
pub mod pem;
pub mod store;

mod watch;

#[cfg(test)]
mod testdata;

pub use api::{Error, KeyManager, TrustManager};
pub use config::{Config, KeyManagerAlgorithm, TrustManagerAlgorithm};
pub use dispatch::{DelegatingKeyManager, DelegatingTrustManager};
pub use factory::{KeyManagerFactory, TrustManagerFactory};
pub use files::{FileWatchingKeyManager, FileWatchingTrustManager};
