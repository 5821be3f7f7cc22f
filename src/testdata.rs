//! PEM fixtures shared by the test modules.
//!
//! The identity material is two RSA end-entity certificates signed by a
//! common test CA; the bundles are self-signed EC certificates counted by
//! their filenames.

pub(crate) const USER1_CERT: &str = include_str!("../testdata/client-certificates-1.pem");
pub(crate) const USER1_KEY: &str = include_str!("../testdata/client-private-key-1.pem");
pub(crate) const USER2_CERT: &str = include_str!("../testdata/client-certificates-2.pem");
pub(crate) const USER2_KEY: &str = include_str!("../testdata/client-private-key-2.pem");
pub(crate) const CACERT: &str = include_str!("../testdata/ca-certificates.pem");
pub(crate) const BUNDLE_48: &str = include_str!("../testdata/server-certificates-48.pem");
pub(crate) const BUNDLE_173: &str = include_str!("../testdata/server-certificates-173.pem");

pub(crate) fn certs(pem: &str) -> Vec<rustls_pki_types::CertificateDer<'static>> {
    rustls_pemfile::certs(&mut std::io::Cursor::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .expect("test certificates")
}

pub(crate) fn key(pem: &str) -> rustls_pki_types::PrivateKeyDer<'static> {
    rustls_pemfile::private_key(&mut std::io::Cursor::new(pem))
        .expect("test key")
        .expect("test key present")
}

/// A temporary directory holding one identity (certificates + key) laid
/// out the way the container runtime would deliver it.
pub(crate) struct CertAndKeyFiles {
    pub(crate) dir: tempfile::TempDir,
}

impl CertAndKeyFiles {
    pub(crate) fn user1() -> std::io::Result<Self> {
        Self::write(USER1_CERT, USER1_KEY)
    }

    fn write(cert: &str, key: &str) -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("cert"), cert)?;
        std::fs::write(dir.path().join("key"), key)?;
        Ok(Self { dir })
    }

    pub(crate) fn cert_path(&self) -> std::path::PathBuf {
        self.dir.path().join("cert")
    }

    pub(crate) fn key_path(&self) -> std::path::PathBuf {
        self.dir.path().join("key")
    }

    /// Replace a file the way the container runtime does: write to the
    /// side, then rename over the target.
    pub(crate) fn replace(&self, name: &str, content: &str) -> std::io::Result<()> {
        let tmp = self.dir.path().join(format!("{name}.tmp"));
        std::fs::write(&tmp, content)?;
        std::fs::rename(tmp, self.dir.path().join(name))
    }
}

/// Poll `condition` until it holds or `deadline` elapses. The watcher
/// pipeline is event-driven, so updates normally land in well under a
/// second; the generous deadline only guards against slow CI filesystems.
pub(crate) fn wait_for(deadline: std::time::Duration, condition: impl Fn() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(25));
    }
    condition()
}
