//! Decoding of PEM files into ordered, typed blocks.
//!
//! Two inputs with different tolerances share this decoder. Identity
//! inputs (the certificate chain and the private key delivered by the
//! container runtime) are decoded strictly: a block of any type outside
//! the expected certificate and private-key set rejects the whole file.
//! Trust bundles are decoded leniently, because system CA bundles
//! legitimately interleave human-readable metadata with their blocks.

use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::io::Cursor;
use std::path::Path;

use crate::api::Error;

/// One typed block decoded from a PEM file, in file order.
#[derive(Debug)]
pub enum PemBlock {
    /// An X.509 certificate (`CERTIFICATE` block).
    Certificate(CertificateDer<'static>),
    /// A private key (`PRIVATE KEY`, `RSA PRIVATE KEY`, or
    /// `EC PRIVATE KEY` block).
    PrivateKey(PrivateKeyDer<'static>),
}

/// How to treat PEM blocks outside the expected set.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Reject the file if any block is not a certificate or private key.
    Strict,
    /// Skip unrecognized blocks.
    Lenient,
}

const EXPECTED_LABELS: [&str; 4] = [
    "CERTIFICATE",
    "PRIVATE KEY",
    "RSA PRIVATE KEY",
    "EC PRIVATE KEY",
];

fn malformed(path: &Path, reason: impl Into<String>) -> Error {
    Error::MalformedInput(path.to_path_buf(), reason.into())
}

/// The underlying PEM reader silently skips block types it does not
/// recognize, so strict mode scans for `BEGIN` armor lines itself.
fn reject_unexpected_labels(path: &Path, text: &str) -> Result<(), Error> {
    for line in text.lines() {
        let line = line.trim();
        let Some(label) = line
            .strip_prefix("-----BEGIN ")
            .and_then(|rest| rest.strip_suffix("-----"))
        else {
            continue;
        };
        if !EXPECTED_LABELS.contains(&label) {
            return Err(malformed(path, format!("unexpected {label} block")));
        }
    }
    Ok(())
}

/// Decode `path` into its ordered sequence of typed blocks.
///
/// Tolerates arbitrary whitespace and comments before, after, and between
/// blocks. Fails with [`Error::MalformedInput`] if the file is not UTF-8,
/// if any block is unterminated or has corrupt base64, or (in
/// [`Mode::Strict`]) if any block type is outside the expected set.
pub fn decode(path: &Path, mode: Mode) -> Result<Vec<PemBlock>, Error> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            return Err(malformed(path, "not valid UTF-8"));
        }
        Err(e) => return Err(e.into()),
    };
    if mode == Mode::Strict {
        reject_unexpected_labels(path, &text)?;
    }

    let mut blocks = Vec::new();
    for item in rustls_pemfile::read_all(&mut Cursor::new(text.as_bytes())) {
        let item = item.map_err(|e| malformed(path, e.to_string()))?;
        match item {
            rustls_pemfile::Item::X509Certificate(der) => {
                blocks.push(PemBlock::Certificate(der));
            }
            rustls_pemfile::Item::Pkcs8Key(der) => {
                blocks.push(PemBlock::PrivateKey(der.into()));
            }
            rustls_pemfile::Item::Pkcs1Key(der) => {
                blocks.push(PemBlock::PrivateKey(der.into()));
            }
            rustls_pemfile::Item::Sec1Key(der) => {
                blocks.push(PemBlock::PrivateKey(der.into()));
            }
            // Anything else was either rejected above (strict) or is
            // skipped (lenient).
            _ => (),
        }
    }
    Ok(blocks)
}

/// Read an identity certificate file: one or more certificate blocks,
/// end-entity first, nothing else.
pub fn certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, Error> {
    let mut certs = Vec::new();
    for block in decode(path, Mode::Strict)? {
        match block {
            PemBlock::Certificate(der) => certs.push(der),
            PemBlock::PrivateKey(_) => {
                return Err(malformed(path, "private key in certificate input"));
            }
        }
    }
    if certs.is_empty() {
        return Err(malformed(path, "no certificates found"));
    }
    Ok(certs)
}

/// Read an identity private-key file: exactly one private-key block.
pub fn private_key(path: &Path) -> Result<PrivateKeyDer<'static>, Error> {
    let mut key = None;
    for block in decode(path, Mode::Strict)? {
        match block {
            PemBlock::PrivateKey(der) => {
                if key.replace(der).is_some() {
                    return Err(malformed(path, "more than one private key"));
                }
            }
            PemBlock::Certificate(_) => {
                return Err(malformed(path, "certificate in private key input"));
            }
        }
    }
    key.ok_or_else(|| malformed(path, "no private key found"))
}

/// Read a trust bundle: concatenated certificate blocks with arbitrary
/// text tolerated (and skipped) between them.
pub fn trust_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, Error> {
    Ok(decode(path, Mode::Lenient)?
        .into_iter()
        .filter_map(|block| match block {
            PemBlock::Certificate(der) => Some(der),
            PemBlock::PrivateKey(_) => None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata;

    use std::io::Write;

    fn write_tempfile(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("input.pem");
        let mut f = std::fs::File::create(&path).expect("create");
        f.write_all(content.as_bytes()).expect("write");
        (dir, path)
    }

    #[test]
    fn decodes_chain_in_order() {
        let (_dir, path) = write_tempfile(testdata::USER1_CERT);
        let certs = certificates(&path).expect("decode");
        assert_eq!(certs.len(), 2);
        // The end-entity certificate is smaller than the CA certificate
        // it is concatenated with; order must be preserved.
        assert_ne!(certs[0], certs[1]);
    }

    #[test]
    fn single_private_key() {
        let (_dir, path) = write_tempfile(testdata::USER1_KEY);
        private_key(&path).expect("decode");
    }

    #[test]
    fn duplicate_private_key_rejected() {
        let doubled = format!("{}{}", testdata::USER1_KEY, testdata::USER1_KEY);
        let (_dir, path) = write_tempfile(&doubled);
        assert!(matches!(
            private_key(&path),
            Err(Error::MalformedInput(_, _))
        ));
    }

    #[test]
    fn certificate_in_key_input_rejected() {
        let (_dir, path) = write_tempfile(testdata::USER1_CERT);
        assert!(matches!(
            private_key(&path),
            Err(Error::MalformedInput(_, _))
        ));
    }

    #[test]
    fn strict_rejects_unexpected_block() {
        let mixed = format!(
            "{}-----BEGIN CERTIFICATE REQUEST-----\nMIIB\n-----END CERTIFICATE REQUEST-----\n",
            testdata::USER1_CERT
        );
        let (_dir, path) = write_tempfile(&mixed);
        assert!(matches!(
            certificates(&path),
            Err(Error::MalformedInput(_, _))
        ));
    }

    #[test]
    fn strict_rejects_unterminated_block() {
        let truncated = &testdata::USER1_CERT[..testdata::USER1_CERT.len() / 2];
        let (_dir, path) = write_tempfile(truncated);
        assert!(matches!(
            certificates(&path),
            Err(Error::MalformedInput(_, _))
        ));
    }

    #[test]
    fn lenient_tolerates_interstitial_text() {
        let annotated = format!(
            "## Issuer: container-tls test CA\n{}\nsome metadata\n{}",
            testdata::CACERT,
            testdata::CACERT
        );
        let (_dir, path) = write_tempfile(&annotated);
        let certs = trust_certificates(&path).expect("decode");
        assert_eq!(certs.len(), 2);
    }

    #[test]
    fn whitespace_around_blocks_tolerated() {
        let padded = format!("\n\n   \n{}\n\n", testdata::USER1_CERT);
        let (_dir, path) = write_tempfile(&padded);
        assert_eq!(certificates(&path).expect("decode").len(), 2);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nonexistent.pem");
        assert!(matches!(certificates(&path), Err(Error::Io(_))));
    }
}
