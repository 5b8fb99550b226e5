//! TLS material: listener certificates and the upstream client trust store.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use rustls::{ClientConfig, RootCertStore};

/// Error type for TLS setup.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificates found in {0}")]
    NoCertificates(String),
    #[error("no private key found in {0}")]
    NoPrivateKey(String),
    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

/// Load the listener's TLS configuration.
///
/// `cert_path` and `key_path` may name the same PEM file holding both the
/// certificate chain and the private key.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, TlsError> {
    // Check the material up front so a bad file fails with a precise message.
    let certs = read_certs(cert_path)?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.display().to_string()));
    }
    check_private_key(key_path)?;

    RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(|source| TlsError::Read {
            path: cert_path.display().to_string(),
            source,
        })
}

/// Client configuration for `https` upstreams.
///
/// Trusts the webpki root set, plus any certificates in `extra_roots`.
pub fn upstream_client_config(extra_roots: Option<&Path>) -> Result<Arc<ClientConfig>, TlsError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = extra_roots {
        let certs = read_certs(path)?;
        if certs.is_empty() {
            return Err(TlsError::NoCertificates(path.display().to_string()));
        }
        let (added, ignored) = roots.add_parsable_certificates(certs);
        tracing::debug!(path = %path.display(), added, ignored, "Loaded extra upstream roots");
    }

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.display().to_string(),
            source,
        })
}

fn read_certs(
    path: &Path,
) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.display().to_string(),
            source,
        })
}

fn check_private_key(path: &Path) -> Result<(), TlsError> {
    let mut reader = open(path)?;
    match rustls_pemfile::private_key(&mut reader) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(TlsError::NoPrivateKey(path.display().to_string())),
        Err(source) => Err(TlsError::Read {
            path: path.display().to_string(),
            source,
        }),
    }
}
