//! TLS acceptor construction for HTTPS mode.

use crate::config::TlsSettings;
use crate::error::GatewayError;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

/// Loads the PEM certificate chain and private key into a TLS acceptor.
pub fn load_acceptor(settings: &TlsSettings) -> Result<TlsAcceptor, GatewayError> {
    let certs = load_certs(&settings.cert_path)?;
    let key = load_key(&settings.key_path)?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| GatewayError::Config(format!("invalid TLS certificate or key: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn open(path: &Path) -> Result<BufReader<File>, GatewayError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| GatewayError::Config(format!("cannot read {}: {e}", path.display())))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, GatewayError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| GatewayError::Config(format!("bad certificate in {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(GatewayError::Config(format!("no certificate found in {}", path.display())));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, GatewayError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|e| GatewayError::Config(format!("bad private key in {}: {e}", path.display())))?
        .ok_or_else(|| GatewayError::Config(format!("no private key found in {}", path.display())))
}
