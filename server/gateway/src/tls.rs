use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;

/// Loads a cert/key pair from disk, or generates a self-signed localhost
/// certificate when neither path is configured. Certificate lifecycle and
/// rotation are out of scope; this just gets a runnable TLS listener up.
pub fn load_or_generate(
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    match (cert_path, key_path) {
        (Some(cert_path), Some(key_path)) => {
            let cert_pem = std::fs::read(cert_path).context("read cert PEM")?;
            let key_pem = std::fs::read(key_path).context("read key PEM")?;

            let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &cert_pem[..])
                .collect::<Result<Vec<_>, _>>()
                .context("parse cert PEM")?;

            let key = rustls_pemfile::private_key(&mut &key_pem[..])
                .context("parse key PEM")?
                .ok_or_else(|| anyhow!("no private key found in PEM"))?;

            Ok((certs, key))
        }
        (None, None) => {
            let cert = generate_simple_self_signed(vec!["localhost".into()])
                .context("failed generating self-signed cert")?;
            let cert_der: CertificateDer<'static> = cert.cert.der().clone();
            let key_der = PrivateKeyDer::Pkcs8(cert.key_pair.serialize_der().into());
            Ok((vec![cert_der], key_der))
        }
        _ => Err(anyhow!(
            "must set both --tls-cert and --tls-key, or neither"
        )),
    }
}

/// Builds the `axum-server` TLS config from the loaded cert/key.
pub async fn rustls_config(
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> Result<RustlsConfig> {
    let (certs, key) = load_or_generate(cert_path, key_path)?;
    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("building rustls ServerConfig")?;
    Ok(RustlsConfig::from_config(Arc::new(server_config)))
}
