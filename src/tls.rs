// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! HTTPS serving from an operator-supplied certificate and key.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio_rustls::TlsAcceptor;
use tracing::info;

/// Build a server config from PEM-encoded certificate chain and private key.
pub fn server_config_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<rustls::ServerConfig> {
    let certs: Vec<_> = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse certificate PEM")?;
    if certs.is_empty() {
        anyhow::bail!("no certificates found in PEM");
    }
    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .context("failed to parse private key PEM")?
        .ok_or_else(|| anyhow::anyhow!("no private key found in PEM"))?;

    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("certificate and key were rejected")?;

    // Configure ALPN to support HTTP/2 and HTTP/1.1
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

pub async fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let cert_pem = fs::read(cert_path)
        .await
        .with_context(|| format!("failed to read TLS certificate {:?}", cert_path))?;
    let key_pem = fs::read(key_path)
        .await
        .with_context(|| format!("failed to read TLS key {:?}", key_path))?;
    let config = server_config_from_pem(&cert_pem, &key_pem)?;
    info!(cert = %cert_path.display(), "loaded TLS certificate");
    Ok(TlsAcceptor::from(Arc::new(config)))
}
