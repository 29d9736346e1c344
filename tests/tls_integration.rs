// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

mod common;

use std::sync::Arc;

use common::{make_config, start_run_proxy_and_wait, SpyToolchain};
use rcgen::{CertificateParams, KeyPair};
use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn serves_https_with_operator_certificate() -> anyhow::Result<()> {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hello.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/plain")
                .set_body_string("hello over tls"),
        )
        .mount(&mock)
        .await;

    let key_pair = KeyPair::generate()?;
    let cert = CertificateParams::new(vec!["localhost".to_string()])?.self_signed(&key_pair)?;
    let server_cfg = tvkit::tls::server_config_from_pem(
        cert.pem().as_bytes(),
        key_pair.serialize_pem().as_bytes(),
    )?;
    let acceptor = TlsAcceptor::from(Arc::new(server_cfg));

    let spy = Arc::new(SpyToolchain::default());
    let proxy = start_run_proxy_and_wait(make_config(&mock.uri(), "ie 11"), spy, Some(acceptor))
        .await?;

    let mut roots = rustls::RootCertStore::empty();
    roots.add(cert.der().clone())?;
    let client_cfg = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(client_cfg));

    let tcp = tokio::net::TcpStream::connect(proxy.addr).await?;
    let mut tls = connector
        .connect(ServerName::try_from("localhost")?, tcp)
        .await?;
    tls.write_all(b"GET /hello.txt HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await?;

    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    while !String::from_utf8_lossy(&buf).contains("hello over tls") {
        match tls.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let text = String::from_utf8_lossy(&buf);
    assert!(text.starts_with("HTTP/1.1 200"), "unexpected response: {}", text);
    assert!(text.ends_with("hello over tls"));
    Ok(())
}

#[tokio::test]
async fn plain_http_to_tls_listener_is_refused() -> anyhow::Result<()> {
    let mock = MockServer::start().await;
    let key_pair = KeyPair::generate()?;
    let cert = CertificateParams::new(vec!["localhost".to_string()])?.self_signed(&key_pair)?;
    let server_cfg = tvkit::tls::server_config_from_pem(
        cert.pem().as_bytes(),
        key_pair.serialize_pem().as_bytes(),
    )?;
    let acceptor = TlsAcceptor::from(Arc::new(server_cfg));

    let spy = Arc::new(SpyToolchain::default());
    let proxy = start_run_proxy_and_wait(make_config(&mock.uri(), "ie 11"), spy, Some(acceptor))
        .await?;

    let mut tcp = tokio::net::TcpStream::connect(proxy.addr).await?;
    tcp.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await?;
    let mut buf = Vec::new();
    let _ = tcp.read_to_end(&mut buf).await;
    assert!(!String::from_utf8_lossy(&buf).starts_with("HTTP/1.1 200"));
    Ok(())
}
