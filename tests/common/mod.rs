// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{HeaderMap, Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tokio_rustls::TlsAcceptor;

use tvkit::capability::facts::CaniuseFacts;
use tvkit::config::Config;
use tvkit::error::TransformError;
use tvkit::polyfills::PolyfillPlan;
use tvkit::proxy::{run_proxy, Shared};
use tvkit::toolchain::{ModuleFormat, Toolchain, TransformContext, TransformKind};

pub const FACTS_JSON: &str = include_str!("../fixtures/caniuse.json");

/// Toolchain that tags its input instead of running anything.
#[derive(Default)]
pub struct SpyToolchain {
    pub transforms: AtomicUsize,
    pub bundles: AtomicUsize,
    pub helpers: AtomicUsize,
    pub fail: AtomicBool,
    pub delay: Duration,
}

#[async_trait]
impl Toolchain for SpyToolchain {
    async fn transform(
        &self,
        kind: TransformKind,
        content: Bytes,
        _ctx: &TransformContext,
    ) -> Result<Bytes, TransformError> {
        self.transforms.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransformError::Other("spy failure".into()));
        }
        let mut out = format!("/*{}*/", kind).into_bytes();
        out.extend_from_slice(&content);
        Ok(Bytes::from(out))
    }

    async fn bundle_polyfills(
        &self,
        plan: &PolyfillPlan,
        _ctx: &TransformContext,
    ) -> Result<Bytes, TransformError> {
        self.bundles.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from(format!("/*polyfills*/\n{}", plan.entry_source())))
    }

    async fn runtime_helper(
        &self,
        module: &str,
        format: ModuleFormat,
        _ctx: &TransformContext,
    ) -> Result<Bytes, TransformError> {
        self.helpers.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        Ok(Bytes::from(format!("/*{} {}*/", module, format.as_str())))
    }
}

pub fn make_config(target: &str, browser: &str) -> Config {
    let mut cfg = Config::default();
    cfg.general.target = target.to_string();
    cfg.general.browser = Some(browser.to_string());
    cfg.general.cache_dir = std::env::temp_dir()
        .join(format!("tvkit_integ_{}", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .into_owned();
    cfg
}

pub struct RunningProxy {
    pub handle: tokio::task::JoinHandle<()>,
    pub addr: SocketAddr,
    pub shared: Arc<Shared>,
}

impl Drop for RunningProxy {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// Start run_proxy on a free port and wait until it is accepting.
pub async fn start_run_proxy_and_wait(
    cfg: Config,
    toolchain: Arc<SpyToolchain>,
    tls: Option<TlsAcceptor>,
) -> anyhow::Result<RunningProxy> {
    let facts = CaniuseFacts::from_json(FACTS_JSON)?;
    let shared = Arc::new(Shared::new(Arc::new(cfg), Arc::new(facts), toolchain)?);

    // Choose a free port by binding then dropping
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);

    let for_spawn = shared.clone();
    let handle = tokio::spawn(async move {
        let _ = run_proxy(addr, for_spawn, tls).await;
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if Instant::now() > deadline {
            return Err(anyhow::anyhow!("timeout waiting for proxy to start"));
        }
        if let Ok(mut s) = tokio::net::TcpStream::connect(addr).await {
            let _ = s.shutdown().await;
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    Ok(RunningProxy {
        handle,
        addr,
        shared,
    })
}

pub struct Fetched {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl Fetched {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub async fn fetch(
    addr: SocketAddr,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> anyhow::Result<Fetched> {
    let client: Client<HttpConnector, Full<Bytes>> =
        Client::builder(TokioExecutor::new()).build_http();
    let mut builder = Request::builder()
        .method(method)
        .uri(format!("http://{}{}", addr, path));
    for (k, v) in headers {
        builder = builder.header(*k, *v);
    }
    let req = builder.body(Full::new(Bytes::from(body.to_string())))?;
    let resp = client.request(req).await?;
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = resp.into_body().collect().await?.to_bytes();
    Ok(Fetched {
        status,
        headers,
        body: String::from_utf8(bytes.to_vec())?,
    })
}

pub async fn get(addr: SocketAddr, path: &str, headers: &[(&str, &str)]) -> anyhow::Result<Fetched> {
    fetch(addr, "GET", path, headers, "").await
}
