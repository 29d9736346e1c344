// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Reverse proxy in front of a dev server, rewriting responses for legacy targets.
//!
//! Every request goes to the configured origin except the derived assets this
//! proxy serves itself (polyfill bundle, runtime helpers and the CSS endpoint
//! used by the patched Vite client). Successful HTML, CSS and JavaScript
//! responses are buffered and rewritten; anything else streams back as is.

use crate::artifacts::{polyfills_file_name, ArtifactStore};
use crate::cache::{content_hash, jittered_ttl, TransformCache};
use crate::capability::facts::FactDatabase;
use crate::capability::{CapabilityResolver, CompatProfile};
use crate::conditional::ConditionalBridge;
use crate::config::Config;
use crate::connection::ConnectionMetadata;
use crate::error::TransformError;
use crate::etag;
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::html::{self, HtmlOptions, InlineTransformer};
use crate::polyfills::PolyfillPlan;
use crate::state::ConditionalState;
use crate::targets::TargetSet;
use crate::toolchain::{ModuleFormat, Toolchain, TransformContext, TransformKind};
use crate::vite::{self, ClientPatches};

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{service::service_fn, Method, Request, Response, StatusCode, Uri};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as LegacyClient;
use hyper_util::rt::TokioExecutor;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder as AutoConnBuilder;
use std::collections::HashSet;
use std::convert::Infallible;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, trace, warn};

type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<BoxBody<Bytes, Infallible>>, Infallible>> + Send>>;

type HttpsClient = LegacyClient<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>;

// RFC 7230 Section 6.1: Hop-by-hop headers must not be forwarded by proxies.
static HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub const RUNTIME_PREFIX: &str = "/tvkit-babel-runtime/";

const POLYFILLS_ASSET: &str = "polyfills";
const RUNTIME_ASSET: &str = "babel-runtime";
const POSTCSS_ASSET: &str = "postcss";

const LARGE_BODY: usize = 512 * 1024;
const SLOW_TRANSFORM: Duration = Duration::from_secs(5);

/// Process-wide state shared by every connection.
pub struct Shared {
    client: HttpsClient,
    cfg: Arc<Config>,
    upstream: Uri,
    change_origin: bool,
    targets: TargetSet,
    profile: CompatProfile,
    plan: PolyfillPlan,
    fingerprint: Fingerprint,
    client_patches: ClientPatches,
    bridge: ConditionalBridge,
    documents: TransformCache,
    scripts: TransformCache,
    styles: TransformCache,
    runtime: TransformCache,
    toolchain: Arc<dyn Toolchain>,
    artifacts: ArtifactStore,
    polyfills: OnceCell<Bytes>,
}

impl Shared {
    /// Resolve targets and capabilities and prepare everything the proxy
    /// needs. Fails when the configuration cannot be served at all.
    pub fn new(
        cfg: Arc<Config>,
        facts: Arc<dyn FactDatabase>,
        toolchain: Arc<dyn Toolchain>,
    ) -> anyhow::Result<Self> {
        cfg.validate()?;
        let upstream = cfg.upstream()?;
        let targets = cfg.targets()?;
        let overrides = cfg.overrides();
        let resolver = CapabilityResolver::new(overrides.clone(), facts);
        let profile = CompatProfile::resolve(&resolver, &targets)
            .context("failed to resolve target capabilities")?;
        let plan = PolyfillPlan::resolve(&resolver, &targets)
            .context("failed to plan polyfills")?;
        let fingerprint = fingerprint(&targets, &overrides);

        let https = HttpsConnectorBuilder::new()
            .with_native_roots()?
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        let client: HttpsClient = LegacyClient::builder(TokioExecutor::new()).build(https);

        let state = ConditionalState::new(
            cfg.general.conditional_ttl_seconds,
            cfg.general.conditional_max_entries,
        );

        Ok(Self {
            client,
            change_origin: should_change_origin(&upstream),
            upstream,
            client_patches: ClientPatches::new(profile.web_components, cfg.general.css),
            bridge: ConditionalBridge::new(state, fingerprint.clone()),
            artifacts: ArtifactStore::new(cfg.artifact_root(), &fingerprint),
            documents: TransformCache::new(),
            scripts: TransformCache::new(),
            styles: TransformCache::new(),
            runtime: TransformCache::new(),
            polyfills: OnceCell::new(),
            targets,
            profile,
            plan,
            fingerprint,
            toolchain,
            cfg,
        })
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn targets(&self) -> &TargetSet {
        &self.targets
    }

    pub fn profile(&self) -> &CompatProfile {
        &self.profile
    }

    pub fn upstream(&self) -> &Uri {
        &self.upstream
    }

    fn context(&self) -> TransformContext {
        TransformContext::new(self.targets.to_string(), self.cfg.general.minify)
    }

    /// The polyfill bundle, generated at most once per process. A failed
    /// attempt is not remembered, so the next caller tries again.
    pub async fn polyfills(&self) -> Result<Bytes, TransformError> {
        self.polyfills
            .get_or_try_init(|| self.generate_polyfills())
            .await
            .cloned()
    }

    async fn generate_polyfills(&self) -> Result<Bytes, TransformError> {
        let name = polyfills_file_name(self.cfg.general.minify);
        if let Some(stored) = self.artifacts.load_fresh(name).await {
            debug!(dir = %self.artifacts.dir().display(), "reusing stored polyfill bundle");
            return Ok(stored);
        }

        let started = Instant::now();
        let code = self
            .toolchain
            .bundle_polyfills(&self.plan, &self.context())
            .await?;
        info!(
            fingerprint = %self.fingerprint,
            modules = ?self.plan.modules().collect::<Vec<_>>(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generated polyfill bundle"
        );
        if let Err(e) = self.artifacts.store(name, &code).await {
            warn!(%e, "failed to persist polyfill bundle");
        }
        Ok(code)
    }

    /// Drop expired cache entries and conditional records.
    pub fn sweep(&self) {
        let transforms = self.documents.purge_expired()
            + self.scripts.purge_expired()
            + self.styles.purge_expired()
            + self.runtime.purge_expired();
        let conditionals = self.bridge.cleanup_expired();
        trace!(transforms, conditionals, "sweep finished");
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub async fn run_proxy(
    listen: SocketAddr,
    shared: Arc<Shared>,
    tls: Option<TlsAcceptor>,
) -> anyhow::Result<()> {
    // Default behavior: no accept limit (runs forever)
    run_proxy_with_limit(listen, shared, tls, None).await
}

/// Testable variant of `run_proxy` that accepts an optional `accept_limit`.
/// When `accept_limit` is `Some(n)`, the accept loop returns after accepting
/// the Nth connection. Connection handlers are spawned and may still be
/// running when this function returns.
pub async fn run_proxy_with_limit(
    listen: SocketAddr,
    shared: Arc<Shared>,
    tls: Option<TlsAcceptor>,
    accept_limit: Option<usize>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    let local = listener.local_addr()?;
    info!(
        %local,
        tls = tls.is_some(),
        upstream = %shared.upstream,
        targets = %shared.targets,
        fingerprint = %shared.fingerprint,
        esm = shared.profile.esm,
        "listening"
    );

    // Start bundling before the first page asks for it.
    let warm = shared.clone();
    tokio::spawn(async move {
        if let Err(e) = warm.polyfills().await {
            warn!(%e, "polyfill bundle generation failed");
        }
    });

    let sweeper = shared.clone();
    let every = Duration::from_secs(shared.cfg.general.sweep_interval_seconds.max(1));
    let _sweeper = AbortOnDrop(tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            sweeper.sweep();
        }
    }));

    let server_builder = AutoConnBuilder::new(TokioExecutor::new());

    let mut remaining = accept_limit;
    loop {
        if let Some(0) = remaining {
            break;
        }

        let (stream, remote_addr) = listener.accept().await?;

        if let Some(ref mut n) = remaining {
            *n -= 1;
        }

        let shared = shared.clone();
        let builder = server_builder.clone();
        let tls = tls.clone();
        tokio::spawn(async move {
            let conn_metadata = Arc::new(ConnectionMetadata::new(remote_addr, tls.is_some()));
            match tls {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        serve_connection(builder, tls_stream, shared, conn_metadata).await
                    }
                    Err(e) => debug!(%e, remote = %remote_addr, "TLS handshake failed"),
                },
                None => serve_connection(builder, stream, shared, conn_metadata).await,
            }
        });
    }

    Ok(())
}

async fn serve_connection<I>(
    builder: AutoConnBuilder<TokioExecutor>,
    stream: I,
    shared: Arc<Shared>,
    conn_metadata: Arc<ConnectionMetadata>,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let conn = conn_metadata.clone();
    let service = service_fn(move |req: Request<Incoming>| {
        let shared = shared.clone();
        let conn_metadata = conn_metadata.clone();
        let fut: ServiceFuture =
            Box::pin(async move { handle_request(req, shared, conn_metadata).await });
        fut
    });

    let io = TokioIo::new(stream);
    if let Err(e) = builder.serve_connection_with_upgrades(io, service).await {
        error!(%e, conn = %conn.id, "connection error");
    }
    trace!(conn = %conn.id, age_ms = conn.age().as_millis() as u64, "connection closed");
}

pub async fn handle_request<B>(
    req: Request<B>,
    shared: Arc<Shared>,
    conn_metadata: Arc<ConnectionMetadata>,
) -> Result<Response<BoxBody<Bytes, Infallible>>, Infallible>
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    trace!(
        conn = %conn_metadata.id,
        remote = %conn_metadata.remote_addr,
        tls = conn_metadata.tls,
        %method,
        %path,
        "request"
    );

    if is_websocket_upgrade(req.headers()) {
        return Ok(handle_websocket(req, shared).await);
    }

    let resp = match (&method, path.as_str()) {
        (&Method::GET, html::POLYFILLS_PATH) => serve_polyfills(req.headers(), &shared).await,
        (&Method::GET, p) if p.starts_with(RUNTIME_PREFIX) => {
            serve_runtime(req.headers(), &path, &shared).await
        }
        (&Method::POST, vite::POSTCSS_PATH) if shared.cfg.general.css => {
            serve_postcss(req, &shared).await
        }
        _ => forward(req, &shared).await,
    };
    Ok(resp)
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<BoxBody<Bytes, Infallible>> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(body.into()).boxed())
        .unwrap_or_else(|e| {
            error!("failed to build {} response: {}", status, e);
            Response::new(Full::new(Bytes::from("internal error")).boxed())
        })
}

fn build_response(
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
) -> Response<BoxBody<Bytes, Infallible>> {
    let mut resp = Response::new(Full::new(body).boxed());
    *resp.status_mut() = status;
    *resp.headers_mut() = headers;
    resp
}

fn validator_headers(etag: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Ok(v) = HeaderValue::from_str(etag) {
        headers.insert(header::ETAG, v);
    }
    headers
}

fn asset_response(etag: &str, code: Bytes) -> Response<BoxBody<Bytes, Infallible>> {
    let mut headers = validator_headers(etag);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/javascript"),
    );
    build_response(StatusCode::OK, headers, code)
}

/// `304` when the client already holds `etag`.
fn not_modified(
    req_headers: &HeaderMap,
    etag: &str,
) -> Option<Response<BoxBody<Bytes, Infallible>>> {
    let inm = req_headers.get(header::IF_NONE_MATCH)?.to_str().ok()?;
    if !etag::if_none_match_matches(inm, etag) {
        return None;
    }
    Some(build_response(
        StatusCode::NOT_MODIFIED,
        validator_headers(etag),
        Bytes::new(),
    ))
}

async fn serve_polyfills(
    req_headers: &HeaderMap,
    shared: &Shared,
) -> Response<BoxBody<Bytes, Infallible>> {
    let tag = etag::asset_etag(POLYFILLS_ASSET, &shared.fingerprint);
    if let Some(resp) = not_modified(req_headers, &tag) {
        return resp;
    }
    match shared.polyfills().await {
        Ok(code) => asset_response(&tag, code),
        Err(e) => {
            warn!(%e, "polyfill bundle unavailable");
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("polyfill generation failed: {}", e),
            )
        }
    }
}

/// Module name requested under [`RUNTIME_PREFIX`], e.g.
/// `helpers/classCallCheck` for `/tvkit-babel-runtime/helpers/classCallCheck.js`.
fn runtime_module(path: &str) -> Result<&str, TransformError> {
    let blocked = || TransformError::BlockedModule(path.to_string());
    let module = path
        .strip_prefix(RUNTIME_PREFIX)
        .and_then(|m| m.strip_suffix(".js"))
        .ok_or_else(blocked)?;
    let traversal = module
        .split('/')
        .any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if module.is_empty() || traversal || module.contains(['\\', '%']) {
        return Err(blocked());
    }
    Ok(module)
}

async fn serve_runtime(
    req_headers: &HeaderMap,
    path: &str,
    shared: &Shared,
) -> Response<BoxBody<Bytes, Infallible>> {
    let module = match runtime_module(path) {
        Ok(m) => m,
        Err(e) => {
            warn!(%path, "rejected runtime helper request");
            return text_response(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    let tag = etag::asset_etag(RUNTIME_ASSET, &shared.fingerprint);
    if let Some(resp) = not_modified(req_headers, &tag) {
        return resp;
    }

    let format = ModuleFormat::for_esm_support(shared.profile.esm);
    let ctx = shared.context().with_filename(path);
    let result = shared
        .runtime
        .memoize(Bytes::from(path.to_string()), jittered_ttl(), move |_| async move {
            shared.toolchain.runtime_helper(module, format, &ctx).await
        })
        .await;

    match result {
        Ok(code) => asset_response(&tag, code),
        Err(e) => {
            warn!(%module, %e, "runtime helper generation failed");
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("runtime helper generation failed: {}", e),
            )
        }
    }
}

/// Style fragments are keyed by content, so the tag names the input too.
async fn serve_postcss<B>(req: Request<B>, shared: &Shared) -> Response<BoxBody<Bytes, Infallible>>
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let boxed: Box<dyn std::error::Error + Send + Sync> = e.into();
            error!("failed to collect request body: {}", boxed);
            return text_response(StatusCode::INTERNAL_SERVER_ERROR, "request body collect error");
        }
    };

    let name = format!("{}_{}", POSTCSS_ASSET, hex::encode(content_hash(&body)));
    let tag = etag::asset_etag(&name, &shared.fingerprint);
    if let Some(resp) = not_modified(&parts.headers, &tag) {
        return resp;
    }

    match transform_style(shared, vite::POSTCSS_PATH, body.clone()).await {
        Ok(css) => {
            let mut headers = validator_headers(&tag);
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/css"));
            build_response(StatusCode::OK, headers, css)
        }
        Err(e) => {
            // No validator: the fallback must not be cached under the transformed tag.
            warn!(%e, "style update transform failed, serving original");
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/css"));
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            build_response(StatusCode::OK, headers, body)
        }
    }
}

/// True unless the origin is addressed as `localhost` or by IP literal.
fn should_change_origin(upstream: &Uri) -> bool {
    match upstream.host() {
        Some(host) => {
            let host = host.trim_start_matches('[').trim_end_matches(']');
            !(host.eq_ignore_ascii_case("localhost") || host.parse::<IpAddr>().is_ok())
        }
        None => false,
    }
}

fn upstream_uri(base: &Uri, path_and_query: &str) -> Result<Uri, hyper::http::Error> {
    let scheme = base.scheme_str().unwrap_or("http");
    let authority = base.authority().map(|a| a.as_str()).unwrap_or("localhost");
    let prefix = base.path().trim_end_matches('/');
    let uri = format!("{}://{}{}{}", scheme, authority, prefix, path_and_query).parse::<Uri>()?;
    Ok(uri)
}

// Parse a Connection header value into a lowercased set of tokens
fn parse_connection_tokens(val: Option<&HeaderValue>) -> HashSet<String> {
    let mut set = HashSet::new();
    if let Some(conn_val) = val {
        if let Ok(conn_str) = conn_val.to_str() {
            for token in conn_str.split(',') {
                let trimmed = token.trim().to_ascii_lowercase();
                if !trimmed.is_empty() {
                    set.insert(trimmed);
                }
            }
        }
    }
    set
}

fn is_hop_by_hop_header(name: &str, connection_hop_headers: &HashSet<String>) -> bool {
    connection_hop_headers.contains(name) || HOP_BY_HOP_HEADERS.contains(&name)
}

fn end_to_end_headers(headers: &HeaderMap) -> HeaderMap {
    let connection_hop_headers = parse_connection_tokens(headers.get(header::CONNECTION));
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if is_hop_by_hop_header(name.as_str(), &connection_hop_headers) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::UPGRADE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("websocket"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Document,
    Stylesheet,
    Script,
    Opaque,
}

fn classify(headers: &HeaderMap, css: bool) -> BodyKind {
    let encoded = headers
        .get(header::CONTENT_ENCODING)
        .is_some_and(|v| !v.to_str().is_ok_and(|s| s.trim().eq_ignore_ascii_case("identity")));
    if encoded {
        return BodyKind::Opaque;
    }
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        return BodyKind::Opaque;
    };
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "text/html" => BodyKind::Document,
        "text/css" if css => BodyKind::Stylesheet,
        "text/javascript" | "application/javascript" => BodyKind::Script,
        _ => BodyKind::Opaque,
    }
}

async fn forward<B>(req: Request<B>, shared: &Shared) -> Response<BoxBody<Bytes, Infallible>>
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let started = Instant::now();
    let url = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();
    let path = req.uri().path().to_string();

    let uri = match upstream_uri(&shared.upstream, &url) {
        Ok(uri) => uri,
        Err(e) => {
            error!("failed to build upstream uri: {}", e);
            return text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("request build error: {}", e),
            );
        }
    };

    let mut headers = end_to_end_headers(req.headers());
    if shared.change_origin {
        if let Some(v) = shared
            .upstream
            .authority()
            .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
        {
            headers.insert(header::HOST, v);
        }
    }
    shared.bridge.adjust_request_headers(&mut headers, &url);

    let method = req.method().clone();
    let body_bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let boxed: Box<dyn std::error::Error + Send + Sync> = e.into();
            error!("failed to collect request body: {}", boxed);
            return text_response(StatusCode::INTERNAL_SERVER_ERROR, "request body collect error");
        }
    };

    let mut builder = Request::builder().method(method.clone()).uri(uri);
    if let Some(h) = builder.headers_mut() {
        *h = headers;
    }
    let upstream_req = match builder.body(Full::new(body_bytes)) {
        Ok(r) => r,
        Err(e) => {
            error!("failed to build upstream request: {}", e);
            return text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("request build error: {}", e),
            );
        }
    };

    let resp = match shared.client.request(upstream_req).await {
        Ok(r) => r,
        Err(e) => {
            warn!(%url, %e, "upstream request failed");
            return text_response(StatusCode::BAD_GATEWAY, format!("upstream error: {}", e));
        }
    };

    let status = resp.status();
    let mut resp_headers = end_to_end_headers(resp.headers());
    shared.bridge.adjust_response_headers(&mut resp_headers, &url);

    let body = match resp.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(%url, %e, "failed to read upstream body");
            return text_response(
                StatusCode::BAD_GATEWAY,
                format!("upstream body collect error: {}", e),
            );
        }
    };

    if status != StatusCode::OK {
        debug!(%method, %url, status = status.as_u16(), "passing through");
        return build_response(status, resp_headers, body);
    }

    let kind = classify(&resp_headers, shared.cfg.general.css);
    if body.len() > LARGE_BODY && kind != BodyKind::Opaque {
        info!(%url, kb = body.len() / 1024, "rewriting large response");
    }
    let rewritten = match kind {
        BodyKind::Document => transform_document(shared, body.clone()).await,
        BodyKind::Stylesheet => transform_style(shared, &path, body.clone()).await,
        BodyKind::Script => transform_script(shared, &path, body.clone()).await,
        BodyKind::Opaque => return build_response(status, resp_headers, body),
    };

    let elapsed = started.elapsed();
    if elapsed > SLOW_TRANSFORM {
        info!(%url, elapsed_ms = elapsed.as_millis() as u64, "slow rewrite");
    }

    match rewritten {
        Ok(new_body) => {
            resp_headers.remove(header::CONTENT_LENGTH);
            trace!(%url, ?kind, "rewritten");
            build_response(status, resp_headers, new_body)
        }
        Err(e) => {
            warn!(%url, ?kind, %e, "transform failed, serving original");
            build_response(status, resp_headers, body)
        }
    }
}

async fn transform_document(shared: &Shared, body: Bytes) -> Result<Bytes, TransformError> {
    shared
        .documents
        .memoize(body, jittered_ttl(), move |content| async move {
            let source = std::str::from_utf8(&content).map_err(|_| TransformError::InvalidInput)?;
            let options = HtmlOptions {
                esm: shared.profile.esm,
                css: shared.cfg.general.css,
            };
            let out = html::transform_html(source, options, &InlineAssets { shared }).await?;
            Ok(Bytes::from(out))
        })
        .await
}

async fn transform_script(
    shared: &Shared,
    path: &str,
    body: Bytes,
) -> Result<Bytes, TransformError> {
    shared
        .scripts
        .memoize(body, jittered_ttl(), move |content| async move {
            let content = if path == vite::CLIENT_PATH && !shared.client_patches.is_empty() {
                let code =
                    std::str::from_utf8(&content).map_err(|_| TransformError::InvalidInput)?;
                Bytes::from(vite::patch_client(code, shared.client_patches))
            } else {
                content
            };
            let ctx = shared.context().with_filename(path);
            shared
                .toolchain
                .transform(TransformKind::JavaScript, content, &ctx)
                .await
        })
        .await
}

async fn transform_style(shared: &Shared, path: &str, body: Bytes) -> Result<Bytes, TransformError> {
    shared
        .styles
        .memoize(body, jittered_ttl(), move |content| async move {
            let ctx = shared.context().with_filename(path);
            shared
                .toolchain
                .transform(TransformKind::Css, content, &ctx)
                .await
        })
        .await
}

/// Inline `<script>` and `<style>` bodies go straight to the toolchain; the
/// enclosing document is what gets cached.
struct InlineAssets<'a> {
    shared: &'a Shared,
}

fn into_string(out: Bytes) -> Result<String, TransformError> {
    String::from_utf8(out.to_vec()).map_err(|_| TransformError::InvalidOutput)
}

#[async_trait]
impl InlineTransformer for InlineAssets<'_> {
    async fn script(&self, code: &str, inline: bool) -> Result<String, TransformError> {
        let ctx = self.shared.context().inline(inline);
        let out = self
            .shared
            .toolchain
            .transform(
                TransformKind::JavaScript,
                Bytes::copy_from_slice(code.as_bytes()),
                &ctx,
            )
            .await?;
        into_string(out)
    }

    async fn style(&self, css: &str) -> Result<String, TransformError> {
        let out = self
            .shared
            .toolchain
            .transform(
                TransformKind::Css,
                Bytes::copy_from_slice(css.as_bytes()),
                &self.shared.context(),
            )
            .await?;
        into_string(out)
    }
}

/// Relay a WebSocket handshake to the origin and, once both sides have
/// switched protocols, copy bytes in both directions until either closes.
async fn handle_websocket<B>(mut req: Request<B>, shared: Arc<Shared>) -> Response<BoxBody<Bytes, Infallible>>
where
    B: hyper::body::Body + Send + 'static,
{
    let url = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();
    let uri = match upstream_uri(&shared.upstream, &url) {
        Ok(uri) => uri,
        Err(e) => {
            return text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("request build error: {}", e),
            )
        }
    };

    let mut builder = Request::builder().method(req.method().clone()).uri(uri);
    if let Some(h) = builder.headers_mut() {
        *h = req.headers().clone();
        if shared.change_origin {
            if let Some(v) = shared
                .upstream
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
            {
                h.insert(header::HOST, v);
            }
        }
    }
    let upstream_req = match builder.body(Full::new(Bytes::new())) {
        Ok(r) => r,
        Err(e) => {
            return text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("request build error: {}", e),
            )
        }
    };

    let mut upstream_resp = match shared.client.request(upstream_req).await {
        Ok(r) => r,
        Err(e) => {
            warn!(%url, %e, "websocket upstream request failed");
            return text_response(StatusCode::BAD_GATEWAY, format!("upstream error: {}", e));
        }
    };

    if upstream_resp.status() != StatusCode::SWITCHING_PROTOCOLS {
        let status = upstream_resp.status();
        let headers = end_to_end_headers(upstream_resp.headers());
        let body = upstream_resp
            .into_body()
            .collect()
            .await
            .map(|c| c.to_bytes())
            .unwrap_or_default();
        debug!(%url, status = status.as_u16(), "origin declined websocket upgrade");
        return build_response(status, headers, body);
    }

    let headers = upstream_resp.headers().clone();
    let upstream_upgrade = hyper::upgrade::on(&mut upstream_resp);
    let client_upgrade = hyper::upgrade::on(&mut req);

    tokio::spawn(async move {
        match tokio::try_join!(client_upgrade, upstream_upgrade) {
            Ok((client, origin)) => {
                let mut client = TokioIo::new(client);
                let mut origin = TokioIo::new(origin);
                match tokio::io::copy_bidirectional(&mut client, &mut origin).await {
                    Ok((up, down)) => trace!(%url, up, down, "websocket closed"),
                    Err(e) => debug!(%url, %e, "websocket tunnel ended"),
                }
            }
            Err(e) => error!("websocket upgrade error for {}: {}", url, e),
        }
    });

    build_response(StatusCode::SWITCHING_PROTOCOLS, headers, Bytes::new())
}
