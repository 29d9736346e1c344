// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

use anyhow::Context;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;

use tvkit::capability::facts::CaniuseFacts;
use tvkit::capability::CapabilityOverrides;
use tvkit::config::Config;
use tvkit::toolchain::CommandToolchain;
use tvkit::{proxy, tls};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "tvkit", version, about)]
struct Args {
    /// Origin dev server, e.g. http://localhost:5173
    target: Option<String>,

    /// Port to listen on (keeps the configured host)
    #[arg(long)]
    port: Option<u16>,

    /// Listen address, e.g. 0.0.0.0:3000
    #[arg(long)]
    listen: Option<String>,

    /// Browserslist query, e.g. "tizen 2019", "last 2 versions" or "chrome 60, ie 11"
    #[arg(long)]
    browser: Option<String>,

    /// Leave CSS untouched
    #[arg(long)]
    no_css: bool,

    #[arg(long)]
    no_minify: bool,

    /// Directory for generated artifacts
    #[arg(long)]
    cache_dir: Option<String>,

    /// Capability overrides, e.g. es6-module=false,fetch=true
    #[arg(long)]
    supports: Option<String>,

    #[arg(long)]
    ssl_cert: Option<String>,

    #[arg(long)]
    ssl_key: Option<String>,

    /// Path to the caniuse `data.json`
    #[arg(long)]
    facts: Option<String>,

    /// Optional config TOML path
    #[arg(long)]
    config: Option<String>,
}

impl Args {
    /// Overlay command line flags on top of `cfg`.
    fn apply(&self, cfg: &mut Config) -> anyhow::Result<()> {
        if let Some(target) = &self.target {
            cfg.general.target = target.clone();
        }
        if let Some(port) = self.port {
            let host = cfg
                .general
                .listen
                .rsplit_once(':')
                .map(|(host, _)| host)
                .unwrap_or("0.0.0.0");
            cfg.general.listen = format!("{}:{}", host, port);
        }
        if let Some(listen) = &self.listen {
            cfg.general.listen = listen.clone();
        }
        if let Some(browser) = &self.browser {
            cfg.general.browser = Some(browser.clone());
        }
        if self.no_css {
            cfg.general.css = false;
        }
        if self.no_minify {
            cfg.general.minify = false;
        }
        if let Some(dir) = &self.cache_dir {
            cfg.general.cache_dir = dir.clone();
        }
        if let Some(list) = &self.supports {
            let overrides = CapabilityOverrides::parse(list)?;
            for (name, supported) in overrides.iter() {
                cfg.supports.insert(name.to_string(), supported);
            }
        }
        if let Some(cert) = &self.ssl_cert {
            cfg.tls.cert_path = Some(cert.clone());
        }
        if let Some(key) = &self.ssl_key {
            cfg.tls.key_path = Some(key.clone());
        }
        if let Some(facts) = &self.facts {
            cfg.facts.path = facts.clone();
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(p) => Config::load_from_path(p)
            .await
            .with_context(|| format!("failed to load config {}", p))?,
        None => Config::default(),
    };
    args.apply(&mut cfg)?;
    cfg.validate()?;

    let facts = CaniuseFacts::load(&cfg.facts.path)
        .await
        .with_context(|| format!("failed to load compatibility data {}", cfg.facts.path))?;

    let acceptor = match (&cfg.tls.cert_path, &cfg.tls.key_path) {
        (Some(cert), Some(key)) => Some(tls::load_acceptor(Path::new(cert), Path::new(key)).await?),
        _ => None,
    };

    let addr = cfg.listen_addr()?;
    let toolchain = Arc::new(CommandToolchain::new(cfg.toolchain.clone()));
    let shared = Arc::new(proxy::Shared::new(Arc::new(cfg), Arc::new(facts), toolchain)?);
    info!(
        targets = %shared.targets(),
        esm = shared.profile().esm,
        web_components = shared.profile().web_components,
        "resolved targets"
    );

    let server = proxy::run_proxy(addr, shared, acceptor);

    tokio::select! {
        res = server => {
            if let Err(e) = res {
                error!(%e, "server error");
            }
        }
        _ = signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    Ok(())
}
