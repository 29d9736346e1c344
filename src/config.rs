// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Configuration loading and validation.

use crate::capability::CapabilityOverrides;
use crate::error::ConfigError;
use crate::targets::TargetSet;
use hyper::Uri;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Listen address, e.g. 0.0.0.0:3000
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Origin server to proxy, e.g. http://localhost:5173
    #[serde(default = "default_target")]
    pub target: String,

    /// Browserslist query, e.g. "defaults", "chrome 60, ie 11" or "tizen 2019"
    #[serde(default)]
    pub browser: Option<String>,

    /// Rewrite CSS responses and `<style>` blocks
    #[serde(default = "default_true")]
    pub css: bool,

    #[serde(default = "default_true")]
    pub minify: bool,

    /// Root of the per-fingerprint artifact directories
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// How often expired cache and conditional entries are swept
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,

    #[serde(default = "default_conditional_ttl")]
    pub conditional_ttl_seconds: u64,

    #[serde(default = "default_conditional_max_entries")]
    pub conditional_max_entries: usize,
}

fn default_listen() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_target() -> String {
    "http://localhost:5173".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cache_dir() -> String {
    ".tvkit".to_string()
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_conditional_ttl() -> u64 {
    3600
}

fn default_conditional_max_entries() -> usize {
    10_000
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            target: default_target(),
            browser: None,
            css: true,
            minify: true,
            cache_dir: default_cache_dir(),
            sweep_interval_seconds: default_sweep_interval(),
            conditional_ttl_seconds: default_conditional_ttl(),
            conditional_max_entries: default_conditional_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TlsConfig {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

impl TlsConfig {
    pub fn enabled(&self) -> bool {
        self.cert_path.is_some() || self.key_path.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FactsConfig {
    /// caniuse-format JSON data file
    #[serde(default = "default_facts_path")]
    pub path: String,
}

fn default_facts_path() -> String {
    "caniuse.json".to_string()
}

impl Default for FactsConfig {
    fn default() -> Self {
        Self {
            path: default_facts_path(),
        }
    }
}

/// Argument vectors of the external transform commands.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ToolchainConfig {
    #[serde(default = "default_javascript_command")]
    pub javascript: Vec<String>,
    #[serde(default = "default_css_command")]
    pub css: Vec<String>,
    #[serde(default = "default_polyfills_command")]
    pub polyfills: Vec<String>,
    #[serde(default = "default_runtime_command")]
    pub runtime: Vec<String>,
}

fn npx_toolchain(kind: &str) -> Vec<String> {
    vec!["npx".into(), "tvkit-toolchain".into(), kind.into()]
}

fn default_javascript_command() -> Vec<String> {
    npx_toolchain("javascript")
}

fn default_css_command() -> Vec<String> {
    npx_toolchain("css")
}

fn default_polyfills_command() -> Vec<String> {
    npx_toolchain("polyfills")
}

fn default_runtime_command() -> Vec<String> {
    npx_toolchain("runtime")
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            javascript: default_javascript_command(),
            css: default_css_command(),
            polyfills: default_polyfills_command(),
            runtime: default_runtime_command(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    /// Capability overrides, e.g. `es6-module = false`
    #[serde(default)]
    pub supports: BTreeMap<String, bool>,

    #[serde(default)]
    pub tls: TlsConfig,

    #[serde(default)]
    pub facts: FactsConfig,

    #[serde(default)]
    pub toolchain: ToolchainConfig,
}

impl Config {
    /// Load configuration from a TOML file:
    ///
    /// ```toml
    /// [general]
    /// target = "http://localhost:5173"
    /// browser = "tizen 2019"
    ///
    /// [supports]
    /// es6-module = false
    ///
    /// [toolchain]
    /// javascript = ["node", "tools/babel.js"]
    /// ```
    pub async fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let s = tokio::fs::read_to_string(path.as_ref()).await?;
        let cfg: Self = toml::from_str(&s)?;
        Ok(cfg)
    }

    pub fn overrides(&self) -> CapabilityOverrides {
        self.supports
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.general
            .listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(self.general.listen.clone()))
    }

    pub fn upstream(&self) -> Result<Uri, ConfigError> {
        let invalid = || ConfigError::InvalidTarget(self.general.target.clone());
        let uri: Uri = self.general.target.parse().map_err(|_| invalid())?;
        match (uri.scheme_str(), uri.authority()) {
            (Some("http") | Some("https"), Some(_)) => Ok(uri),
            _ => Err(invalid()),
        }
    }

    pub fn targets(&self) -> anyhow::Result<TargetSet> {
        let query = self
            .general
            .browser
            .as_deref()
            .ok_or(ConfigError::MissingBrowser)?;
        Ok(TargetSet::parse(query)?)
    }

    pub fn artifact_root(&self) -> PathBuf {
        PathBuf::from(&self.general.cache_dir)
    }

    /// Check everything that can be checked without touching the network.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.listen_addr()?;
        self.upstream()?;
        self.targets()?;
        if self.tls.cert_path.is_some() != self.tls.key_path.is_some() {
            return Err(ConfigError::IncompleteTls.into());
        }
        for (name, argv) in [
            ("javascript", &self.toolchain.javascript),
            ("css", &self.toolchain.css),
            ("polyfills", &self.toolchain.polyfills),
            ("runtime", &self.toolchain.runtime),
        ] {
            if argv.is_empty() {
                return Err(ConfigError::EmptyCommand(name).into());
            }
        }
        Ok(())
    }
}
