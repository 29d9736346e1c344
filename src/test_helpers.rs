// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Shared test utilities to reduce duplication across test modules.

use crate::capability::facts::CaniuseFacts;
use crate::capability::{CapabilityOverrides, CapabilityResolver};
use crate::config::Config;
use crate::connection::ConnectionMetadata;
use crate::error::TransformError;
use crate::polyfills::PolyfillPlan;
use crate::proxy::Shared;
use crate::targets::{PlatformTarget, TargetSet};
use crate::toolchain::{ModuleFormat, Toolchain, TransformContext, TransformKind};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Trimmed caniuse data covering chrome 60/100, ie 11 and safari 9/12.
pub const FACTS_JSON: &str = include_str!("../tests/fixtures/caniuse.json");

pub fn make_facts() -> CaniuseFacts {
    CaniuseFacts::from_json(FACTS_JSON).expect("valid caniuse fixture")
}

/// Explicit `platform version` pairs, without query resolution, so tests
/// can name versions the bundled browser data does not list.
pub fn targets(list: &str) -> TargetSet {
    let parsed = list
        .split(',')
        .map(|pair| {
            let (platform, version) = pair.trim().split_once(' ').expect("platform and version");
            PlatformTarget::new(platform.to_lowercase(), version.trim())
        })
        .collect();
    TargetSet::new(parsed).expect("non-empty target list")
}

pub fn make_resolver(overrides: CapabilityOverrides) -> CapabilityResolver {
    CapabilityResolver::new(overrides, Arc::new(make_facts()))
}

/// Create a test connection metadata with standard test address
pub fn make_test_conn() -> ConnectionMetadata {
    ConnectionMetadata::new("127.0.0.1:12345".parse().expect("valid test address"), false)
}

/// Toolchain that tags its input instead of running anything.
#[derive(Default)]
pub struct SpyToolchain {
    pub transforms: AtomicUsize,
    pub bundles: AtomicUsize,
    pub helpers: AtomicUsize,
    pub fail: AtomicBool,
    pub delay: Duration,
}

impl SpyToolchain {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        let spy = Self::default();
        spy.fail.store(true, Ordering::SeqCst);
        spy
    }

    fn check(&self) -> Result<(), TransformError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransformError::Other("spy failure".into()));
        }
        Ok(())
    }
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
            tokio::time::sleep(self.delay).await;
        }
        self.check()?;
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
        self.check()?;
        Ok(Bytes::from(format!("/*polyfills*/\n{}", plan.entry_source())))
    }

    async fn runtime_helper(
        &self,
        module: &str,
        format: ModuleFormat,
        _ctx: &TransformContext,
    ) -> Result<Bytes, TransformError> {
        self.helpers.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(Bytes::from(format!(
            "/*runtime {} {}*/",
            module,
            format.as_str()
        )))
    }
}

/// Config pointing at `target` with artifacts under a fresh temp directory.
pub fn make_config(target: &str, browser: &str) -> Config {
    let mut cfg = Config::default();
    cfg.general.target = target.to_string();
    cfg.general.browser = Some(browser.to_string());
    cfg.general.cache_dir = std::env::temp_dir()
        .join(format!("tvkit_test_{}", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .into_owned();
    cfg
}

pub fn make_shared(cfg: Config, toolchain: Arc<SpyToolchain>) -> Arc<Shared> {
    Arc::new(
        Shared::new(Arc::new(cfg), Arc::new(make_facts()), toolchain)
            .expect("valid shared state"),
    )
}
