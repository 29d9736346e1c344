// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Access to the external feature-compatibility database.
//!
//! [`CaniuseFacts`] reads the caniuse "full data" JSON layout:
//! `{"data": {"<feature>": {"stats": {"<platform>": {"<version>": "y"}}}}}`.
//! Only the `stats` tables are used; other fields are ignored.

use super::{CapabilitySource, Resolution};
use crate::error::CapabilityError;
use crate::targets::PlatformTarget;
use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Answer for a single (feature, platform, version) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Support {
    Supported,
    Unsupported,
    /// The database knows the feature but has no stats for this triple.
    Unknown,
}

pub trait FactDatabase: Send + Sync {
    /// Whether the feature identifier exists at all.
    fn knows(&self, feature: &str) -> bool;

    fn lookup(&self, feature: &str, platform: &str, version: &str) -> Support;
}

#[derive(Debug, Deserialize)]
struct CaniuseFile {
    data: HashMap<String, FeatureData>,
}

#[derive(Debug, Deserialize)]
struct FeatureData {
    #[serde(default)]
    stats: HashMap<String, HashMap<String, String>>,
}

#[derive(Debug, Default)]
pub struct CaniuseFacts {
    features: HashMap<String, FeatureData>,
}

impl CaniuseFacts {
    pub async fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let s = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read compatibility data {:?}", path))?;
        Self::from_json(&s).with_context(|| format!("invalid compatibility data {:?}", path))
    }

    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        let file: CaniuseFile = serde_json::from_str(s)?;
        Ok(Self {
            features: file.data,
        })
    }
}

impl FactDatabase for CaniuseFacts {
    fn knows(&self, feature: &str) -> bool {
        self.features.contains_key(feature)
    }

    fn lookup(&self, feature: &str, platform: &str, version: &str) -> Support {
        let flag = self
            .features
            .get(feature)
            .and_then(|f| f.stats.get(platform))
            .and_then(|versions| versions.get(version));
        match flag {
            None => Support::Unknown,
            // Flags look like "y", "a x #2", "n d #1"; the first letter decides.
            Some(flag) => match flag.trim().chars().next() {
                Some('n') | Some('u') => Support::Unsupported,
                Some(_) => Support::Supported,
                None => Support::Unknown,
            },
        }
    }
}

/// Adapts a [`FactDatabase`] to the resolver chain, failing closed on gaps.
pub struct FactSource {
    db: Arc<dyn FactDatabase>,
}

impl FactSource {
    pub fn new(db: Arc<dyn FactDatabase>) -> Self {
        Self { db }
    }
}

impl CapabilitySource for FactSource {
    fn resolve(
        &self,
        capability: &str,
        target: &PlatformTarget,
    ) -> Result<Resolution, CapabilityError> {
        if !self.db.knows(capability) {
            return Err(CapabilityError::UnknownCapability(capability.to_string()));
        }
        match self.db.lookup(capability, &target.platform, &target.version) {
            Support::Supported => Ok(Resolution::Supported),
            Support::Unsupported => Ok(Resolution::Unsupported),
            Support::Unknown => {
                warn!(
                    feature = %capability,
                    target = %target,
                    "no stats available for feature, assuming unsupported"
                );
                Ok(Resolution::Unsupported)
            }
        }
    }
}
