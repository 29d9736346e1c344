// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Deterministic identity of a (targets, overrides) configuration.
//!
//! Used as the on-disk artifact namespace, inside synthetic ETags, and in
//! log lines. The common single-target case stays readable (`ie_11`).

use crate::capability::CapabilityOverrides;
use crate::targets::{PlatformTarget, TargetSet};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Serialize)]
struct Canonical<'a> {
    browsers: Vec<String>,
    supports: Vec<(&'a str, bool)>,
}

pub fn fingerprint(targets: &TargetSet, overrides: &CapabilityOverrides) -> Fingerprint {
    if let ([only], true) = (targets.as_slice(), overrides.is_empty()) {
        return Fingerprint(slug(only));
    }

    let mut browsers: Vec<String> = targets.iter().map(ToString::to_string).collect();
    browsers.sort();
    // CapabilityOverrides iterates in key order already.
    let canonical = Canonical {
        browsers,
        supports: overrides.iter().collect(),
    };
    let json = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&json);
    Fingerprint(format!("multiple_{}", hex::encode(&digest[..16])))
}

fn slug(target: &PlatformTarget) -> String {
    target
        .to_string()
        .to_lowercase()
        .chars()
        .map(|c| if matches!(c, ' ' | '.' | '/' | '\\') { '_' } else { c })
        .collect()
}
