// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Capability resolution: "is feature X available on every target?"
//!
//! Answers come from a chain of [`CapabilitySource`]s consulted in order:
//! operator overrides, the built-in [`matrix::SupportMatrix`], and finally
//! the external fact database through [`facts::FactSource`]. The first source
//! that has an opinion wins.

pub mod facts;
pub mod matrix;

use crate::error::CapabilityError;
use crate::targets::{PlatformTarget, TargetSet};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a single source says about one (capability, target) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Supported,
    Unsupported,
    /// The source has no entry for this capability; ask the next one.
    Defer,
}

impl From<bool> for Resolution {
    fn from(supported: bool) -> Self {
        if supported {
            Resolution::Supported
        } else {
            Resolution::Unsupported
        }
    }
}

pub trait CapabilitySource: Send + Sync {
    fn resolve(
        &self,
        capability: &str,
        target: &PlatformTarget,
    ) -> Result<Resolution, CapabilityError>;
}

/// Operator-forced support decisions, fixed for the process lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapabilityOverrides(BTreeMap<String, bool>);

impl CapabilityOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `name=bool,name=bool`. Booleans accept `true`/`false`/`1`/`0`.
    pub fn parse(list: &str) -> Result<Self, CapabilityError> {
        let mut map = BTreeMap::new();
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((name, value)) = entry.split_once('=') else {
                return Err(CapabilityError::MalformedOverride(entry.to_string()));
            };
            let name = name.trim();
            let value = parse_bool(value.trim())
                .ok_or_else(|| CapabilityError::MalformedOverride(entry.to_string()))?;
            if name.is_empty() {
                return Err(CapabilityError::MalformedOverride(entry.to_string()));
            }
            map.insert(name.to_string(), value);
        }
        Ok(Self(map))
    }

    pub fn insert(&mut self, capability: impl Into<String>, supported: bool) {
        self.0.insert(capability.into(), supported);
    }

    pub fn extend(&mut self, other: &CapabilityOverrides) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), *v);
        }
    }

    pub fn get(&self, capability: &str) -> Option<bool> {
        self.0.get(capability).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Entries in lexicographic key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl FromIterator<(String, bool)> for CapabilityOverrides {
    fn from_iter<I: IntoIterator<Item = (String, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

impl CapabilitySource for CapabilityOverrides {
    fn resolve(
        &self,
        capability: &str,
        _target: &PlatformTarget,
    ) -> Result<Resolution, CapabilityError> {
        Ok(self.get(capability).map_or(Resolution::Defer, Resolution::from))
    }
}

/// Ordered chain of capability sources.
#[derive(Clone)]
pub struct CapabilityResolver {
    sources: Vec<Arc<dyn CapabilitySource>>,
}

impl CapabilityResolver {
    /// Standard precedence: overrides, built-in table, fact database.
    pub fn new(overrides: CapabilityOverrides, facts: Arc<dyn facts::FactDatabase>) -> Self {
        Self::with_sources(vec![
            Arc::new(overrides),
            Arc::new(matrix::SupportMatrix),
            Arc::new(facts::FactSource::new(facts)),
        ])
    }

    pub fn with_sources(sources: Vec<Arc<dyn CapabilitySource>>) -> Self {
        Self { sources }
    }

    /// True when `capability` is supported by every target.
    pub fn is_supported(
        &self,
        capability: &str,
        targets: &TargetSet,
    ) -> Result<bool, CapabilityError> {
        for target in targets {
            if !self.resolve_one(capability, target)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// True when every capability is supported by every target.
    pub fn are_supported(
        &self,
        capabilities: &[&str],
        targets: &TargetSet,
    ) -> Result<bool, CapabilityError> {
        for capability in capabilities {
            if !self.is_supported(capability, targets)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn resolve_one(
        &self,
        capability: &str,
        target: &PlatformTarget,
    ) -> Result<bool, CapabilityError> {
        for source in &self.sources {
            match source.resolve(capability, target)? {
                Resolution::Supported => return Ok(true),
                Resolution::Unsupported => return Ok(false),
                Resolution::Defer => {}
            }
        }
        Err(CapabilityError::UnknownCapability(capability.to_string()))
    }
}

/// Capability decisions the request path needs, computed once at startup so
/// that configuration errors surface before the proxy starts listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatProfile {
    /// Native `<script type="module">` plus dynamic `import()`.
    pub esm: bool,
    /// Custom elements, shadow DOM and CSS variables (dev-server error overlay).
    pub web_components: bool,
}

pub const ESM_CAPABILITIES: &[&str] = &["es6-module", "es6-module-dynamic-import"];
pub const WEB_COMPONENT_CAPABILITIES: &[&str] = &["custom-elements", "shadowdom", "css-variables"];

impl CompatProfile {
    pub fn resolve(
        resolver: &CapabilityResolver,
        targets: &TargetSet,
    ) -> Result<Self, CapabilityError> {
        Ok(Self {
            esm: resolver.are_supported(ESM_CAPABILITIES, targets)?,
            web_components: resolver.are_supported(WEB_COMPONENT_CAPABILITIES, targets)?,
        })
    }

    /// Profile for fully modern targets, handy in tests.
    pub fn modern() -> Self {
        Self {
            esm: true,
            web_components: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{make_facts, targets};
    use rstest::rstest;

    fn resolver(overrides: CapabilityOverrides) -> CapabilityResolver {
        CapabilityResolver::new(overrides, Arc::new(make_facts()))
    }

    #[rstest]
    #[case("normalize", "chrome 33", false)]
    #[case("normalize", "chrome 34", true)]
    #[case("composedPath", "samsung 6", false)]
    #[case("composedPath", "samsung 6.2", true)]
    #[case("dom-append", "and_chr 54", true)]
    #[case("dom-append", "ios_saf 9.3", false)]
    #[case("ie11", "ie 11", true)]
    #[case("ie11", "chrome 100", false)]
    #[case("symbol", "ie 11", false)]
    fn built_in_thresholds(#[case] cap: &str, #[case] target: &str, #[case] expected: bool) {
        let r = resolver(CapabilityOverrides::new());
        assert_eq!(r.is_supported(cap, &targets(target)).unwrap(), expected);
    }

    #[test]
    fn threshold_is_monotonic_around_minimum() {
        let r = resolver(CapabilityOverrides::new());
        for v in 30..=60 {
            let t = targets(&format!("firefox {v}"));
            assert_eq!(r.is_supported("dom-append", &t).unwrap(), v >= 49, "firefox {v}");
        }
    }

    #[test]
    fn every_target_must_support() {
        let r = resolver(CapabilityOverrides::new());
        assert!(r.is_supported("normalize", &targets("chrome 60")).unwrap());
        assert!(!r
            .is_supported("normalize", &targets("chrome 60, ie 11"))
            .unwrap());
    }

    #[rstest]
    #[case("chrome 60")]
    #[case("ie 11")]
    #[case("chrome 60, safari 9")]
    #[case("safari 12")]
    fn array_query_is_conjunction(#[case] query: &str) {
        let r = resolver(CapabilityOverrides::new());
        let t = targets(query);
        let caps = ["fetch", "normalize"];
        let expected =
            r.is_supported(caps[0], &t).unwrap() && r.is_supported(caps[1], &t).unwrap();
        assert_eq!(r.are_supported(&caps, &t).unwrap(), expected);
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    fn overrides_win_everywhere(#[case] forced: bool) {
        let mut overrides = CapabilityOverrides::new();
        overrides.insert("normalize", forced);
        overrides.insert("fetch", forced);
        overrides.insert("not-in-any-database", forced);
        let r = resolver(overrides);
        for q in ["ie 11", "chrome 100", "chrome 20, safari 3"] {
            let t = targets(q);
            assert_eq!(r.is_supported("normalize", &t).unwrap(), forced);
            assert_eq!(r.is_supported("fetch", &t).unwrap(), forced);
            assert_eq!(r.is_supported("not-in-any-database", &t).unwrap(), forced);
        }
    }

    #[test]
    fn unknown_capability_fails_fast() {
        let r = resolver(CapabilityOverrides::new());
        let err = r
            .is_supported("teleportation", &targets("chrome 60"))
            .unwrap_err();
        assert_eq!(err, CapabilityError::UnknownCapability("teleportation".into()));
    }

    #[test]
    fn missing_stats_fail_closed() {
        let r = resolver(CapabilityOverrides::new());
        // the test database has no row for chrome 1
        assert!(!r.is_supported("fetch", &targets("chrome 1")).unwrap());
    }

    #[test]
    fn unreliable_platforms_are_unsupported() {
        let r = resolver(CapabilityOverrides::new());
        assert!(!r.is_supported("normalize", &targets("and_qq 10.4")).unwrap());
        assert!(!r.is_supported("normalize", &targets("kaios 2.5")).unwrap());
    }

    #[rstest]
    #[case("es6-module=false", &[("es6-module", false)])]
    #[case(" fetch = TRUE , proxy=0", &[("fetch", true), ("proxy", false)])]
    #[case("", &[])]
    fn parses_overrides(#[case] list: &str, #[case] expected: &[(&str, bool)]) {
        let parsed = CapabilityOverrides::parse(list).unwrap();
        let got: Vec<(&str, bool)> = parsed.iter().collect();
        assert_eq!(got, expected);
    }

    #[rstest]
    #[case("fetch")]
    #[case("fetch=maybe")]
    #[case("=true")]
    fn rejects_malformed_overrides(#[case] list: &str) {
        assert!(matches!(
            CapabilityOverrides::parse(list),
            Err(CapabilityError::MalformedOverride(_))
        ));
    }

    #[test]
    fn profile_reflects_module_support() {
        let r = resolver(CapabilityOverrides::new());
        let legacy = CompatProfile::resolve(&r, &targets("ie 11")).unwrap();
        assert!(!legacy.esm);
        assert!(!legacy.web_components);
        let modern = CompatProfile::resolve(&r, &targets("chrome 100")).unwrap();
        assert_eq!(modern, CompatProfile::modern());
    }
}
