// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Platform targets and the operator query syntax that produces them.
//!
//! Queries are browserslist queries (`"defaults"`, `"last 2 versions"`,
//! `"chrome 60, ie 11"`). TV platforms (`tizen`, `webos`) accept either an
//! OS version or a model year and expand to the browser engines they ship;
//! a query naming one may only hold plain `platform version` clauses.

use crate::error::TargetError;
use browserslist::Opts;
use serde::Serialize;
use std::fmt;

/// One runtime that output must run on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PlatformTarget {
    pub platform: String,
    pub version: String,
}

impl PlatformTarget {
    pub fn new(platform: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            version: version.into(),
        }
    }

    /// Numeric form of the version, ignoring range suffixes (`15.2-15.3`)
    /// and trailing qualifiers. `None` when no leading number exists.
    pub fn numeric_version(&self) -> Option<f64> {
        parse_numeric_version(&self.version)
    }
}

impl fmt::Display for PlatformTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.platform, self.version)
    }
}

pub fn parse_numeric_version(version: &str) -> Option<f64> {
    let head = version.split('-').next().unwrap_or("");
    let end = head
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
        .map(|(i, _)| i)
        .unwrap_or(head.len());
    let numeric = head[..end].trim_end_matches('.');
    if numeric.is_empty() {
        return None;
    }
    numeric.parse::<f64>().ok()
}

/// Non-empty, de-duplicated list of targets that must all support a feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSet(Vec<PlatformTarget>);

impl TargetSet {
    pub fn new(targets: Vec<PlatformTarget>) -> Result<Self, TargetError> {
        let mut unique: Vec<PlatformTarget> = Vec::with_capacity(targets.len());
        for t in targets {
            if !unique.contains(&t) {
                unique.push(t);
            }
        }
        if unique.is_empty() {
            return Err(TargetError::Empty);
        }
        Ok(Self(unique))
    }

    /// Resolve an operator query into a target set.
    pub fn parse(query: &str) -> Result<Self, TargetError> {
        let clauses: Vec<&str> = query
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();
        if clauses.is_empty() {
            return Err(TargetError::Empty);
        }

        let tv = clauses.iter().any(|c| {
            c.split_whitespace()
                .next()
                .is_some_and(|p| tv_platform(&p.to_ascii_lowercase()).is_some())
        });
        if !tv {
            return resolve(query);
        }

        let mut expanded = Vec::new();
        for clause in clauses {
            expanded.extend(expand_clause(clause)?);
        }
        resolve(&expanded.join(", "))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PlatformTarget> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[PlatformTarget] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a TargetSet {
    type Item = &'a PlatformTarget;
    type IntoIter = std::slice::Iter<'a, PlatformTarget>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for TargetSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(", "))
    }
}

fn resolve(query: &str) -> Result<TargetSet, TargetError> {
    let distribs = browserslist::resolve(&[query], &Opts::default())
        .map_err(|e| TargetError::Query(e.to_string()))?;
    TargetSet::new(
        distribs
            .iter()
            .map(|d| PlatformTarget::new(d.name(), d.version()))
            .collect(),
    )
}

/// Rewrite one clause of a TV query into plain browserslist clauses.
fn expand_clause(clause: &str) -> Result<Vec<String>, TargetError> {
    let parts: Vec<&str> = clause.split_whitespace().collect();
    let [platform, version] = parts.as_slice() else {
        return Err(TargetError::Unsupported(clause.to_string()));
    };
    let valid_platform = platform
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_');
    let valid_version = version.starts_with(|c: char| c.is_ascii_digit());
    if !valid_platform || !valid_version {
        return Err(TargetError::Unsupported(clause.to_string()));
    }
    let platform = platform.to_ascii_lowercase();
    let version = version.to_ascii_lowercase();

    let Some(tv) = tv_platform(&platform) else {
        return Ok(vec![format!("{} {}", platform, version)]);
    };
    let release = tv
        .releases
        .iter()
        .find(|(year, _)| *year == version)
        .map(|(_, v)| *v)
        .unwrap_or(version.as_str());
    let Some((_, engines)) = tv.versions.iter().find(|(v, _)| *v == release) else {
        return Err(TargetError::UnknownTvVersion { platform, version });
    };
    Ok(engines.iter().map(|(p, v)| format!("{} {}", p, v)).collect())
}

type Engines = &'static [(&'static str, &'static str)];

struct TvPlatform {
    versions: &'static [(&'static str, Engines)],
    releases: &'static [(&'static str, &'static str)],
}

// WebKit r152340 / 537.41 era builds report both a Safari and a Chrome engine.
const OLD_WEBKIT: Engines = &[("safari", "7"), ("chrome", "27")];

static TIZEN: TvPlatform = TvPlatform {
    versions: &[
        ("6.5", &[("chrome", "85")]),
        ("6", &[("chrome", "76")]),
        ("5.5", &[("chrome", "69")]),
        ("5", &[("chrome", "63")]),
        ("4", &[("chrome", "56")]),
        ("3", &[("chrome", "47")]),
        ("2.4", OLD_WEBKIT),
        ("2.3", OLD_WEBKIT),
    ],
    releases: &[
        ("2022", "6.5"),
        ("2021", "6"),
        ("2020", "5.5"),
        ("2019", "5"),
        ("2018", "4"),
        ("2017", "3"),
        ("2016", "2.4"),
        ("2015", "2.3"),
    ],
};

static WEBOS: TvPlatform = TvPlatform {
    versions: &[
        ("22", &[("chrome", "87")]),
        ("6", &[("chrome", "79")]),
        ("5", &[("chrome", "68")]),
        ("4.5", &[("chrome", "53")]),
        ("4", &[("chrome", "53")]),
        ("3.5", &[("chrome", "38")]),
        ("3", &[("chrome", "38")]),
        ("2", OLD_WEBKIT),
        ("1", OLD_WEBKIT),
    ],
    releases: &[
        ("2022", "22"),
        ("2021", "6"),
        ("2020", "5"),
        ("2019", "4.5"),
        ("2018", "4"),
        ("2017", "3.5"),
        ("2016", "3"),
        ("2015", "2"),
        ("2014", "1"),
    ],
};

fn tv_platform(name: &str) -> Option<&'static TvPlatform> {
    match name {
        "tizen" => Some(&TIZEN),
        "webos" => Some(&WEBOS),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn names(set: &TargetSet) -> Vec<String> {
        set.iter().map(ToString::to_string).collect()
    }

    #[rstest]
    #[case("chrome 60", &["chrome 60"])]
    #[case("Chrome 60, IE 11", &["chrome 60", "ie 11"])]
    #[case("ie 11, ie 11", &["ie 11"])]
    #[case("tizen 2019", &["chrome 63"])]
    #[case("tizen 5.5", &["chrome 69"])]
    #[case("webos 2015", &["chrome 27", "safari 7"])]
    #[case("webos 4, firefox 52", &["chrome 53", "firefox 52"])]
    fn parses_queries(#[case] query: &str, #[case] expected: &[&str]) {
        let set = TargetSet::parse(query).expect("valid query");
        assert_eq!(names(&set), expected);
    }

    #[rstest]
    #[case("defaults")]
    #[case("last 2 versions")]
    #[case("> 1%")]
    #[case("defaults, not dead")]
    fn resolves_browserslist_queries(#[case] query: &str) {
        let set = TargetSet::parse(query).expect("valid query");
        assert!(set.len() > 1, "{query} resolved to {set}");
        assert!(set.iter().all(|t| !t.version.is_empty()));
    }

    #[test]
    fn last_versions_of_one_browser() {
        let set = TargetSet::parse("last 2 chrome versions").expect("valid query");
        assert_eq!(set.len(), 2);
        assert!(set.iter().all(|t| t.platform == "chrome"));
    }

    #[rstest]
    #[case("", TargetError::Empty)]
    #[case(" , ", TargetError::Empty)]
    #[case("tizen 2019, defaults", TargetError::Unsupported("defaults".into()))]
    #[case("webos 4, > 1%", TargetError::Unsupported("> 1%".into()))]
    #[case(
        "tizen 9",
        TargetError::UnknownTvVersion { platform: "tizen".into(), version: "9".into() }
    )]
    fn rejects_unsupported_queries(#[case] query: &str, #[case] expected: TargetError) {
        assert_eq!(TargetSet::parse(query), Err(expected));
    }

    #[rstest]
    #[case("chrome 9999")]
    #[case("not a browser")]
    fn invalid_queries_are_query_errors(#[case] query: &str) {
        assert!(matches!(TargetSet::parse(query), Err(TargetError::Query(_))));
    }

    #[rstest]
    #[case("60", Some(60.0))]
    #[case("15.2-15.3", Some(15.2))]
    #[case("6.2", Some(6.2))]
    #[case("11.0b", Some(11.0))]
    #[case("tp", None)]
    #[case("all", None)]
    fn numeric_versions(#[case] version: &str, #[case] expected: Option<f64>) {
        assert_eq!(parse_numeric_version(version), expected);
    }

    #[test]
    fn empty_vec_is_rejected() {
        assert_eq!(TargetSet::new(Vec::new()), Err(TargetError::Empty));
    }
}
