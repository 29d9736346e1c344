// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Built-in minimum versions for capabilities the fact database does not
//! describe precisely enough.

use super::{CapabilitySource, Resolution};
use crate::error::CapabilityError;
use crate::targets::PlatformTarget;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Threshold {
    Since(f64),
    Never,
}

use Threshold::{Never, Since};

type Row = &'static [(&'static str, Threshold)];

static MATRIX: &[(&str, Row)] = &[
    // mdn-javascript_builtins_string_normalize
    (
        "normalize",
        &[
            ("chrome", Since(34.0)),
            ("safari", Since(10.0)),
            ("firefox", Since(31.0)),
            ("edge", Since(12.0)),
            ("ie", Never),
            ("samsung", Since(4.0)),
            ("opera", Since(21.0)),
        ],
    ),
    // mdn-api_event_composedpath
    (
        "composedPath",
        &[
            ("chrome", Since(53.0)),
            ("safari", Since(10.0)),
            ("firefox", Since(59.0)),
            ("edge", Since(79.0)),
            ("ie", Never),
            ("samsung", Since(6.2)),
            ("opera", Since(40.0)),
        ],
    ),
    // mdn-css_at-rules_keyframes
    (
        "css-keyframes",
        &[
            ("chrome", Since(43.0)),
            ("safari", Since(9.0)),
            ("firefox", Since(16.0)),
            ("edge", Since(12.0)),
            ("ie", Never),
            ("samsung", Since(4.0)),
            ("opera", Since(30.0)),
        ],
    ),
    // mdn-javascript_builtins_symbol
    (
        "symbol",
        &[
            ("chrome", Since(38.0)),
            ("safari", Since(9.0)),
            ("firefox", Since(36.0)),
            ("edge", Since(12.0)),
            ("ie", Never),
            ("samsung", Since(4.0)),
            ("opera", Since(25.0)),
        ],
    ),
    (
        "dom-append",
        &[
            ("chrome", Since(54.0)),
            ("safari", Since(10.0)),
            ("firefox", Since(49.0)),
            ("edge", Since(17.0)),
            ("ie", Never),
            ("samsung", Since(6.2)),
            ("opera", Since(41.0)),
        ],
    ),
    // Only true when every target is IE 11.
    (
        "ie11",
        &[
            ("chrome", Never),
            ("safari", Never),
            ("firefox", Never),
            ("edge", Never),
            ("ie", Since(11.0)),
            ("samsung", Never),
            ("opera", Never),
        ],
    ),
];

/// Mobile variants share the desktop engine's data.
pub fn platform_family(platform: &str) -> &str {
    match platform {
        "and_chr" => "chrome",
        "and_ff" => "firefox",
        "and_qq" => "qq",
        "and_uc" => "uc",
        "ios_saf" => "safari",
        "op_mob" => "opera",
        other => other,
    }
}

/// Platforms whose compatibility data is too sparse to trust.
const UNRELIABLE: &[&str] = &["qq", "uc", "op_mini", "kaios"];

pub fn threshold(capability: &str, family: &str) -> Option<Threshold> {
    MATRIX
        .iter()
        .find(|(name, _)| *name == capability)
        .and_then(|(_, row)| row.iter().find(|(p, _)| *p == family))
        .map(|(_, t)| *t)
}

pub fn has_entry(capability: &str) -> bool {
    MATRIX.iter().any(|(name, _)| *name == capability)
}

pub struct SupportMatrix;

impl CapabilitySource for SupportMatrix {
    fn resolve(
        &self,
        capability: &str,
        target: &PlatformTarget,
    ) -> Result<Resolution, CapabilityError> {
        if !has_entry(capability) {
            return Ok(Resolution::Defer);
        }
        let family = platform_family(&target.platform);
        let Some(min) = threshold(capability, family) else {
            if !UNRELIABLE.contains(&family) {
                warn!(%capability, platform = %family, "no built-in entry for platform");
            }
            return Ok(Resolution::Unsupported);
        };
        let supported = match (min, target.numeric_version()) {
            (Since(min), Some(v)) => v >= min,
            _ => false,
        };
        Ok(supported.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("and_chr", "chrome")]
    #[case("ios_saf", "safari")]
    #[case("op_mob", "opera")]
    #[case("chrome", "chrome")]
    fn aliases(#[case] platform: &str, #[case] family: &str) {
        assert_eq!(platform_family(platform), family);
    }

    #[test]
    fn unknown_capability_defers() {
        let t = PlatformTarget::new("chrome", "60");
        assert_eq!(
            SupportMatrix.resolve("fetch", &t).unwrap(),
            Resolution::Defer
        );
    }

    #[rstest]
    #[case("chrome", "tp")]
    #[case("blackberry", "10")]
    #[case("op_mini", "all")]
    fn unknown_versions_and_platforms_are_unsupported(
        #[case] platform: &str,
        #[case] version: &str,
    ) {
        let t = PlatformTarget::new(platform, version);
        assert_eq!(
            SupportMatrix.resolve("normalize", &t).unwrap(),
            Resolution::Unsupported
        );
    }

    #[test]
    fn range_versions_use_lower_bound() {
        let t = PlatformTarget::new("ios_saf", "9.3-9.9");
        assert_eq!(
            SupportMatrix.resolve("symbol", &t).unwrap(),
            Resolution::Supported
        );
        let t = PlatformTarget::new("ios_saf", "8-8.4");
        assert_eq!(
            SupportMatrix.resolve("symbol", &t).unwrap(),
            Resolution::Unsupported
        );
    }
}
