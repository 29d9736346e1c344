// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Synthetic entity-tags.
//!
//! Upstream ETags are wrapped so that a tag issued under one transform
//! configuration (or one proxy version) never validates under another:
//!
//! ```text
//! W/"tvkit_<version>_<fingerprint>_<base64(upstream etag)>"
//! ```
//!
//! Derived assets get a strong tag built the same way from a logical name.

use crate::fingerprint::Fingerprint;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Prefix of every wrapped tag; embeds the product identity and version.
pub const WEAK_PREFIX: &str = concat!(
    "W/\"",
    env!("CARGO_PKG_NAME"),
    "_",
    env!("CARGO_PKG_VERSION"),
    "_"
);

const STRONG_PREFIX: &str = concat!(
    "\"",
    env!("CARGO_PKG_NAME"),
    "_",
    env!("CARGO_PKG_VERSION"),
    "_"
);

pub fn encode(raw: &str, fingerprint: &Fingerprint) -> String {
    format!("{}{}_{}\"", WEAK_PREFIX, fingerprint, STANDARD.encode(raw))
}

/// Recover the upstream tag, or `None` when `wrapped` was not produced by
/// [`encode`] under this fingerprint and proxy version.
pub fn decode(wrapped: &str, fingerprint: &Fingerprint) -> Option<String> {
    let rest = wrapped
        .strip_prefix(WEAK_PREFIX)?
        .strip_prefix(fingerprint.as_str())?
        .strip_prefix('_')?
        .strip_suffix('"')?;
    let bytes = STANDARD.decode(rest).ok()?;
    String::from_utf8(bytes).ok()
}

/// Strong tag for an artifact that is a pure function of the configuration.
pub fn asset_etag(name: &str, fingerprint: &Fingerprint) -> String {
    format!("{}{}_{}\"", STRONG_PREFIX, fingerprint, STANDARD.encode(name))
}

/// Split an `If-None-Match` value into its entity-tags.
pub fn parse_entity_tags(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Weak comparison of an `If-None-Match` field against `etag` (RFC 9110 13.1.2).
pub fn if_none_match_matches(header: &str, etag: &str) -> bool {
    let wanted = etag.trim_start_matches("W/");
    parse_entity_tags(header).any(|tag| tag == "*" || tag.trim_start_matches("W/") == wanted)
}
