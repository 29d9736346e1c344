// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Small helpers to parse and compare HTTP-date (IMF-fixdate) values.

use std::time::SystemTime;

/// Parse an HTTP-date string into a `SystemTime`.
/// Returns an `anyhow::Error` when parsing fails.
pub fn parse_http_date(s: &str) -> anyhow::Result<SystemTime> {
    httpdate::parse_http_date(s.trim()).map_err(|e| anyhow::anyhow!("httpdate parse error: {}", e))
}

/// Whether two header values denote the same instant.
///
/// Values that do not parse are compared as exact strings.
pub fn same_http_date(a: &str, b: &str) -> bool {
    match (parse_http_date(a), parse_http_date(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => a == b,
    }
}
