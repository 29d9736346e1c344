// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Development proxy that makes a modern dev server usable from legacy
//! browsers and TV platforms.
//!
//! This library provides the core functionality for tvkit: target and
//! capability resolution, response rewriting, derived assets, conditional
//! request bridging and the proxy server itself.

pub mod artifacts;
pub mod cache;
pub mod capability;
pub mod conditional;
pub mod config;
pub mod connection;
pub mod error;
pub mod etag;
pub mod fingerprint;
pub mod html;
pub mod http_date;
pub mod polyfills;
pub mod proxy;
pub mod state;
pub mod targets;
pub mod tls;
pub mod toolchain;
pub mod vite;

#[cfg(test)]
pub(crate) mod test_helpers;
