// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Typed errors for the parts of the proxy that callers need to match on.
//!
//! Startup plumbing wraps these in `anyhow` contexts; request-time code
//! matches on them to decide between failing open and failing the request.

use thiserror::Error;

/// The operator's target query could not be resolved into platform targets.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("empty target query")]
    Empty,

    #[error("complex TV queries not supported: '{0}', expected '<platform> <version>'")]
    Unsupported(String),

    #[error("invalid browser query: {0}")]
    Query(String),

    #[error("{platform} version: {version} unknown")]
    UnknownTvVersion { platform: String, version: String },
}

/// A capability lookup that cannot be answered at all.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("Unknown feature: {0}")]
    UnknownCapability(String),

    #[error("malformed capability override '{0}': expected '<name>=<true|false>'")]
    MalformedOverride(String),
}

/// Failure of an external transform or bundling step.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to start toolchain command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("toolchain command '{command}' exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("toolchain produced output that is not UTF-8")]
    InvalidOutput,

    #[error("input is not valid UTF-8")]
    InvalidInput,

    #[error("blocked request for runtime module '{0}'")]
    BlockedModule(String),

    /// A single-flight leader failed; waiters receive its message.
    #[error("coalesced transform failed: {0}")]
    Coalesced(String),

    #[error("{0}")]
    Other(String),
}

/// Configuration that cannot be acted on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no target browser configured (use --browser or general.browser)")]
    MissingBrowser,

    #[error("invalid listen address '{0}'")]
    InvalidListen(String),

    #[error("invalid upstream target '{0}': expected an absolute http(s) URL")]
    InvalidTarget(String),

    #[error("TLS requires both a certificate and a key")]
    IncompleteTls,

    #[error("toolchain command for {0} is empty")]
    EmptyCommand(&'static str),
}
