// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Syntax downgrading and bundling, delegated to external tools.
//!
//! The proxy never parses JavaScript or CSS itself. [`CommandToolchain`]
//! pipes content through operator-configured commands: input on stdin,
//! context in `TVKIT_*` environment variables, result on stdout.

use crate::config::ToolchainConfig;
use crate::error::TransformError;
use crate::polyfills::PolyfillPlan;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    JavaScript,
    Css,
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformKind::JavaScript => f.write_str("javascript"),
            TransformKind::Css => f.write_str("css"),
        }
    }
}

/// Output module format for runtime helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleFormat {
    Esm,
    System,
}

impl ModuleFormat {
    pub fn for_esm_support(esm: bool) -> Self {
        if esm {
            ModuleFormat::Esm
        } else {
            ModuleFormat::System
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleFormat::Esm => "esm",
            ModuleFormat::System => "system",
        }
    }
}

/// Per-call context handed to the toolchain.
#[derive(Debug, Clone, Default)]
pub struct TransformContext {
    /// Comma separated `platform version` list.
    pub browsers: String,
    pub minify: bool,
    pub filename: Option<String>,
    /// Classic (non-module) inline script.
    pub inline: bool,
}

impl TransformContext {
    pub fn new(browsers: impl Into<String>, minify: bool) -> Self {
        Self {
            browsers: browsers.into(),
            minify,
            filename: None,
            inline: false,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn inline(mut self, inline: bool) -> Self {
        self.inline = inline;
        self
    }
}

#[async_trait]
pub trait Toolchain: Send + Sync {
    async fn transform(
        &self,
        kind: TransformKind,
        content: Bytes,
        ctx: &TransformContext,
    ) -> Result<Bytes, TransformError>;

    async fn bundle_polyfills(
        &self,
        plan: &PolyfillPlan,
        ctx: &TransformContext,
    ) -> Result<Bytes, TransformError>;

    async fn runtime_helper(
        &self,
        module: &str,
        format: ModuleFormat,
        ctx: &TransformContext,
    ) -> Result<Bytes, TransformError>;
}

pub struct CommandToolchain {
    commands: ToolchainConfig,
}

impl CommandToolchain {
    pub fn new(commands: ToolchainConfig) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl Toolchain for CommandToolchain {
    async fn transform(
        &self,
        kind: TransformKind,
        content: Bytes,
        ctx: &TransformContext,
    ) -> Result<Bytes, TransformError> {
        let command = match kind {
            TransformKind::JavaScript => &self.commands.javascript,
            TransformKind::Css => &self.commands.css,
        };
        run_command(command, content, &context_env(ctx)).await
    }

    async fn bundle_polyfills(
        &self,
        plan: &PolyfillPlan,
        ctx: &TransformContext,
    ) -> Result<Bytes, TransformError> {
        let entry = Bytes::from(plan.entry_source());
        run_command(&self.commands.polyfills, entry, &context_env(ctx)).await
    }

    async fn runtime_helper(
        &self,
        module: &str,
        format: ModuleFormat,
        ctx: &TransformContext,
    ) -> Result<Bytes, TransformError> {
        let mut env = context_env(ctx);
        env.push(("TVKIT_MODULE", module.to_string()));
        env.push(("TVKIT_FORMAT", format.as_str().to_string()));
        run_command(&self.commands.runtime, Bytes::new(), &env).await
    }
}

fn context_env(ctx: &TransformContext) -> Vec<(&'static str, String)> {
    let mut env = vec![
        ("TVKIT_BROWSERS", ctx.browsers.clone()),
        ("TVKIT_MINIFY", ctx.minify.to_string()),
        ("TVKIT_INLINE", ctx.inline.to_string()),
    ];
    if let Some(filename) = &ctx.filename {
        env.push(("TVKIT_FILENAME", filename.clone()));
    }
    env
}

/// Run `argv` with `input` on stdin and return its stdout.
pub async fn run_command(
    argv: &[String],
    input: Bytes,
    env: &[(&'static str, String)],
) -> Result<Bytes, TransformError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| TransformError::Other("empty toolchain command".into()))?;
    let display = argv.join(" ");

    let mut child = Command::new(program)
        .args(args)
        .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| TransformError::Spawn {
            command: display.clone(),
            source,
        })?;

    // Feed stdin concurrently so a chatty child cannot fill its stdout pipe
    // while we are still writing.
    let writer = child.stdin.take().map(|mut stdin| {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&input).await {
                debug!(%e, "toolchain closed stdin early");
            }
        })
    });

    let output = child
        .wait_with_output()
        .await
        .map_err(|source| TransformError::Spawn {
            command: display.clone(),
            source,
        })?;
    if let Some(writer) = writer {
        let _ = writer.await;
    }

    if !output.status.success() {
        return Err(TransformError::Failed {
            command: display,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(Bytes::from(output.stdout))
}
