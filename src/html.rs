// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! HTML document rewriting for legacy targets.
//!
//! The document is tokenized with html5ever; markup other than the elements
//! below is re-emitted as tokenized (lowercase names, double-quoted
//! attributes):
//!
//! - `<link rel="modulepreload">` is dropped when native modules are missing;
//! - `<script type="module" src>` becomes `type="systemjs-module"` so the
//!   SystemJS loader in the polyfill bundle picks it up;
//! - inline scripts and (optionally) `<style>` blocks are transformed;
//! - the polyfill bundle is loaded before the first script.
//!
//! Comments, raw text and `<template>` content are never rewritten.

use crate::error::TransformError;
use async_trait::async_trait;
use html5ever::tendril::StrTendril;
use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, Doctype, Tag, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer,
    TokenizerOpts,
};

pub const POLYFILLS_PATH: &str = "/tvkit-polyfills.js";

const SCRIPT_TYPES: &[&str] = &["module", "text/javascript", "application/javascript"];

/// Body transforms used while rewriting a document.
#[async_trait]
pub trait InlineTransformer: Send + Sync {
    /// `inline` is true for classic scripts, false for module scripts.
    async fn script(&self, code: &str, inline: bool) -> Result<String, TransformError>;

    async fn style(&self, css: &str) -> Result<String, TransformError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HtmlOptions {
    /// Targets run `<script type="module">` and dynamic `import()`.
    pub esm: bool,
    /// Transform `<style>` blocks.
    pub css: bool,
}

type Attrs = Vec<(String, String)>;

#[derive(Debug, Default)]
struct Element {
    attrs: Attrs,
    body: String,
}

impl Element {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn set_attr(&mut self, name: &str, value: &str) {
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value.to_string(),
            None => self.attrs.push((name.to_string(), value.to_string())),
        }
    }

    fn remove_attr(&mut self, name: &str) {
        self.attrs.retain(|(k, _)| k != name);
    }

    fn render(&self, name: &str) -> String {
        format!("{}{}</{}>", start_tag(name, &self.attrs, false), self.body, name)
    }
}

enum Node {
    Markup(String),
    Link { attrs: Attrs, self_closing: bool },
    Script(Element),
    Style(Element),
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            '"' if attribute => out.push_str("&quot;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

fn start_tag(name: &str, attrs: &[(String, String)], self_closing: bool) -> String {
    let mut out = format!("<{}", name);
    for (key, value) in attrs {
        out.push(' ');
        out.push_str(key);
        if !value.is_empty() {
            out.push_str("=\"");
            out.push_str(&escape(value, true));
            out.push('"');
        }
    }
    if self_closing {
        out.push_str(" /");
    }
    out.push('>');
    out
}

fn doctype_markup(doctype: &Doctype) -> String {
    let mut out = String::from("<!DOCTYPE");
    if let Some(name) = &doctype.name {
        out.push(' ');
        out.push_str(name);
    }
    match (&doctype.public_id, &doctype.system_id) {
        (Some(public), Some(system)) => {
            out.push_str(&format!(" PUBLIC \"{}\" \"{}\"", &**public, &**system))
        }
        (Some(public), None) => out.push_str(&format!(" PUBLIC \"{}\"", &**public)),
        (None, Some(system)) => out.push_str(&format!(" SYSTEM \"{}\"", &**system)),
        (None, None) => {}
    }
    out.push('>');
    out
}

struct OpenElement {
    script: bool,
    inert: bool,
    element: Element,
}

/// Token sink that keeps the elements we rewrite and serializes the rest.
#[derive(Default)]
struct Collector {
    nodes: Vec<Node>,
    open: Option<OpenElement>,
    raw_text: bool,
    template_depth: usize,
}

impl Collector {
    fn push(&mut self, markup: &str) {
        match self.nodes.last_mut() {
            Some(Node::Markup(last)) => last.push_str(markup),
            _ => self.nodes.push(Node::Markup(markup.to_string())),
        }
    }

    fn start(&mut self, tag: Tag) -> TokenSinkResult<()> {
        let name = tag.name.to_string();
        let attrs: Attrs = tag
            .attrs
            .iter()
            .map(|a| (a.name.local.to_string(), a.value.to_string()))
            .collect();
        let inert = self.template_depth > 0;

        match name.as_str() {
            "script" | "style" => {
                let script = name == "script";
                self.open = Some(OpenElement {
                    script,
                    inert,
                    element: Element {
                        attrs,
                        body: String::new(),
                    },
                });
                return TokenSinkResult::RawData(if script {
                    RawKind::ScriptData
                } else {
                    RawKind::Rawtext
                });
            }
            "link" if !inert => {
                self.nodes.push(Node::Link {
                    attrs,
                    self_closing: tag.self_closing,
                });
                return TokenSinkResult::Continue;
            }
            "template" => self.template_depth += 1,
            _ => {}
        }

        self.push(&start_tag(&name, &attrs, tag.self_closing));
        match name.as_str() {
            "title" | "textarea" => TokenSinkResult::RawData(RawKind::Rcdata),
            "xmp" | "iframe" | "noembed" | "noframes" | "noscript" => {
                self.raw_text = true;
                TokenSinkResult::RawData(RawKind::Rawtext)
            }
            "plaintext" => {
                self.raw_text = true;
                TokenSinkResult::Plaintext
            }
            _ => TokenSinkResult::Continue,
        }
    }

    fn end(&mut self, tag: Tag) {
        // Inside raw text only the matching end tag is tokenized.
        if let Some(open) = self.open.take() {
            self.close(open);
            return;
        }
        self.raw_text = false;
        if &*tag.name == "template" {
            self.template_depth = self.template_depth.saturating_sub(1);
        }
        self.push(&format!("</{}>", &*tag.name));
    }

    fn close(&mut self, open: OpenElement) {
        let name = if open.script { "script" } else { "style" };
        if open.inert {
            let markup = open.element.render(name);
            self.push(&markup);
        } else if open.script {
            self.nodes.push(Node::Script(open.element));
        } else {
            self.nodes.push(Node::Style(open.element));
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(open) = self.open.as_mut() {
            open.element.body.push_str(text);
        } else if self.raw_text {
            self.push(text);
        } else {
            self.push(&escape(text, false));
        }
    }

    fn flush(&mut self) {
        if let Some(open) = self.open.take() {
            self.close(open);
        }
    }
}

impl TokenSink for Collector {
    type Handle = ();

    fn process_token(&mut self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        match token {
            Token::TagToken(tag) => match tag.kind {
                TagKind::StartTag => return self.start(tag),
                TagKind::EndTag => self.end(tag),
            },
            Token::CharacterTokens(text) => self.text(&text),
            Token::CommentToken(text) => self.push(&format!("<!--{}-->", &*text)),
            Token::DoctypeToken(doctype) => self.push(&doctype_markup(&doctype)),
            Token::EOFToken => self.flush(),
            _ => {}
        }
        TokenSinkResult::Continue
    }
}

fn tokenize(source: &str) -> Vec<Node> {
    let mut input = BufferQueue::new();
    input.push_back(StrTendril::from_slice(source));
    let mut tokenizer = Tokenizer::new(Collector::default(), TokenizerOpts::default());
    let _ = tokenizer.feed(&mut input);
    tokenizer.end();
    tokenizer.sink.flush();
    std::mem::take(&mut tokenizer.sink.nodes)
}

async fn rewrite_script(
    script: &mut Element,
    options: HtmlOptions,
    transformer: &dyn InlineTransformer,
) -> Result<(), TransformError> {
    let is_module = script.attr("type") == Some("module");
    if script.attr("src").is_some() {
        if is_module && !options.esm {
            script.set_attr("type", "systemjs-module");
        }
        return Ok(());
    }

    let transformable = script
        .attr("type")
        .map_or(true, |t| SCRIPT_TYPES.contains(&t));
    if script.body.is_empty() || !transformable {
        return Ok(());
    }

    let code = transformer.script(&script.body, !is_module).await?;
    script.body = code;
    if is_module && !options.esm {
        script.remove_attr("type");
    }
    Ok(())
}

/// Rewrite `source`. Any failing inline transform fails the whole document.
pub async fn transform_html(
    source: &str,
    options: HtmlOptions,
    transformer: &dyn InlineTransformer,
) -> Result<String, TransformError> {
    let mut out = String::with_capacity(source.len() + 64);
    let mut injected = false;

    for node in tokenize(source) {
        match node {
            Node::Markup(markup) => out.push_str(&markup),
            Node::Link {
                attrs,
                self_closing,
            } => {
                let preload = attrs
                    .iter()
                    .any(|(k, v)| k == "rel" && v.eq_ignore_ascii_case("modulepreload"));
                if options.esm || !preload {
                    out.push_str(&start_tag("link", &attrs, self_closing));
                }
            }
            Node::Style(mut style) => {
                if options.css && !style.body.is_empty() {
                    let css = transformer.style(&style.body).await?;
                    style.body = css;
                }
                out.push_str(&style.render("style"));
            }
            Node::Script(mut script) => {
                if !injected {
                    out.push_str(&format!("<script src=\"{}\"></script>\n", POLYFILLS_PATH));
                    injected = true;
                }
                rewrite_script(&mut script, options, transformer).await?;
                out.push_str(&script.render("script"));
            }
        }
    }
    Ok(out)
}
