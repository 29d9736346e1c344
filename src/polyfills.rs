// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Which polyfills the target set needs.
//!
//! The plan is decided once at startup from capability lookups. It renders
//! to a small entry module ([`PolyfillPlan::entry_source`]) that the
//! toolchain bundles into the script served at `/tvkit-polyfills.js`.

use crate::capability::{CapabilityResolver, ESM_CAPABILITIES};
use crate::error::CapabilityError;
use crate::targets::TargetSet;

/// Every capability the planner consults; checked at startup.
pub const PLANNED_CAPABILITIES: &[&str] = &[
    "fetch",
    "intersectionobserver",
    "proxy",
    "textencoder",
    "customevent",
    "ie11",
    "dom-append",
    "normalize",
    "composedPath",
    "document-currentscript",
    "es6-module",
    "es6-module-dynamic-import",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolyfillImport {
    /// `import "<module>";`
    SideEffect(&'static str),
    /// `import <binding> from "<module>";` followed by a `<binding>();` call.
    Installer {
        binding: &'static str,
        module: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolyfillPlan {
    imports: Vec<PolyfillImport>,
    snippets: Vec<&'static str>,
    systemjs: bool,
}

const CORE_JS_ENTRY: &str = "core-js/stable";
const SYSTEMJS_LOADER: &str = "systemjs/dist/s.min.js";

const COMPOSED_PATH: &str = r#"
if (!Event.prototype.composedPath) {
  Event.prototype.composedPath = function composedPathPolyfill() {
    var target = this.target;
    if (this.path) {
      return this.path;
    }
    this.path = [];
    while (target.parentNode !== null) {
      this.path.push(target);
      target = target.parentNode;
    }
    this.path.push(document, window);
    return this.path;
  };
}
"#;

const CURRENT_SCRIPT: &str = r#"
if (!document.currentScript) {
  Object.defineProperty(document, "currentScript", {
    get: function() {
      return document.scripts[document.scripts.length - 1];
    }
  });
}
"#;

const SVELTEKIT_GLOBALS: &str = r#"
window.__SVELTEKIT_APP_VERSION_POLL_INTERVAL__ =
  window.__SVELTEKIT_APP_VERSION_POLL_INTERVAL__ || 0;
window.__SVELTEKIT_EMBEDDED__ = window.__SVELTEKIT_EMBEDDED__ || false;
"#;

const ERROR_STACK: &str = r#"
if (typeof new Error().stack !== "string") {
  Error.prototype.stack = Error.prototype.stack || "";
}
"#;

impl PolyfillPlan {
    pub fn resolve(
        resolver: &CapabilityResolver,
        targets: &TargetSet,
    ) -> Result<Self, CapabilityError> {
        let supported = |cap: &str| resolver.is_supported(cap, targets);

        let mut imports = vec![PolyfillImport::SideEffect(CORE_JS_ENTRY)];
        let mut snippets = Vec::new();

        if !supported("fetch")? {
            imports.push(PolyfillImport::SideEffect("whatwg-fetch"));
        }
        if !supported("intersectionobserver")? {
            imports.push(PolyfillImport::SideEffect("intersection-observer"));
        }
        if !supported("proxy")? {
            imports.push(PolyfillImport::SideEffect("proxy-polyfill/proxy.min.js"));
        }
        if !supported("textencoder")? {
            imports.push(PolyfillImport::SideEffect("fast-text-encoding"));
        }
        // IE11 ships a CustomEvent that cannot be constructed.
        if !supported("customevent")? || supported("ie11")? {
            imports.push(PolyfillImport::SideEffect("custom-event-polyfill"));
        }
        if !supported("dom-append")? {
            imports.push(PolyfillImport::Installer {
                binding: "appendPolyfill",
                module: "cross-browser-polyfill/src/polyfills/element-append",
            });
            imports.push(PolyfillImport::Installer {
                binding: "removePolyfill",
                module: "cross-browser-polyfill/src/polyfills/element-remove",
            });
        }
        if !supported("normalize")? {
            imports.push(PolyfillImport::SideEffect("unorm"));
        }
        if !supported("composedPath")? {
            snippets.push(COMPOSED_PATH);
        }
        if !supported("document-currentscript")? {
            snippets.push(CURRENT_SCRIPT);
        }
        snippets.push(SVELTEKIT_GLOBALS);
        snippets.push(ERROR_STACK);

        let systemjs = !resolver.are_supported(ESM_CAPABILITIES, targets)?;
        if systemjs {
            imports.push(PolyfillImport::SideEffect(SYSTEMJS_LOADER));
        }

        Ok(Self {
            imports,
            snippets,
            systemjs,
        })
    }

    /// Module specifiers in import order.
    pub fn modules(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.imports.iter().map(|i| match i {
            PolyfillImport::SideEffect(m) => *m,
            PolyfillImport::Installer { module, .. } => *module,
        })
    }

    pub fn includes(&self, module: &str) -> bool {
        self.modules().any(|m| m == module)
    }

    pub fn needs_systemjs(&self) -> bool {
        self.systemjs
    }

    /// JavaScript entry module handed to the bundler.
    pub fn entry_source(&self) -> String {
        let mut src = String::new();
        for import in &self.imports {
            match import {
                PolyfillImport::SideEffect(m) => {
                    src.push_str(&format!("import {};\n", js_string(m)));
                }
                PolyfillImport::Installer { binding, module } => {
                    src.push_str(&format!("import {} from {};\n", binding, js_string(module)));
                }
            }
        }
        for import in &self.imports {
            if let PolyfillImport::Installer { binding, .. } = import {
                src.push_str(&format!("{}();\n", binding));
            }
        }
        for snippet in &self.snippets {
            src.push_str(snippet);
        }
        src
    }
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}
