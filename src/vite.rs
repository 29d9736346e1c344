// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Source patches for the Vite dev-server client (`/@vite/client`).

pub const CLIENT_PATH: &str = "/@vite/client";

pub const POSTCSS_PATH: &str = "/tvkit-postcss";

const UPDATE_STYLE: &str = "function updateStyle(id, content) {";

// Apply the raw style immediately, then swap in the transformed one unless a
// newer update for the same id arrived meanwhile.
const UPDATE_STYLE_ASYNC: &str = r#"var updateStyleAsync = {};
    function updateStyle(id, content) {
      var current = {};
      updateStyleSync(id, content);
      updateStyleAsync[id] = current;
      return fetch("/tvkit-postcss", {
        method: "POST",
        body: content,
        headers: { "Content-Type": "text/css" },
      }).then(function (response) {
        if (!response.ok) {
          return;
        }
        return response.text().then(function (css) {
          if (updateStyleAsync[id] === current) {
            removeStyle(id);
            updateStyleSync(id, css);
          }
        });
      });
    }

    function updateStyleSync(id, content) {"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientPatches {
    /// Replace the custom-element error overlay with `console.error`.
    pub plain_error_overlay: bool,
    /// Route hot style updates through the CSS transform endpoint.
    pub transformed_styles: bool,
}

impl ClientPatches {
    pub fn new(web_components: bool, css: bool) -> Self {
        Self {
            plain_error_overlay: !web_components,
            transformed_styles: css,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.plain_error_overlay && !self.transformed_styles
    }
}

/// Apply `patches` to the client source. Patterns that are not found are
/// left alone, so unknown client versions pass through unchanged.
pub fn patch_client(code: &str, patches: ClientPatches) -> String {
    let mut code = code.to_string();
    if patches.plain_error_overlay {
        code = code
            .replacen(
                "class ErrorOverlay extends HTMLElement",
                "class ErrorOverlay",
                1,
            )
            .replacen("super();", "", 1)
            .replacen(
                "document.body.appendChild(new ErrorOverlay(err))",
                "console.error(err.message + '\\n' + err.stack)",
                1,
            );
    }
    if patches.transformed_styles {
        code = code.replacen(UPDATE_STYLE, UPDATE_STYLE_ASYNC, 1);
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const CLIENT: &str = r#"
class ErrorOverlay extends HTMLElement {
  constructor(err) {
    super();
    this.root = this.attachShadow({ mode: "open" });
  }
}
function createErrorOverlay(err) {
  document.body.appendChild(new ErrorOverlay(err));
}
function updateStyle(id, content) {
  let style = sheetsMap.get(id);
}
"#;

    #[test]
    fn overlay_patch_drops_custom_element() {
        let out = patch_client(CLIENT, ClientPatches::new(false, false));
        assert!(out.contains("class ErrorOverlay {"));
        assert!(!out.contains("super();"));
        assert!(out.contains("console.error(err.message + '\\n' + err.stack);"));
        assert!(out.contains("function updateStyle(id, content) {\n  let style"));
    }

    #[test]
    fn style_patch_routes_through_postcss() {
        let out = patch_client(CLIENT, ClientPatches::new(true, true));
        assert!(out.contains(POSTCSS_PATH));
        assert!(out.contains("function updateStyleSync(id, content) {\n  let style"));
        assert!(out.contains("class ErrorOverlay extends HTMLElement"));
    }

    #[rstest]
    #[case(true, false)]
    #[case(false, true)]
    fn unknown_sources_pass_through(#[case] web_components: bool, #[case] css: bool) {
        let src = "console.log('not vite');";
        assert_eq!(
            patch_client(src, ClientPatches::new(web_components, css)),
            src
        );
    }

    #[test]
    fn modern_without_css_needs_no_patch() {
        assert!(ClientPatches::new(true, false).is_empty());
        assert!(!ClientPatches::new(false, false).is_empty());
    }
}
