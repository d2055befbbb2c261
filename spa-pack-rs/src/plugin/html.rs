use std::fs;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use super::minify::{minify_js, MinifyConfig};
use super::{Plugin, PluginError, PluginResult};
use crate::error::{BuildError, Result};
use crate::state::{BuildState, FileName, OutputAsset, OutputContent, OutputKind};
use crate::transform::minimize_css;

lazy_static! {
    static ref TITLE_RE: Regex = Regex::new(r"\{\{\s*title\s*\}\}").unwrap();
    static ref COMMENT_RE: Regex = Regex::new(r"(?s)<!--(?:[^\[].*?)?-->").unwrap();
    static ref RAW_ELEMENT_RE: Regex =
        Regex::new(r"(?is)(?P<open><(?P<tag>script|style|pre|textarea)\b[^>]*>)(?P<body>.*?)(?P<close></(?:script|style|pre|textarea)\s*>)")
            .unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
    static ref BETWEEN_TAGS_RE: Regex = Regex::new(r">\s+<").unwrap();
}

pub const DEFAULT_HTML_FILENAME: &str = "index.html";

const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{{ title }}</title>
  </head>
  <body>
    <div id="app"></div>
  </body>
</html>
"#;

/// Where script tags go.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Inject {
    #[default]
    Body,
    Head,
    /// Replaces this exact string of the template.
    Anchor(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HtmlMinifyOptions {
    pub remove_comments: bool,
    pub collapse_whitespace: bool,
    /// Collapse runs of whitespace to one space instead of removing them.
    pub conservative_collapse: bool,
    #[serde(alias = "minifyCSS")]
    pub minify_css: bool,
    #[serde(alias = "minifyJS")]
    pub minify_js: bool,
}

impl Default for HtmlMinifyOptions {
    fn default() -> Self {
        Self {
            remove_comments: true,
            collapse_whitespace: true,
            conservative_collapse: true,
            minify_css: true,
            minify_js: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HtmlConfig {
    pub title: String,
    /// Relative to the context directory.
    pub template: Option<PathBuf>,
    pub inject: Inject,
    pub filename: String,
    pub minify: HtmlMinifyOptions,
}

impl Default for HtmlConfig {
    fn default() -> Self {
        Self {
            title: String::new(),
            template: None,
            inject: Inject::default(),
            filename: DEFAULT_HTML_FILENAME.to_string(),
            minify: HtmlMinifyOptions::default(),
        }
    }
}

/// Generates the HTML shell that loads the emitted stylesheets and scripts.
pub struct HtmlPlugin {
    config: HtmlConfig,
    template: String,
    template_path: Option<PathBuf>,
}

impl HtmlPlugin {
    pub fn new(config: &HtmlConfig, context: &Path) -> Result<Self> {
        let template_path = config.template.as_ref().map(|t| context.join(t));
        let template = match &template_path {
            Some(path) => fs::read_to_string(path).map_err(|err| BuildError::io(path, err))?,
            None => DEFAULT_TEMPLATE.to_string(),
        };
        Ok(Self {
            config: config.clone(),
            template,
            template_path,
        })
    }

    fn error(&self, message: impl Into<String>) -> PluginError {
        PluginError {
            path: self.template_path.clone(),
            message: message.into(),
        }
    }

    pub fn render(&self, styles: &[String], scripts: &[String], minify: bool) -> PluginResult<String> {
        let mut html = TITLE_RE
            .replace_all(&self.template, escape_html(&self.config.title).as_str())
            .into_owned();

        let links: String = styles
            .iter()
            .map(|href| format!("<link href=\"{}\" rel=\"stylesheet\">", escape_html(href)))
            .collect();
        let tags: String = scripts
            .iter()
            .map(|src| format!("<script type=\"text/javascript\" src=\"{}\"></script>", escape_html(src)))
            .collect();

        if !links.is_empty() {
            html = insert_before(&html, "</head>", &links);
        }
        html = match &self.config.inject {
            Inject::Body => insert_before(&html, "</body>", &tags),
            Inject::Head => insert_before(&html, "</head>", &tags),
            Inject::Anchor(anchor) => {
                if !html.contains(anchor.as_str()) {
                    return Err(self.error(format!("inject anchor `{anchor}` not found in template")));
                }
                html.replacen(anchor.as_str(), &tags, 1)
            }
        };

        if minify {
            html = minify_html(&html, &self.config.minify);
        }
        Ok(html)
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Inserts `fragment` before the first case-insensitive match of `tag`, or
/// appends it when the tag is missing.
fn insert_before(html: &str, tag: &str, fragment: &str) -> String {
    match html.to_ascii_lowercase().find(tag) {
        Some(at) => format!("{}{fragment}{}", &html[..at], &html[at..]),
        None => format!("{html}{fragment}"),
    }
}

fn collapse(text: &str, options: &HtmlMinifyOptions) -> String {
    if options.conservative_collapse {
        WHITESPACE_RE.replace_all(text, " ").into_owned()
    } else {
        let text = BETWEEN_TAGS_RE.replace_all(text, "><");
        WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
    }
}

pub fn minify_html(html: &str, options: &HtmlMinifyOptions) -> String {
    let html = if options.remove_comments {
        COMMENT_RE.replace_all(html, "").into_owned()
    } else {
        html.to_string()
    };

    let mut out = String::with_capacity(html.len());
    let mut last = 0;
    for caps in RAW_ELEMENT_RE.captures_iter(&html) {
        let Some(whole) = caps.get(0) else { continue };
        let text = &html[last..whole.start()];
        out.push_str(&if options.collapse_whitespace { collapse(text, options) } else { text.to_string() });
        out.push_str(&raw_element(&caps, options));
        last = whole.end();
    }
    let tail = &html[last..];
    out.push_str(&if options.collapse_whitespace { collapse(tail, options) } else { tail.to_string() });
    out.trim().to_string()
}

fn raw_element(caps: &Captures<'_>, options: &HtmlMinifyOptions) -> String {
    let (open, body, close) = (&caps["open"], &caps["body"], &caps["close"]);
    let body = match caps["tag"].to_ascii_lowercase().as_str() {
        "script" if options.minify_js && !body.trim().is_empty() => minify_js(body, &MinifyConfig::default()),
        "style" if options.minify_css => minimize_css(body),
        _ => body.to_string(),
    };
    format!("{open}{body}{close}")
}

impl Plugin for HtmlPlugin {
    fn name(&self) -> &'static str {
        "html"
    }

    fn pre_emit(&self, state: &mut BuildState) -> PluginResult {
        let mut styles = Vec::new();
        let mut scripts = Vec::new();
        for chunk in &state.chunks {
            if let Some(href) = state.chunk_asset(OutputKind::Style, &chunk.name).and_then(|a| a.href(&state.public_path)) {
                styles.push(href);
            }
            if let Some(href) = state.chunk_asset(OutputKind::Script, &chunk.name).and_then(|a| a.href(&state.public_path)) {
                scripts.push(href);
            }
        }

        let html = self.render(&styles, &scripts, state.environment.is_production())?;
        let filename = self.config.filename.clone();
        state.assets.push(OutputAsset {
            kind: OutputKind::Html,
            name: filename.clone(),
            content: OutputContent::Text(html),
            file_name: Some(FileName {
                path: filename.clone(),
                url: filename,
            }),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn plugin(inject: Inject, template: Option<&str>) -> (tempfile::TempDir, HtmlPlugin) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HtmlConfig {
            title: "App & Co".into(),
            inject,
            ..Default::default()
        };
        if let Some(template) = template {
            fs::write(dir.path().join("template.html"), template).unwrap();
            config.template = Some(PathBuf::from("template.html"));
        }
        let plugin = HtmlPlugin::new(&config, dir.path()).unwrap();
        (dir, plugin)
    }

    const TEMPLATE: &str = "<html>\n<head>\n  <title>{{ title }}</title>\n</head>\n<body>\n  <!-- app -->\n  <div id=\"app\"></div>\n</body>\n</html>\n";

    #[rstest]
    #[case(Inject::Body, "</div>\n<script type=\"text/javascript\" src=\"/vendor.js\"></script><script type=\"text/javascript\" src=\"/app.js\"></script></body>")]
    #[case(Inject::Head, "<script type=\"text/javascript\" src=\"/vendor.js\"></script><script type=\"text/javascript\" src=\"/app.js\"></script></head>")]
    #[case(Inject::Anchor("<!-- app -->".into()), "  <script type=\"text/javascript\" src=\"/vendor.js\"></script><script type=\"text/javascript\" src=\"/app.js\"></script>\n  <div")]
    fn test_injection_points(#[case] inject: Inject, #[case] expected: &str) {
        let (_dir, plugin) = plugin(inject, Some(TEMPLATE));
        let html = plugin
            .render(&["/app.css".into()], &["/vendor.js".into(), "/app.js".into()], false)
            .unwrap();
        assert!(html.contains(expected), "{html}");
        assert!(html.contains("<title>App &amp; Co</title>"));
        assert!(html.contains("<link href=\"/app.css\" rel=\"stylesheet\">"));
    }

    #[test]
    fn test_missing_anchor_fails() {
        let (_dir, plugin) = plugin(Inject::Anchor("<!-- scripts -->".into()), Some(TEMPLATE));
        let err = plugin.render(&[], &["/app.js".into()], false).unwrap_err();
        assert!(err.message.contains("<!-- scripts -->"));
        assert!(err.path.unwrap().ends_with("template.html"));
    }

    #[test]
    fn test_default_template() {
        let (_dir, plugin) = plugin(Inject::Body, None);
        let html = plugin.render(&[], &["app.js".into()], false).unwrap();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<div id=\"app\"></div>\n  <script"));
    }

    #[test]
    fn test_minify_html() {
        let html = "<html>\n  <!-- note -->\n  <head><style>\n a { color : red; }\n</style></head>\n  <body>\n<pre>  keep\n  this</pre>\n<script>\n  var x = 1; // one\n</script>\n</body>\n</html>\n";
        assert_eq!(
            minify_html(html, &HtmlMinifyOptions::default()),
            "<html> <head><style>a{color:red}</style></head> <body> <pre>  keep\n  this</pre> <script>var x=1;</script> </body> </html>"
        );
    }
}
