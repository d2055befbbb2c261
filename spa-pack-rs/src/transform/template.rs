//! Single-file component compiler.
//!
//! A component file holds one `<template>`, at most one `<script>` and any
//! number of `<style>` blocks. The script is compiled like any other script
//! module, the template markup becomes the `template` property of the
//! component object, and every style block turns into an inline sub-resource
//! reference named `style-<index>.<lang>`.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::Deserialize;

use super::script::{compile_module, ScriptOptions};
use super::{Content, ModuleSource, Reference, TransformContext, Transformer, TransformerId};
use crate::error::{BuildError, Result};
use crate::text::js_string_literal;

lazy_static! {
    static ref SCRIPT_BLOCK_RE: Regex =
        Regex::new(r"(?is)<script(?P<attrs>[^>]*)>(?P<body>.*?)</script\s*>").unwrap();
    static ref STYLE_BLOCK_RE: Regex =
        Regex::new(r"(?is)<style(?P<attrs>[^>]*)>(?P<body>.*?)</style\s*>").unwrap();
    static ref TEMPLATE_OPEN_RE: Regex = Regex::new(r"(?i)<template(?P<attrs>[^>]*)>").unwrap();
    static ref LANG_ATTR_RE: Regex = Regex::new(r#"lang\s*=\s*["']?(?P<lang>[\w-]+)"#).unwrap();
    static ref ASSET_ATTR_RE: Regex =
        Regex::new(r#"(?P<attr>\s(?:src|poster)\s*=\s*)"(?P<url>(?:\./|\.\./|~)[^"]+)""#).unwrap();
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateOptions {
    /// Options for the embedded `<script>` block.
    pub script: ScriptOptions,
}

#[derive(Debug)]
pub struct TemplateTransformer {
    options: TemplateOptions,
}

impl TemplateTransformer {
    pub fn new(options: TemplateOptions) -> Self {
        Self { options }
    }
}

/// Blocks of one component file.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ComponentBlocks {
    pub template: Option<String>,
    pub script: Option<String>,
    /// `(lang, content)` in declaration order.
    pub styles: Vec<(String, String)>,
}

fn lang_of(attrs: &str, default: &str) -> String {
    LANG_ATTR_RE
        .captures(attrs)
        .map(|caps| caps["lang"].to_ascii_lowercase())
        .unwrap_or_else(|| default.to_string())
}

pub fn parse_component(source: &str) -> ComponentBlocks {
    let mut blocks = ComponentBlocks::default();

    // Templates may nest `<template>` tags, so the block runs to the last close tag.
    if let Some(open) = TEMPLATE_OPEN_RE.find(source) {
        let lower = source.to_ascii_lowercase();
        if let Some(close) = lower.rfind("</template") {
            if close >= open.end() {
                blocks.template = Some(source[open.end()..close].trim().to_string());
            }
        }
    }
    if let Some(caps) = SCRIPT_BLOCK_RE.captures(source) {
        blocks.script = Some(caps["body"].to_string());
    }
    for caps in STYLE_BLOCK_RE.captures_iter(source) {
        blocks.styles.push((lang_of(&caps["attrs"], "css"), caps["body"].to_string()));
    }
    blocks
}

/// Applies `f` to the body of every `<script>` block, leaving the rest of
/// the component untouched.
pub fn map_script_blocks(source: &str, mut f: impl FnMut(&str) -> String) -> String {
    SCRIPT_BLOCK_RE
        .replace_all(source, |caps: &Captures| {
            let (Some(whole), Some(body)) = (caps.get(0), caps.name("body")) else {
                return String::new();
            };
            let (start, end) = (body.start() - whole.start(), body.end() - whole.start());
            let text = whole.as_str();
            format!("{}{}{}", &text[..start], f(body.as_str()), &text[end..])
        })
        .into_owned()
}

/// Output for components matched by `noParse`: the script block runs as
/// written and the markup is attached untouched. Style blocks are dropped
/// since nothing may be requested on the module's behalf.
fn unparsed_component(blocks: &ComponentBlocks) -> String {
    let mut out = String::new();
    if let Some(script) = &blocks.script {
        out.push_str(script.trim_matches('\n'));
        out.push('\n');
    }
    if let Some(template) = &blocks.template {
        out.push_str(&format!(
            "(module.exports.__esModule ? module.exports.default : module.exports).template = {};\n",
            js_string_literal(template)
        ));
    }
    out
}

impl Transformer for TemplateTransformer {
    fn id(&self) -> TransformerId {
        TransformerId::Template
    }

    fn transform(&self, mut source: ModuleSource, ctx: &TransformContext<'_>) -> Result<ModuleSource> {
        let text = match std::mem::replace(&mut source.content, Content::Text(String::new())) {
            Content::Text(text) => text,
            other => {
                return Err(BuildError::transform(
                    ctx.path,
                    self.id().as_str(),
                    format!("expected component source, got {}", other.describe()),
                ))
            }
        };
        let blocks = parse_component(&text);
        if blocks.template.is_none() && blocks.script.is_none() {
            return Err(BuildError::transform(
                ctx.path,
                self.id().as_str(),
                "component has neither a <template> nor a <script> block",
            ));
        }

        if !ctx.parse_references {
            source.content = Content::Script(unparsed_component(&blocks));
            return Ok(source);
        }

        let mut out = String::new();
        for (index, (lang, content)) in blocks.styles.iter().enumerate() {
            let token = source.add_reference(Reference::inline(format!("style-{index}.{lang}"), content.clone()));
            out.push_str(&format!("__spa_require__({token});\n"));
        }

        match &blocks.script {
            Some(script) => {
                out.push_str(&compile_module(script, &self.options.script, &mut source.references));
                out.push('\n');
            }
            None => out.push_str("Object.defineProperty(exports, \"__esModule\", { value: true });\nexports.default = {};\n"),
        }

        if let Some(template) = &blocks.template {
            // Relative asset URLs in markup become url references.
            let markup = ASSET_ATTR_RE.replace_all(template, |caps: &Captures| {
                let request = caps["url"].trim_start_matches('~').to_string();
                let token = source.add_reference(Reference::url(request));
                format!("{}\"{token}\"", &caps["attr"])
            });
            out.push_str(&format!(
                "(module.exports.__esModule ? module.exports.default : module.exports).template = {};\n",
                js_string_literal(&markup)
            ));
        }

        source.content = Content::Script(out);
        Ok(source)
    }
}
