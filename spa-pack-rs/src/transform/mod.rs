//! Transform registry and chain execution.
//!
//! A rule maps a path pattern onto an ordered list of transformers. Chains are
//! declared left-to-right but applied right-to-left, so for `[css, less]` the
//! `less` transformer sees the file first and `css` consumes its output.

mod data;
mod script;
mod style;
pub mod template;
mod url;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::asset::{AssetKind, PathMatcher};
use crate::environment::BuildEnvironment;
use crate::error::{BuildError, Result};
use crate::graph::ModuleId;

pub use script::{compile_module, ScriptOptions, ScriptTarget};
pub use style::minimize_css;
pub use url::UrlOptions;

/// Identifier of a built-in transformer, as written in the `loader` field of
/// a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformerId {
    Template,
    Script,
    Less,
    Css,
    Url,
    Json,
    Raw,
}

impl TransformerId {
    /// Kind of module this transformer is normally declared for.
    pub fn natural_kind(self) -> AssetKind {
        match self {
            Self::Template => AssetKind::Template,
            Self::Script => AssetKind::Script,
            Self::Less | Self::Css => AssetKind::Style,
            Self::Url => AssetKind::Binary,
            Self::Json | Self::Raw => AssetKind::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::Script => "script",
            Self::Less => "less",
            Self::Css => "css",
            Self::Url => "url",
            Self::Json => "json",
            Self::Raw => "raw",
        }
    }
}

impl fmt::Display for TransformerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{ loader, options }` entry of a rule's `use` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformerSpec {
    pub loader: TransformerId,
    #[serde(default)]
    pub options: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Module dependency, replaced by the target's module id.
    Import,
    /// Resource location, replaced by the target's public URL or data URI.
    Url,
}

/// Source carried by a reference to a sub-resource that has no file of its
/// own, such as a `<style>` block of a component template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineSource {
    pub name: String,
    pub content: String,
}

/// A dependency discovered by a transformer. Its position in the owning
/// module's reference list is the number used in the placeholder token.
#[derive(Debug, Clone)]
pub struct Reference {
    pub request: String,
    pub kind: ReferenceKind,
    /// `require()` and `import()` calls; false for hoisted `import` statements.
    pub conditional: bool,
    pub inline: Option<InlineSource>,
    pub target: Option<ModuleId>,
}

impl Reference {
    pub fn import(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            kind: ReferenceKind::Import,
            conditional: false,
            inline: None,
            target: None,
        }
    }

    pub fn conditional_import(request: impl Into<String>) -> Self {
        Self {
            conditional: true,
            ..Self::import(request)
        }
    }

    pub fn url(request: impl Into<String>) -> Self {
        Self {
            kind: ReferenceKind::Url,
            ..Self::import(request)
        }
    }

    pub fn inline(name: impl Into<String>, content: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            inline: Some(InlineSource {
                name: name.clone(),
                content: content.into(),
            }),
            ..Self::import(name)
        }
    }
}

/// Token left in transformed output for reference `index`.
pub fn placeholder(index: usize) -> String {
    format!("__spa_ref_{index}__")
}

/// An emitted binary asset, or its inlined form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetOutput {
    Inline { data_uri: String },
    /// `path` is relative to the output root; `url` is relative to the public
    /// path and may carry a query suffix.
    File {
        path: String,
        url: String,
        bytes: Vec<u8>,
    },
}

/// Content flowing through a chain. Files start as `Text` or `Bytes`; the chain
/// must end in `Script`, `Style` or `Asset`.
#[derive(Debug, Clone)]
pub enum Content {
    Text(String),
    Bytes(Vec<u8>),
    Script(String),
    Style(String),
    Asset(AssetOutput),
}

impl Content {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Script(_) => "script",
            Self::Style(_) => "style",
            Self::Asset(_) => "asset",
        }
    }

    /// Text for transformers that accept any textual input.
    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(text) | Self::Script(text) | Self::Style(text) => Some(text),
            Self::Bytes(bytes) => String::from_utf8(bytes).ok(),
            Self::Asset(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModuleSource {
    pub content: Content,
    pub references: Vec<Reference>,
}

impl ModuleSource {
    pub fn new(content: Content) -> Self {
        Self {
            content,
            references: Vec::new(),
        }
    }

    /// Registers a reference and returns its placeholder token.
    pub fn add_reference(&mut self, reference: Reference) -> String {
        self.references.push(reference);
        placeholder(self.references.len() - 1)
    }
}

pub struct TransformContext<'a> {
    pub path: &'a Path,
    pub kind: AssetKind,
    pub environment: BuildEnvironment,
    /// False for modules matched by `noParse`.
    pub parse_references: bool,
}

pub trait Transformer: Send + Sync + fmt::Debug {
    fn id(&self) -> TransformerId;

    fn transform(&self, source: ModuleSource, ctx: &TransformContext<'_>) -> Result<ModuleSource>;
}

/// Instantiates a transformer, parsing its options once.
pub fn instantiate(
    spec: &TransformerSpec,
    environment: BuildEnvironment,
) -> std::result::Result<Arc<dyn Transformer>, String> {
    fn options<T: serde::de::DeserializeOwned + Default>(
        spec: &TransformerSpec,
    ) -> std::result::Result<T, String> {
        if spec.options.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(spec.options.clone())
            .map_err(|err| format!("invalid options for `{}`: {err}", spec.loader))
    }

    Ok(match spec.loader {
        TransformerId::Template => Arc::new(template::TemplateTransformer::new(options(spec)?)),
        TransformerId::Script => Arc::new(script::ScriptTransformer::new(options(spec)?)),
        TransformerId::Less => Arc::new(style::LessTransformer),
        TransformerId::Css => Arc::new(style::CssTransformer::new(options(spec)?, environment)),
        TransformerId::Url => Arc::new(url::UrlTransformer::new(options(spec)?)?),
        TransformerId::Json => Arc::new(data::JsonTransformer),
        TransformerId::Raw => Arc::new(data::RawTransformer),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleMode {
    /// The first matching rule is the only one applied.
    #[default]
    FirstMatch,
    /// Every matching rule applies, chains concatenated in listed order.
    ChainAll,
}

#[derive(Debug, Clone)]
pub struct TransformRule {
    pub test: PathMatcher,
    pub exclude: Option<Regex>,
    pub kind: AssetKind,
    pub chain: Vec<Arc<dyn Transformer>>,
}

impl TransformRule {
    pub fn matches(&self, path: &Path) -> bool {
        let excluded = self
            .exclude
            .as_ref()
            .is_some_and(|re| re.is_match(&path.to_string_lossy()));
        !excluded && self.test.matches(path)
    }
}

/// The transformers selected for one module, in declaration order.
#[derive(Debug, Clone)]
pub struct ResolvedChain {
    pub kind: AssetKind,
    pub transformers: Vec<Arc<dyn Transformer>>,
}

impl ResolvedChain {
    /// Identifiers in application order.
    pub fn applied_ids(&self) -> Vec<TransformerId> {
        self.transformers.iter().rev().map(|t| t.id()).collect()
    }

    /// Runs the chain right-to-left: the last declared transformer is applied
    /// first and every other one consumes the output of its right neighbour.
    pub fn run(&self, mut source: ModuleSource, ctx: &TransformContext<'_>) -> Result<ModuleSource> {
        for transformer in self.transformers.iter().rev() {
            log::trace!("{} <- {}", ctx.path.display(), transformer.id());
            source = transformer.transform(source, ctx)?;
        }
        Ok(source)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransformRegistry {
    rules: Vec<TransformRule>,
    mode: RuleMode,
}

impl TransformRegistry {
    pub fn new(rules: Vec<TransformRule>, mode: RuleMode) -> Self {
        Self { rules, mode }
    }

    pub fn rules(&self) -> &[TransformRule] {
        &self.rules
    }

    pub fn resolve_chain(&self, path: &Path) -> Result<ResolvedChain> {
        let mut matching = self.rules.iter().filter(|rule| rule.matches(path));
        let first = matching.next().ok_or_else(|| BuildError::UnmatchedAssetType {
            path: PathBuf::from(path),
        })?;

        let mut transformers = first.chain.clone();
        if self.mode == RuleMode::ChainAll {
            for rule in matching {
                transformers.extend(rule.chain.iter().cloned());
            }
        }
        Ok(ResolvedChain {
            kind: first.kind,
            transformers,
        })
    }
}
