//! Build configuration.
//!
//! The JSON file is deserialized into `Raw*` structs that mirror its layout,
//! then validated once into a [`BuildConfig`]: paths are made absolute,
//! patterns are compiled, transformers are instantiated and naming templates
//! are checked against the build environment. Nothing downstream re-parses
//! configuration strings.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use regex::Regex;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::asset::{AssetKind, PathMatcher};
use crate::chunk::ChunkPolicy;
use crate::emit::{FileNameTemplate, OutputNames};
use crate::environment::BuildEnvironment;
use crate::error::{BuildError, Result};
use crate::graph::{normalize_path, Resolver};
use crate::plugin::clean::CleanConfig;
use crate::plugin::html::HtmlConfig;
use crate::plugin::minify::MinifyConfig;
use crate::transform::{instantiate, RuleMode, TransformRegistry, TransformRule, TransformerId, TransformerSpec};

pub const DEFAULT_CONFIG_FILE: &str = "spa-pack.json";
pub const DEFAULT_OUTPUT_ROOT: &str = "build";

/// One or several requests for a single entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryRequests {
    One(String),
    Many(Vec<String>),
}

impl EntryRequests {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(request) => vec![request],
            Self::Many(requests) => requests,
        }
    }
}

/// Entries in declaration order. Unlike a plain map this rejects duplicate
/// names instead of keeping the last one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RawEntries(pub Vec<(String, EntryRequests)>);

impl<'de> Deserialize<'de> for RawEntries {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = RawEntries;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of entry names to one or more requests")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<RawEntries, A::Error> {
                let mut entries: Vec<(String, EntryRequests)> = Vec::new();
                while let Some((name, requests)) = map.next_entry::<String, EntryRequests>()? {
                    if entries.iter().any(|(existing, _)| *existing == name) {
                        return Err(de::Error::custom(format!("duplicate entry name `{name}`")));
                    }
                    entries.push((name, requests));
                }
                Ok(RawEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawOutput {
    pub public_path: String,
    pub filename: String,
    pub hashed_filename: String,
    pub style_filename: String,
    pub hashed_style_filename: String,
    /// Names of the shared vendor chunk script.
    pub vendor_filename: String,
    pub hashed_vendor_filename: String,
    /// Write `.map` files next to development scripts.
    pub source_map: bool,
}

impl Default for RawOutput {
    fn default() -> Self {
        Self {
            public_path: String::new(),
            filename: "[name].bundle.js".to_string(),
            hashed_filename: "[name].[chunkhash:8].bundle.js".to_string(),
            style_filename: "[name].bundle.css".to_string(),
            hashed_style_filename: "[name].[chunkhash:8].bundle.css".to_string(),
            vendor_filename: "common.bundle.js".to_string(),
            hashed_vendor_filename: "common.[chunkhash:8].bundle.js".to_string(),
            source_map: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawResolve {
    pub extensions: Vec<String>,
    pub alias: IndexMap<String, String>,
}

impl Default for RawResolve {
    fn default() -> Self {
        Self {
            extensions: [".js", ".vue", ".json"].iter().map(|s| s.to_string()).collect(),
            alias: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRule {
    pub test: String,
    #[serde(default)]
    pub exclude: Option<String>,
    #[serde(default)]
    pub kind: Option<AssetKind>,
    #[serde(rename = "use")]
    pub use_: Vec<TransformerSpec>,
}

impl RawRule {
    fn new(test: &str, exclude: Option<&str>, use_: Vec<TransformerSpec>) -> Self {
        Self {
            test: test.to_string(),
            exclude: exclude.map(str::to_string),
            kind: None,
            use_,
        }
    }
}

fn spec(loader: TransformerId, options: serde_json::Value) -> TransformerSpec {
    TransformerSpec { loader, options }
}

/// Rules used when the configuration declares none.
pub fn default_rules() -> Vec<RawRule> {
    use TransformerId::*;
    vec![
        RawRule::new(".vue", None, vec![spec(Template, json!({ "script": { "target": "es5" } }))]),
        RawRule::new(r"\.js$", Some("node_modules"), vec![spec(Script, json!({ "target": "es5" }))]),
        RawRule::new(r"\.js$", None, vec![spec(Script, json!(null))]),
        RawRule::new(r"\.(css|less)$", None, vec![spec(Css, json!(null)), spec(Less, json!(null))]),
        RawRule::new(r"\.json$", None, vec![spec(Json, json!(null))]),
        RawRule::new(
            r"\.(png|jpe?g|gif|svg|woff2?|eot|ttf)$",
            None,
            vec![spec(Url, json!({ "limit": 8192 }))],
        ),
        RawRule::new(r"\.(html|txt)$", None, vec![spec(Raw, json!(null))]),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginsConfig {
    /// Dotted expression to JSON replacement.
    pub define: IndexMap<String, serde_json::Value>,
    /// Free identifier to module request.
    pub provide: IndexMap<String, String>,
    pub extract_styles: bool,
    pub concatenate_modules: bool,
    pub clean: CleanConfig,
    pub minify: MinifyConfig,
    pub html: Option<HtmlConfig>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            define: IndexMap::new(),
            provide: IndexMap::new(),
            extract_styles: true,
            concatenate_modules: true,
            clean: CleanConfig::default(),
            minify: MinifyConfig::default(),
            html: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProxyRule {
    pub path: String,
    pub target: String,
    #[serde(default = "default_secure")]
    pub secure: bool,
}

fn default_secure() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevServerConfig {
    pub host: String,
    pub port: u16,
    pub proxy_timeout_secs: u64,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            proxy_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawConfig {
    pub context: Option<PathBuf>,
    pub entries: RawEntries,
    pub output_root: Option<PathBuf>,
    pub environment: Option<BuildEnvironment>,
    pub output: RawOutput,
    pub resolve: RawResolve,
    pub no_parse: Vec<String>,
    pub rule_mode: RuleMode,
    pub transform_rules: Option<Vec<RawRule>>,
    pub chunk_policy: ChunkPolicy,
    pub plugins: PluginsConfig,
    pub proxy_rules: Vec<RawProxyRule>,
    pub dev_server: DevServerConfig,
}

/// Request path pattern of a proxy rule. `*` matches any run of characters;
/// a pattern without `*` matches the path itself and everything below it.
#[derive(Debug, Clone)]
pub enum PathPattern {
    Prefix(String),
    Wildcard(Regex),
}

impl PathPattern {
    pub fn parse(pattern: &str) -> std::result::Result<Self, String> {
        if !pattern.starts_with('/') {
            return Err(format!("proxy path `{pattern}` must start with `/`"));
        }
        if !pattern.contains('*') {
            let prefix = pattern.trim_end_matches('/');
            return Ok(Self::Prefix(prefix.to_string()));
        }
        let body = pattern.split('*').map(regex::escape).collect::<Vec<_>>().join(".*");
        Regex::new(&format!("^{body}$"))
            .map(Self::Wildcard)
            .map_err(|err| err.to_string())
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Prefix(prefix) if prefix.is_empty() => true,
            Self::Prefix(prefix) => {
                path == prefix || path.strip_prefix(prefix.as_str()).is_some_and(|rest| rest.starts_with('/'))
            }
            Self::Wildcard(re) => re.is_match(path),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProxyRule {
    pub path: String,
    pub pattern: PathPattern,
    /// Scheme and authority, without a trailing slash.
    pub target: String,
    /// Verify upstream certificates. Only honoured as `false` in development.
    pub secure: bool,
}

impl ProxyRule {
    pub fn parse(raw: &RawProxyRule) -> Result<Self> {
        let pattern = PathPattern::parse(&raw.path).map_err(BuildError::Config)?;
        let target = raw.target.trim_end_matches('/');
        if !(target.starts_with("http://") || target.starts_with("https://")) {
            return Err(BuildError::Config(format!(
                "proxy target `{}` for `{}` must be an http or https URL",
                raw.target, raw.path
            )));
        }
        Ok(Self {
            path: raw.path.clone(),
            pattern,
            target: target.to_string(),
            secure: raw.secure,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.pattern.matches(path)
    }
}

/// Validated configuration of one build.
#[derive(Debug)]
pub struct BuildConfig {
    pub context: PathBuf,
    pub entries: IndexMap<String, Vec<String>>,
    pub output_root: PathBuf,
    pub environment: BuildEnvironment,
    pub public_path: String,
    pub output_names: OutputNames,
    /// Only honoured in development.
    pub source_maps: bool,
    pub resolver: Resolver,
    pub no_parse: Vec<Regex>,
    pub registry: TransformRegistry,
    pub chunk_policy: ChunkPolicy,
    pub plugins: PluginsConfig,
    pub proxy_rules: Vec<ProxyRule>,
    pub dev_server: DevServerConfig,
}

fn config_error(message: impl Into<String>) -> BuildError {
    BuildError::Config(message.into())
}

fn parse_template(field: &str, template: &str, hashed: bool) -> Result<FileNameTemplate> {
    let parsed = FileNameTemplate::parse(template).map_err(|err| config_error(format!("output.{field}: {err}")))?;
    if !hashed && parsed.has_hash() {
        return Err(config_error(format!(
            "output.{field} `{template}` is used for development builds and must not contain a hash"
        )));
    }
    // A hash in the query string leaves the file name itself unchanged.
    if hashed && !parsed.path_has_hash() {
        return Err(config_error(format!(
            "output.{field} `{template}` is used for production builds and must contain [hash] or [chunkhash] \
             in the file path (before any `?`)"
        )));
    }
    Ok(parsed)
}

fn compile_rule(index: usize, raw: &RawRule, environment: BuildEnvironment) -> Result<TransformRule> {
    let test = PathMatcher::parse(&raw.test)
        .map_err(|err| config_error(format!("transformRules[{index}].test `{}`: {err}", raw.test)))?;
    let exclude = raw
        .exclude
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|err| config_error(format!("transformRules[{index}].exclude: {err}")))?;
    let first = raw
        .use_
        .first()
        .ok_or_else(|| config_error(format!("transformRules[{index}] (`{}`) has no transformers", raw.test)))?;
    let chain = raw
        .use_
        .iter()
        .map(|spec| instantiate(spec, environment))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|err| config_error(format!("transformRules[{index}]: {err}")))?;
    Ok(TransformRule {
        test,
        exclude,
        kind: raw.kind.unwrap_or_else(|| first.loader.natural_kind()),
        chain,
    })
}

impl BuildConfig {
    /// Reads and validates a config file. Relative paths in it are taken
    /// relative to the file's directory.
    ///
    /// `mode` overrides the file's `environment`, which in turn overrides
    /// `NODE_ENV`.
    pub fn from_path(path: &Path, mode: Option<BuildEnvironment>) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|err| BuildError::io(path, err))?;
        let base = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        Self::from_json_str(&text, base, mode)
    }

    pub fn from_json_str(json: &str, base: &Path, mode: Option<BuildEnvironment>) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(json).map_err(|err| config_error(err.to_string()))?;
        Self::from_raw(raw, base, mode)
    }

    pub fn from_raw(raw: RawConfig, base: &Path, mode: Option<BuildEnvironment>) -> Result<Self> {
        let environment = mode.or(raw.environment).unwrap_or_else(BuildEnvironment::from_env);

        let base = if base.is_absolute() {
            base.to_path_buf()
        } else {
            let cwd = std::env::current_dir().map_err(|err| BuildError::io(base, err))?;
            cwd.join(base)
        };
        let context = normalize_path(&base.join(raw.context.unwrap_or_else(|| PathBuf::from("."))));
        let output_root =
            normalize_path(&context.join(raw.output_root.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_ROOT))));

        if raw.entries.0.is_empty() {
            return Err(config_error("at least one entry is required"));
        }
        let mut entries = IndexMap::new();
        for (name, requests) in raw.entries.0 {
            if name == raw.chunk_policy.name {
                return Err(config_error(format!("entry `{name}` has the same name as the vendor chunk")));
            }
            let requests = requests.into_vec();
            if requests.is_empty() {
                return Err(config_error(format!("entry `{name}` has no requests")));
            }
            entries.insert(name, requests);
        }

        let output = &raw.output;
        let output_names = OutputNames {
            filename: parse_template("filename", &output.filename, false)?,
            hashed_filename: parse_template("hashedFilename", &output.hashed_filename, true)?,
            style_filename: parse_template("styleFilename", &output.style_filename, false)?,
            hashed_style_filename: parse_template("hashedStyleFilename", &output.hashed_style_filename, true)?,
            vendor_chunk: raw.chunk_policy.name.clone(),
            vendor_filename: parse_template("vendorFilename", &output.vendor_filename, false)?,
            hashed_vendor_filename: parse_template("hashedVendorFilename", &output.hashed_vendor_filename, true)?,
        };
        let source_maps = output.source_map;

        let no_parse = raw
            .no_parse
            .iter()
            .map(|pattern| Regex::new(pattern).map_err(|err| config_error(format!("noParse `{pattern}`: {err}"))))
            .collect::<Result<Vec<_>>>()?;

        let raw_rules = raw.transform_rules.unwrap_or_else(default_rules);
        let rules = raw_rules
            .iter()
            .enumerate()
            .map(|(index, rule)| compile_rule(index, rule, environment))
            .collect::<Result<Vec<_>>>()?;

        let alias = raw.resolve.alias.into_iter().collect();
        let resolver = Resolver::new(&context, raw.resolve.extensions, alias);

        let proxy_rules = raw.proxy_rules.iter().map(ProxyRule::parse).collect::<Result<Vec<_>>>()?;

        log::debug!(
            "Loaded config for {environment}: {} entries, {} rules, context {}",
            entries.len(),
            rules.len(),
            context.display()
        );
        Ok(Self {
            context,
            entries,
            output_root,
            environment,
            public_path: raw.output.public_path,
            output_names,
            source_maps,
            resolver,
            no_parse,
            registry: TransformRegistry::new(rules, raw.rule_mode),
            chunk_policy: raw.chunk_policy,
            plugins: raw.plugins,
            proxy_rules,
            dev_server: raw.dev_server,
        })
    }

    /// First proxy rule matching a request path.
    pub fn proxy_rule(&self, path: &str) -> Option<&ProxyRule> {
        self.proxy_rules.iter().find(|rule| rule.matches(path))
    }
}
