//! Downlevel compiler for script modules.
//!
//! ES module syntax is rewritten into the CommonJS shape the chunk runtime
//! understands. Static imports are hoisted in source order (ES modules
//! evaluate their imports before the body); `require()` and `import()` calls
//! stay in place and are recorded as conditional references.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::Deserialize;

use super::{placeholder, Content, ModuleSource, Reference, TransformContext, Transformer, TransformerId};
use crate::error::{BuildError, Result};
use crate::lexer::{is_property_position, tokenize, CodeMap, TokenKind};

lazy_static! {
    static ref IMPORT_FROM_RE: Regex = Regex::new(
        r#"(?m)^[ \t]*import\s+(?P<clause>[\w$]+\s*(?:,\s*(?:\{[^}]*\}|\*\s*as\s+[\w$]+))?|\{[^}]*\}|\*\s*as\s+[\w$]+)\s*from\s*["'](?P<req>[^"'\n]+)["'][ \t]*;?"#
    )
    .unwrap();
    static ref IMPORT_BARE_RE: Regex =
        Regex::new(r#"(?m)^[ \t]*import\s*["'](?P<req>[^"'\n]+)["'][ \t]*;?"#).unwrap();
    static ref EXPORT_FROM_RE: Regex = Regex::new(
        r#"(?m)^[ \t]*export\s*(?P<clause>\*|\{[^}]*\})\s*from\s*["'](?P<req>[^"'\n]+)["'][ \t]*;?"#
    )
    .unwrap();
    static ref EXPORT_LIST_RE: Regex =
        Regex::new(r#"(?m)^[ \t]*export\s*\{(?P<names>[^}]*)\}[ \t]*;?"#).unwrap();
    static ref EXPORT_DEFAULT_RE: Regex = Regex::new(r#"(?m)^(?P<indent>[ \t]*)export\s+default\s+"#).unwrap();
    static ref EXPORT_DECL_RE: Regex = Regex::new(
        r#"(?m)^(?P<indent>[ \t]*)export\s+(?P<decl>(?:async\s+)?function\s*\*?|class|var|let|const)\s*(?P<name>[\w$]+)"#
    )
    .unwrap();
    static ref REQUIRE_RE: Regex =
        Regex::new(r#"(?P<pre>^|[^.\w$])require\s*\(\s*["'](?P<req>[^"'\n]+)["']\s*\)"#).unwrap();
    static ref DYNAMIC_IMPORT_RE: Regex =
        Regex::new(r#"(?P<pre>^|[^.\w$])import\s*\(\s*["'](?P<req>[^"'\n]+)["']\s*\)"#).unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptTarget {
    Es5,
    #[default]
    Es2015,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScriptOptions {
    pub target: ScriptTarget,
    /// Preset names; `es2015` compiles ES2015 syntax down, same as `target: "es5"`.
    pub presets: Vec<String>,
}

impl ScriptOptions {
    fn effective_target(&self) -> ScriptTarget {
        if self.presets.iter().any(|preset| preset == "es2015") {
            ScriptTarget::Es5
        } else {
            self.target
        }
    }
}

#[derive(Debug)]
pub struct ScriptTransformer {
    options: ScriptOptions,
}

impl ScriptTransformer {
    pub fn new(options: ScriptOptions) -> Self {
        Self { options }
    }
}

impl Transformer for ScriptTransformer {
    fn id(&self) -> TransformerId {
        TransformerId::Script
    }

    fn transform(&self, mut source: ModuleSource, ctx: &TransformContext<'_>) -> Result<ModuleSource> {
        let code = match source.content {
            Content::Text(text) | Content::Script(text) => text,
            other => {
                return Err(BuildError::transform(
                    ctx.path,
                    self.id().as_str(),
                    format!("expected script text, got {}", other.describe()),
                ))
            }
        };
        let code = if ctx.parse_references {
            compile_module(&code, &self.options, &mut source.references)
        } else {
            code
        };
        source.content = Content::Script(code);
        Ok(source)
    }
}

#[derive(Debug, Clone, Copy)]
enum Statement {
    ImportFrom,
    ImportBare,
    ReExport,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ImportClause {
    default: Option<String>,
    namespace: Option<String>,
    named: Vec<(String, String)>,
}

fn parse_specifiers(list: &str) -> Vec<(String, String)> {
    list.split(',')
        .filter_map(|spec| {
            let parts: Vec<&str> = spec.split_whitespace().collect();
            match parts.as_slice() {
                [name] => Some((name.to_string(), name.to_string())),
                [name, "as", alias] => Some((name.to_string(), alias.to_string())),
                _ => None,
            }
        })
        .collect()
}

fn parse_clause(clause: &str) -> ImportClause {
    let mut parsed = ImportClause::default();
    let mut rest = clause.trim().to_string();
    if let (Some(open), Some(close)) = (rest.find('{'), rest.rfind('}')) {
        parsed.named = parse_specifiers(&rest[open + 1..close]);
        rest = format!("{}{}", &rest[..open], &rest[close + 1..]);
    }
    for part in rest.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some(ns) = part.strip_prefix('*') {
            parsed.namespace = ns.trim().strip_prefix("as").map(|n| n.trim().to_string());
        } else {
            parsed.default = Some(part.to_string());
        }
    }
    parsed
}

fn member(object: &str, property: &str) -> String {
    if property == "default" {
        format!("__spa__.interop({object})")
    } else {
        format!("{object}.{property}")
    }
}

/// Position of the keyword a pattern match is anchored on, past any leading
/// `pre` context and indentation.
fn keyword_start(text: &str, caps: &Captures) -> usize {
    let start = match (caps.name("pre"), caps.get(0)) {
        (Some(pre), _) => pre.end(),
        (None, Some(whole)) => whole.start(),
        (None, None) => 0,
    };
    let rest = &text[start..];
    start + (rest.len() - rest.trim_start().len())
}

/// `Regex::replace_all` restricted to matches whose keyword is code, so
/// comments and string contents are never rewritten.
fn replace_in_code(re: &Regex, text: &str, mut rewrite: impl FnMut(&Captures) -> String) -> String {
    let map = CodeMap::new(text);
    re.replace_all(text, |caps: &Captures| {
        if map.is_code(keyword_start(text, caps)) {
            rewrite(caps)
        } else {
            caps.get(0).map_or_else(String::new, |m| m.as_str().to_string())
        }
    })
    .into_owned()
}

/// Rewrites one module, appending every discovered dependency to `references`.
pub fn compile_module(code: &str, options: &ScriptOptions, references: &mut Vec<Reference>) -> String {
    let mut has_exports = false;
    let map = CodeMap::new(code);

    // Hoisted statements, in source order.
    let mut statements: Vec<(Statement, regex::Match<'_>)> = Vec::new();
    for (form, re) in [
        (Statement::ImportFrom, &*IMPORT_FROM_RE),
        (Statement::ImportBare, &*IMPORT_BARE_RE),
        (Statement::ReExport, &*EXPORT_FROM_RE),
    ] {
        statements.extend(
            re.find_iter(code)
                .filter(|m| {
                    let indent = m.as_str().len() - m.as_str().trim_start().len();
                    map.is_code(m.start() + indent)
                })
                .map(|m| (form, m)),
        );
    }
    statements.sort_by_key(|(_, m)| m.start());

    let mut prelude = Vec::new();
    let mut body = String::with_capacity(code.len());
    let mut cursor = 0;
    for (form, m) in &statements {
        if m.start() < cursor {
            continue;
        }
        body.push_str(&code[cursor..m.start()]);
        cursor = m.end();

        let text = m.as_str();
        let index = references.len();
        match form {
            Statement::ImportFrom => {
                let Some(caps) = IMPORT_FROM_RE.captures(text) else {
                    body.push_str(text);
                    continue;
                };
                references.push(Reference::import(&caps["req"]));
                let require = format!("__spa_require__({})", placeholder(index));
                let clause = parse_clause(&caps["clause"]);
                match (&clause.default, &clause.namespace, clause.named.is_empty()) {
                    (Some(default), None, true) => {
                        prelude.push(format!("var {default} = __spa__.interop({require});"))
                    }
                    (None, Some(ns), true) => prelude.push(format!("var {ns} = {require};")),
                    _ => {
                        let local = format!("__spa_m{index}");
                        prelude.push(format!("var {local} = {require};"));
                        if let Some(default) = &clause.default {
                            prelude.push(format!("var {default} = {};", member(&local, "default")));
                        }
                        if let Some(ns) = &clause.namespace {
                            prelude.push(format!("var {ns} = {local};"));
                        }
                        for (imported, alias) in &clause.named {
                            prelude.push(format!("var {alias} = {};", member(&local, imported)));
                        }
                    }
                }
            }
            Statement::ImportBare => {
                let Some(caps) = IMPORT_BARE_RE.captures(text) else {
                    body.push_str(text);
                    continue;
                };
                references.push(Reference::import(&caps["req"]));
                prelude.push(format!("__spa_require__({});", placeholder(index)));
            }
            Statement::ReExport => {
                let Some(caps) = EXPORT_FROM_RE.captures(text) else {
                    body.push_str(text);
                    continue;
                };
                references.push(Reference::import(&caps["req"]));
                has_exports = true;
                let require = format!("__spa_require__({})", placeholder(index));
                let clause = &caps["clause"];
                if clause == "*" {
                    prelude.push(format!("__spa__.exportStar(exports, {require});"));
                } else {
                    let local = format!("__spa_m{index}");
                    prelude.push(format!("var {local} = {require};"));
                    for (name, alias) in parse_specifiers(clause.trim_matches(|c| c == '{' || c == '}')) {
                        prelude.push(format!("exports.{alias} = {local}.{name};"));
                    }
                }
            }
        }
    }
    body.push_str(&code[cursor..]);

    let mut hoisted_exports = Vec::new();
    let mut epilogue = Vec::new();

    let body = replace_in_code(&EXPORT_LIST_RE, &body, |caps| {
        has_exports = true;
        for (name, alias) in parse_specifiers(&caps["names"]) {
            epilogue.push(format!("exports.{alias} = {name};"));
        }
        String::new()
    });
    let body = replace_in_code(&EXPORT_DECL_RE, &body, |caps| {
        has_exports = true;
        let (decl, name) = (caps["decl"].trim_end(), &caps["name"]);
        let line = format!("exports.{name} = {name};");
        if decl.contains("function") {
            hoisted_exports.push(line);
        } else {
            epilogue.push(line);
        }
        format!("{}{decl} {name}", &caps["indent"])
    });
    let body = replace_in_code(&EXPORT_DEFAULT_RE, &body, |caps| {
        has_exports = true;
        format!("{}exports.default = ", &caps["indent"])
    });
    let body = replace_in_code(&REQUIRE_RE, &body, |caps| {
        let index = references.len();
        references.push(Reference::conditional_import(&caps["req"]));
        format!("{}__spa_require__({})", &caps["pre"], placeholder(index))
    });
    let body = replace_in_code(&DYNAMIC_IMPORT_RE, &body, |caps| {
        let index = references.len();
        references.push(Reference::conditional_import(&caps["req"]));
        format!(
            "{}Promise.resolve().then(function () {{ return __spa_require__({}); }})",
            &caps["pre"],
            placeholder(index)
        )
    });
    let body = if options.effective_target() == ScriptTarget::Es5 {
        downlevel_bindings(&body)
    } else {
        body
    };

    let mut out = String::with_capacity(body.len() + 256);
    if has_exports {
        out.push_str("Object.defineProperty(exports, \"__esModule\", { value: true });\n");
    }
    for line in hoisted_exports.iter().chain(prelude.iter()) {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(body.trim_start_matches('\n'));
    for line in &epilogue {
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(line);
    }
    out
}

/// Rewrites `let`/`const` declarations to `var`.
fn downlevel_bindings(code: &str) -> String {
    let tokens = tokenize(code);
    let mut out = String::with_capacity(code.len());
    for (i, token) in tokens.iter().enumerate() {
        let is_binding = token.kind == TokenKind::Ident
            && matches!(token.text, "let" | "const")
            && !is_property_position(&tokens, i);
        out.push_str(if is_binding { "var" } else { token.text });
    }
    out
}
