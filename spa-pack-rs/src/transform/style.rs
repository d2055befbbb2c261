use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::Deserialize;

use super::{Content, ModuleSource, Reference, TransformContext, Transformer, TransformerId};
use crate::environment::BuildEnvironment;
use crate::error::{BuildError, Result};

lazy_static! {
    static ref LESS_VARIABLE_DECL_RE: Regex =
        Regex::new(r"(?m)^[ \t]*@(?P<name>[\w-]+)[ \t]*:[ \t]*(?P<value>[^;\n]+?)[ \t]*;[ \t]*\r?\n?").unwrap();
    static ref LESS_VARIABLE_USE_RE: Regex = Regex::new(r"@(?P<name>[\w-]+)").unwrap();
    static ref LESS_COMMENT_LINE_RE: Regex = Regex::new(r"(?m)^[ \t]*//.*\r?\n?").unwrap();
    static ref LESS_TRAILING_COMMENT_RE: Regex = Regex::new(r"(?m)[ \t]+//.*$").unwrap();
    static ref CSS_IMPORT_RE: Regex = Regex::new(
        r#"(?m)^[ \t]*@import\s+(?:url\(\s*)?["']?(?P<request>[^"')\s;]+)["']?\s*\)?[^;\n]*;[ \t]*\r?\n?"#
    )
    .unwrap();
    static ref CSS_URL_RE: Regex =
        Regex::new(r#"url\(\s*(?P<quote>["']?)(?P<url>[^"')]+)["']?\s*\)"#).unwrap();
}

/// Variable substitution passes; covers variables defined in terms of others.
const LESS_MAX_PASSES: usize = 8;

fn expect_text(source: &mut ModuleSource, ctx: &TransformContext<'_>, id: TransformerId) -> Result<String> {
    let content = std::mem::replace(&mut source.content, Content::Text(String::new()));
    let kind = content.describe();
    content.into_text().ok_or_else(|| {
        BuildError::transform(ctx.path, id.as_str(), format!("expected stylesheet text, got {kind}"))
    })
}

/// Preprocessor for the subset of LESS the application sources use: top-level
/// variables and `//` comments.
#[derive(Debug)]
pub struct LessTransformer;

pub fn compile_less(source: &str) -> String {
    let stripped = LESS_COMMENT_LINE_RE.replace_all(source, "");
    let stripped = LESS_TRAILING_COMMENT_RE.replace_all(&stripped, "");

    let mut variables: HashMap<String, String> = HashMap::new();
    for caps in LESS_VARIABLE_DECL_RE.captures_iter(&stripped) {
        variables.insert(caps["name"].to_string(), caps["value"].to_string());
    }
    let mut css = LESS_VARIABLE_DECL_RE.replace_all(&stripped, "").into_owned();

    for _ in 0..LESS_MAX_PASSES {
        let mut changed = false;
        let next = LESS_VARIABLE_USE_RE.replace_all(&css, |caps: &Captures| match variables.get(&caps["name"]) {
            Some(value) => {
                changed = true;
                value.clone()
            }
            None => caps[0].to_string(),
        });
        css = next.into_owned();
        if !changed {
            break;
        }
    }
    css
}

impl Transformer for LessTransformer {
    fn id(&self) -> TransformerId {
        TransformerId::Less
    }

    fn transform(&self, mut source: ModuleSource, ctx: &TransformContext<'_>) -> Result<ModuleSource> {
        let text = expect_text(&mut source, ctx, self.id())?;
        source.content = Content::Text(compile_less(&text));
        Ok(source)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CssOptions {
    /// Defaults to minimizing in production only.
    pub minimize: Option<bool>,
}

#[derive(Debug)]
pub struct CssTransformer {
    minimize: bool,
}

impl CssTransformer {
    pub fn new(options: CssOptions, environment: BuildEnvironment) -> Self {
        Self {
            minimize: options.minimize.unwrap_or(environment.is_production()),
        }
    }
}

fn is_external_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("data:")
        || lower.starts_with("http:")
        || lower.starts_with("https:")
        || lower.starts_with("//")
        || lower.starts_with('#')
}

/// CSS requests are relative unless written with a leading `~`, which names a
/// package.
fn css_request(url: &str) -> String {
    if let Some(package) = url.strip_prefix('~') {
        package.to_string()
    } else if url.starts_with("./") || url.starts_with("../") || url.starts_with('/') {
        url.to_string()
    } else {
        format!("./{url}")
    }
}

impl Transformer for CssTransformer {
    fn id(&self) -> TransformerId {
        TransformerId::Css
    }

    fn transform(&self, mut source: ModuleSource, ctx: &TransformContext<'_>) -> Result<ModuleSource> {
        let text = expect_text(&mut source, ctx, self.id())?;
        let mut css = text;

        if ctx.parse_references {
            css = CSS_IMPORT_RE
                .replace_all(&css, |caps: &Captures| {
                    let request = &caps["request"];
                    if is_external_url(request) {
                        return caps[0].to_string();
                    }
                    source.add_reference(Reference::import(css_request(request)));
                    String::new()
                })
                .into_owned();
            css = CSS_URL_RE
                .replace_all(&css, |caps: &Captures| {
                    let url = caps["url"].trim();
                    if is_external_url(url) {
                        return caps[0].to_string();
                    }
                    let token = source.add_reference(Reference::url(css_request(url)));
                    format!("url(\"{token}\")")
                })
                .into_owned();
        }

        if self.minimize {
            css = minimize_css(&css);
        }
        source.content = Content::Style(css);
        Ok(source)
    }
}

/// Removes comments and redundant whitespace. Quoted strings are kept as is.
pub fn minimize_css(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let chars: Vec<char> = css.chars().collect();
    let mut i = 0;
    let mut pending_space = false;

    while i < chars.len() {
        let c = chars[i];
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            let mut j = i + 2;
            while j + 1 < chars.len() && !(chars[j] == '*' && chars[j + 1] == '/') {
                j += 1;
            }
            i = (j + 2).min(chars.len());
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            i += 1;
            continue;
        }
        if c == '"' || c == '\'' {
            if pending_space && needs_space(out.chars().last(), c) {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
            i += 1;
            while i < chars.len() {
                out.push(chars[i]);
                if chars[i] == '\\' && i + 1 < chars.len() {
                    out.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                i += 1;
                if chars[i - 1] == c {
                    break;
                }
            }
            continue;
        }
        if c == '}' && out.ends_with(';') {
            out.pop();
        }
        if pending_space && needs_space(out.chars().last(), c) {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
        i += 1;
    }
    out
}

fn needs_space(prev: Option<char>, next: char) -> bool {
    const TIGHT: &[char] = &['{', '}', ';', ':', ',', '>', '(', ')'];
    match prev {
        None => false,
        Some(prev) => (!TIGHT.contains(&prev) && !TIGHT.contains(&next)) || (next == '(' && prev.is_alphanumeric()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetKind;
    use crate::transform::ReferenceKind;
    use std::path::Path;

    fn ctx(path: &Path) -> TransformContext<'_> {
        TransformContext {
            path,
            kind: AssetKind::Style,
            environment: BuildEnvironment::Development,
            parse_references: true,
        }
    }

    #[test]
    fn test_less_variables_and_comments() {
        let less = "@base: #333;\n@text: @base;\n// heading\nh1 { color: @text; } // trailing\n@media print { a { b: url(http://x/y) } }\n";
        let css = compile_less(less);
        assert_eq!(css, "h1 { color: #333; }\n@media print { a { b: url(http://x/y) } }\n");
    }

    #[test]
    fn test_css_records_imports_and_urls() {
        let path = Path::new("/src/main.css");
        let css = "@import './reset.css';\n@import url(\"~normalize.css\");\n.a { background: url(img/bg.png) }\n.b { background: url(data:image/png;base64,AAA=) }\n.c { cursor: url('#x') }\n";
        let out = CssTransformer::new(CssOptions::default(), BuildEnvironment::Development)
            .transform(ModuleSource::new(Content::Text(css.to_string())), &ctx(path))
            .unwrap();

        let refs: Vec<_> = out.references.iter().map(|r| (r.request.as_str(), r.kind)).collect();
        assert_eq!(
            refs,
            vec![
                ("./reset.css", ReferenceKind::Import),
                ("normalize.css", ReferenceKind::Import),
                ("./img/bg.png", ReferenceKind::Url),
            ]
        );
        let Content::Style(text) = out.content else { panic!("expected style") };
        assert!(!text.contains("@import"));
        assert!(text.contains("url(\"__spa_ref_2__\")"));
        assert!(text.contains("data:image/png"));
    }

    #[test]
    fn test_minimize_defaults_to_production() {
        let path = Path::new("/src/a.css");
        let out = CssTransformer::new(CssOptions::default(), BuildEnvironment::Production)
            .transform(ModuleSource::new(Content::Text("a  {\n  color : red ;\n}\n".into())), &ctx(path))
            .unwrap();
        let Content::Style(text) = out.content else { panic!("expected style") };
        assert_eq!(text, "a{color:red}");
    }

    #[test]
    fn test_minimize_css() {
        assert_eq!(
            minimize_css("/* c */ .a .b , .c > p {\n  margin : 0 auto;\n  content: \"a  b\";\n}\n"),
            ".a .b,.c>p{margin:0 auto;content:\"a  b\"}"
        );
        assert_eq!(minimize_css("a { width: calc(100% - 2px) }"), "a{width:calc(100% - 2px)}");
    }
}
