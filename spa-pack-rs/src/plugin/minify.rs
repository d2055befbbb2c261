//! Script minification: dead branch removal, local name mangling, comment
//! stripping and whitespace compaction. Works on tokens, so it never needs to
//! understand more JavaScript than the lexer does.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::{Plugin, PluginResult};
use crate::lexer::{
    declaration_at, is_ident_char, is_property_position, next_significant, prev_significant, tokenize, Token,
    TokenKind,
};
use crate::state::{BuildState, OutputContent, OutputKind};
use crate::transform::minimize_css;

pub const DEFAULT_RESERVED: &[&str] = &["$super", "$", "exports", "require"];

const KEYWORDS: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete", "do", "else",
    "enum", "export", "extends", "false", "finally", "for", "function", "if", "import", "in", "instanceof",
    "let", "new", "null", "return", "super", "switch", "this", "throw", "true", "try", "typeof", "var",
    "void", "while", "with", "yield", "await", "static", "implements", "interface", "package", "private",
    "protected", "public", "arguments", "eval", "undefined", "of", "as", "get", "set", "async",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MangleConfig {
    pub enabled: bool,
    /// Names never renamed.
    pub reserved: Vec<String>,
}

impl Default for MangleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reserved: DEFAULT_RESERVED.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MinifyConfig {
    pub mangle: MangleConfig,
}

pub struct MinifyPlugin {
    config: MinifyConfig,
}

impl MinifyPlugin {
    pub fn new(config: &MinifyConfig) -> Self {
        Self { config: config.clone() }
    }
}

impl Plugin for MinifyPlugin {
    fn name(&self) -> &'static str {
        "minify"
    }

    fn optimize_assets(&self, state: &mut BuildState) -> PluginResult {
        for asset in &mut state.assets {
            let OutputContent::Text(text) = &asset.content else {
                continue;
            };
            let minified = match asset.kind {
                OutputKind::Script => minify_js(text, &self.config),
                OutputKind::Style => minimize_css(text),
                _ => continue,
            };
            log::debug!("Minified `{}` {:?}: {} -> {} bytes", asset.name, asset.kind, text.len(), minified.len());
            asset.content = OutputContent::Text(minified);
        }
        Ok(())
    }
}

pub fn minify_js(code: &str, config: &MinifyConfig) -> String {
    let code = fold_constant_branches(code);
    let code = if config.mangle.enabled {
        mangle(&code, &config.mangle.reserved)
    } else {
        code
    };
    compact(&code)
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Str(String),
    Num(f64),
}

fn literal(token: &Token<'_>) -> Option<Literal> {
    match token.kind {
        TokenKind::Str if !token.text.contains('\\') => {
            let quote = token.text.chars().next()?;
            token.text[quote.len_utf8()..]
                .strip_suffix(quote)
                .map(|body| Literal::Str(body.to_string()))
        }
        TokenKind::Number => token.text.parse::<f64>().ok().map(Literal::Num),
        _ => None,
    }
}

/// Index of the `}` matching the `{` at `open`.
fn matching_brace(tokens: &[Token<'_>], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        if token.is_punct("{") {
            depth += 1;
        } else if token.is_punct("}") {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// `if (<lit> <op> <lit>) {..} [else {..}]` starting at `index`: returns the
/// end token index (inclusive) and the token range of the block to keep.
fn constant_if(tokens: &[Token<'_>], index: usize) -> Option<(usize, Option<(usize, usize)>)> {
    let next = |i: usize| next_significant(tokens, i);
    let open_paren = next(index).filter(|&i| tokens[i].is_punct("("))?;
    let left_at = next(open_paren)?;
    let left = literal(&tokens[left_at])?;

    let mut op = String::new();
    let mut cursor = left_at;
    while let Some(i) = next(cursor).filter(|&i| tokens[i].is_punct("=") || tokens[i].is_punct("!")) {
        op.push_str(tokens[i].text);
        cursor = i;
    }
    let right_at = next(cursor)?;
    let right = literal(&tokens[right_at])?;
    let close_paren = next(right_at).filter(|&i| tokens[i].is_punct(")"))?;

    let equal = match (&left, &right) {
        (Literal::Str(a), Literal::Str(b)) => a == b,
        (Literal::Num(a), Literal::Num(b)) => a == b,
        _ if op.len() == 3 => false,
        _ => return None,
    };
    let truth = match op.as_str() {
        "==" | "===" => equal,
        "!=" | "!==" => !equal,
        _ => return None,
    };

    let then_open = next(close_paren).filter(|&i| tokens[i].is_punct("{"))?;
    let then_close = matching_brace(tokens, then_open)?;
    let mut end = then_close;
    let mut else_block = None;
    if let Some(else_at) = next(then_close).filter(|&i| tokens[i].is_ident("else")) {
        let else_open = next(else_at).filter(|&i| tokens[i].is_punct("{"))?;
        let else_close = matching_brace(tokens, else_open)?;
        else_block = Some((else_open, else_close));
        end = else_close;
    }
    let kept = if truth { Some((then_open, then_close)) } else { else_block };
    Some((end, kept))
}

/// Removes `if` statements whose condition compares two literals, keeping
/// only the branch that would run.
pub fn fold_constant_branches(code: &str) -> String {
    let tokens = tokenize(code);
    let mut out = String::with_capacity(code.len());
    let mut last = 0;
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i].is_ident("if") && !is_property_position(&tokens, i) {
            let after_else = prev_significant(&tokens, i).is_some_and(|p| tokens[p].is_ident("else"));
            if let Some((end, kept)) = constant_if(&tokens, i).filter(|_| !after_else) {
                out.push_str(&code[last..tokens[i].start]);
                if let Some((open, close)) = kept {
                    out.push_str(&fold_constant_branches(&code[tokens[open].start..tokens[close].end()]));
                }
                last = tokens[end].end();
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }
    out.push_str(&code[last..]);
    out
}

/// Short names in order: `a`..`z`, `A`..`Z`, then two letters and so on.
struct NameGenerator {
    next: usize,
}

impl NameGenerator {
    fn generate(&mut self, taken: &HashSet<&str>) -> String {
        const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
        loop {
            let mut n = self.next;
            self.next += 1;
            let mut name = String::new();
            loop {
                name.insert(0, ALPHABET[n % ALPHABET.len()] as char);
                n /= ALPHABET.len();
                if n == 0 {
                    break;
                }
                n -= 1;
            }
            if !taken.contains(name.as_str()) && !KEYWORDS.contains(&name.as_str()) {
                return name;
            }
        }
    }
}

/// `(open brace, close brace, parameter names)` of every outermost function,
/// i.e. one not inside another function body. In a chunk these are the module
/// factories.
fn top_level_functions<'a>(tokens: &[Token<'a>]) -> Vec<(usize, usize, Vec<&'a str>)> {
    let mut functions = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        if token.is_punct("{") {
            depth += 1;
        } else if token.is_punct("}") {
            depth = depth.saturating_sub(1);
        } else if depth == 0 && token.is_ident("function") {
            let Some(params_open) = (i + 1..tokens.len()).find(|&k| tokens[k].is_punct("(")) else {
                break;
            };
            let mut params = Vec::new();
            let mut k = params_open + 1;
            while k < tokens.len() && !tokens[k].is_punct(")") {
                if tokens[k].kind == TokenKind::Ident {
                    params.push(tokens[k].text);
                }
                k += 1;
            }
            let Some(open) = (k..tokens.len()).find(|&k| tokens[k].is_punct("{")) else {
                break;
            };
            let Some(close) = matching_brace(tokens, open) else {
                break;
            };
            functions.push((open, close, params));
            i = close + 1;
            continue;
        }
        i += 1;
    }
    functions
}

/// Renames variables and functions declared directly in the body of each
/// outermost function. For chunk code that shortens the module-scope
/// bindings of every factory; globals and parameters keep their names.
pub fn mangle(code: &str, reserved: &[String]) -> String {
    let tokens = tokenize(code);
    let taken: HashSet<&str> = tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Ident)
        .map(|t| t.text)
        .chain(reserved.iter().map(|s| s.as_str()))
        .collect();
    let mut renames: HashMap<usize, String> = HashMap::new();

    for (open, close, params) in top_level_functions(&tokens) {
        let body = &tokens[open + 1..close];
        if body.iter().any(|t| t.is_ident("eval") || t.is_ident("with") || t.is_ident("class")) {
            log::warn!("Not mangling function at byte {}: uses eval, with or class", tokens[open].start);
            continue;
        }

        let mut depth = 0usize;
        let mut declared: Vec<&str> = Vec::new();
        for (offset, token) in body.iter().enumerate() {
            match token.text {
                "{" | "(" | "[" if token.kind == TokenKind::Punct => depth += 1,
                "}" | ")" | "]" if token.kind == TokenKind::Punct => depth = depth.saturating_sub(1),
                _ if depth == 0 => declared.extend(declaration_at(&tokens, open + 1 + offset)),
                _ => {}
            }
        }

        let templates: Vec<&str> = body.iter().filter(|t| t.kind == TokenKind::Template).map(|t| t.text).collect();
        let shorthand: HashSet<&str> = (open + 1..close)
            .filter(|&i| tokens[i].kind == TokenKind::Ident && is_shorthand_like(&tokens, i))
            .map(|i| tokens[i].text)
            .collect();

        let mut generator = NameGenerator { next: 0 };
        let mut mapping: HashMap<&str, String> = HashMap::new();
        for name in declared {
            if mapping.contains_key(name)
                || params.contains(&name)
                || reserved.iter().any(|r| r == name)
                || shorthand.contains(name)
                || templates.iter().any(|t| t.contains(name))
            {
                continue;
            }
            mapping.insert(name, generator.generate(&taken));
        }

        for i in open + 1..close {
            let token = &tokens[i];
            if token.kind != TokenKind::Ident || is_property_position(&tokens, i) {
                continue;
            }
            if let Some(new_name) = mapping.get(token.text) {
                renames.insert(i, new_name.clone());
            }
        }
    }

    let mut out = String::with_capacity(code.len());
    for (i, token) in tokens.iter().enumerate() {
        match renames.get(&i) {
            Some(name) => out.push_str(name),
            None => out.push_str(token.text),
        }
    }
    out
}

/// Identifiers in a position where renaming could change an object key:
/// `{ a }`, `{ a, b }`, and method shorthand `{ a() {} }`.
fn is_shorthand_like(tokens: &[Token<'_>], index: usize) -> bool {
    let prev = prev_significant(tokens, index).map(|i| &tokens[i]);
    let next = next_significant(tokens, index).map(|i| &tokens[i]);
    let after_open = prev.is_some_and(|t| t.is_punct("{") || t.is_punct(",") || t.is_ident("get") || t.is_ident("set"));
    let before_close = next.is_some_and(|t| t.is_punct("}") || t.is_punct(",") || t.is_punct("("));
    after_open && before_close
}

fn needs_space(prev: &str, next: &str) -> bool {
    let (Some(a), Some(b)) = (prev.chars().last(), next.chars().next()) else {
        return false;
    };
    (is_ident_char(a) && is_ident_char(b))
        || (a == '+' && b == '+')
        || (a == '-' && b == '-')
        || (a.is_ascii_digit() && b == '.')
        || (a == '/' && b == '/')
}

fn drops_newline(prev: &str, next: &str) -> bool {
    matches!(prev, "{" | ";" | "," | "(" | "[") || matches!(next, "}" | ")" | "]" | ";" | ",")
}

/// Strips comments (except `/*!` notices) and collapses whitespace. Line
/// breaks are kept wherever automatic semicolon insertion could depend on
/// them.
pub fn compact(code: &str) -> String {
    #[derive(PartialEq)]
    enum Gap {
        None,
        Space,
        Newline,
    }

    let tokens = tokenize(code);
    let mut out = String::with_capacity(code.len());
    let mut prev: Option<&str> = None;
    let mut gap = Gap::None;

    for token in &tokens {
        match token.kind {
            TokenKind::Whitespace | TokenKind::LineComment => {
                let newline = token.kind == TokenKind::LineComment || token.text.contains('\n');
                if newline {
                    gap = Gap::Newline;
                } else if gap == Gap::None {
                    gap = Gap::Space;
                }
                continue;
            }
            TokenKind::BlockComment if !token.text.starts_with("/*!") => {
                if token.text.contains('\n') {
                    gap = Gap::Newline;
                } else if gap == Gap::None {
                    gap = Gap::Space;
                }
                continue;
            }
            _ => {}
        }

        if let Some(prev) = prev {
            match gap {
                Gap::Newline if !drops_newline(prev, token.text) => out.push('\n'),
                Gap::Newline | Gap::Space if needs_space(prev, token.text) => out.push(' '),
                _ => {}
            }
        }
        out.push_str(token.text);
        prev = Some(token.text);
        gap = Gap::None;
    }
    out
}
