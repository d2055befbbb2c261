use indexmap::IndexMap;

use super::{ModuleContext, Plugin, PluginResult};
use crate::asset::AssetKind;
use crate::environment::BuildEnvironment;
use crate::lexer::{prev_significant, tokenize, Token, TokenKind};
use crate::transform::template::map_script_blocks;
use crate::transform::{Content, ModuleSource};

pub const NODE_ENV_KEY: &str = "process.env.NODE_ENV";

/// Replaces compile-time constants such as `process.env.NODE_ENV` with their
/// JSON literal.
pub struct DefinePlugin {
    /// Dotted key split into segments, longest keys first.
    definitions: Vec<(Vec<String>, String)>,
}

impl DefinePlugin {
    pub fn new(define: &IndexMap<String, serde_json::Value>, environment: BuildEnvironment) -> Self {
        let mut values: IndexMap<String, String> = IndexMap::new();
        values.insert(NODE_ENV_KEY.to_string(), format!("\"{}\"", environment.as_str()));
        for (key, value) in define {
            values.insert(key.clone(), value.to_string());
        }
        let mut definitions: Vec<(Vec<String>, String)> = values
            .into_iter()
            .map(|(key, value)| (key.split('.').map(|s| s.trim().to_string()).collect(), value))
            .collect();
        definitions.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { definitions }
    }

    pub fn apply(&self, code: &str) -> String {
        let tokens = tokenize(code);
        let mut out = String::with_capacity(code.len());
        let mut last = 0;
        let mut i = 0;
        while i < tokens.len() {
            let member_access = prev_significant(&tokens, i).is_some_and(|p| tokens[p].is_punct("."));
            if tokens[i].kind == TokenKind::Ident && !member_access {
                if let Some((len, value)) = self
                    .definitions
                    .iter()
                    .find_map(|(segments, value)| match_key(&tokens, i, segments).map(|len| (len, value)))
                {
                    out.push_str(&code[last..tokens[i].start]);
                    out.push_str(value);
                    last = tokens[i + len - 1].end();
                    i += len;
                    continue;
                }
            }
            i += 1;
        }
        out.push_str(&code[last..]);
        out
    }
}

/// Number of tokens spanned when the dotted key starts at `index`.
fn match_key(tokens: &[Token<'_>], index: usize, segments: &[String]) -> Option<usize> {
    for (n, segment) in segments.iter().enumerate() {
        let at = index + 2 * n;
        if n > 0 && !tokens.get(at - 1)?.is_punct(".") {
            return None;
        }
        if !tokens.get(at)?.is_ident(segment) {
            return None;
        }
    }
    Some(2 * segments.len() - 1)
}

impl Plugin for DefinePlugin {
    fn name(&self) -> &'static str {
        "define"
    }

    fn pre_transform(&self, ctx: &ModuleContext<'_>, source: &mut ModuleSource) -> PluginResult {
        let Content::Text(text) = &source.content else {
            return Ok(());
        };
        let replaced = match ctx.kind {
            AssetKind::Script => self.apply(text),
            AssetKind::Template => map_script_blocks(text, |script| self.apply(script)),
            _ => return Ok(()),
        };
        source.content = Content::Text(replaced);
        Ok(())
    }
}
