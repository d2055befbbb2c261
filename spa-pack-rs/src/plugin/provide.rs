use std::path::PathBuf;

use indexmap::IndexMap;

use super::{ModuleContext, Plugin, PluginResult};
use crate::error::Result;
use crate::graph::{physical_path, Resolver};
use crate::lexer::{declared_names, is_property_position, tokenize, TokenKind};
use crate::transform::{Content, ModuleSource, Reference};

/// Binds free identifiers to modules, e.g. `$` to `jquery`, by injecting an
/// import into every script that uses the identifier without declaring it.
pub struct ProvidePlugin {
    /// `(identifier, resolved module path)`
    bindings: Vec<(String, PathBuf)>,
}

impl ProvidePlugin {
    pub fn new(provide: &IndexMap<String, String>, resolver: &Resolver) -> Result<Self> {
        let bindings = provide
            .iter()
            .map(|(ident, request)| Ok((ident.clone(), resolver.resolve_root(request)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { bindings })
    }

    fn uses_free(code: &str, ident: &str) -> bool {
        let tokens = tokenize(code);
        if declared_names(&tokens).contains(&ident) {
            return false;
        }
        tokens
            .iter()
            .enumerate()
            .any(|(i, t)| t.kind == TokenKind::Ident && t.text == ident && !is_property_position(&tokens, i))
    }
}

impl Plugin for ProvidePlugin {
    fn name(&self) -> &'static str {
        "provide"
    }

    fn post_transform(&self, ctx: &ModuleContext<'_>, source: &mut ModuleSource) -> PluginResult {
        let Content::Script(code) = &source.content else {
            return Ok(());
        };
        let module_file = physical_path(ctx.path);
        let needed: Vec<&(String, PathBuf)> = self
            .bindings
            .iter()
            .filter(|(ident, path)| *path != module_file && Self::uses_free(code, ident))
            .collect();

        let mut prelude = String::new();
        for (ident, path) in needed {
            log::debug!("Providing `{ident}` to {}", ctx.path.display());
            let token = source.add_reference(Reference::import(path.display().to_string()));
            prelude.push_str(&format!("var {ident} = __spa_require__({token});\n"));
        }
        if !prelude.is_empty() {
            if let Content::Script(code) = &mut source.content {
                code.insert_str(0, &prelude);
            }
        }
        Ok(())
    }
}
