//! Chunk rendering.
//!
//! Every chunk script starts with the module runtime, which installs itself
//! once as a global shared by all chunks of the page, then registers each
//! member module with `__spa__.define`. Entry chunks finish by requiring their
//! root modules.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::chunk::{Chunk, ChunkKind};
use crate::graph::{Module, ModuleGraph, ModuleId, ModuleOutput};
use crate::sourcemap::ModuleSpan;
use crate::state::BuildState;
use crate::text::js_string_literal;
use crate::transform::{placeholder, AssetOutput, ReferenceKind};

lazy_static! {
    static ref PLACEHOLDER_RE: Regex = Regex::new(r"__spa_ref_(\d+)__").unwrap();
}

pub const RUNTIME: &str = r#"var __spa__ = (function (g) {
  if (g.__spa__) return g.__spa__;
  var factories = {};
  var cache = {};
  function require(id) {
    var cached = cache[id];
    if (cached) return cached.exports;
    var factory = factories[id];
    if (!factory) throw new Error("Module " + id + " is not defined");
    var module = (cache[id] = { id: id, exports: {} });
    factory.call(module.exports, module, module.exports, require);
    return module.exports;
  }
  return (g.__spa__ = {
    define: function (id, factory) {
      factories[id] = factory;
    },
    require: require,
    interop: function (m) {
      return m && m.__esModule ? m["default"] : m;
    },
    exportStar: function (target, source) {
      for (var key in source) {
        if (key !== "default" && !Object.prototype.hasOwnProperty.call(target, key)) target[key] = source[key];
      }
    },
    style: function (css) {
      if (typeof document === "undefined") return;
      var el = document.createElement("style");
      el.appendChild(document.createTextNode(css));
      document.head.appendChild(el);
    }
  });
})(typeof self !== "undefined" ? self : this);
"#;

/// Public URL of an asset module, or its data URI when inlined.
pub fn asset_href(graph: &ModuleGraph, id: ModuleId, public_path: &str) -> Option<String> {
    match &graph.module(id).output {
        ModuleOutput::Asset(AssetOutput::Inline { data_uri }) => Some(data_uri.clone()),
        ModuleOutput::Asset(AssetOutput::File { url, .. }) => Some(format!("{public_path}{url}")),
        _ => None,
    }
}

/// Replaces reference placeholders in `text`: imports become module ids,
/// urls become hrefs.
pub fn substitute_references(graph: &ModuleGraph, module: &Module, text: &str, public_path: &str) -> String {
    PLACEHOLDER_RE
        .replace_all(text, |caps: &Captures| {
            let reference = caps[1].parse::<usize>().ok().and_then(|i| module.references.get(i));
            match reference.and_then(|r| r.target.map(|t| (r.kind, t))) {
                Some((ReferenceKind::Url, target)) => {
                    asset_href(graph, target, public_path).unwrap_or_else(|| target.to_string())
                }
                Some((ReferenceKind::Import, target)) => target.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// CSS of a style module with its urls resolved.
pub fn style_text(graph: &ModuleGraph, id: ModuleId, public_path: &str) -> Option<String> {
    let module = graph.module(id);
    match &module.output {
        ModuleOutput::Style(css) => Some(substitute_references(graph, module, css, public_path)),
        _ => None,
    }
}

/// The inline form of a concatenated module at its import site.
fn inline_module(body: &str) -> String {
    format!(
        "(function (module) {{\nvar exports = module.exports;\n{}\nreturn module.exports;\n}})({{ exports: {{}} }})",
        body.trim_end()
    )
}

/// Factory body of one module.
pub fn render_module(state: &BuildState, id: ModuleId) -> String {
    let graph = &state.graph;
    let module = graph.module(id);
    match &module.output {
        ModuleOutput::Script(code) => {
            let mut code = code.clone();
            for (index, reference) in module.references.iter().enumerate() {
                let Some(target) = reference.target else { continue };
                if state.concatenated.contains(&target) {
                    let site = format!("__spa_require__({})", placeholder(index));
                    code = code.replacen(&site, &inline_module(&render_module(state, target)), 1);
                }
            }
            substitute_references(graph, module, &code, &state.public_path)
        }
        ModuleOutput::Style(_) => {
            let mut out = String::new();
            for reference in &module.references {
                if let (ReferenceKind::Import, Some(target)) = (reference.kind, reference.target) {
                    out.push_str(&format!("__spa_require__({target});\n"));
                }
            }
            if state.extracted_styles.contains(&id) {
                out.push_str("/* extracted */");
            } else {
                let css = style_text(graph, id, &state.public_path).unwrap_or_default();
                out.push_str(&format!("__spa__.style({});", js_string_literal(&css)));
            }
            out
        }
        ModuleOutput::Asset(_) => {
            let href = asset_href(graph, id, &state.public_path).unwrap_or_default();
            format!("module.exports = {};", js_string_literal(&href))
        }
    }
}

pub fn render_chunk(state: &BuildState, chunk: &Chunk) -> String {
    render_chunk_with_spans(state, chunk).0
}

/// Renders a chunk and records on which lines each module body landed.
pub fn render_chunk_with_spans(state: &BuildState, chunk: &Chunk) -> (String, Vec<ModuleSpan>) {
    let mut out = String::from(RUNTIME);
    let mut line = RUNTIME.matches('\n').count();
    let mut spans = Vec::with_capacity(chunk.members.len());
    for &id in &chunk.members {
        if state.concatenated.contains(&id) {
            continue;
        }
        let body = render_module(state, id);
        let body = body.trim_end();
        let line_count = body.matches('\n').count() + 1;
        spans.push(ModuleSpan {
            id,
            first_line: line + 1,
            line_count,
        });
        out.push_str(&format!(
            "__spa__.define({id}, function (module, exports, __spa_require__) {{\n{body}\n}});\n"
        ));
        line += line_count + 2;
    }
    if chunk.kind == ChunkKind::Entry {
        for id in &chunk.entry_modules {
            out.push_str(&format!("__spa__.require({id});\n"));
        }
    }
    (out, spans)
}
