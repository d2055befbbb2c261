//! Module graph construction.
//!
//! The graph is discovered breadth-first from the entry points and the vendor
//! allow-list. Every level of the traversal is loaded and transformed in
//! parallel; results are merged back in discovery order so module ids and
//! reference targets are identical from one build to the next.

pub mod resolve;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use itertools::Itertools;
use rayon::prelude::*;
use regex::Regex;

use crate::asset::AssetKind;
use crate::environment::BuildEnvironment;
use crate::error::{BuildError, Result};
use crate::plugin::{ModuleContext, PluginPipeline};
use crate::text::strip_bom;
use crate::transform::{
    AssetOutput, Content, InlineSource, ModuleSource, Reference, TransformContext, TransformRegistry,
    TransformerId,
};

pub use resolve::{normalize_path, physical_path, Resolver};

pub type ModuleId = usize;

#[derive(Debug, Clone)]
pub enum ModuleOutput {
    Script(String),
    Style(String),
    Asset(AssetOutput),
}

#[derive(Debug, Clone)]
pub struct Module {
    pub id: ModuleId,
    /// Absolute path; sub-resources use `<file>?<name>`.
    pub path: PathBuf,
    pub kind: AssetKind,
    /// Transformers in application order.
    pub chain: Vec<TransformerId>,
    pub output: ModuleOutput,
    pub references: Vec<Reference>,
}

impl Module {
    pub fn is_script(&self) -> bool {
        matches!(self.output, ModuleOutput::Script(_))
    }

    pub fn is_style(&self) -> bool {
        matches!(self.output, ModuleOutput::Style(_))
    }

    pub fn display_name(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModuleGraph {
    /// Indexed by module id.
    pub modules: Vec<Module>,
    /// Entry name to root modules, in declaration order.
    pub entries: IndexMap<String, Vec<ModuleId>>,
    /// Roots of the vendor allow-list.
    pub vendor_roots: Vec<ModuleId>,
}

impl ModuleGraph {
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id]
    }

    /// Resolved targets of every reference of `id`, in reference order.
    pub fn dependencies(&self, id: ModuleId) -> impl Iterator<Item = ModuleId> + '_ {
        self.modules[id].references.iter().filter_map(|r| r.target)
    }

    /// `(importer, reference index)` pairs targeting `id`.
    pub fn importers(&self, id: ModuleId) -> Vec<(ModuleId, usize)> {
        self.modules
            .iter()
            .flat_map(|m| {
                m.references
                    .iter()
                    .enumerate()
                    .filter(move |(_, r)| r.target == Some(id))
                    .map(move |(index, _)| (m.id, index))
            })
            .collect()
    }

    pub fn by_path(&self, path: &Path) -> Option<ModuleId> {
        self.modules.iter().find(|m| m.path == path).map(|m| m.id)
    }

    pub fn is_root(&self, id: ModuleId) -> bool {
        self.vendor_roots.contains(&id) || self.entries.values().any(|roots| roots.contains(&id))
    }
}

struct Pending {
    id: ModuleId,
    path: PathBuf,
    inline: Option<InlineSource>,
}

/// A transformed module whose references are resolved to paths but not yet
/// to ids.
struct Loaded {
    module: Module,
    targets: Vec<(PathBuf, Option<InlineSource>)>,
}

pub struct GraphBuilder<'a> {
    registry: &'a TransformRegistry,
    resolver: &'a Resolver,
    plugins: &'a PluginPipeline,
    environment: BuildEnvironment,
    no_parse: &'a [Regex],
}

impl<'a> GraphBuilder<'a> {
    pub fn new(
        registry: &'a TransformRegistry,
        resolver: &'a Resolver,
        plugins: &'a PluginPipeline,
        environment: BuildEnvironment,
    ) -> Self {
        Self {
            registry,
            resolver,
            plugins,
            environment,
            no_parse: &[],
        }
    }

    /// Modules matching any of these patterns are not scanned for references.
    pub fn no_parse(mut self, patterns: &'a [Regex]) -> Self {
        self.no_parse = patterns;
        self
    }

    pub fn build(&self, entries: &IndexMap<String, Vec<String>>, vendor_allow_list: &[String]) -> Result<ModuleGraph> {
        let mut visited: HashMap<PathBuf, ModuleId> = HashMap::new();
        let mut queue: Vec<Pending> = Vec::new();
        let mut enqueue = |path: PathBuf, inline: Option<InlineSource>, queue: &mut Vec<Pending>| -> ModuleId {
            let next = visited.len();
            *visited.entry(path.clone()).or_insert_with(|| {
                queue.push(Pending { id: next, path, inline });
                next
            })
        };

        let mut graph = ModuleGraph::default();
        for (name, requests) in entries {
            let mut roots = Vec::with_capacity(requests.len());
            for request in requests {
                let path = self.resolver.resolve_root(request)?;
                roots.push(enqueue(path, None, &mut queue));
            }
            graph.entries.insert(name.clone(), roots);
        }
        for request in vendor_allow_list {
            let path = self.resolver.resolve_root(request)?;
            let id = enqueue(path, None, &mut queue);
            if !graph.vendor_roots.contains(&id) {
                graph.vendor_roots.push(id);
            }
        }

        let mut depth = 0;
        while !queue.is_empty() {
            let level = std::mem::take(&mut queue);
            log::debug!("Transforming {} modules at depth {depth}", level.len());
            let loaded = level
                .par_iter()
                .map(|pending| self.load(pending))
                .collect::<Result<Vec<_>>>()?;

            for Loaded { mut module, targets } in loaded {
                for (reference, (path, inline)) in module.references.iter_mut().zip(targets) {
                    reference.target = Some(enqueue(path, inline, &mut queue));
                }
                debug_assert_eq!(module.id, graph.modules.len());
                graph.modules.push(module);
            }
            depth += 1;
        }
        log::info!("Module graph has {} modules", graph.len());
        Ok(graph)
    }

    fn read_source(&self, pending: &Pending, kind: AssetKind) -> Result<Content> {
        if let Some(inline) = &pending.inline {
            return Ok(Content::Text(inline.content.clone()));
        }
        let bytes = fs::read(&pending.path).map_err(|err| BuildError::io(&pending.path, err))?;
        if kind.is_binary() {
            return Ok(Content::Bytes(bytes));
        }
        Ok(match String::from_utf8(bytes) {
            Ok(text) => Content::Text(strip_bom(&text).to_string()),
            Err(err) => Content::Bytes(err.into_bytes()),
        })
    }

    fn load(&self, pending: &Pending) -> Result<Loaded> {
        let path = pending.path.as_path();
        let chain = self.registry.resolve_chain(path)?;
        let mut source = ModuleSource::new(self.read_source(pending, chain.kind)?);

        let module_ctx = ModuleContext {
            path,
            kind: chain.kind,
            environment: self.environment,
        };
        self.plugins.pre_transform(&module_ctx, &mut source)?;

        let physical = physical_path(path).to_string_lossy().into_owned();
        let ctx = TransformContext {
            path,
            kind: chain.kind,
            environment: self.environment,
            parse_references: !self.no_parse.iter().any(|re| re.is_match(&physical)),
        };
        let mut source = chain.run(source, &ctx)?;
        self.plugins.post_transform(&module_ctx, &mut source)?;

        let output = match source.content {
            Content::Script(code) => ModuleOutput::Script(code),
            Content::Style(css) => ModuleOutput::Style(css),
            Content::Asset(asset) => ModuleOutput::Asset(asset),
            other => {
                let last = chain.applied_ids().last().map_or("none", |id| id.as_str());
                return Err(BuildError::transform(
                    path,
                    last,
                    format!("transform chain ended with {} instead of a script, style or asset", other.describe()),
                ));
            }
        };

        let mut targets = Vec::with_capacity(source.references.len());
        for reference in &source.references {
            let target = match &reference.inline {
                Some(inline) => {
                    let virtual_path = format!("{}?{}", physical, inline.name);
                    (PathBuf::from(virtual_path), Some(inline.clone()))
                }
                None => (self.resolver.resolve(path, &reference.request)?, None),
            };
            targets.push(target);
        }
        log::debug!(
            "{} [{}] -> {} references",
            path.display(),
            chain.applied_ids().iter().join(" <- "),
            targets.len()
        );

        Ok(Loaded {
            module: Module {
                id: pending.id,
                path: pending.path.clone(),
                kind: chain.kind,
                chain: chain.applied_ids(),
                output,
                references: source.references,
            },
            targets,
        })
    }
}
