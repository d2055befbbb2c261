use std::collections::{HashMap, HashSet};

use super::{Plugin, PluginResult};
use crate::graph::{ModuleGraph, ModuleId, ModuleOutput};
use crate::state::BuildState;
use crate::transform::{placeholder, ReferenceKind};

/// Inlines modules that have exactly one static importer in the same chunk
/// into that importer, saving a factory function per module.
pub struct ConcatenateModulesPlugin;

fn in_cycle(graph: &ModuleGraph, id: ModuleId) -> bool {
    let mut stack: Vec<ModuleId> = graph.dependencies(id).collect();
    let mut seen = HashSet::new();
    while let Some(next) = stack.pop() {
        if next == id {
            return true;
        }
        if seen.insert(next) {
            stack.extend(graph.dependencies(next));
        }
    }
    false
}

/// Why `id` cannot be inlined, or `None` when it can.
fn ineligible(graph: &ModuleGraph, chunk_of: &HashMap<ModuleId, usize>, id: ModuleId) -> Option<&'static str> {
    if !graph.module(id).is_script() {
        return Some("not a script");
    }
    if graph.is_root(id) {
        return Some("chunk root");
    }
    let importers = graph.importers(id);
    let [(importer, index)] = importers.as_slice() else {
        return Some("more than one importer");
    };
    let reference = &graph.module(*importer).references[*index];
    if reference.conditional || reference.kind != ReferenceKind::Import {
        return Some("conditionally imported");
    }
    if chunk_of.get(importer) != chunk_of.get(&id) {
        return Some("importer in another chunk");
    }
    let ModuleOutput::Script(code) = &graph.module(*importer).output else {
        return Some("importer is not a script");
    };
    if code.matches(&format!("__spa_require__({})", placeholder(*index))).count() != 1 {
        return Some("import site is not unique");
    }
    if in_cycle(graph, id) {
        return Some("part of a cycle");
    }
    None
}

impl Plugin for ConcatenateModulesPlugin {
    fn name(&self) -> &'static str {
        "concatenate-modules"
    }

    fn post_split(&self, state: &mut BuildState) -> PluginResult {
        let chunk_of: HashMap<ModuleId, usize> = state
            .chunks
            .iter()
            .enumerate()
            .flat_map(|(index, chunk)| chunk.members.iter().map(move |&id| (id, index)))
            .collect();

        for id in 0..state.graph.len() {
            match ineligible(&state.graph, &chunk_of, id) {
                None => {
                    state.concatenated.insert(id);
                }
                Some(reason) if state.graph.module(id).is_script() => {
                    log::debug!("Not concatenating {}: {reason}", state.graph.module(id).display_name());
                }
                Some(_) => {}
            }
        }
        log::info!("Concatenated {} modules into their importers", state.concatenated.len());
        Ok(())
    }
}
