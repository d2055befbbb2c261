use super::{Plugin, PluginResult};
use crate::render::style_text;
use crate::state::{BuildState, OutputAsset, OutputKind};

/// Moves the CSS of every chunk into one stylesheet per chunk, keeping the
/// chunk's module order.
pub struct ExtractStylePlugin;

impl Plugin for ExtractStylePlugin {
    fn name(&self) -> &'static str {
        "extract-style"
    }

    fn post_split(&self, state: &mut BuildState) -> PluginResult {
        for chunk in &state.chunks {
            let mut sheets = Vec::new();
            for &id in &chunk.members {
                if let Some(css) = style_text(&state.graph, id, &state.public_path) {
                    state.extracted_styles.insert(id);
                    if !css.trim().is_empty() {
                        sheets.push(css);
                    }
                }
            }
            if sheets.is_empty() {
                continue;
            }
            log::debug!("Extracted {} style modules from `{}`", sheets.len(), chunk.name);
            state
                .assets
                .push(OutputAsset::chunk(OutputKind::Style, &chunk.name, sheets.join("\n")));
        }
        Ok(())
    }
}
