use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;

use crate::chunk::{self, Chunk};
use crate::config::BuildConfig;
use crate::emit::{Emitter, NamingPolicy};
use crate::environment::BuildEnvironment;
use crate::error::{BuildError, Result};
use crate::graph::{GraphBuilder, ModuleOutput};
use crate::plugin::{PluginPipeline, Stage};
use crate::render::render_chunk_with_spans;
use crate::sourcemap::attach_source_maps;
use crate::state::{BuildState, FileName, OutputAsset, OutputContent, OutputKind};
use crate::transform::AssetOutput;

/// What a finished build produced.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub environment: BuildEnvironment,
    /// Every written file, in emit order.
    pub files: Vec<PathBuf>,
    pub chunks: Vec<Chunk>,
}

/// Runs one build from a validated configuration.
///
/// Everything up to the pre-emit hooks happens in memory, so a failing build
/// leaves the previous output untouched unless the clean plugin already ran.
pub struct Builder {
    config: BuildConfig,
}

impl Builder {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn build(&self) -> Result<BuildReport> {
        let started = Instant::now();
        let config = &self.config;
        let environment = config.environment;
        log::info!(
            "Building {} entries for {environment} into {}",
            config.entries.len(),
            config.output_root.display()
        );

        let plugins = PluginPipeline::for_config(config)?;
        let graph = GraphBuilder::new(&config.registry, &config.resolver, &plugins, environment)
            .no_parse(&config.no_parse)
            .build(&config.entries, &config.chunk_policy.vendor_allow_list)?;

        let chunks = chunk::split(&graph, &config.chunk_policy)?;
        let mut state = BuildState::new(environment, config.public_path.clone(), graph, chunks);
        plugins.run(Stage::PostSplit, &mut state)?;

        let mut scripts = Vec::with_capacity(state.chunks.len());
        let mut spans = Vec::with_capacity(state.chunks.len());
        for chunk in &state.chunks {
            let (code, modules) = render_chunk_with_spans(&state, chunk);
            scripts.push(OutputAsset::chunk(OutputKind::Script, &chunk.name, code));
            spans.push((chunk.name.clone(), modules));
        }
        state.assets.extend(scripts);
        let files = emitted_files(&state);
        state.assets.extend(files);
        plugins.run(Stage::OptimizeAssets, &mut state)?;

        let emitter = Emitter::new(config.output_root.clone(), config.output_names.clone());
        emitter.name_assets(&mut state.assets, NamingPolicy::for_environment(environment))?;
        // Production scripts are rewritten after rendering, so only development
        // line spans still hold.
        if config.source_maps && !environment.is_production() {
            let maps = attach_source_maps(&state.graph, &mut state.assets, &spans, &config.context)
                .map_err(|err| BuildError::Config(format!("source map: {err}")))?;
            log::debug!("Attached {maps} source maps");
        }
        plugins.run(Stage::PreEmit, &mut state)?;
        let files = emitter.emit(&state.assets)?;

        log::info!(
            "Wrote {} files in {} chunks in {:.2?}",
            files.len(),
            state.chunks.len(),
            started.elapsed()
        );
        Ok(BuildReport {
            environment,
            files,
            chunks: state.chunks,
        })
    }
}

/// Binary modules that were too large to inline. Their names were fixed by
/// the url transformer.
fn emitted_files(state: &BuildState) -> Vec<OutputAsset> {
    state
        .graph
        .modules
        .iter()
        .filter_map(|module| match &module.output {
            ModuleOutput::Asset(AssetOutput::File { path, url, bytes }) => Some(OutputAsset {
                kind: OutputKind::Binary,
                name: module.display_name(),
                content: OutputContent::Bytes(bytes.clone()),
                file_name: Some(FileName {
                    path: path.clone(),
                    url: url.clone(),
                }),
            }),
            _ => None,
        })
        .collect()
}
