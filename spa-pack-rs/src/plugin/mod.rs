//! Lifecycle hooks.
//!
//! Plugins are ordinary values implementing [`Plugin`]; each hook has a no-op
//! default so a plugin only overrides the points it cares about. The pipeline
//! invokes them in declaration order and turns any [`PluginError`] into a
//! fatal [`BuildError::PluginFailure`].

pub mod clean;
pub mod concat;
pub mod define;
pub mod extract_style;
pub mod html;
pub mod minify;
pub mod provide;

use std::fmt;
use std::path::{Path, PathBuf};

use crate::asset::AssetKind;
use crate::config::BuildConfig;
use crate::environment::BuildEnvironment;
use crate::error::{BuildError, Result};
use crate::state::BuildState;
use crate::transform::ModuleSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    PreTransform,
    PostTransform,
    PostSplit,
    OptimizeAssets,
    PreEmit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PreTransform => "pre-transform",
            Self::PostTransform => "post-transform",
            Self::PostSplit => "post-split",
            Self::OptimizeAssets => "optimize-assets",
            Self::PreEmit => "pre-emit",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginError {
    pub path: Option<PathBuf>,
    pub message: String,
}

impl PluginError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            path: None,
            message: message.into(),
        }
    }

    pub fn at(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            message: message.into(),
        }
    }
}

pub type PluginResult<T = ()> = std::result::Result<T, PluginError>;

/// The module a transform-time hook is looking at.
#[derive(Debug, Clone, Copy)]
pub struct ModuleContext<'a> {
    pub path: &'a Path,
    pub kind: AssetKind,
    pub environment: BuildEnvironment,
}

pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs before the module's transform chain, on the raw source.
    fn pre_transform(&self, _ctx: &ModuleContext<'_>, _source: &mut ModuleSource) -> PluginResult {
        Ok(())
    }

    /// Runs after the transform chain, before references are resolved.
    fn post_transform(&self, _ctx: &ModuleContext<'_>, _source: &mut ModuleSource) -> PluginResult {
        Ok(())
    }

    fn post_split(&self, _state: &mut BuildState) -> PluginResult {
        Ok(())
    }

    fn optimize_assets(&self, _state: &mut BuildState) -> PluginResult {
        Ok(())
    }

    fn pre_emit(&self, _state: &mut BuildState) -> PluginResult {
        Ok(())
    }
}

#[derive(Default)]
pub struct PluginPipeline {
    plugins: Vec<Box<dyn Plugin>>,
}

impl fmt::Debug for PluginPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl PluginPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    pub fn push(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// The built-in plugins enabled for `config`, in lifecycle order.
    pub fn for_config(config: &BuildConfig) -> Result<Self> {
        let environment = config.environment;
        let plugins = &config.plugins;
        let mut pipeline = Self::new();

        pipeline.push(Box::new(define::DefinePlugin::new(&plugins.define, environment)));
        if !plugins.provide.is_empty() {
            pipeline.push(Box::new(provide::ProvidePlugin::new(&plugins.provide, &config.resolver)?));
        }
        if plugins.extract_styles {
            pipeline.push(Box::new(extract_style::ExtractStylePlugin));
        }
        if environment.is_production() && plugins.concatenate_modules {
            pipeline.push(Box::new(concat::ConcatenateModulesPlugin));
        }
        if environment.is_production() {
            pipeline.push(Box::new(minify::MinifyPlugin::new(&plugins.minify)));
        }
        if let Some(html) = &plugins.html {
            pipeline.push(Box::new(html::HtmlPlugin::new(html, &config.context)?));
        }
        if environment.is_production() && plugins.clean.enabled {
            pipeline.push(Box::new(clean::CleanPlugin::new(
                &config.output_root,
                &config.context,
                plugins.clean,
            )));
        }
        log::debug!("Plugins for {environment}: {:?}", pipeline.names());
        Ok(pipeline)
    }

    fn failure(plugin: &dyn Plugin, stage: Stage, err: PluginError) -> BuildError {
        BuildError::PluginFailure {
            plugin: plugin.name(),
            stage,
            path: err.path,
            message: err.message,
        }
    }

    pub fn pre_transform(&self, ctx: &ModuleContext<'_>, source: &mut ModuleSource) -> Result<()> {
        for plugin in &self.plugins {
            plugin
                .pre_transform(ctx, source)
                .map_err(|err| Self::failure(plugin.as_ref(), Stage::PreTransform, err))?;
        }
        Ok(())
    }

    pub fn post_transform(&self, ctx: &ModuleContext<'_>, source: &mut ModuleSource) -> Result<()> {
        for plugin in &self.plugins {
            plugin
                .post_transform(ctx, source)
                .map_err(|err| Self::failure(plugin.as_ref(), Stage::PostTransform, err))?;
        }
        Ok(())
    }

    /// Runs one of the whole-build stages.
    pub fn run(&self, stage: Stage, state: &mut BuildState) -> Result<()> {
        log::info!("Running {stage} hooks");
        for plugin in &self.plugins {
            let result = match stage {
                Stage::PostSplit => plugin.post_split(state),
                Stage::OptimizeAssets => plugin.optimize_assets(state),
                Stage::PreEmit => plugin.pre_emit(state),
                Stage::PreTransform | Stage::PostTransform => Ok(()),
            };
            result.map_err(|err| Self::failure(plugin.as_ref(), stage, err))?;
        }
        Ok(())
    }
}
