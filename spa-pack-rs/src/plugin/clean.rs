use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{Plugin, PluginError, PluginResult};
use crate::emit::check_paths;
use crate::graph::normalize_path;
use crate::state::BuildState;

/// `plugins.clean`: either a plain toggle or `{ "enabled", "dry", "verbose" }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "CleanSetting")]
pub struct CleanConfig {
    pub enabled: bool,
    /// Report what would be removed without touching anything.
    pub dry: bool,
    /// Log every removed entry at info level.
    pub verbose: bool,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dry: false,
            verbose: false,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CleanFields {
    enabled: bool,
    dry: bool,
    verbose: bool,
}

impl Default for CleanFields {
    fn default() -> Self {
        let defaults = CleanConfig::default();
        Self {
            enabled: defaults.enabled,
            dry: defaults.dry,
            verbose: defaults.verbose,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CleanSetting {
    Toggle(bool),
    Options(CleanFields),
}

impl From<CleanSetting> for CleanConfig {
    fn from(setting: CleanSetting) -> Self {
        match setting {
            CleanSetting::Toggle(enabled) => Self {
                enabled,
                ..Self::default()
            },
            CleanSetting::Options(fields) => Self {
                enabled: fields.enabled,
                dry: fields.dry,
                verbose: fields.verbose,
            },
        }
    }
}

/// Empties the output root right before the new files are written.
pub struct CleanPlugin {
    output_root: PathBuf,
    sandbox: PathBuf,
    config: CleanConfig,
}

impl CleanPlugin {
    pub fn new(output_root: &Path, sandbox: &Path, config: CleanConfig) -> Self {
        Self {
            output_root: output_root.to_path_buf(),
            sandbox: sandbox.to_path_buf(),
            config,
        }
    }
}

fn strictly_inside(path: &Path, root: &Path) -> bool {
    path != root && path.starts_with(root)
}

/// Removes everything inside `root`, but never `root` itself. Refuses unless
/// `root` lies strictly inside `sandbox`, both as written and after symlinks
/// are resolved. Returns the number of removed entries; with `dry` set they
/// are only counted.
pub fn clean_output_root(root: &Path, sandbox: &Path, config: CleanConfig) -> Result<usize, PluginError> {
    let (lexical_root, lexical_sandbox) = (normalize_path(root), normalize_path(sandbox));
    if !strictly_inside(&lexical_root, &lexical_sandbox) {
        return Err(PluginError::at(
            root,
            format!("refusing to clean a directory outside of `{}`", sandbox.display()),
        ));
    }
    if !root.exists() {
        return Ok(0);
    }
    let canonical_root = root.canonicalize().map_err(|err| PluginError::at(root, err.to_string()))?;
    let canonical_sandbox = sandbox
        .canonicalize()
        .map_err(|err| PluginError::at(sandbox, err.to_string()))?;
    if !strictly_inside(&canonical_root, &canonical_sandbox) {
        return Err(PluginError::at(
            root,
            format!("refusing to clean: resolves outside of `{}`", sandbox.display()),
        ));
    }

    let entries = fs::read_dir(&canonical_root).map_err(|err| PluginError::at(root, err.to_string()))?;
    let mut removed = 0;
    for entry in entries {
        let path = entry.map_err(|err| PluginError::at(root, err.to_string()))?.path();
        if config.verbose || config.dry {
            log::info!("{} {}", if config.dry { "Would remove" } else { "Removing" }, path.display());
        }
        if config.dry {
            removed += 1;
            continue;
        }
        let result = if path.is_dir() && !path.is_symlink() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        result.map_err(|err| PluginError::at(&path, err.to_string()))?;
        removed += 1;
    }
    Ok(removed)
}

impl Plugin for CleanPlugin {
    fn name(&self) -> &'static str {
        "clean"
    }

    fn pre_emit(&self, state: &mut BuildState) -> PluginResult {
        // Earlier pre-emit hooks may have added assets; a plan that cannot be
        // written must not cost the previous output.
        check_paths(&state.assets).map_err(|err| PluginError::at(&self.output_root, err.to_string()))?;
        let removed = clean_output_root(&self.output_root, &self.sandbox, self.config)?;
        if self.config.dry {
            log::info!("Dry run: {} entries of {} left in place", removed, self.output_root.display());
        } else {
            log::info!("Cleaned {} entries from {}", removed, self.output_root.display());
        }
        Ok(())
    }
}
