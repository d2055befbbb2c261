use std::path::{Path, PathBuf};

use crate::plugin::Stage;

/// Fatal build errors. Every variant names the module or path involved and the
/// stage that failed.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("No transform rule matches `{}`", path.display())]
    UnmatchedAssetType { path: PathBuf },

    #[error("Module `{request}` requested by `{}` was not found (resolved to `{}`)", requester.display(), path.display())]
    ModuleNotFound {
        requester: PathBuf,
        request: String,
        path: PathBuf,
    },

    #[error("Transformer `{transformer}` failed on `{}`: {message}", path.display())]
    Transform {
        path: PathBuf,
        transformer: String,
        message: String,
    },

    #[error("Plugin `{plugin}` failed during {stage}{}: {message}", path.as_ref().map(|p| format!(" on `{}`", p.display())).unwrap_or_default())]
    PluginFailure {
        plugin: &'static str,
        stage: Stage,
        path: Option<PathBuf>,
        message: String,
    },

    #[error("Chunk splitting did not converge after {iterations} rounds")]
    ChunkSplitNonConvergence { iterations: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error on `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn transform(
        path: impl AsRef<Path>,
        transformer: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transform {
            path: path.as_ref().to_path_buf(),
            transformer: transformer.into(),
            message: message.into(),
        }
    }
}

pub type Result<T, E = BuildError> = std::result::Result<T, E>;
