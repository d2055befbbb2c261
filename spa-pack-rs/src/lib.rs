#![doc = include_str!("../README.md")]

pub mod asset;
pub mod builder;
pub mod chunk;
pub mod config;
pub mod emit;
pub mod environment;
pub mod error;
pub mod graph;
pub mod lexer;
pub mod plugin;
pub mod render;
pub mod sourcemap;
pub mod state;
pub mod text;
pub mod transform;

pub use builder::{BuildReport, Builder};
pub use chunk::{Chunk, ChunkKind, ChunkPolicy, MinReferenceCount};
pub use config::{BuildConfig, DevServerConfig, PathPattern, ProxyRule, DEFAULT_CONFIG_FILE};
pub use environment::BuildEnvironment;
pub use error::{BuildError, Result};
pub use plugin::{Plugin, PluginPipeline, Stage};
pub use serde_json;
