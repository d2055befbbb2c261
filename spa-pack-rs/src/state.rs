//! Mutable build state handed to the post-graph plugin hooks.

use std::collections::HashSet;

use crate::chunk::Chunk;
use crate::environment::BuildEnvironment;
use crate::graph::{ModuleGraph, ModuleId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    Script,
    Style,
    Html,
    Binary,
    SourceMap,
}

impl OutputKind {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Script => "js",
            Self::Style => "css",
            Self::Html => "html",
            Self::Binary => "",
            Self::SourceMap => "map",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputContent {
    Text(String),
    Bytes(Vec<u8>),
}

impl OutputContent {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Bytes(bytes) => bytes,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Bytes(_) => None,
        }
    }
}

/// Where an asset lands: `path` is relative to the output root, `url` is
/// relative to the public path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileName {
    pub path: String,
    pub url: String,
}

/// One file of the build output. Chunk assets carry the chunk name and get a
/// `file_name` from the emitter; binaries and the HTML shell are named by
/// whoever creates them.
#[derive(Debug, Clone)]
pub struct OutputAsset {
    pub kind: OutputKind,
    pub name: String,
    pub content: OutputContent,
    pub file_name: Option<FileName>,
}

impl OutputAsset {
    pub fn chunk(kind: OutputKind, chunk: &str, text: String) -> Self {
        Self {
            kind,
            name: chunk.to_string(),
            content: OutputContent::Text(text),
            file_name: None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.content.as_text()
    }

    /// Public URL of a named asset.
    pub fn href(&self, public_path: &str) -> Option<String> {
        self.file_name
            .as_ref()
            .map(|file_name| format!("{public_path}{}", file_name.url))
    }
}

pub struct BuildState {
    pub environment: BuildEnvironment,
    pub public_path: String,
    pub graph: ModuleGraph,
    pub chunks: Vec<Chunk>,
    /// Style modules whose CSS lives in the chunk stylesheet instead of being
    /// injected at runtime.
    pub extracted_styles: HashSet<ModuleId>,
    /// Modules inlined into their single importer.
    pub concatenated: HashSet<ModuleId>,
    pub assets: Vec<OutputAsset>,
}

impl BuildState {
    pub fn new(environment: BuildEnvironment, public_path: String, graph: ModuleGraph, chunks: Vec<Chunk>) -> Self {
        Self {
            environment,
            public_path,
            graph,
            chunks,
            extracted_styles: HashSet::new(),
            concatenated: HashSet::new(),
            assets: Vec::new(),
        }
    }

    pub fn chunk_asset(&self, kind: OutputKind, chunk: &str) -> Option<&OutputAsset> {
        self.assets.iter().find(|asset| asset.kind == kind && asset.name == chunk)
    }
}
