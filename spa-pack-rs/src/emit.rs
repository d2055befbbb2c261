//! Output naming and writing.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::environment::BuildEnvironment;
use crate::error::{BuildError, Result};
use crate::state::{FileName, OutputAsset, OutputKind};

/// Hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Name,
    Ext,
    Hash(Option<usize>),
}

/// A file name pattern such as `[name].[chunkhash:8].bundle.js`.
///
/// `[hash]` and `[chunkhash]` are the same thing here: the digest of the bytes
/// being named. Everything from the first `?` on is kept in the URL only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNameTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl FileNameTemplate {
    pub fn parse(template: &str) -> std::result::Result<Self, String> {
        if template.trim().is_empty() {
            return Err("file name template is empty".to_string());
        }
        let mut segments = Vec::new();
        let mut rest = template;
        while let Some(open) = rest.find('[') {
            let close = rest[open..]
                .find(']')
                .map(|i| open + i)
                .ok_or_else(|| format!("unterminated token in `{template}`"))?;
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let token = &rest[open + 1..close];
            let segment = match token.split_once(':') {
                None => match token {
                    "name" => Segment::Name,
                    "ext" => Segment::Ext,
                    "hash" | "chunkhash" => Segment::Hash(None),
                    _ => return Err(format!("unknown token `[{token}]` in `{template}`")),
                },
                Some(("hash" | "chunkhash", len)) => {
                    let len = len
                        .parse::<usize>()
                        .ok()
                        .filter(|len| (1..=64).contains(len))
                        .ok_or_else(|| format!("invalid hash length in `[{token}]`"))?;
                    Segment::Hash(Some(len))
                }
                Some(_) => return Err(format!("unknown token `[{token}]` in `{template}`")),
            };
            segments.push(segment);
            rest = &rest[close + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        Ok(Self {
            raw: template.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn has_hash(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Hash(_)))
    }

    /// True when a hash token lands in the file path, not only in the `?`
    /// query part of the URL.
    pub fn path_has_hash(&self) -> bool {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) if text.contains('?') => return false,
                Segment::Hash(_) => return true,
                _ => {}
            }
        }
        false
    }

    pub fn render(&self, name: &str, ext: &str, hash: &str) -> FileName {
        let mut url = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => url.push_str(text),
                Segment::Name => url.push_str(name),
                Segment::Ext => url.push_str(ext),
                Segment::Hash(None) => url.push_str(hash),
                Segment::Hash(Some(len)) => url.push_str(&hash[..(*len).min(hash.len())]),
            }
        }
        let path = url.split('?').next().unwrap_or_default().to_string();
        FileName { path, url }
    }
}

impl fmt::Display for FileNameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingPolicy {
    /// Names depend only on the chunk name.
    Fixed,
    /// Names embed a digest of the content.
    ContentHash,
}

impl NamingPolicy {
    pub fn for_environment(environment: BuildEnvironment) -> Self {
        if environment.is_production() {
            Self::ContentHash
        } else {
            Self::Fixed
        }
    }
}

/// Chunk naming templates, one pair per policy. The vendor chunk's script
/// has its own pair.
#[derive(Debug, Clone)]
pub struct OutputNames {
    pub filename: FileNameTemplate,
    pub hashed_filename: FileNameTemplate,
    pub style_filename: FileNameTemplate,
    pub hashed_style_filename: FileNameTemplate,
    pub vendor_chunk: String,
    pub vendor_filename: FileNameTemplate,
    pub hashed_vendor_filename: FileNameTemplate,
}

impl OutputNames {
    fn template(&self, kind: OutputKind, policy: NamingPolicy, chunk: &str) -> Option<&FileNameTemplate> {
        let vendor = chunk == self.vendor_chunk;
        match (kind, policy) {
            (OutputKind::Script, NamingPolicy::Fixed) if vendor => Some(&self.vendor_filename),
            (OutputKind::Script, NamingPolicy::ContentHash) if vendor => Some(&self.hashed_vendor_filename),
            (OutputKind::Script, NamingPolicy::Fixed) => Some(&self.filename),
            (OutputKind::Script, NamingPolicy::ContentHash) => Some(&self.hashed_filename),
            (OutputKind::Style, NamingPolicy::Fixed) => Some(&self.style_filename),
            (OutputKind::Style, NamingPolicy::ContentHash) => Some(&self.hashed_style_filename),
            _ => None,
        }
    }
}

/// Fails when two named assets with different content would be written to
/// the same path. Identical binaries referenced from several places share
/// one file.
pub fn check_paths(assets: &[OutputAsset]) -> Result<()> {
    let mut planned: HashMap<&str, &OutputAsset> = HashMap::new();
    for asset in assets {
        let Some(file_name) = &asset.file_name else {
            continue;
        };
        match planned.get(file_name.path.as_str()) {
            Some(previous) if previous.content != asset.content => {
                return Err(BuildError::Config(format!(
                    "assets `{}` and `{}` would both be written to `{}`",
                    previous.name, asset.name, file_name.path
                )));
            }
            Some(_) => {}
            None => {
                planned.insert(&file_name.path, asset);
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Emitter {
    output_root: PathBuf,
    names: OutputNames,
}

impl Emitter {
    pub fn new(output_root: impl Into<PathBuf>, names: OutputNames) -> Self {
        Self {
            output_root: output_root.into(),
            names,
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Names every chunk asset that has no name yet, then checks that the
    /// whole output plan is free of path collisions.
    pub fn name_assets(&self, assets: &mut [OutputAsset], policy: NamingPolicy) -> Result<()> {
        for asset in assets.iter_mut().filter(|asset| asset.file_name.is_none()) {
            let template = self.names.template(asset.kind, policy, &asset.name).ok_or_else(|| {
                BuildError::Config(format!("no file name template for {:?} asset `{}`", asset.kind, asset.name))
            })?;
            let hash = content_hash(asset.content.as_bytes());
            let file_name = template.render(&asset.name, asset.kind.extension(), &hash);
            log::debug!("{} -> {}", asset.name, file_name.url);
            asset.file_name = Some(file_name);
        }
        check_paths(assets)
    }

    /// Writes all assets below the output root and returns the written paths.
    /// Nothing is written unless every asset is named and no two collide.
    pub fn emit(&self, assets: &[OutputAsset]) -> Result<Vec<PathBuf>> {
        if let Some(unnamed) = assets.iter().find(|asset| asset.file_name.is_none()) {
            return Err(BuildError::Config(format!(
                "asset `{}` was never assigned a file name",
                unnamed.name
            )));
        }
        check_paths(assets)?;

        let mut written: HashSet<&str> = HashSet::new();
        let mut files = Vec::with_capacity(assets.len());
        for asset in assets {
            let Some(file_name) = &asset.file_name else {
                continue;
            };
            if !written.insert(&file_name.path) {
                continue;
            }

            let path = self.output_root.join(&file_name.path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|err| BuildError::io(parent, err))?;
            }
            fs::write(&path, asset.content.as_bytes()).map_err(|err| BuildError::io(&path, err))?;
            files.push(path);
        }
        log::info!("Wrote {} files to {}", files.len(), self.output_root.display());
        Ok(files)
    }
}
