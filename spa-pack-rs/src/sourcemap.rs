//! Source maps for development scripts.
//!
//! Development chunks are neither minified nor concatenated, so every module
//! body sits on a known run of lines in the chunk. Each generated line is
//! mapped to the closest matching line of the module's source file; lines a
//! transformer rewrote fall back to the next unmatched source line.
//! Columns are not tracked.

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::graph::{ModuleGraph, ModuleId};
use crate::state::{FileName, OutputAsset, OutputContent, OutputKind};

/// How far ahead of the last matched source line a generated line is searched.
const ALIGN_WINDOW: usize = 50;

/// Prefix of the `sources` entries; paths below it are relative to the context.
pub const SOURCE_ROOT: &str = "spa-pack:///";

/// Generated lines of one module factory body inside a rendered chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleSpan {
    pub id: ModuleId,
    /// Zero-based line of the chunk where the body starts.
    pub first_line: usize,
    pub line_count: usize,
}

/// A version 3 source map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    pub version: u8,
    pub file: String,
    pub sources: Vec<String>,
    pub sources_content: Vec<String>,
    pub names: Vec<String>,
    pub mappings: String,
}

/// Appends the base64 VLQ encoding of `value` to `out`.
pub fn encode_vlq(value: i64, out: &mut String) {
    let digits = base64::alphabet::STANDARD.as_str().as_bytes();
    let mut rest = if value < 0 { ((-value) << 1) | 1 } else { value << 1 };
    loop {
        let mut digit = (rest & 0b1_1111) as usize;
        rest >>= 5;
        if rest > 0 {
            digit |= 0b10_0000;
        }
        out.push(digits[digit] as char);
        if rest == 0 {
            break;
        }
    }
}

/// For every generated line, the source line it came from.
pub fn align_lines(generated: &[&str], source: &[&str]) -> Vec<usize> {
    if source.is_empty() {
        return Vec::new();
    }
    let last = source.len() - 1;
    let mut cursor = 0;
    generated
        .iter()
        .map(|line| {
            let wanted = line.trim();
            let found = (!wanted.is_empty())
                .then(|| {
                    source[cursor.min(last)..]
                        .iter()
                        .take(ALIGN_WINDOW)
                        .position(|candidate| candidate.trim() == wanted)
                        .map(|offset| cursor.min(last) + offset)
                })
                .flatten();
            let mapped = found.unwrap_or(cursor.min(last));
            cursor = mapped + 1;
            mapped
        })
        .collect()
}

/// File a module was read from; sub-resources point at their container.
fn source_file(path: &Path) -> &Path {
    let text = path.to_str().unwrap_or_default();
    match text.split_once('?') {
        Some((file, _)) => Path::new(file),
        None => path,
    }
}

fn source_name(file: &Path, context: &Path) -> String {
    let relative = file.strip_prefix(context).unwrap_or(file);
    let relative = relative.to_string_lossy().replace('\\', "/");
    format!("{SOURCE_ROOT}{}", relative.trim_start_matches('/'))
}

/// Builds the map of one rendered chunk. Modules whose source file can no
/// longer be read are left unmapped.
pub fn chunk_source_map(
    graph: &ModuleGraph,
    code: &str,
    spans: &[ModuleSpan],
    context: &Path,
    file: &str,
) -> SourceMap {
    let generated: Vec<&str> = code.lines().collect();
    let mut sources: Vec<String> = Vec::new();
    let mut sources_content = Vec::new();
    let mut line_sources: Vec<Option<(usize, usize)>> = vec![None; generated.len()];

    for span in spans {
        let module = graph.module(span.id);
        let source_path = source_file(&module.path);
        let name = source_name(source_path, context);
        let index = match sources.iter().position(|existing| *existing == name) {
            Some(index) => index,
            None => match fs::read_to_string(source_path) {
                Ok(text) => {
                    sources.push(name);
                    sources_content.push(text);
                    sources.len() - 1
                }
                Err(err) => {
                    log::debug!("No source map entry for {}: {err}", source_path.display());
                    continue;
                }
            },
        };
        let end = (span.first_line + span.line_count).min(generated.len());
        let Some(body) = generated.get(span.first_line..end) else { continue };
        let source_lines: Vec<&str> = sources_content[index].lines().collect();
        for (offset, line) in align_lines(body, &source_lines).into_iter().enumerate() {
            line_sources[span.first_line + offset] = Some((index, line));
        }
    }

    let mut mappings = String::new();
    let (mut previous_source, mut previous_line) = (0i64, 0i64);
    for (line, mapped) in line_sources.iter().enumerate() {
        if line > 0 {
            mappings.push(';');
        }
        let Some((source, source_line)) = *mapped else { continue };
        let (source, source_line) = (source as i64, source_line as i64);
        encode_vlq(0, &mut mappings);
        encode_vlq(source - previous_source, &mut mappings);
        encode_vlq(source_line - previous_line, &mut mappings);
        encode_vlq(0, &mut mappings);
        previous_source = source;
        previous_line = source_line;
    }

    SourceMap {
        version: 3,
        file: file.to_string(),
        sources,
        sources_content,
        names: Vec::new(),
        mappings,
    }
}

/// Last path segment of a file name, without any query.
fn base_name(url: &str) -> &str {
    let path = url.split_once('?').map_or(url, |(path, _)| path);
    path.rsplit('/').next().unwrap_or(path)
}

/// Writes a map next to every named chunk script and points the script at it.
/// `spans` holds the module spans of each chunk, by chunk name.
pub fn attach_source_maps(
    graph: &ModuleGraph,
    assets: &mut Vec<OutputAsset>,
    spans: &[(String, Vec<ModuleSpan>)],
    context: &Path,
) -> serde_json::Result<usize> {
    let mut maps = Vec::new();
    for asset in assets.iter_mut().filter(|asset| asset.kind == OutputKind::Script) {
        let Some((_, chunk_spans)) = spans.iter().find(|(name, _)| *name == asset.name) else { continue };
        let (Some(file_name), OutputContent::Text(code)) = (&asset.file_name, &mut asset.content) else {
            continue;
        };
        let script_file = base_name(&file_name.url).to_string();
        let map = chunk_source_map(graph, code, chunk_spans, context, &script_file);
        let url_path = file_name.url.split_once('?').map_or(file_name.url.as_str(), |(path, _)| path);
        let path = file_name.path.split_once('?').map_or(file_name.path.as_str(), |(path, _)| path);
        code.push_str(&format!("//# sourceMappingURL={script_file}.map\n"));
        maps.push(OutputAsset {
            kind: OutputKind::SourceMap,
            name: asset.name.clone(),
            content: OutputContent::Text(serde_json::to_string(&map)?),
            file_name: Some(FileName {
                path: format!("{path}.map"),
                url: format!("{url_path}.map"),
            }),
        });
    }
    let count = maps.len();
    assets.extend(maps);
    Ok(count)
}
