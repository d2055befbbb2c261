//! Partitioning of the module graph into output chunks.

use std::collections::HashSet;
use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{BuildError, Result};
use crate::graph::{ModuleGraph, ModuleId};

pub const DEFAULT_VENDOR_CHUNK: &str = "vendor";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Vendor,
    Entry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub name: String,
    pub kind: ChunkKind,
    /// Modules executed when the chunk loads, in declaration order.
    pub entry_modules: Vec<ModuleId>,
    /// Every module of the chunk, dependencies before dependents.
    pub members: Vec<ModuleId>,
    /// Threshold that moved shared modules into this chunk, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_reference_count: Option<usize>,
}

/// How many entry chunks must reach a module before it moves to the vendor
/// chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MinReferenceCount {
    Count(usize),
    /// Every entry.
    All,
    /// Never extract automatically.
    #[default]
    Never,
}

impl MinReferenceCount {
    pub fn threshold(self, entry_count: usize) -> Option<usize> {
        match self {
            Self::Count(n) => Some(n.max(1)),
            Self::All => Some(entry_count.max(1)),
            Self::Never => None,
        }
    }
}

impl Serialize for MinReferenceCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Count(n) => serializer.serialize_u64(*n as u64),
            Self::All => serializer.serialize_str("all"),
            Self::Never => serializer.serialize_str("never"),
        }
    }
}

impl<'de> Deserialize<'de> for MinReferenceCount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct CountVisitor;

        impl Visitor<'_> for CountVisitor {
            type Value = MinReferenceCount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a positive integer, \"all\" or \"never\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Self::Value, E> {
                Ok(MinReferenceCount::Count(v as usize))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Self::Value, E> {
                usize::try_from(v)
                    .map(MinReferenceCount::Count)
                    .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
                match v.to_ascii_lowercase().as_str() {
                    "all" => Ok(MinReferenceCount::All),
                    "never" | "infinity" => Ok(MinReferenceCount::Never),
                    _ => Err(E::invalid_value(de::Unexpected::Str(v), &self)),
                }
            }
        }

        deserializer.deserialize_any(CountVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChunkPolicy {
    pub name: String,
    pub vendor_allow_list: Vec<String>,
    pub min_reference_count: MinReferenceCount,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            name: DEFAULT_VENDOR_CHUNK.to_string(),
            vendor_allow_list: Vec::new(),
            min_reference_count: MinReferenceCount::default(),
        }
    }
}

/// Post-order walk from `roots`: every module appears after its
/// dependencies. Modules in `stop` or already `seen` are not entered.
fn post_order(
    graph: &ModuleGraph,
    roots: &[ModuleId],
    stop: &HashSet<ModuleId>,
    seen: &mut HashSet<ModuleId>,
) -> Vec<ModuleId> {
    let mut order = Vec::new();
    // (module, next dependency index)
    let mut stack: Vec<(ModuleId, usize)> = Vec::new();
    for &root in roots {
        if stop.contains(&root) || !seen.insert(root) {
            continue;
        }
        stack.push((root, 0));
        while let Some((id, next)) = stack.last_mut() {
            let deps = &graph.module(*id).references;
            let dep = deps[*next..].iter().position(|r| {
                r.target
                    .is_some_and(|t| !stop.contains(&t) && !seen.contains(&t))
            });
            match dep {
                Some(offset) => {
                    let target = deps[*next + offset].target.unwrap_or(*id);
                    *next += offset + 1;
                    seen.insert(target);
                    stack.push((target, 0));
                }
                None => {
                    order.push(*id);
                    stack.pop();
                }
            }
        }
    }
    order
}

fn closure(graph: &ModuleGraph, roots: &[ModuleId]) -> HashSet<ModuleId> {
    post_order(graph, roots, &HashSet::new(), &mut HashSet::new())
        .into_iter()
        .collect()
}

/// Splits `graph` into a vendor chunk (when non-empty) followed by one chunk
/// per entry in declaration order.
pub fn split(graph: &ModuleGraph, policy: &ChunkPolicy) -> Result<Vec<Chunk>> {
    let mut vendor = closure(graph, &graph.vendor_roots);
    let mut extracted: Vec<ModuleId> = Vec::new();
    let threshold = policy.min_reference_count.threshold(graph.entries.len());

    if let Some(threshold) = threshold {
        let max_rounds = graph.len() + 1;
        let mut converged = false;
        for round in 0..max_rounds {
            let mut counts = vec![0usize; graph.len()];
            for roots in graph.entries.values() {
                for id in post_order(graph, roots, &vendor, &mut HashSet::new()) {
                    counts[id] += 1;
                }
            }
            let moved: Vec<ModuleId> = (0..graph.len())
                .filter(|id| !vendor.contains(id) && counts[*id] >= threshold)
                .collect();
            if moved.is_empty() {
                log::debug!("Chunk split settled after {round} rounds");
                converged = true;
                break;
            }
            log::debug!("Moving {} shared modules to `{}`", moved.len(), policy.name);
            vendor.extend(closure(graph, &moved));
            extracted.extend(moved);
        }
        if !converged {
            return Err(BuildError::ChunkSplitNonConvergence { iterations: max_rounds });
        }
    }

    let mut chunks = Vec::with_capacity(graph.entries.len() + 1);
    let mut assigned: HashSet<ModuleId> = HashSet::new();

    if !vendor.is_empty() {
        let mut roots = graph.vendor_roots.clone();
        roots.extend(extracted.iter().copied());
        let outside: HashSet<ModuleId> = (0..graph.len()).filter(|id| !vendor.contains(id)).collect();
        let members = post_order(graph, &roots, &outside, &mut assigned);
        chunks.push(Chunk {
            name: policy.name.clone(),
            kind: ChunkKind::Vendor,
            entry_modules: Vec::new(),
            members,
            min_reference_count: threshold.filter(|_| !extracted.is_empty()),
        });
    }

    for (name, roots) in &graph.entries {
        let members = post_order(graph, roots, &HashSet::new(), &mut assigned);
        chunks.push(Chunk {
            name: name.clone(),
            kind: ChunkKind::Entry,
            entry_modules: roots.clone(),
            members,
            min_reference_count: None,
        });
    }

    debug_assert_eq!(assigned.len(), graph.len());
    for chunk in &chunks {
        log::info!("Chunk `{}`: {} modules", chunk.name, chunk.members.len());
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetKind;
    use crate::graph::{Module, ModuleOutput};
    use crate::transform::Reference;
    use rstest::rstest;
    use std::path::PathBuf;

    /// Builds a graph from `(deps)` per module; entries name their roots.
    fn graph(deps: &[&[ModuleId]], entries: &[(&str, &[ModuleId])], vendor: &[ModuleId]) -> ModuleGraph {
        let modules = deps
            .iter()
            .enumerate()
            .map(|(id, targets)| Module {
                id,
                path: PathBuf::from(format!("/m{id}.js")),
                kind: AssetKind::Script,
                chain: Vec::new(),
                output: ModuleOutput::Script(String::new()),
                references: targets
                    .iter()
                    .map(|t| Reference {
                        target: Some(*t),
                        ..Reference::import(format!("./m{t}"))
                    })
                    .collect(),
            })
            .collect();
        ModuleGraph {
            modules,
            entries: entries.iter().map(|(n, r)| (n.to_string(), r.to_vec())).collect(),
            vendor_roots: vendor.to_vec(),
        }
    }

    fn policy(min: MinReferenceCount) -> ChunkPolicy {
        ChunkPolicy {
            min_reference_count: min,
            ..Default::default()
        }
    }

    fn members(chunks: &[Chunk]) -> Vec<(&str, Vec<ModuleId>)> {
        chunks.iter().map(|c| (c.name.as_str(), c.members.clone())).collect()
    }

    #[test]
    fn test_members_in_evaluation_order() {
        // 0 -> 1 -> 2, 0 -> 3
        let g = graph(&[&[1, 3], &[2], &[], &[]], &[("app", &[0])], &[]);
        let chunks = split(&g, &ChunkPolicy::default()).unwrap();
        assert_eq!(members(&chunks), vec![("app", vec![2, 1, 3, 0])]);
    }

    #[test]
    fn test_vendor_allow_list_closure() {
        // app: 0 -> {1, 2}; vendor root 2 -> 3
        let g = graph(&[&[1, 2], &[], &[3], &[]], &[("app", &[0])], &[2]);
        let chunks = split(&g, &ChunkPolicy::default()).unwrap();
        assert_eq!(members(&chunks), vec![("vendor", vec![3, 2]), ("app", vec![1, 0])]);
        assert_eq!(chunks[0].kind, ChunkKind::Vendor);
    }

    #[rstest]
    #[case(MinReferenceCount::Count(2), vec![("vendor", vec![3, 2]), ("a", vec![0]), ("b", vec![1])])]
    #[case(MinReferenceCount::All, vec![("vendor", vec![3, 2]), ("a", vec![0]), ("b", vec![1])])]
    #[case(MinReferenceCount::Count(3), vec![("a", vec![3, 2, 0]), ("b", vec![1])])]
    #[case(MinReferenceCount::Never, vec![("a", vec![3, 2, 0]), ("b", vec![1])])]
    fn test_shared_module_extraction(
        #[case] min: MinReferenceCount,
        #[case] expected: Vec<(&str, Vec<ModuleId>)>,
    ) {
        // a: 0 -> 2 -> 3; b: 1 -> 2
        let g = graph(&[&[2], &[2], &[3], &[]], &[("a", &[0]), ("b", &[1])], &[]);
        let chunks = split(&g, &policy(min)).unwrap();
        assert_eq!(members(&chunks), expected);
    }

    #[test]
    fn test_every_module_in_exactly_one_chunk() {
        // Cycle 1 <-> 2 shared by both entries, plus a private module each.
        let g = graph(&[&[2, 4], &[2], &[1], &[1, 5], &[], &[]], &[("a", &[0]), ("b", &[3])], &[]);
        for min in [MinReferenceCount::Never, MinReferenceCount::Count(2)] {
            let chunks = split(&g, &policy(min)).unwrap();
            let mut all: Vec<ModuleId> = chunks.iter().flat_map(|c| c.members.clone()).collect();
            all.sort();
            assert_eq!(all, vec![0, 1, 2, 3, 4, 5]);
        }
    }

    #[test]
    fn test_policy_deserialization() {
        let policy: ChunkPolicy =
            serde_json::from_str(r#"{"vendorAllowList": ["jquery"], "minReferenceCount": 2}"#).unwrap();
        assert_eq!(policy.name, "vendor");
        assert_eq!(policy.min_reference_count, MinReferenceCount::Count(2));
        let policy: ChunkPolicy = serde_json::from_str(r#"{"minReferenceCount": "Infinity"}"#).unwrap();
        assert_eq!(policy.min_reference_count, MinReferenceCount::Never);
        assert!(serde_json::from_str::<ChunkPolicy>(r#"{"minReferenceCount": "some"}"#).is_err());
    }
}
