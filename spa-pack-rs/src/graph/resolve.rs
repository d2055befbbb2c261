//! Request resolution: aliases, relative paths, `node_modules` packages,
//! extension probing and directory index files.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{BuildError, Result};

/// Package manifest fields consulted for a package's entry file, in order.
const PACKAGE_MAIN_FIELDS: &[&str] = &["browser", "module", "main"];

/// Lexically normalizes `path`, folding `.` and `..` components.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Splits a virtual sub-resource path (`<file>?<name>`) into the file part.
pub fn physical_path(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    match text.split_once('?') {
        Some((file, _)) => PathBuf::from(file),
        None => path.to_path_buf(),
    }
}

#[derive(Debug, Clone)]
pub struct Resolver {
    context: PathBuf,
    extensions: Vec<String>,
    /// `(key, target)`; a key ending in `$` only matches exactly.
    alias: Vec<(String, String)>,
}

impl Resolver {
    pub fn new(context: impl Into<PathBuf>, extensions: Vec<String>, alias: Vec<(String, String)>) -> Self {
        Self {
            context: context.into(),
            extensions,
            alias,
        }
    }

    pub fn context(&self) -> &Path {
        &self.context
    }

    /// Resolves a request written in the configuration (entries, allow-list,
    /// provided modules) against the context directory.
    pub fn resolve_root(&self, request: &str) -> Result<PathBuf> {
        self.resolve_in(&self.context, &self.context, request)
    }

    /// Resolves a request made by the module at `requester`.
    pub fn resolve(&self, requester: &Path, request: &str) -> Result<PathBuf> {
        let file = physical_path(requester);
        let dir = file.parent().unwrap_or(&self.context).to_path_buf();
        self.resolve_in(&dir, requester, request)
    }

    fn apply_alias(&self, request: &str) -> String {
        for (key, target) in &self.alias {
            if let Some(exact) = key.strip_suffix('$') {
                if request == exact {
                    return target.clone();
                }
            } else if request == key {
                return target.clone();
            } else if let Some(rest) = request.strip_prefix(key.as_str()) {
                if rest.starts_with('/') {
                    return format!("{target}{rest}");
                }
            }
        }
        request.to_string()
    }

    fn resolve_in(&self, dir: &Path, requester: &Path, request: &str) -> Result<PathBuf> {
        let aliased = self.apply_alias(request);
        let not_found = |path: PathBuf| BuildError::ModuleNotFound {
            requester: requester.to_path_buf(),
            request: request.to_string(),
            path,
        };

        if is_relative_request(&aliased) || Path::new(&aliased).is_absolute() {
            let candidate = normalize_path(&dir.join(&aliased));
            return self.probe(&candidate).ok_or_else(|| not_found(candidate));
        }

        let (package, subpath) = split_package_request(&aliased);
        let mut first_attempt = None;
        for ancestor in dir.ancestors() {
            let package_dir = ancestor.join("node_modules").join(package);
            first_attempt.get_or_insert_with(|| package_dir.clone());
            if !package_dir.is_dir() {
                continue;
            }
            let found = match subpath {
                Some(subpath) => self.probe(&package_dir.join(subpath)),
                None => self.package_entry(&package_dir),
            };
            if let Some(found) = found {
                return Ok(found);
            }
        }
        Err(not_found(
            first_attempt.unwrap_or_else(|| dir.join("node_modules").join(package)),
        ))
    }

    fn package_entry(&self, package_dir: &Path) -> Option<PathBuf> {
        let manifest = fs::read_to_string(package_dir.join("package.json"))
            .ok()
            .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok());
        if let Some(manifest) = manifest {
            for field in PACKAGE_MAIN_FIELDS {
                if let Some(main) = manifest.get(*field).and_then(|v| v.as_str()) {
                    if let Some(found) = self.probe(&normalize_path(&package_dir.join(main))) {
                        return Some(found);
                    }
                }
            }
        }
        self.probe_index(package_dir)
    }

    /// Tries the path itself, then with each configured extension, then as a
    /// directory with an index file.
    fn probe(&self, path: &Path) -> Option<PathBuf> {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        for ext in &self.extensions {
            let mut candidate = path.as_os_str().to_owned();
            candidate.push(ext);
            let candidate = PathBuf::from(candidate);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        if path.is_dir() {
            return self.probe_index(path);
        }
        None
    }

    fn probe_index(&self, dir: &Path) -> Option<PathBuf> {
        self.extensions
            .iter()
            .map(|ext| dir.join(format!("index{ext}")))
            .find(|candidate| candidate.is_file())
    }
}

fn is_relative_request(request: &str) -> bool {
    request == "." || request == ".." || request.starts_with("./") || request.starts_with("../")
}

/// `lodash/fp` -> (`lodash`, `fp`); `@scope/pkg/x` -> (`@scope/pkg`, `x`).
fn split_package_request(request: &str) -> (&str, Option<&str>) {
    let mut slashes = request.match_indices('/').map(|(i, _)| i);
    let split = if request.starts_with('@') {
        slashes.nth(1)
    } else {
        slashes.next()
    };
    match split {
        Some(i) => (&request[..i], Some(&request[i + 1..])),
        None => (request, None),
    }
}
