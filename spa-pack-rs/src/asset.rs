use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Closed set of module kinds. Rule patterns are mapped onto these once, when
/// the configuration is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Script,
    Template,
    Style,
    Binary,
    Other,
}

impl AssetKind {
    /// Binary modules are read as bytes, everything else as UTF-8 text.
    pub fn is_binary(self) -> bool {
        self == Self::Binary
    }
}

/// Pattern selecting the modules a transform rule applies to.
#[derive(Debug, Clone)]
pub enum PathMatcher {
    /// A literal extension such as `.vue`.
    Extension(String),
    Regex(Regex),
}

impl PathMatcher {
    /// Strings starting with `.` and containing only word characters after it
    /// are extensions; anything else is compiled as a regular expression.
    pub fn parse(pattern: &str) -> Result<Self, regex::Error> {
        let is_extension = pattern.len() > 1
            && pattern.starts_with('.')
            && pattern[1..]
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if is_extension {
            Ok(Self::Extension(pattern.to_ascii_lowercase()))
        } else {
            Ok(Self::Regex(Regex::new(pattern)?))
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        match self {
            Self::Extension(ext) => path.to_ascii_lowercase().ends_with(ext.as_str()),
            Self::Regex(re) => re.is_match(&path),
        }
    }
}

/// MIME type used for `data:` URIs and dev server responses.
pub fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "js" => "application/javascript",
        "css" => "text/css",
        "html" => "text/html",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_matcher() {
        let matcher = PathMatcher::parse(".vue").unwrap();
        assert!(matches!(matcher, PathMatcher::Extension(_)));
        assert!(matcher.matches(Path::new("/src/App.VUE")));
        assert!(!matcher.matches(Path::new("/src/App.vue.js")));
    }

    #[test]
    fn test_regex_matcher() {
        let matcher = PathMatcher::parse(r"\.(css|less)$").unwrap();
        assert!(matches!(matcher, PathMatcher::Regex(_)));
        assert!(matcher.matches(Path::new("/src/main.less")));
        assert!(matcher.matches(Path::new("/src/App.vue?style-0.css")));
        assert!(!matcher.matches(Path::new("/src/main.js")));
    }

    #[test]
    fn test_mime_type() {
        assert_eq!(mime_type(Path::new("logo.PNG")), "image/png");
        assert_eq!(mime_type(Path::new("blob")), "application/octet-stream");
    }
}
