use base64::Engine as _;
use serde::Deserialize;

use super::{AssetOutput, Content, ModuleSource, TransformContext, Transformer, TransformerId};
use crate::asset::mime_type;
use crate::emit::{content_hash, FileNameTemplate};
use crate::error::{BuildError, Result};

pub const DEFAULT_INLINE_LIMIT: usize = 8192;
pub const DEFAULT_ASSET_NAME: &str = "images/[name].[hash:8].[ext]";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UrlOptions {
    /// Files smaller than this many bytes are inlined as data URIs.
    pub limit: usize,
    pub name: String,
}

impl Default for UrlOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_INLINE_LIMIT,
            name: DEFAULT_ASSET_NAME.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct UrlTransformer {
    limit: usize,
    name: FileNameTemplate,
}

impl UrlTransformer {
    pub fn new(options: UrlOptions) -> std::result::Result<Self, String> {
        Ok(Self {
            limit: options.limit,
            name: FileNameTemplate::parse(&options.name)?,
        })
    }
}

impl Transformer for UrlTransformer {
    fn id(&self) -> TransformerId {
        TransformerId::Url
    }

    fn transform(&self, mut source: ModuleSource, ctx: &TransformContext<'_>) -> Result<ModuleSource> {
        let bytes = match std::mem::replace(&mut source.content, Content::Bytes(Vec::new())) {
            Content::Bytes(bytes) => bytes,
            Content::Text(text) => text.into_bytes(),
            other => {
                return Err(BuildError::transform(
                    ctx.path,
                    self.id().as_str(),
                    format!("expected file contents, got {}", other.describe()),
                ))
            }
        };

        let output = if bytes.len() < self.limit {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
            AssetOutput::Inline {
                data_uri: format!("data:{};base64,{encoded}", mime_type(ctx.path)),
            }
        } else {
            let stem = ctx.path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
            let ext = ctx.path.extension().map(|s| s.to_string_lossy()).unwrap_or_default();
            let file_name = self.name.render(&stem, &ext, &content_hash(&bytes));
            log::debug!("emitting {} as {}", ctx.path.display(), file_name.path);
            AssetOutput::File {
                path: file_name.path,
                url: file_name.url,
                bytes,
            }
        };
        source.content = Content::Asset(output);
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetKind;
    use crate::environment::BuildEnvironment;
    use rstest::rstest;
    use std::path::Path;

    fn run(limit: usize, bytes: &[u8]) -> AssetOutput {
        let path = Path::new("/src/img/logo.png");
        let ctx = TransformContext {
            path,
            kind: AssetKind::Binary,
            environment: BuildEnvironment::Production,
            parse_references: true,
        };
        let transformer = UrlTransformer::new(UrlOptions {
            limit,
            ..Default::default()
        })
        .unwrap();
        let out = transformer
            .transform(ModuleSource::new(Content::Bytes(bytes.to_vec())), &ctx)
            .unwrap();
        match out.content {
            Content::Asset(asset) => asset,
            other => panic!("unexpected content {}", other.describe()),
        }
    }

    #[rstest]
    #[case(5, true)]
    #[case(4, false)]
    #[case(0, false)]
    fn test_inline_below_limit_only(#[case] limit: usize, #[case] inline: bool) {
        let asset = run(limit, b"\x89PNG");
        assert_eq!(matches!(asset, AssetOutput::Inline { .. }), inline);
    }

    #[test]
    fn test_inline_data_uri() {
        match run(8192, b"abc") {
            AssetOutput::Inline { data_uri } => assert_eq!(data_uri, "data:image/png;base64,YWJj"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_file_name_uses_content_hash() {
        match run(2, b"abc") {
            AssetOutput::File { path, url, bytes } => {
                // sha256("abc") = ba7816bf...
                assert_eq!(path, "images/logo.ba7816bf.png");
                assert_eq!(url, path);
                assert_eq!(bytes, b"abc");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
