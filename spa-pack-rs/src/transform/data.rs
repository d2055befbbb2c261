use super::{Content, ModuleSource, TransformContext, Transformer, TransformerId};
use crate::error::{BuildError, Result};
use crate::text::{js_string_literal, strip_bom, transform_json_source};

fn take_text(source: &mut ModuleSource, ctx: &TransformContext<'_>, id: TransformerId) -> Result<String> {
    let content = std::mem::replace(&mut source.content, Content::Text(String::new()));
    let kind = content.describe();
    content
        .into_text()
        .ok_or_else(|| BuildError::transform(ctx.path, id.as_str(), format!("expected UTF-8 text, got {kind}")))
}

/// Exports the parsed JSON document.
#[derive(Debug)]
pub struct JsonTransformer;

impl Transformer for JsonTransformer {
    fn id(&self) -> TransformerId {
        TransformerId::Json
    }

    fn transform(&self, mut source: ModuleSource, ctx: &TransformContext<'_>) -> Result<ModuleSource> {
        let text = take_text(&mut source, ctx, self.id())?;
        let json = strip_bom(&text);
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| BuildError::transform(ctx.path, self.id().as_str(), err.to_string()))?;
        source.content = Content::Script(transform_json_source(json));
        Ok(source)
    }
}

/// Exports the file contents as a string.
#[derive(Debug)]
pub struct RawTransformer;

impl Transformer for RawTransformer {
    fn id(&self) -> TransformerId {
        TransformerId::Raw
    }

    fn transform(&self, mut source: ModuleSource, ctx: &TransformContext<'_>) -> Result<ModuleSource> {
        let text = take_text(&mut source, ctx, self.id())?;
        source.content = Content::Script(format!("module.exports = {};", js_string_literal(strip_bom(&text))));
        Ok(source)
    }
}
