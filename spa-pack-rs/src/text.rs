//! Text utilities shared by the transformers and the chunk renderer.
//!
//! Provides BOM stripping, JavaScript string literal escaping and
//! JSON-to-module transformation.

/// Strips the UTF-8 BOM (byte order mark) from the beginning of text if present.
///
/// The BOM is U+FEFF (0xEF 0xBB 0xBF in UTF-8) and is sometimes present at the
/// start of files.
pub fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{FEFF}').unwrap_or(text)
}

/// Transforms JSON source code into a module body that exports the parsed JSON.
///
/// # Example
/// ```ignore
/// // Input: {"key": "value"}
/// // Output: module.exports = JSON.parse("{\"key\": \"value\"}");
/// ```
pub fn transform_json_source(source: &str) -> String {
    format!("module.exports = JSON.parse({});", js_string_literal(source))
}

/// Wraps `s` in double quotes, escaped for a JavaScript string literal.
pub fn js_string_literal(s: &str) -> String {
    format!("\"{}\"", escape_js_string(s))
}

/// Escapes a string for safe embedding in a JavaScript string literal.
///
/// Handles quotes, backslashes, control characters, and `</` so the result can
/// also sit inside an inline `<script>` element.
pub fn escape_js_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut prev = '\0';
    for c in s.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            '\u{2028}' => result.push_str("\\u2028"),
            '\u{2029}' => result.push_str("\\u2029"),
            '/' if prev == '<' => result.push_str("\\/"),
            // Control characters (U+0000 to U+001F)
            c if c < '\x20' => {
                result.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => result.push(c),
        }
        prev = c;
    }
    result
}
