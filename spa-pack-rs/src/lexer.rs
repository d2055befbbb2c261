//! Minimal JavaScript tokenizer.
//!
//! Good enough to tell code apart from strings, comments, template literals
//! and regular expression literals, which is all the token-level rewrites in
//! this crate need. It never fails: unterminated constructs run to the end of
//! the input.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Whitespace,
    LineComment,
    BlockComment,
    Ident,
    Number,
    Str,
    Template,
    Regex,
    Punct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub start: usize,
}

impl<'a> Token<'a> {
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }

    /// Whitespace and comments.
    pub fn is_trivia(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Whitespace | TokenKind::LineComment | TokenKind::BlockComment
        )
    }

    pub fn is_ident(&self, name: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == name
    }

    pub fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == punct
    }
}

const REGEX_PRECEDING_KEYWORDS: &[&str] = &[
    "return",
    "typeof",
    "instanceof",
    "in",
    "of",
    "new",
    "delete",
    "void",
    "throw",
    "case",
    "do",
    "else",
    "yield",
    "await",
];

pub fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || !c.is_ascii()
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$' || !c.is_ascii()
}

pub fn tokenize(src: &str) -> Vec<Token<'_>> {
    let mut tokens: Vec<Token<'_>> = Vec::new();
    let bytes = src.as_bytes();
    let mut pos = 0;

    while pos < src.len() {
        let start = pos;
        let c = match src[pos..].chars().next() {
            Some(c) => c,
            None => break,
        };

        let kind = if c.is_whitespace() {
            pos += c.len_utf8();
            while let Some(c) = src[pos..].chars().next() {
                if !c.is_whitespace() {
                    break;
                }
                pos += c.len_utf8();
            }
            TokenKind::Whitespace
        } else if src[pos..].starts_with("//") {
            pos = src[pos..].find('\n').map_or(src.len(), |i| pos + i);
            TokenKind::LineComment
        } else if src[pos..].starts_with("/*") {
            pos = src[pos + 2..].find("*/").map_or(src.len(), |i| pos + 2 + i + 2);
            TokenKind::BlockComment
        } else if c == '"' || c == '\'' {
            pos = scan_quoted(bytes, pos, bytes[pos]);
            TokenKind::Str
        } else if c == '`' {
            pos = scan_template(bytes, pos);
            TokenKind::Template
        } else if c == '/' && regex_allowed(&tokens) {
            pos = scan_regex(bytes, pos);
            TokenKind::Regex
        } else if c.is_ascii_digit()
            || (c == '.' && bytes.get(pos + 1).is_some_and(|b| b.is_ascii_digit()))
        {
            pos += 1;
            while pos < bytes.len() {
                let b = bytes[pos];
                let exponent_sign = (b == b'+' || b == b'-')
                    && matches!(bytes[pos - 1], b'e' | b'E')
                    && !src[start..pos].starts_with("0x");
                if b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || exponent_sign {
                    pos += 1;
                } else {
                    break;
                }
            }
            TokenKind::Number
        } else if is_ident_start(c) {
            pos += c.len_utf8();
            while let Some(c) = src[pos..].chars().next() {
                if !is_ident_char(c) {
                    break;
                }
                pos += c.len_utf8();
            }
            TokenKind::Ident
        } else {
            pos += c.len_utf8();
            TokenKind::Punct
        };

        tokens.push(Token {
            kind,
            text: &src[start..pos],
            start,
        });
    }
    tokens
}

fn regex_allowed(tokens: &[Token<'_>]) -> bool {
    match tokens.iter().rev().find(|t| !t.is_trivia()) {
        None => true,
        Some(prev) => match prev.kind {
            TokenKind::Punct => !matches!(prev.text, ")" | "]"),
            TokenKind::Ident => REGEX_PRECEDING_KEYWORDS.contains(&prev.text),
            _ => false,
        },
    }
}

fn scan_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut pos = start + 1;
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => pos += 2,
            b'\n' => return pos,
            b if b == quote => return pos + 1,
            _ => pos += 1,
        }
    }
    bytes.len()
}

fn scan_template(bytes: &[u8], start: usize) -> usize {
    let mut pos = start + 1;
    let mut depth = 0usize;
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => pos += 2,
            b'`' if depth == 0 => return pos + 1,
            b'$' if depth == 0 && bytes.get(pos + 1) == Some(&b'{') => {
                depth = 1;
                pos += 2;
            }
            b'{' if depth > 0 => {
                depth += 1;
                pos += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                pos += 1;
            }
            b'"' | b'\'' if depth > 0 => pos = scan_quoted(bytes, pos, bytes[pos]),
            b'`' => pos = scan_template(bytes, pos),
            _ => pos += 1,
        }
    }
    bytes.len()
}

fn scan_regex(bytes: &[u8], start: usize) -> usize {
    let mut pos = start + 1;
    let mut in_class = false;
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => pos += 2,
            b'[' => {
                in_class = true;
                pos += 1;
            }
            b']' => {
                in_class = false;
                pos += 1;
            }
            b'\n' => return pos,
            b'/' if !in_class => {
                pos += 1;
                while pos < bytes.len() && bytes[pos].is_ascii_alphabetic() {
                    pos += 1;
                }
                return pos;
            }
            _ => pos += 1,
        }
    }
    bytes.len()
}

/// Byte ranges of the comments and literals of a source text.
#[derive(Debug, Clone, Default)]
pub struct CodeMap {
    spans: Vec<(usize, usize)>,
}

impl CodeMap {
    pub fn new(src: &str) -> Self {
        let spans = tokenize(src)
            .iter()
            .filter(|t| {
                matches!(
                    t.kind,
                    TokenKind::LineComment
                        | TokenKind::BlockComment
                        | TokenKind::Str
                        | TokenKind::Template
                        | TokenKind::Regex
                )
            })
            .map(|t| (t.start, t.end()))
            .collect();
        Self { spans }
    }

    /// True when the byte at `pos` is outside every comment and literal.
    pub fn is_code(&self, pos: usize) -> bool {
        let i = self.spans.partition_point(|&(start, _)| start <= pos);
        i == 0 || self.spans[i - 1].1 <= pos
    }
}

/// Index of the previous non-trivia token before `index`.
pub fn prev_significant(tokens: &[Token<'_>], index: usize) -> Option<usize> {
    (0..index).rev().find(|&i| !tokens[i].is_trivia())
}

/// Index of the next non-trivia token after `index`.
pub fn next_significant(tokens: &[Token<'_>], index: usize) -> Option<usize> {
    (index + 1..tokens.len()).find(|&i| !tokens[i].is_trivia())
}

/// True when the identifier at `index` is a property name: it follows `.` or
/// is an object literal key.
pub fn is_property_position(tokens: &[Token<'_>], index: usize) -> bool {
    let prev = prev_significant(tokens, index).map(|i| &tokens[i]);
    if prev.is_some_and(|t| t.is_punct(".")) {
        return true;
    }
    let next = next_significant(tokens, index).map(|i| &tokens[i]);
    prev.is_some_and(|t| t.is_punct("{") || t.is_punct(","))
        && next.is_some_and(|t| t.is_punct(":"))
}

/// Identifiers introduced by `var`/`let`/`const`/`function`/`class`
/// anywhere in the source.
pub fn declared_names<'a>(tokens: &[Token<'a>]) -> Vec<&'a str> {
    (0..tokens.len())
        .flat_map(|i| declaration_at(tokens, i))
        .collect()
}

/// Names declared by the statement starting at `index`, empty unless that
/// token is a declaration keyword. Destructuring patterns are not followed.
pub fn declaration_at<'a>(tokens: &[Token<'a>], index: usize) -> Vec<&'a str> {
    let keyword = &tokens[index];
    if keyword.kind != TokenKind::Ident
        || !matches!(keyword.text, "var" | "let" | "const" | "function" | "class")
    {
        return Vec::new();
    }
    let mut names = Vec::new();
    let mut cursor = next_significant(tokens, index);
    while let Some(j) = cursor {
        if tokens[j].kind != TokenKind::Ident {
            break;
        }
        names.push(tokens[j].text);
        if keyword.text == "function" || keyword.text == "class" {
            break;
        }
        // Skip to the next top-level comma of a declaration list.
        let mut depth = 0i32;
        let mut k = j + 1;
        cursor = None;
        while k < tokens.len() {
            let t = &tokens[k];
            if t.kind == TokenKind::Punct {
                match t.text {
                    "(" | "[" | "{" => depth += 1,
                    ")" | "]" | "}" => {
                        depth -= 1;
                        if depth < 0 {
                            break;
                        }
                    }
                    ";" if depth == 0 => break,
                    "," if depth == 0 => {
                        cursor = next_significant(tokens, k);
                        break;
                    }
                    _ => {}
                }
            } else if t.kind == TokenKind::Whitespace && depth == 0 && t.text.contains('\n') {
                // A newline after a complete initializer may end the statement.
                let next = next_significant(tokens, k).map(|n| &tokens[n]);
                let prev = prev_significant(tokens, k).map(|p| &tokens[p]);
                let continues = next.is_some_and(|n| n.kind == TokenKind::Punct && n.text != "(" && n.text != "[")
                    || prev.is_some_and(|p| p.kind == TokenKind::Punct && !matches!(p.text, ")" | "]" | "}"));
                if !continues {
                    break;
                }
            }
            k += 1;
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<(TokenKind, &str)> {
        tokenize(src)
            .into_iter()
            .filter(|t| t.kind != TokenKind::Whitespace)
            .map(|t| (t.kind, t.text))
            .collect()
    }

    #[test]
    fn test_strings_and_comments() {
        let tokens = kinds("a = 'x // y'; // tail\n/* b */");
        assert_eq!(
            tokens,
            vec![
                (TokenKind::Ident, "a"),
                (TokenKind::Punct, "="),
                (TokenKind::Str, "'x // y'"),
                (TokenKind::Punct, ";"),
                (TokenKind::LineComment, "// tail"),
                (TokenKind::BlockComment, "/* b */"),
            ]
        );
    }

    #[test]
    fn test_regex_versus_division() {
        let tokens = kinds("x = a / b; y = /[/]+/g.test(s)");
        assert!(tokens.contains(&(TokenKind::Punct, "/")));
        assert!(tokens.contains(&(TokenKind::Regex, "/[/]+/g")));
    }

    #[test]
    fn test_template_with_nested_expression() {
        let tokens = kinds("`a ${ {b: `c`}.b } d` + e");
        assert_eq!(tokens[0], (TokenKind::Template, "`a ${ {b: `c`}.b } d`"));
        assert_eq!(tokens[2], (TokenKind::Ident, "e"));
    }

    #[test]
    fn test_code_map() {
        let src = "a('x'); // b\nc";
        let map = CodeMap::new(src);
        assert!(map.is_code(0));
        assert!(!map.is_code(2));
        assert!(!map.is_code(4));
        assert!(map.is_code(5));
        assert!(!map.is_code(src.find("b").unwrap()));
        assert!(map.is_code(src.len() - 1));
    }

    #[test]
    fn test_declared_names() {
        let src = "var a = f(1, 2), b;\nconst c = {x: 1}\nlet d\nfunction e() {}";
        let tokens = tokenize(src);
        assert_eq!(declared_names(&tokens), vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_property_position() {
        let tokens = tokenize("o.x + {y: 1}");
        let x = tokens.iter().position(|t| t.is_ident("x")).unwrap();
        let y = tokens.iter().position(|t| t.is_ident("y")).unwrap();
        let o = tokens.iter().position(|t| t.is_ident("o")).unwrap();
        assert!(is_property_position(&tokens, x));
        assert!(is_property_position(&tokens, y));
        assert!(!is_property_position(&tokens, o));
    }
}
