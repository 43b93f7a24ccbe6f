//! Tokenizer for SQL-like filter expressions
//!
//! Covers the subset shared by every backend dialect: quoted and bare
//! identifiers, string and numeric literals, parentheses, commas, dots and
//! operators. Tokens keep byte spans into the source text so rewrites can
//! splice the original text instead of re-rendering it.

use std::fmt;

/// Token categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Bare word: keyword, function name or unquoted identifier
    Word,
    /// Double-quoted identifier (text is unescaped)
    QuotedIdent,
    /// Single-quoted string (text is unescaped)
    Str,
    Number,
    LParen,
    RParen,
    Comma,
    Dot,
    Star,
    /// Comparison, arithmetic, concatenation, bbox overlap or cast operator
    Op,
}

/// A token with its byte span in the source text
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl Token {
    /// Case-insensitive keyword check (bare words only)
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    /// True for identifiers that can name a column or table
    pub fn is_identifier(&self) -> bool {
        match self.kind {
            TokenKind::QuotedIdent => true,
            TokenKind::Word => !is_reserved(&self.text),
            _ => false,
        }
    }

    pub fn is_op(&self, op: &str) -> bool {
        self.kind == TokenKind::Op && self.text == op
    }
}

/// Tokenization failure
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.message, self.position)
    }
}

impl std::error::Error for LexError {}

const RESERVED: &[&str] = &[
    "AND", "OR", "NOT", "IN", "IS", "NULL", "LIKE", "ILIKE", "BETWEEN", "TRUE", "FALSE",
    "SELECT", "FROM", "WHERE", "AS", "EXISTS", "JOIN", "ON",
];

/// Words that can never be an identifier
pub fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(word))
}

/// Split an expression into tokens
pub fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        match c {
            b'(' => {
                tokens.push(simple(TokenKind::LParen, "(", start));
                i += 1;
            }
            b')' => {
                tokens.push(simple(TokenKind::RParen, ")", start));
                i += 1;
            }
            b',' => {
                tokens.push(simple(TokenKind::Comma, ",", start));
                i += 1;
            }
            b'.' if !next_is_digit(bytes, i) => {
                tokens.push(simple(TokenKind::Dot, ".", start));
                i += 1;
            }
            b'*' => {
                tokens.push(simple(TokenKind::Star, "*", start));
                i += 1;
            }
            b'"' => {
                let (text, end) = read_quoted(input, i, '"')?;
                tokens.push(Token {
                    kind: TokenKind::QuotedIdent,
                    text,
                    start,
                    end,
                });
                i = end;
            }
            b'\'' => {
                let (text, end) = read_quoted(input, i, '\'')?;
                tokens.push(Token {
                    kind: TokenKind::Str,
                    text,
                    start,
                    end,
                });
                i = end;
            }
            b'0'..=b'9' | b'.' => {
                let end = read_number(bytes, i);
                tokens.push(Token {
                    kind: TokenKind::Number,
                    text: input[start..end].to_string(),
                    start,
                    end,
                });
                i = end;
            }
            c if c.is_ascii_alphabetic() || c == b'_' || c == b'$' || c == b'@' => {
                let mut end = i + 1;
                while end < bytes.len()
                    && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_' || bytes[end] == b'$')
                {
                    end += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Word,
                    text: input[start..end].to_string(),
                    start,
                    end,
                });
                i = end;
            }
            _ => {
                let op = read_operator(bytes, i).ok_or_else(|| LexError {
                    message: format!("Unexpected character '{}'", input[i..].chars().next().unwrap_or('?')),
                    position: i,
                })?;
                tokens.push(Token {
                    kind: TokenKind::Op,
                    text: op.to_string(),
                    start,
                    end: start + op.len(),
                });
                i += op.len();
            }
        }
    }

    Ok(tokens)
}

fn simple(kind: TokenKind, text: &str, start: usize) -> Token {
    Token {
        kind,
        text: text.to_string(),
        start,
        end: start + 1,
    }
}

fn next_is_digit(bytes: &[u8], i: usize) -> bool {
    bytes.get(i + 1).map_or(false, |b| b.is_ascii_digit())
}

/// Reads a quoted run starting at `start`, doubling the quote to escape it
fn read_quoted(input: &str, start: usize, quote: char) -> Result<(String, usize), LexError> {
    let mut text = String::new();
    let mut chars = input[start + 1..].char_indices().peekable();
    while let Some((offset, ch)) = chars.next() {
        if ch == quote {
            if let Some((_, next)) = chars.peek() {
                if *next == quote {
                    text.push(quote);
                    chars.next();
                    continue;
                }
            }
            return Ok((text, start + 1 + offset + 1));
        }
        text.push(ch);
    }
    Err(LexError {
        message: format!("Unterminated {} quote", quote),
        position: start,
    })
}

fn read_number(bytes: &[u8], start: usize) -> usize {
    let mut end = start;
    let mut seen_dot = false;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => end += 1,
            b'.' if !seen_dot => {
                seen_dot = true;
                end += 1;
            }
            b'e' | b'E' => {
                let mut cursor = end + 1;
                if cursor < bytes.len() && (bytes[cursor] == b'+' || bytes[cursor] == b'-') {
                    cursor += 1;
                }
                if cursor < bytes.len() && bytes[cursor].is_ascii_digit() {
                    end = cursor;
                } else {
                    break;
                }
            }
            _ => break,
        }
    }
    end
}

fn read_operator(bytes: &[u8], i: usize) -> Option<&'static str> {
    const OPS: &[&str] = &[
        "<=", ">=", "<>", "!=", "==", "||", "&&", "::", "=", "<", ">", "+", "-", "/", "%",
    ];
    OPS.iter()
        .find(|op| bytes[i..].starts_with(op.as_bytes()))
        .copied()
}

/// Quote an identifier for SQL-like dialects
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal for SQL-like dialects
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Index of the parenthesis closing the one at `open`, if balanced
pub fn matching_paren(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, token) in tokens.iter().enumerate().skip(open) {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// Remove parentheses that wrap the whole expression
pub fn strip_outer_parens(expr: &str) -> &str {
    let mut current = expr.trim();
    loop {
        let tokens = match tokenize(current) {
            Ok(t) => t,
            Err(_) => return current,
        };
        if tokens.len() < 2
            || tokens[0].kind != TokenKind::LParen
            || matching_paren(&tokens, 0) != Some(tokens.len() - 1)
        {
            return current;
        }
        let inner_start = tokens[0].end;
        let inner_end = tokens[tokens.len() - 1].start;
        current = current[inner_start..inner_end].trim();
    }
}

/// Split on top-level `AND`, ignoring the `AND` of `BETWEEN x AND y`.
///
/// Nested conjunctions wrapped in parentheses are flattened. Text that does
/// not tokenize comes back as a single conjunct.
pub fn split_conjuncts(expr: &str) -> Vec<String> {
    let stripped = strip_outer_parens(expr);
    if stripped.is_empty() {
        return Vec::new();
    }
    let tokens = match tokenize(stripped) {
        Ok(t) => t,
        Err(_) => return vec![stripped.to_string()],
    };

    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut pending_between = false;
    let mut part_start = 0usize;

    for token in &tokens {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => depth = depth.saturating_sub(1),
            // AND binds tighter than OR: a top-level OR makes this one disjunction
            _ if depth == 0 && token.is_keyword("OR") => return vec![stripped.to_string()],
            _ if depth == 0 && token.is_keyword("BETWEEN") => pending_between = true,
            _ if depth == 0 && token.is_keyword("AND") => {
                if pending_between {
                    pending_between = false;
                } else {
                    parts.push(stripped[part_start..token.start].trim().to_string());
                    part_start = token.end;
                }
            }
            _ => {}
        }
    }
    parts.push(stripped[part_start..].trim().to_string());

    if parts.len() == 1 {
        return parts;
    }
    parts
        .into_iter()
        .filter(|part| !part.is_empty())
        .flat_map(|part| {
            let nested = split_conjuncts(&part);
            if nested.len() > 1 {
                nested
            } else {
                vec![part]
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokenize_id_list() {
        let tokens = tokenize(r#""fid" IN (1, 2,3)"#).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::QuotedIdent);
        assert_eq!(tokens[0].text, "fid");
        assert!(tokens[1].is_keyword("in"));
        assert_eq!(tokens.len(), 9);
    }

    #[test]
    fn test_tokenize_escapes() {
        let tokens = tokenize(r#""a""b" = 'it''s'"#).unwrap();
        assert_eq!(tokens[0].text, "a\"b");
        assert_eq!(tokens[2].kind, TokenKind::Str);
        assert_eq!(tokens[2].text, "it's");
    }

    #[test]
    fn test_tokenize_numbers_and_ops() {
        assert_eq!(
            kinds("x >= -1.5e3"),
            vec![TokenKind::Word, TokenKind::Op, TokenKind::Op, TokenKind::Number]
        );
        let tokens = tokenize("a.geom && b.geom").unwrap();
        assert!(tokens[3].is_op("&&"));
        assert_eq!(tokens[1].kind, TokenKind::Dot);
    }

    #[test]
    fn test_unterminated_string_is_error() {
        let err = tokenize("name = 'abc").unwrap_err();
        assert_eq!(err.position, 7);
    }

    #[test]
    fn test_spans_index_source() {
        let src = r#"  "fid" = 10"#;
        let tokens = tokenize(src).unwrap();
        assert_eq!(&src[tokens[0].start..tokens[0].end], "\"fid\"");
        assert_eq!(&src[tokens[2].start..tokens[2].end], "10");
    }

    #[test]
    fn test_strip_outer_parens() {
        assert_eq!(strip_outer_parens("((a = 1))"), "a = 1");
        assert_eq!(strip_outer_parens("(a = 1) AND (b = 2)"), "(a = 1) AND (b = 2)");
    }

    #[test]
    fn test_split_conjuncts_keeps_top_level_or_whole() {
        assert_eq!(
            split_conjuncts("a = 1 OR b = 2 AND c = 3"),
            vec!["a = 1 OR b = 2 AND c = 3".to_string()]
        );
    }

    #[test]
    fn test_split_conjuncts_respects_between_and_strings() {
        let parts = split_conjuncts(
            r#""fid" BETWEEN 1 AND 10 AND name = 'x AND y' AND (a = 1 OR b = 2)"#,
        );
        assert_eq!(
            parts,
            vec![
                r#""fid" BETWEEN 1 AND 10"#.to_string(),
                "name = 'x AND y'".to_string(),
                "(a = 1 OR b = 2)".to_string(),
            ]
        );
    }

    #[test]
    fn test_split_conjuncts_flattens_nested() {
        let parts = split_conjuncts("(a = 1 AND b = 2) AND c = 3");
        assert_eq!(parts, vec!["a = 1", "b = 2", "c = 3"]);
    }

    #[test]
    fn test_quote_helpers() {
        assert_eq!(quote_ident("my\"col"), "\"my\"\"col\"");
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
    }
}
