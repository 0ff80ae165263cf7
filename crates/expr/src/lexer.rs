//! Tokenizer for the expression language.

use crate::error::ExprError;

/// One lexical token plus the byte offset it starts at.
pub type Spanned = (Token, usize);

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),

    // Keywords
    True,
    False,
    Null,
    If,
    Else,
    Return,

    // Operators
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Question,
    Colon,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Dot,
    Semi,
}

impl Token {
    /// Short description for parse error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Int(i) => format!("integer {i}"),
            Token::Float(f) => format!("decimal {f}"),
            Token::Str(s) => format!("string '{s}'"),
            Token::Ident(name) => format!("identifier '{name}'"),
            other => format!("{other:?}"),
        }
    }
}

/// Tokenize a source string.
pub fn lex(source: &str) -> Result<Vec<Spanned>, ExprError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let b = bytes[i];
        match b {
            b' ' | b'\t' | b'\r' | b'\n' => {
                i += 1;
            }
            b'(' => push(&mut tokens, Token::LParen, start, &mut i),
            b')' => push(&mut tokens, Token::RParen, start, &mut i),
            b'{' => push(&mut tokens, Token::LBrace, start, &mut i),
            b'}' => push(&mut tokens, Token::RBrace, start, &mut i),
            b'[' => push(&mut tokens, Token::LBracket, start, &mut i),
            b']' => push(&mut tokens, Token::RBracket, start, &mut i),
            b'.' => push(&mut tokens, Token::Dot, start, &mut i),
            b';' => push(&mut tokens, Token::Semi, start, &mut i),
            b'?' => push(&mut tokens, Token::Question, start, &mut i),
            b':' => push(&mut tokens, Token::Colon, start, &mut i),
            b'+' => push(&mut tokens, Token::Plus, start, &mut i),
            b'-' => push(&mut tokens, Token::Minus, start, &mut i),
            b'*' => push(&mut tokens, Token::Star, start, &mut i),
            b'/' => push(&mut tokens, Token::Slash, start, &mut i),
            b'%' => push(&mut tokens, Token::Percent, start, &mut i),
            b'=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((Token::EqEq, start));
                    i += 2;
                } else {
                    return Err(ExprError::parse(start, "expected '==' (assignment is not supported)"));
                }
            }
            b'!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((Token::NotEq, start));
                    i += 2;
                } else {
                    push(&mut tokens, Token::Bang, start, &mut i);
                }
            }
            b'<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((Token::Le, start));
                    i += 2;
                } else {
                    push(&mut tokens, Token::Lt, start, &mut i);
                }
            }
            b'>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((Token::Ge, start));
                    i += 2;
                } else {
                    push(&mut tokens, Token::Gt, start, &mut i);
                }
            }
            b'&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push((Token::AndAnd, start));
                    i += 2;
                } else {
                    return Err(ExprError::parse(start, "expected '&&'"));
                }
            }
            b'|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push((Token::OrOr, start));
                    i += 2;
                } else {
                    return Err(ExprError::parse(start, "expected '||'"));
                }
            }
            b'\'' | b'"' => {
                let (literal, next) = lex_string(source, i)?;
                tokens.push((Token::Str(literal), start));
                i = next;
            }
            b'0'..=b'9' => {
                let (token, next) = lex_number(source, i)?;
                tokens.push((token, start));
                i = next;
            }
            b'A'..=b'Z' | b'a'..=b'z' | b'_' => {
                let (token, next) = lex_ident(source, i);
                tokens.push((token, start));
                i = next;
            }
            other => {
                return Err(ExprError::parse(
                    start,
                    format!("unexpected character '{}'", other as char),
                ));
            }
        }
    }

    Ok(tokens)
}

fn push(tokens: &mut Vec<Spanned>, token: Token, start: usize, i: &mut usize) {
    tokens.push((token, start));
    *i += 1;
}

/// Single- or double-quoted string with `\` escapes.
fn lex_string(source: &str, start: usize) -> Result<(String, usize), ExprError> {
    let bytes = source.as_bytes();
    let quote = bytes[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                let escaped = bytes.get(i + 1).ok_or_else(|| {
                    ExprError::parse(start, "unterminated string literal")
                })?;
                out.push(match escaped {
                    b'n' => '\n',
                    b't' => '\t',
                    b'r' => '\r',
                    other => *other as char,
                });
                i += 2;
            }
            b if b == quote => return Ok((out, i + 1)),
            _ => {
                // Multi-byte characters pass through untouched.
                let c = source[i..].chars().next().unwrap_or('\u{fffd}');
                out.push(c);
                i += c.len_utf8();
            }
        }
    }
    Err(ExprError::parse(start, "unterminated string literal"))
}

fn lex_number(source: &str, start: usize) -> Result<(Token, usize), ExprError> {
    let bytes = source.as_bytes();
    let mut i = start;
    let mut saw_dot = false;
    while i < bytes.len() {
        match bytes[i] {
            b'0'..=b'9' => i += 1,
            b'.' if !saw_dot && matches!(bytes.get(i + 1), Some(b'0'..=b'9')) => {
                saw_dot = true;
                i += 1;
            }
            _ => break,
        }
    }
    let text = &source[start..i];
    let token = if saw_dot {
        Token::Float(
            text.parse()
                .map_err(|_| ExprError::parse(start, format!("invalid decimal '{text}'")))?,
        )
    } else {
        Token::Int(
            text.parse()
                .map_err(|_| ExprError::parse(start, format!("invalid integer '{text}'")))?,
        )
    };
    Ok((token, i))
}

fn lex_ident(source: &str, start: usize) -> (Token, usize) {
    let bytes = source.as_bytes();
    let mut i = start;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    let token = match &source[start..i] {
        "true" => Token::True,
        "false" => Token::False,
        "null" => Token::Null,
        "if" => Token::If,
        "else" => Token::Else,
        "return" => Token::Return,
        name => Token::Ident(name.to_string()),
    };
    (token, i)
}

// ── Tests ───────────────────────────────────────────────────────────
