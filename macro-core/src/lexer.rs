//! Lexer for the macro expression language
//!
//! Directive arguments, `.set` values and `&name[expr]` interpolations are
//! tokenized here. Line structure (names, labels, directives) is handled by
//! the builder; this lexer only ever sees the expression part of a line.

use logos::Logos;
use crate::error::{Error, Result};

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn trim_suffix(s: &str) -> &str {
    s.trim_end_matches(['l', 'L', 'd', 'D', 'f', 'F'])
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    #[token("true")]
    True,
    #[token("false")]
    False,

    // Identifiers (slot names, intrinsic names, contextual words like `to`)
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Literals
    #[regex(r"[0-9]+[lL]?", |lex| trim_suffix(lex.slice()).parse().ok())]
    Int(i64),

    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?[dDfF]?", |lex| trim_suffix(lex.slice()).parse().ok())]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+[dDfF]?", |lex| trim_suffix(lex.slice()).parse().ok())]
    #[regex(r"[0-9]+[dDfF]", |lex| trim_suffix(lex.slice()).parse().ok())]
    Real(f64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| {
        let s = lex.slice();
        unescape(&s[1..s.len()-1])
    })]
    Str(String),

    // Operators
    #[token("||")]
    OrOr,
    #[token("&&")]
    AndAnd,
    #[token("!")]
    Bang,

    #[token("==")]
    EqEq,
    #[token("!=")]
    Ne,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,

    #[token("?")]
    Question,
    #[token(":")]
    Colon,
    #[token("#")]
    Hash,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    /// Name sigil: `&x` and `x` resolve to the same slot
    #[token("&")]
    Amp,

    // Delimiters
    #[token("=")]
    Eq,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
}

impl Token {
    /// Contextual keyword check (`to`, `step`, `in`, `splitted`, `by`)
    pub fn is_word(&self, word: &str) -> bool {
        matches!(self, Token::Ident(s) if s == word)
    }
}

/// Source location span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub col: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, line: usize, col: usize) -> Self {
        Self { start, end, line, col }
    }
}

/// Token with source location
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

pub struct Lexer {
    source: String,
    line: usize,
    col: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self::with_origin(source, 1, 1)
    }

    /// Lexer for a fragment that starts at `line`:`col` of a larger text.
    /// Columns on the fragment's first line are shifted accordingly.
    pub fn with_origin(source: &str, line: usize, col: usize) -> Self {
        Self {
            source: source.to_string(),
            line: line.max(1),
            col: col.max(1),
        }
    }

    /// Tokenize returning tokens without spans
    pub fn tokenize(&self) -> Result<Vec<Token>> {
        Ok(self.tokenize_with_spans()?.into_iter().map(|st| st.token).collect())
    }

    /// Tokenize returning tokens with source spans
    pub fn tokenize_with_spans(&self) -> Result<Vec<SpannedToken>> {
        let mut tokens = Vec::new();
        let mut lex = Token::lexer(&self.source);

        let line_starts: Vec<usize> = std::iter::once(0)
            .chain(self.source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();

        while let Some(token) = lex.next() {
            let byte_span = lex.span();
            let (line, col) = self.offset_to_line_col(&line_starts, byte_span.start);

            match token {
                Ok(tok) => {
                    tokens.push(SpannedToken {
                        token: tok,
                        span: Span::new(byte_span.start, byte_span.end, line, col),
                    });
                }
                Err(_) => {
                    return Err(Error::syntax(
                        format!("unexpected input: '{}'", &self.source[byte_span]),
                        line,
                        col,
                    ));
                }
            }
        }

        Ok(tokens)
    }

    /// Span just past the last character, used for "unexpected end" errors
    pub fn end_span(&self) -> Span {
        let line_starts: Vec<usize> = std::iter::once(0)
            .chain(self.source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        let end = self.source.len();
        let (line, col) = self.offset_to_line_col(&line_starts, end);
        Span::new(end, end, line, col)
    }

    /// Convert byte offset to line and column (1-indexed, shifted by the origin)
    fn offset_to_line_col(&self, line_starts: &[usize], offset: usize) -> (usize, usize) {
        let line = line_starts.partition_point(|&start| start <= offset);
        let line_start = line_starts.get(line.saturating_sub(1)).copied().unwrap_or(0);
        let col = offset - line_start + 1;
        if line <= 1 {
            (self.line, col + self.col - 1)
        } else {
            (self.line + line - 1, col)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers_and_booleans() {
        let tokens = Lexer::new("x true false to _y2").tokenize().unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("x".to_string()),
                Token::True,
                Token::False,
                Token::Ident("to".to_string()),
                Token::Ident("_y2".to_string()),
            ]
        );
        assert!(tokens[3].is_word("to"));
    }

    #[test]
    fn test_numbers() {
        let tokens = Lexer::new("42 7L 3.5 2e3 1.5e-2d 4f").tokenize().unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Int(42),
                Token::Int(7),
                Token::Real(3.5),
                Token::Real(2000.0),
                Token::Real(0.015),
                Token::Real(4.0),
            ]
        );
    }

    #[test]
    fn test_operators() {
        let source = "|| && ! == != < <= > >= ? : # + - * / % & = ,";
        let tokens = Lexer::new(source).tokenize().unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::OrOr,
                Token::AndAnd,
                Token::Bang,
                Token::EqEq,
                Token::Ne,
                Token::Lt,
                Token::Le,
                Token::Gt,
                Token::Ge,
                Token::Question,
                Token::Colon,
                Token::Hash,
                Token::Plus,
                Token::Minus,
                Token::Star,
                Token::Slash,
                Token::Percent,
                Token::Amp,
                Token::Eq,
                Token::Comma,
            ]
        );
    }

    #[test]
    fn test_sigil_names() {
        let tokens = Lexer::new("&x+&y").tokenize().unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Amp,
                Token::Ident("x".to_string()),
                Token::Plus,
                Token::Amp,
                Token::Ident("y".to_string()),
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        let tokens = Lexer::new(r#""a\"b" "tab\there" "nl\n""#).tokenize().unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Str("a\"b".to_string()),
                Token::Str("tab\there".to_string()),
                Token::Str("nl\n".to_string()),
            ]
        );
    }

    #[test]
    fn test_comments_skipped() {
        let tokens = Lexer::new("x + 1 // trailing note").tokenize().unwrap();
        assert_eq!(tokens.len(), 3);
    }

    #[test]
    fn test_origin_shifts_columns() {
        let tokens = Lexer::with_origin("a + b", 4, 10).tokenize_with_spans().unwrap();
        assert_eq!(tokens[0].span.line, 4);
        assert_eq!(tokens[0].span.col, 10);
        assert_eq!(tokens[2].span.col, 14);
    }

    #[test]
    fn test_unexpected_character() {
        let err = Lexer::with_origin("x @ y", 2, 5).tokenize().unwrap_err();
        assert_eq!(err.position(), Some((2, 7)));
    }

    #[test]
    fn test_span_construction() {
        let span = Span::new(3, 5, 2, 4);
        assert_eq!((span.start, span.end, span.line, span.col), (3, 5, 2, 4));
        assert_eq!(Span::default(), Span::new(0, 0, 0, 0));
    }
}
