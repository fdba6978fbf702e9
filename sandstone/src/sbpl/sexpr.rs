//! Tokenizer and generic s-expression tree reader for SBPL sources.
//!
//! Tokens: `(`, `)`, `;` line comments, `#| ... |#` block comments,
//! `"quoted strings"`, `#"regex literals"`, and unquoted atoms.

use std::fmt;

/// A byte-offset span in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A generic s-expression node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SExpr {
    /// An unquoted atom (e.g. `allow`, `file-read*`, `#t`).
    Atom(String, Span),
    /// A quoted string (e.g. `"/usr/lib"`).
    Str(String, Span),
    /// A regex literal written as `#"..."`. The body is kept verbatim.
    Regex(String, Span),
    /// A parenthesized list of sub-expressions.
    List(Vec<SExpr>, Span),
}

impl SExpr {
    pub fn span(&self) -> Span {
        match self {
            SExpr::Atom(_, s) | SExpr::Str(_, s) | SExpr::Regex(_, s) | SExpr::List(_, s) => *s,
        }
    }

    /// Return the string value of an atom, quoted string or regex literal.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SExpr::Atom(s, _) | SExpr::Str(s, _) | SExpr::Regex(s, _) => Some(s),
            SExpr::List(_, _) => None,
        }
    }

    /// Return the children of a list node.
    pub fn as_list(&self) -> Option<&[SExpr]> {
        match self {
            SExpr::List(children, _) => Some(children),
            _ => None,
        }
    }

    /// Check if this is an atom with the given value. SBPL symbols are
    /// case-sensitive, unlike the shorthand forms some tools accept.
    pub fn is_atom(&self, name: &str) -> bool {
        matches!(self, SExpr::Atom(s, _) if s == name)
    }

    /// Head symbol of a list, e.g. `allow` for `(allow file-read*)`.
    pub fn head(&self) -> Option<&str> {
        match self.as_list()?.first()? {
            SExpr::Atom(s, _) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for SExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SExpr::Atom(s, _) => write!(f, "{s}"),
            SExpr::Str(s, _) => write!(f, "{s:?}"),
            SExpr::Regex(s, _) => write!(f, "#\"{s}\""),
            SExpr::List(children, _) => {
                write!(f, "(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{child}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// A read error with position information.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{line}:{col}: {message}")]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
    /// Line number (1-based).
    pub line: usize,
    /// Column number (1-based, in characters).
    pub col: usize,
}

/// Compute (line, col) from a byte offset. Both are 1-based.
pub fn offset_to_line_col(input: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (i, ch) in input.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

pub(crate) fn make_error(input: &str, offset: usize, message: impl Into<String>) -> ParseError {
    let (line, col) = offset_to_line_col(input, offset);
    ParseError {
        message: message.into(),
        offset,
        line,
        col,
    }
}

/// Characters allowed in unquoted atoms.
fn is_atom_char(ch: char) -> bool {
    ch.is_alphanumeric()
        || matches!(
            ch,
            '*' | '.' | '-' | '_' | '/' | '~' | '!' | '+' | '?' | '@' | ':' | '#' | '$' | '<'
                | '>' | '=' | '%' | '&' | '^' | '{' | '}'
        )
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen(usize),
    RParen(usize),
    Atom(String, Span),
    Str(String, Span),
    Regex(String, Span),
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.input[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();

        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.bump();
                continue;
            }

            if ch == ';' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
                continue;
            }

            let start = self.pos;
            match ch {
                '(' => {
                    self.bump();
                    tokens.push(Token::LParen(start));
                }
                ')' => {
                    self.bump();
                    tokens.push(Token::RParen(start));
                }
                '"' => {
                    self.bump();
                    let value = self.quoted(start, true)?;
                    tokens.push(Token::Str(
                        value,
                        Span {
                            start,
                            end: self.pos,
                        },
                    ));
                }
                '#' if self.peek_second() == Some('"') => {
                    self.bump();
                    self.bump();
                    let value = self.quoted(start, false)?;
                    tokens.push(Token::Regex(
                        value,
                        Span {
                            start,
                            end: self.pos,
                        },
                    ));
                }
                '#' if self.peek_second() == Some('|') => {
                    self.block_comment(start)?;
                }
                c if is_atom_char(c) => {
                    while self.peek().is_some_and(is_atom_char) {
                        self.bump();
                    }
                    tokens.push(Token::Atom(
                        self.input[start..self.pos].to_string(),
                        Span {
                            start,
                            end: self.pos,
                        },
                    ));
                }
                other => {
                    return Err(make_error(
                        self.input,
                        start,
                        format!("unexpected character '{other}'"),
                    ));
                }
            }
        }

        Ok(tokens)
    }

    /// Read the body of a string whose opening quote was consumed.
    ///
    /// With `unescape` set, `\n`, `\t`, `\\` and `\"` are decoded. Regex
    /// literals keep every backslash so the pattern reaches the regex engine
    /// untouched; only `\"` is needed to embed a quote and stays escaped.
    fn quoted(&mut self, start: usize, unescape: bool) -> Result<String, ParseError> {
        let mut value = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(make_error(self.input, start, "unterminated string literal"));
            };
            match c {
                '"' => return Ok(value),
                '\\' => {
                    let Some(next) = self.bump() else {
                        return Err(make_error(self.input, start, "unterminated string literal"));
                    };
                    if !unescape {
                        value.push('\\');
                        value.push(next);
                        continue;
                    }
                    match next {
                        '"' | '\\' => value.push(next),
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        _ => {
                            value.push('\\');
                            value.push(next);
                        }
                    }
                }
                _ => value.push(c),
            }
        }
    }

    /// Skip a `#| ... |#` comment. Nesting is allowed, as in Scheme.
    fn block_comment(&mut self, start: usize) -> Result<(), ParseError> {
        self.bump();
        self.bump();
        let mut depth = 1usize;
        while depth > 0 {
            match self.bump() {
                None => return Err(make_error(self.input, start, "unterminated block comment")),
                Some('|') if self.peek() == Some('#') => {
                    self.bump();
                    depth -= 1;
                }
                Some('#') if self.peek() == Some('|') => {
                    self.bump();
                    depth += 1;
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tree parser
// ---------------------------------------------------------------------------

struct TreeParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl TreeParser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn parse_expr(&mut self, input: &str) -> Result<SExpr, ParseError> {
        let Some(token) = self.tokens.get(self.pos).cloned() else {
            return Err(make_error(input, input.len(), "unexpected end of input"));
        };
        self.pos += 1;

        match token {
            Token::LParen(start) => {
                let mut children = Vec::new();
                loop {
                    match self.tokens.get(self.pos) {
                        None => {
                            return Err(make_error(
                                input,
                                start,
                                "unclosed parenthesis (no matching ')')",
                            ));
                        }
                        Some(Token::RParen(end)) => {
                            let end = *end + 1;
                            self.pos += 1;
                            return Ok(SExpr::List(children, Span { start, end }));
                        }
                        Some(_) => children.push(self.parse_expr(input)?),
                    }
                }
            }
            Token::RParen(offset) => Err(make_error(
                input,
                offset,
                "unexpected ')' without matching '('",
            )),
            Token::Atom(value, span) => Ok(SExpr::Atom(value, span)),
            Token::Str(value, span) => Ok(SExpr::Str(value, span)),
            Token::Regex(value, span) => Ok(SExpr::Regex(value, span)),
        }
    }
}

/// Parse an s-expression source string into a list of top-level expressions.
pub fn parse(input: &str) -> Result<Vec<SExpr>, ParseError> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = TreeParser::new(tokens);
    let mut exprs = Vec::new();

    while !parser.at_end() {
        exprs.push(parser.parse_expr(input)?);
    }

    Ok(exprs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty() {
        assert_eq!(parse("").unwrap(), vec![]);
        assert_eq!(parse("  \n  ").unwrap(), vec![]);
        assert_eq!(parse("; just a comment\n").unwrap(), vec![]);
        assert_eq!(parse("#| block |#").unwrap(), vec![]);
    }

    #[test]
    fn parse_simple_rule() {
        let exprs = parse("(allow file-read*)").unwrap();
        assert_eq!(exprs.len(), 1);
        assert_eq!(exprs[0].head(), Some("allow"));
        let children = exprs[0].as_list().unwrap();
        assert!(children[1].is_atom("file-read*"));
    }

    #[test]
    fn parse_nested_filters() {
        let exprs = parse(r#"(allow file-read* (require-any (subpath "/usr") (literal "/etc/hosts")))"#)
            .unwrap();
        let children = exprs[0].as_list().unwrap();
        assert_eq!(children.len(), 3);
        let any = children[2].as_list().unwrap();
        assert_eq!(any.len(), 3);
        assert_eq!(children[2].head(), Some("require-any"));
        assert_eq!(any[1].head(), Some("subpath"));
    }

    #[test]
    fn parse_regex_literal_keeps_backslashes() {
        let exprs = parse(r#"(regex #"^/private/var/folders/[^/]+/\.tmp$")"#).unwrap();
        let children = exprs[0].as_list().unwrap();
        assert!(matches!(&children[1], SExpr::Regex(s, _) if s == r"^/private/var/folders/[^/]+/\.tmp$"));
    }

    #[test]
    fn parse_string_escapes() {
        let exprs = parse(r#""hello \"world\" \n""#).unwrap();
        assert_eq!(exprs[0].as_str(), Some("hello \"world\" \n"));
    }

    #[test]
    fn parse_booleans_and_versions() {
        let exprs = parse("(version 1) (debug #t)").unwrap();
        assert_eq!(exprs.len(), 2);
        assert!(exprs[1].as_list().unwrap()[1].is_atom("#t"));
    }

    #[test]
    fn parse_nested_block_comments() {
        let exprs = parse("#| outer #| inner |# still |# (deny default)").unwrap();
        assert_eq!(exprs.len(), 1);
        assert_eq!(exprs[0].head(), Some("deny"));
    }

    #[test]
    fn parse_non_ascii_path() {
        let exprs = parse(r#"(literal "/Users/zoë/naïve")"#).unwrap();
        assert_eq!(exprs[0].as_list().unwrap()[1].as_str(), Some("/Users/zoë/naïve"));
    }

    #[test]
    fn error_unterminated_string() {
        let err = parse(r#"(literal "/tmp"#).unwrap_err();
        assert!(err.message.contains("unterminated"));
        assert_eq!((err.line, err.col), (1, 10));
    }

    #[test]
    fn error_unterminated_block_comment() {
        let err = parse("#| never closed").unwrap_err();
        assert!(err.message.contains("block comment"));
    }

    #[test]
    fn error_unmatched_paren() {
        let err = parse("(allow file-read*").unwrap_err();
        assert!(err.message.contains("unclosed parenthesis"));
    }

    #[test]
    fn error_extra_rparen() {
        let err = parse("(deny default))").unwrap_err();
        assert!(err.message.contains("unexpected ')'"));
        assert_eq!(err.col, 15);
    }

    #[test]
    fn error_reports_line_numbers() {
        let err = parse("(version 1)\n(deny default)\n  [").unwrap_err();
        assert_eq!(err.line, 3);
        assert_eq!(err.col, 3);
    }

    #[test]
    fn span_tracking() {
        let exprs = parse("  (deny default)").unwrap();
        let span = exprs[0].span();
        assert_eq!(span.start, 2);
        assert_eq!(span.end, 16);
    }

    #[test]
    fn display_round_trips_structure() {
        let source = r#"(allow file-read* (regex #"^/tmp/.*") (literal "/a b"))"#;
        let exprs = parse(source).unwrap();
        let printed = exprs[0].to_string();
        assert_eq!(parse(&printed).unwrap()[0].to_string(), printed);
    }
}
