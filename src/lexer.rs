//! Hand-written lexer for Flux source text.
//!
//! Scans left to right, longest match wins. Whitespace and comments are
//! discarded before the token stream reaches the parser. Rule order matters
//! where rules overlap: `=>`/`->` before bare operators, keywords and
//! boolean literals before identifiers.

use crate::error::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Int(i64),
    Str(String),
    Bool(bool),
    Ident(String),

    // Keywords
    If,
    Then,
    Else,
    Let,
    Fn,

    // Type names
    IntTy,
    StringTy,
    BoolTy,
    VoidTy,

    // Arrows
    Arrow,     // =>
    TypeArrow, // ->

    // Operators & punctuation
    EqEq, // ==
    Plus,
    Minus,
    Lt,
    Gt,
    Eq,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,

    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Int(n) => write!(f, "integer literal {n}"),
            TokenKind::Str(s) => write!(f, "string literal {s:?}"),
            TokenKind::Bool(b) => write!(f, "boolean literal {b}"),
            TokenKind::Ident(name) => write!(f, "identifier '{name}'"),
            TokenKind::If => write!(f, "'if'"),
            TokenKind::Then => write!(f, "'then'"),
            TokenKind::Else => write!(f, "'else'"),
            TokenKind::Let => write!(f, "'let'"),
            TokenKind::Fn => write!(f, "'fn'"),
            TokenKind::IntTy => write!(f, "'int'"),
            TokenKind::StringTy => write!(f, "'string'"),
            TokenKind::BoolTy => write!(f, "'bool'"),
            TokenKind::VoidTy => write!(f, "'void'"),
            TokenKind::Arrow => write!(f, "'=>'"),
            TokenKind::TypeArrow => write!(f, "'->'"),
            TokenKind::EqEq => write!(f, "'=='"),
            TokenKind::Plus => write!(f, "'+'"),
            TokenKind::Minus => write!(f, "'-'"),
            TokenKind::Lt => write!(f, "'<'"),
            TokenKind::Gt => write!(f, "'>'"),
            TokenKind::Eq => write!(f, "'='"),
            TokenKind::LParen => write!(f, "'('"),
            TokenKind::RParen => write!(f, "')'"),
            TokenKind::LBrace => write!(f, "'{{'"),
            TokenKind::RBrace => write!(f, "'}}'"),
            TokenKind::LBracket => write!(f, "'['"),
            TokenKind::RBracket => write!(f, "']'"),
            TokenKind::Comma => write!(f, "','"),
            TokenKind::Colon => write!(f, "':'"),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}

/// A token with the 1-based source position where it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
}

pub fn lex(source: &str) -> Result<Vec<Token>, Error> {
    let mut lexer = Lexer::new(source);
    lexer.tokenize()
}

struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    col: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
            tokens: Vec::new(),
        }
    }

    fn tokenize(&mut self) -> Result<Vec<Token>, Error> {
        loop {
            self.skip_whitespace_and_comments()?;
            if self.pos >= self.bytes.len() {
                break;
            }

            let (line, col) = (self.line, self.col);
            let ch = self.bytes[self.pos];

            match ch {
                b'(' => self.single(TokenKind::LParen, line, col),
                b')' => self.single(TokenKind::RParen, line, col),
                b'{' => self.single(TokenKind::LBrace, line, col),
                b'}' => self.single(TokenKind::RBrace, line, col),
                b'[' => self.single(TokenKind::LBracket, line, col),
                b']' => self.single(TokenKind::RBracket, line, col),
                b',' => self.single(TokenKind::Comma, line, col),
                b':' => self.single(TokenKind::Colon, line, col),
                b'+' => self.single(TokenKind::Plus, line, col),
                b'<' => self.single(TokenKind::Lt, line, col),
                b'>' => self.single(TokenKind::Gt, line, col),
                b'-' => {
                    self.bump();
                    if self.peek() == Some(b'>') {
                        self.bump();
                        self.push(TokenKind::TypeArrow, line, col);
                    } else {
                        self.push(TokenKind::Minus, line, col);
                    }
                }
                b'=' => {
                    self.bump();
                    match self.peek() {
                        Some(b'=') => {
                            self.bump();
                            self.push(TokenKind::EqEq, line, col);
                        }
                        Some(b'>') => {
                            self.bump();
                            self.push(TokenKind::Arrow, line, col);
                        }
                        _ => self.push(TokenKind::Eq, line, col),
                    }
                }
                b'"' => {
                    self.bump();
                    self.lex_string(line, col)?;
                }
                b'0'..=b'9' => self.lex_number(line, col)?,
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.lex_ident(line, col),
                _ => {
                    return Err(Error::Lex(format!(
                        "{line}:{col}: unexpected character '{}'",
                        ch as char
                    )));
                }
            }
        }

        self.tokens.push(Token {
            kind: TokenKind::Eof,
            line: self.line,
            col: self.col,
        });
        Ok(std::mem::take(&mut self.tokens))
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.bytes.get(self.pos + 1).copied()
    }

    /// Advance one byte, maintaining the line/column counters.
    fn bump(&mut self) {
        if let Some(b) = self.peek() {
            self.pos += 1;
            if b == b'\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }

    fn push(&mut self, kind: TokenKind, line: usize, col: usize) {
        self.tokens.push(Token { kind, line, col });
    }

    fn single(&mut self, kind: TokenKind, line: usize, col: usize) {
        self.bump();
        self.push(kind, line, col);
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), Error> {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => self.bump(),
                Some(b'/') if self.peek_next() == Some(b'/') => {
                    while self.peek().is_some_and(|b| b != b'\n') {
                        self.bump();
                    }
                }
                Some(b'/') if self.peek_next() == Some(b'*') => {
                    let (line, col) = (self.line, self.col);
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek() {
                            Some(b'*') if self.peek_next() == Some(b'/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            Some(_) => self.bump(),
                            None => {
                                return Err(Error::Lex(format!(
                                    "{line}:{col}: unterminated block comment"
                                )));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn lex_string(&mut self, line: usize, col: usize) -> Result<(), Error> {
        let mut value = String::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.bump();
                    break;
                }
                Some(b'\n') | None => {
                    return Err(Error::Lex(format!(
                        "{line}:{col}: unterminated string literal"
                    )));
                }
                Some(b'\\') => {
                    self.bump();
                    let escaped = match self.peek() {
                        Some(b'n') => '\n',
                        Some(b't') => '\t',
                        Some(b'r') => '\r',
                        Some(b'"') => '"',
                        Some(b'\\') => '\\',
                        Some(other) => {
                            return Err(Error::Lex(format!(
                                "{}:{}: unknown escape '\\{}'",
                                self.line,
                                self.col,
                                other as char
                            )));
                        }
                        None => {
                            return Err(Error::Lex(format!(
                                "{line}:{col}: unterminated string literal"
                            )));
                        }
                    };
                    self.bump();
                    value.push(escaped);
                }
                Some(_) => {
                    // Consume a full UTF-8 character, not just one byte.
                    let rest = &self.source[self.pos..];
                    if let Some(c) = rest.chars().next() {
                        for _ in 0..c.len_utf8() {
                            self.bump();
                        }
                        value.push(c);
                    }
                }
            }
        }
        self.push(TokenKind::Str(value), line, col);
        Ok(())
    }

    fn lex_number(&mut self, line: usize, col: usize) -> Result<(), Error> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.bump();
        }
        let text = &self.source[start..self.pos];
        match text.parse::<i64>() {
            Ok(v) => {
                self.push(TokenKind::Int(v), line, col);
                Ok(())
            }
            Err(_) => Err(Error::Lex(format!(
                "{line}:{col}: integer literal out of range: {text}"
            ))),
        }
    }

    fn lex_ident(&mut self, line: usize, col: usize) {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            self.bump();
        }
        let word = &self.source[start..self.pos];
        let kind = match word {
            "if" => TokenKind::If,
            "then" => TokenKind::Then,
            "else" => TokenKind::Else,
            "let" => TokenKind::Let,
            "fn" => TokenKind::Fn,
            "int" => TokenKind::IntTy,
            "string" => TokenKind::StringTy,
            "bool" => TokenKind::BoolTy,
            "void" => TokenKind::VoidTy,
            "true" | "yes" => TokenKind::Bool(true),
            "false" | "no" => TokenKind::Bool(false),
            _ => TokenKind::Ident(word.to_string()),
        };
        self.push(kind, line, col);
    }
}
