//! The lexer.

use derive_more::Display;
use regex::Regex;

use crate::common::{CompileError, Result};

/// Tokens in the program
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("kind: '{kind}', part of input: '{text}'")]
pub struct Token<'src> {
    /// What token class this token belongs to.
    pub kind: TokenKind,
    /// What part of the input this token carries.
    pub text: &'src str,
    /// Byte offset into the source where this token starts, for diagnostics.
    pub pos: usize,
}

/// Token classes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display, Debug)]
pub enum TokenKind {
    #[display("id")]
    Id,
    #[display("num")]
    Num,
    #[display("int")]
    Int,
    #[display("return")]
    Return,
    #[display("if")]
    If,
    #[display("else")]
    Else,
    #[display("for")]
    For,
    #[display("=")]
    Assign,
    #[display("==")]
    EqEq,
    #[display("!=")]
    NotEq,
    #[display("<")]
    Lt,
    #[display(">")]
    Gt,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Star,
    #[display("&")]
    Amp,
    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
    #[display("{{")]
    LBrace,
    #[display("}}")]
    RBrace,
    #[display(";")]
    Semi,
    #[display(",")]
    Comma,
}

pub struct LexError(usize, char);

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unexpected character {:?} at byte {}", self.1, self.0)
    }
}

impl std::fmt::Debug for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl From<LexError> for CompileError {
    fn from(e: LexError) -> Self {
        CompileError::syntax(e.to_string())
    }
}

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    whitespace: Regex,
    matchers: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        use TokenKind::*;

        // Keywords must be tried before the identifier matcher, and two-char
        // operators before their one-char prefixes.
        let matchers = vec![
            (r"\Aint\b", Int),
            (r"\Areturn\b", Return),
            (r"\Aif\b", If),
            (r"\Aelse\b", Else),
            (r"\Afor\b", For),
            (r"\A[0-9]+", Num),
            (r"\A==", EqEq),
            (r"\A!=", NotEq),
            (r"\A=", Assign),
            (r"\A<", Lt),
            (r"\A>", Gt),
            (r"\A\+", Plus),
            (r"\A-", Minus),
            (r"\A\*", Star),
            (r"\A&", Amp),
            (r"\A\(", LParen),
            (r"\A\)", RParen),
            (r"\A\{", LBrace),
            (r"\A\}", RBrace),
            (r"\A;", Semi),
            (r"\A,", Comma),
            (r"\A[A-Za-z_][A-Za-z0-9_]*", Id),
        ]
        .into_iter()
        .map(|(pat, kind)| (Regex::new(pat).unwrap(), kind))
        .collect();

        Lexer {
            input,
            pos: 0,
            whitespace: Regex::new(r"\A(?:[ \t\f\r\n\v]|(?://.*))*").unwrap(),
            matchers,
        }
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&self) -> bool {
        self.pos == self.input.len()
    }

    // Skip comments and whitespace
    fn skip_whitespace(&mut self) {
        if let Some(m) = self.whitespace.find(&self.input[self.pos..]) {
            self.pos += m.end()
        }
    }

    /// Get the next token if possible.
    ///
    /// The return type distinguishes between end-of-input and lexer error.
    pub fn next(&mut self) -> std::result::Result<Option<Token<'input>>, LexError> {
        self.skip_whitespace();
        if self.end_of_input() {
            return Ok(None);
        }
        let rest = &self.input[self.pos..];
        for (re, kind) in &self.matchers {
            if let Some(m) = re.find(rest) {
                let text = m.as_str();
                let token = Token { kind: *kind, text, pos: self.pos };
                self.pos += text.len();
                return Ok(Some(token));
            }
        }
        let bad = rest.chars().next().unwrap();
        Err(LexError(self.pos, bad))
    }

    /// Lex the whole input into a vector, for the parser's two-pass design.
    pub fn tokenize(mut self) -> Result<Vec<Token<'input>>> {
        let mut tokens = Vec::new();
        while let Some(tok) = self.next()? {
            tokens.push(tok);
        }
        Ok(tokens)
    }
}
