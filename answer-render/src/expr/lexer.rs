//! Tokenizer for rich directive expressions
//!
//! Forbidden operators and keywords are rejected here, before any parsing,
//! so they fail with `DisallowedOperation` even where they would otherwise
//! be a syntax error.

use std::iter::Peekable;
use std::str::{CharIndices, FromStr};

use rust_decimal::Decimal;

use super::allow::{DISALLOWED_KEYWORDS, DISALLOWED_OPERATORS};
use crate::error::EvalError;

/// Token types for the expression lexer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    // Literals
    Ident(String),
    Number(Decimal),
    Str(String),
    /// Raw f-string body, interpolations not yet parsed
    FStr(String),
    Bool(bool),
    None,

    // Keywords
    And,
    Or,
    Not,
    In,
    If,
    Else,
    For,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Amp,
    Pipe,
    Tilde,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,

    // End of input
    Eof,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "{}", s),
            Token::Number(n) => write!(f, "{}", n),
            Token::Str(s) => write!(f, "'{}'", s),
            Token::FStr(s) => write!(f, "f'{}'", s),
            Token::Bool(true) => write!(f, "True"),
            Token::Bool(false) => write!(f, "False"),
            Token::None => write!(f, "None"),
            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::Not => write!(f, "not"),
            Token::In => write!(f, "in"),
            Token::If => write!(f, "if"),
            Token::Else => write!(f, "else"),
            Token::For => write!(f, "for"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Eq => write!(f, "=="),
            Token::Ne => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::Amp => write!(f, "&"),
            Token::Pipe => write!(f, "|"),
            Token::Tilde => write!(f, "~"),
            Token::Dot => write!(f, "."),
            Token::Comma => write!(f, ","),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Eof => write!(f, "end of expression"),
        }
    }
}

/// A token and its byte offset in the expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

/// Tokenize a whole expression, ending with `Token::Eof`
pub fn tokenize(input: &str) -> Result<Vec<Spanned>, EvalError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let position = lexer.current_pos();
        let token = lexer.next_token()?;
        let done = token == Token::Eof;
        tokens.push(Spanned { token, position });
        if done {
            return Ok(tokens);
        }
    }
}

/// Resolve backslash escapes in string literal text
pub fn unescape(raw: &str) -> String {
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
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Lexer for expression tokens
struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    fn current_pos(&mut self) -> usize {
        self.skip_whitespace();
        self.chars
            .peek()
            .map(|(i, _)| *i)
            .unwrap_or(self.input.len())
    }

    fn skip_whitespace(&mut self) {
        while let Some(&(_, ch)) = self.chars.peek() {
            if ch.is_whitespace() {
                self.chars.next();
            } else {
                break;
            }
        }
    }

    /// Consume `next` if it follows, returning whether it did
    fn eat(&mut self, next: char) -> bool {
        if let Some(&(_, c)) = self.chars.peek() {
            if c == next {
                self.chars.next();
                return true;
            }
        }
        false
    }

    fn unexpected(&self, pos: usize, ch: char) -> EvalError {
        EvalError::malformed(format!(
            "unexpected character '{}' at offset {} in '{}'",
            ch, pos, self.input
        ))
    }

    fn next_token(&mut self) -> Result<Token, EvalError> {
        self.skip_whitespace();

        let Some(&(pos, ch)) = self.chars.peek() else {
            return Ok(Token::Eof);
        };

        // Single-char tokens
        let single = match ch {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '.' => Some(Token::Dot),
            ',' => Some(Token::Comma),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '&' => Some(Token::Amp),
            '|' => Some(Token::Pipe),
            '~' => Some(Token::Tilde),
            _ => None,
        };
        if let Some(token) = single {
            self.chars.next();
            return Ok(token);
        }

        // Operators that may be two chars, some of them forbidden
        match ch {
            '*' => {
                self.chars.next();
                if self.eat('*') {
                    return Err(EvalError::disallowed("**"));
                }
                return Ok(Token::Star);
            }
            '/' => {
                self.chars.next();
                if self.eat('/') {
                    return Err(EvalError::disallowed("//"));
                }
                return Ok(Token::Slash);
            }
            '=' => {
                self.chars.next();
                if self.eat('=') {
                    return Ok(Token::Eq);
                }
                return Err(EvalError::disallowed("="));
            }
            '!' => {
                self.chars.next();
                if self.eat('=') {
                    return Ok(Token::Ne);
                }
                return Err(self.unexpected(pos, ch));
            }
            '<' => {
                self.chars.next();
                if self.eat('<') {
                    return Err(EvalError::disallowed("<<"));
                }
                if self.eat('=') {
                    return Ok(Token::Le);
                }
                return Ok(Token::Lt);
            }
            '>' => {
                self.chars.next();
                if self.eat('>') {
                    return Err(EvalError::disallowed(">>"));
                }
                if self.eat('=') {
                    return Ok(Token::Ge);
                }
                return Ok(Token::Gt);
            }
            ':' => {
                self.chars.next();
                if self.eat('=') {
                    return Err(EvalError::disallowed(":="));
                }
                return Err(self.unexpected(pos, ch));
            }
            _ => {}
        }

        let as_str = ch.to_string();
        if DISALLOWED_OPERATORS.contains(&as_str.as_str()) {
            return Err(EvalError::disallowed(as_str));
        }

        if ch == '\'' || ch == '"' {
            let raw = self.read_quoted(pos)?;
            return Ok(Token::Str(unescape(raw)));
        }

        if ch.is_ascii_digit() {
            return self.read_number(pos);
        }

        if ch.is_alphabetic() || ch == '_' {
            return self.read_word(pos);
        }

        Err(self.unexpected(pos, ch))
    }

    /// Read a quoted literal starting at `start`, returning its raw body
    fn read_quoted(&mut self, start: usize) -> Result<&'a str, EvalError> {
        let Some((_, quote)) = self.chars.next() else {
            return Err(EvalError::malformed("expected string literal"));
        };
        let input = self.input;
        let body_start = start + quote.len_utf8();
        let mut escaped = false;
        for (i, c) in self.chars.by_ref() {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                return Ok(&input[body_start..i]);
            }
        }
        Err(EvalError::malformed(format!(
            "unclosed string literal at offset {} in '{}'",
            start, input
        )))
    }

    fn read_number(&mut self, start: usize) -> Result<Token, EvalError> {
        let mut has_dot = false;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.chars.next();
            } else if c == '.' && !has_dot {
                // Decimal point only when a digit follows, otherwise a method call
                let next = self.input[i + 1..].chars().next();
                if next.is_some_and(|n| n.is_ascii_digit()) {
                    has_dot = true;
                    self.chars.next();
                } else {
                    break;
                }
            } else {
                break;
            }
        }

        let end = self.current_end();
        let text: String = self.input[start..end].chars().filter(|c| *c != '_').collect();
        Decimal::from_str(&text)
            .map(Token::Number)
            .map_err(|_| EvalError::malformed(format!("invalid number '{}'", text)))
    }

    fn read_word(&mut self, start: usize) -> Result<Token, EvalError> {
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.chars.next();
            } else {
                break;
            }
        }
        let end = self.current_end();
        let word = &self.input[start..end];

        // f-string prefix
        if matches!(word, "f" | "F") {
            if let Some(&(quote_pos, '\'' | '"')) = self.chars.peek() {
                let raw = self.read_quoted(quote_pos)?;
                return Ok(Token::FStr(raw.to_string()));
            }
        }

        if word.starts_with("__") {
            return Err(EvalError::disallowed(word));
        }
        if DISALLOWED_KEYWORDS.contains(&word) {
            return Err(EvalError::disallowed(word));
        }

        Ok(match word {
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "in" => Token::In,
            "if" => Token::If,
            "else" => Token::Else,
            "for" => Token::For,
            "True" => Token::Bool(true),
            "False" => Token::Bool(false),
            "None" => Token::None,
            _ => Token::Ident(word.to_string()),
        })
    }

    fn current_end(&mut self) -> usize {
        self.chars
            .peek()
            .map(|(i, _)| *i)
            .unwrap_or(self.input.len())
    }
}
