// ai
//! 🎬 *[a bulk response arrives. 4 megabytes. ten thousand items. two fields each we care about.]*
//! *["Deserialize me," it whispers. "All of me." We decline. Politely.]*
//!
//! 🔍 **JsonReader** — a pull-based, allocation-light JSON scanner.
//!
//! 🧠 Knowledge graph:
//! - One byte cursor, one explicit scope stack (`Vec<Scope>`), zero recursion.
//!   A response nested ten thousand levels deep costs ten thousand stack *entries*,
//!   not ten thousand stack *frames*.
//! - At each step: skip whitespace, switch on the next byte
//!   (`{` `}` `[` `]` `,` `:` `"` number-ish, `t`/`f`/`n` literals), anything else is an error.
//! - Opening brackets push a scope, closing ones pop it, and a close that doesn't
//!   match the open scope is a structural error.
//! - After `{` (or `,` inside an object) the next thing MUST be a quoted field name.
//! - Strings come back as raw byte slices, escapes untouched. Field names in bulk
//!   responses don't have escapes and error spans are for humans to read, not us.
//! - `ignore_next` skips a value of any shape and hands back its exact bytes,
//!   which is how `error` objects get logged verbatim without ever being parsed.
//!
//! Used by the classifier. Touches only what it needs. The rest of the response
//! flies past at memchr speed. 🦆

use anyhow::{Context, Result};
use memchr::memchr2;

/// 🪙 One lexical step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Token<'a> {
    DictStart,
    DictEnd,
    ArrayStart,
    ArrayEnd,
    /// a field name inside an object
    Key(&'a [u8]),
    /// a string value, quotes stripped, escapes untouched
    Str(&'a [u8]),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl Token<'_> {
    fn describe(&self) -> String {
        match self {
            Token::DictStart => "'{'".to_string(),
            Token::DictEnd => "'}'".to_string(),
            Token::ArrayStart => "'['".to_string(),
            Token::ArrayEnd => "']'".to_string(),
            Token::Key(k) => format!("field name \"{}\"", String::from_utf8_lossy(k)),
            Token::Str(s) => format!("string \"{}\"", String::from_utf8_lossy(s)),
            Token::Int(i) => format!("integer {i}"),
            Token::Float(f) => format!("number {f}"),
            Token::Bool(b) => format!("{b}"),
            Token::Null => "null".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DictState {
    FirstKey,
    NextKey,
    Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayState {
    FirstValue,
    NextValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Dict(DictState),
    Array(ArrayState),
}

/// 🔍 The scanner. Borrows the response; never copies it.
#[derive(Debug)]
pub(crate) struct JsonReader<'a> {
    buf: &'a [u8],
    pos: usize,
    scopes: Vec<Scope>,
    token_start: usize,
    finished: bool,
}

impl<'a> JsonReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            scopes: Vec::with_capacity(8),
            token_start: 0,
            finished: false,
        }
    }

    /// 📍 Current byte offset. For error messages and the people who read them.
    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    // ===== primitives the classifier speaks =====

    /// `{` or bust.
    pub(crate) fn expect_dict(&mut self) -> Result<()> {
        match self.next_token()? {
            Token::DictStart => Ok(()),
            other => anyhow::bail!(
                "💀 expected an object at byte {}, found {}",
                self.token_start,
                other.describe()
            ),
        }
    }

    /// `[` or bust.
    pub(crate) fn expect_array(&mut self) -> Result<()> {
        match self.next_token()? {
            Token::ArrayStart => Ok(()),
            other => anyhow::bail!(
                "💀 expected an array at byte {}, found {}",
                self.token_start,
                other.describe()
            ),
        }
    }

    /// 🏷️ The next field name of the current object, or `None` once its `}` is consumed.
    pub(crate) fn next_field_name(&mut self) -> Result<Option<&'a [u8]>> {
        match self.next_token()? {
            Token::Key(name) => Ok(Some(name)),
            Token::DictEnd => Ok(None),
            other => anyhow::bail!(
                "💀 expected a field name at byte {}, found {}",
                self.token_start,
                other.describe()
            ),
        }
    }

    /// 🔢 The next value, which had better be an integer.
    pub(crate) fn next_int(&mut self) -> Result<i64> {
        match self.next_token()? {
            Token::Int(i) => Ok(i),
            other => anyhow::bail!(
                "💀 expected an integer at byte {}, found {}",
                self.token_start,
                other.describe()
            ),
        }
    }

    /// 🗑️ Skip the next value, whatever its shape, and return its exact raw bytes.
    ///
    /// Nested objects and arrays are balanced by watching the scope stack shrink back,
    /// not by recursing. Strings keep their quotes in the returned span.
    pub(crate) fn ignore_next(&mut self) -> Result<&'a [u8]> {
        let first = self.next_token()?;
        let start = self.token_start;
        match first {
            Token::DictStart | Token::ArrayStart => {
                // the scope we just opened sits at the top; we're done when it's gone
                let home = self.scopes.len() - 1;
                loop {
                    let token = self.next_token()?;
                    if matches!(token, Token::DictEnd | Token::ArrayEnd) && self.scopes.len() == home {
                        break;
                    }
                }
            }
            Token::DictEnd | Token::ArrayEnd | Token::Key(_) => anyhow::bail!(
                "💀 asked to skip a value at byte {}, found {} instead",
                start,
                first.describe()
            ),
            _ => {}
        }
        Ok(&self.buf[start..self.pos])
    }

    // ===== the state machine =====

    /// 🔄 Advance one token, honouring `,` and `:` according to the open scope.
    pub(crate) fn next_token(&mut self) -> Result<Token<'a>> {
        let Some(scope) = self.scopes.last().copied() else {
            if self.finished {
                anyhow::bail!(
                    "💀 the document already ended, nothing left to read at byte {}",
                    self.pos
                );
            }
            self.skip_whitespace();
            let token = self.read_value()?;
            if !matches!(token, Token::DictStart | Token::ArrayStart) {
                self.finished = true;
            }
            return Ok(token);
        };

        self.skip_whitespace();
        match scope {
            Scope::Dict(state @ (DictState::FirstKey | DictState::NextKey)) => {
                let byte = self.peek()?;
                if byte == b'}' {
                    return Ok(self.close(Token::DictEnd));
                }
                if state == DictState::NextKey {
                    if byte != b',' {
                        anyhow::bail!(
                            "💀 expected ',' or '}}' at byte {}, found '{}'",
                            self.pos,
                            byte as char
                        );
                    }
                    self.pos += 1;
                    self.skip_whitespace();
                }
                let byte = self.peek()?;
                if byte != b'"' {
                    anyhow::bail!(
                        "💀 expected a quoted field name at byte {}, found '{}'. Objects have keys. That's the deal.",
                        self.pos,
                        byte as char
                    );
                }
                self.token_start = self.pos;
                let key = self.read_string()?;
                self.set_top(Scope::Dict(DictState::Value));
                Ok(Token::Key(key))
            }
            Scope::Dict(DictState::Value) => {
                let byte = self.peek()?;
                if byte != b':' {
                    anyhow::bail!(
                        "💀 expected ':' after a field name at byte {}, found '{}'",
                        self.pos,
                        byte as char
                    );
                }
                self.pos += 1;
                self.skip_whitespace();
                // flip state before read_value, which may push a child scope on top
                self.set_top(Scope::Dict(DictState::NextKey));
                self.read_value()
            }
            Scope::Array(state) => {
                let byte = self.peek()?;
                if byte == b']' {
                    return Ok(self.close(Token::ArrayEnd));
                }
                if state == ArrayState::NextValue {
                    if byte != b',' {
                        anyhow::bail!(
                            "💀 expected ',' or ']' at byte {}, found '{}'",
                            self.pos,
                            byte as char
                        );
                    }
                    self.pos += 1;
                    self.skip_whitespace();
                }
                self.set_top(Scope::Array(ArrayState::NextValue));
                self.read_value()
            }
        }
    }

    fn read_value(&mut self) -> Result<Token<'a>> {
        self.token_start = self.pos;
        match self.peek()? {
            b'{' => {
                self.pos += 1;
                self.scopes.push(Scope::Dict(DictState::FirstKey));
                Ok(Token::DictStart)
            }
            b'[' => {
                self.pos += 1;
                self.scopes.push(Scope::Array(ArrayState::FirstValue));
                Ok(Token::ArrayStart)
            }
            b'"' => Ok(Token::Str(self.read_string()?)),
            b'-' | b'+' | b'.' | b'0'..=b'9' => self.read_number(),
            b't' => self.read_literal(b"true", Token::Bool(true)),
            b'f' => self.read_literal(b"false", Token::Bool(false)),
            b'n' => self.read_literal(b"null", Token::Null),
            close @ (b'}' | b']') => anyhow::bail!(
                "💀 unexpected '{}' at byte {}: it closes something that isn't open here",
                close as char,
                self.pos
            ),
            other => anyhow::bail!(
                "💀 unexpected byte '{}' (0x{:02x}) at byte {}",
                other as char,
                other,
                self.pos
            ),
        }
    }

    fn close(&mut self, token: Token<'a>) -> Token<'a> {
        self.token_start = self.pos;
        self.pos += 1;
        self.scopes.pop();
        if self.scopes.is_empty() {
            self.finished = true;
        }
        token
    }

    fn set_top(&mut self, scope: Scope) {
        if let Some(top) = self.scopes.last_mut() {
            *top = scope;
        }
    }

    /// Reads a string starting at the opening quote. Returns the bytes between the quotes.
    fn read_string(&mut self) -> Result<&'a [u8]> {
        self.pos += 1;
        let start = self.pos;
        loop {
            let rest = self
                .buf
                .get(self.pos..)
                .context("💀 a string ran off the end of the response")?;
            let offset = memchr2(b'"', b'\\', rest).with_context(|| {
                format!(
                    "💀 unterminated string starting at byte {}. The response was cut short.",
                    start - 1
                )
            })?;
            let at = self.pos + offset;
            if self.buf[at] == b'"' {
                self.pos = at + 1;
                return Ok(&self.buf[start..at]);
            }
            // backslash: hop over it and whatever it escapes
            self.pos = at + 2;
        }
    }

    fn read_number(&mut self) -> Result<Token<'a>> {
        let start = self.pos;
        while let Some(b) = self.buf.get(self.pos) {
            if matches!(b, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E') {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.buf[start..self.pos])
            .context("💀 number bytes that aren't ASCII. Impressive, honestly.")?;
        if let Ok(i) = text.parse::<i64>() {
            return Ok(Token::Int(i));
        }
        text.parse::<f64>()
            .map(Token::Float)
            .with_context(|| format!("💀 '{text}' at byte {start} looks like a number and isn't one"))
    }

    fn read_literal(&mut self, word: &'static [u8], token: Token<'a>) -> Result<Token<'a>> {
        if self.buf[self.pos..].starts_with(word) {
            self.pos += word.len();
            Ok(token)
        } else {
            anyhow::bail!(
                "💀 expected '{}' at byte {}",
                String::from_utf8_lossy(word),
                self.pos
            )
        }
    }

    fn peek(&self) -> Result<u8> {
        self.buf.get(self.pos).copied().with_context(|| {
            format!(
                "💀 the response ended at byte {} with {} scope(s) still open. Truncated, most likely.",
                self.pos,
                self.scopes.len()
            )
        })
    }

    fn skip_whitespace(&mut self) {
        while let Some(b' ' | b'\n' | b'\r' | b'\t') = self.buf.get(self.pos) {
            self.pos += 1;
        }
    }
}
