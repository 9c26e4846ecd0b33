// MPDB - MicroPython Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Argument expressions for `obj` and `dis`.
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := '*' term | '&' ident | '$' ident | number | ident | '(' expr ')'
//! number  := decimal | 0x hex
//! ```
//!
//! A bare identifier is a local of the innermost frame, else the word stored
//! at the global symbol of that name.

use std::{iter::Peekable, str::Chars};

use thiserror::Error;

use crate::{InspectContext, InspectResult, Target};

/// Parse failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    /// Nothing to evaluate
    #[error("expression required")]
    Empty,
    /// Malformed integer literal
    #[error("invalid number \"{0}\"")]
    InvalidNumber(String),
    /// Character that fits nowhere in the grammar
    #[error("unexpected '{found}' at column {column}")]
    Unexpected {
        /// Offending character
        found: char,
        /// 1-based column
        column: usize,
    },
    /// Input ended inside a term
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    /// `$name` that the innermost frame does not have
    #[error("no register \"{0}\" in the selected frame")]
    UnknownRegister(String),
}

/// Parsed expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// Integer literal
    Literal(u64),
    /// Local variable or global symbol value
    Name(String),
    /// Address of a global symbol
    AddressOf(String),
    /// Register of the innermost frame
    Register(String),
    /// Word stored at an address
    Deref(Box<Expr>),
    /// Wrapping sum
    Add(Box<Expr>, Box<Expr>),
    /// Wrapping difference
    Sub(Box<Expr>, Box<Expr>),
}

struct Parser<'s> {
    chars: Peekable<Chars<'s>>,
    column: usize,
}

impl<'s> Parser<'s> {
    fn new(text: &'s str) -> Self {
        Self { chars: text.chars().peekable(), column: 0 }
    }

    fn skip_whitespace(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.bump();
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.column += 1;
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.chars.peek().copied()
    }

    fn unexpected(&self, found: char) -> ExprError {
        ExprError::Unexpected { found, column: self.column + 1 }
    }

    fn word(&mut self) -> String {
        let mut out = String::new();
        while let Some(&c) = self.chars.peek() {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }
            out.push(c);
            self.bump();
        }
        out
    }

    fn ident(&mut self) -> Result<String, ExprError> {
        self.skip_whitespace();
        match self.chars.peek().copied() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => Ok(self.word()),
            Some(c) => Err(self.unexpected(c)),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn expr(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.term()?;
        loop {
            match self.peek() {
                Some('+') => {
                    self.bump();
                    lhs = Expr::Add(Box::new(lhs), Box::new(self.term()?));
                }
                Some('-') => {
                    self.bump();
                    lhs = Expr::Sub(Box::new(lhs), Box::new(self.term()?));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        match self.peek().ok_or(ExprError::UnexpectedEnd)? {
            '*' => {
                self.bump();
                Ok(Expr::Deref(Box::new(self.term()?)))
            }
            '&' => {
                self.bump();
                Ok(Expr::AddressOf(self.ident()?))
            }
            '$' => {
                self.bump();
                Ok(Expr::Register(self.ident()?))
            }
            '(' => {
                self.bump();
                let inner = self.expr()?;
                match self.peek() {
                    Some(')') => {
                        self.bump();
                        Ok(inner)
                    }
                    Some(c) => Err(self.unexpected(c)),
                    None => Err(ExprError::UnexpectedEnd),
                }
            }
            c if c.is_ascii_digit() => parse_number(&self.word()).map(Expr::Literal),
            c if c.is_ascii_alphabetic() || c == '_' => Ok(Expr::Name(self.word())),
            c => Err(self.unexpected(c)),
        }
    }
}

fn parse_number(text: &str) -> Result<u64, ExprError> {
    let invalid = || ExprError::InvalidNumber(text.to_string());
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).map_err(|_| invalid()),
        None => text.parse().map_err(|_| invalid()),
    }
}

impl Expr {
    /// Parse `text`.
    pub fn parse(text: &str) -> Result<Self, ExprError> {
        if text.trim().is_empty() {
            return Err(ExprError::Empty);
        }
        let mut parser = Parser::new(text);
        let expr = parser.expr()?;
        match parser.peek() {
            None => Ok(expr),
            Some(c) => Err(parser.unexpected(c)),
        }
    }

    /// Evaluate against the target.
    pub fn evaluate<T: Target>(&self, ctx: &InspectContext<T>) -> InspectResult<u64> {
        Ok(match self {
            Self::Literal(value) => *value,
            Self::AddressOf(name) => ctx.symbol(name)?.address,
            Self::Register(name) => {
                let frames = ctx.target().frames()?;
                frames
                    .first()
                    .and_then(|frame| frame.register(name))
                    .ok_or_else(|| ExprError::UnknownRegister(name.clone()))?
            }
            Self::Name(name) => {
                let local = ctx
                    .target()
                    .frames()
                    .ok()
                    .and_then(|frames| frames.first().and_then(|frame| frame.local(name).ok()));
                match local {
                    Some(value) => value,
                    None => {
                        let symbol = ctx.symbol(name)?;
                        ctx.read_word(symbol.address)?
                    }
                }
            }
            Self::Deref(inner) => ctx.read_word(inner.evaluate(ctx)?)?,
            Self::Add(lhs, rhs) => lhs.evaluate(ctx)?.wrapping_add(rhs.evaluate(ctx)?),
            Self::Sub(lhs, rhs) => lhs.evaluate(ctx)?.wrapping_sub(rhs.evaluate(ctx)?),
        })
    }
}

/// Parse and evaluate `text`.
pub fn evaluate<T: Target>(ctx: &InspectContext<T>, text: &str) -> InspectResult<u64> {
    Expr::parse(text)?.evaluate(ctx)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::target::{FrameSnapshot, SnapshotBuilder, Word};
    use crate::InspectError;

    #[test]
    fn test_parse() {
        assert_eq!(Expr::parse(" 0x10 ").unwrap(), Expr::Literal(16));
        assert_eq!(
            Expr::parse("*(&mp_state_ctx + 4)").unwrap(),
            Expr::Deref(Box::new(Expr::Add(
                Box::new(Expr::AddressOf("mp_state_ctx".into())),
                Box::new(Expr::Literal(4))
            )))
        );
        assert_eq!(Expr::parse(""), Err(ExprError::Empty));
        assert_eq!(Expr::parse("0xzz"), Err(ExprError::InvalidNumber("0xzz".into())));
        assert_eq!(Expr::parse("1 ?"), Err(ExprError::Unexpected { found: '?', column: 3 }));
        assert_eq!(Expr::parse("*"), Err(ExprError::UnexpectedEnd));
    }

    #[test]
    fn test_evaluate() {
        let frame = FrameSnapshot {
            function: Some("mp_execute_bytecode".into()),
            registers: BTreeMap::from([("r0".to_string(), Word(0x55))]),
            locals: BTreeMap::from([("code_state".to_string(), Word(0x7000))]),
            ..FrameSnapshot::default()
        };
        let target = SnapshotBuilder::new(4)
            .symbol("counter", 0x100)
            .word(0x100, 0x2000)
            .word(0x2000, 99)
            .frame(frame)
            .build();
        let ctx = InspectContext::new(target);

        assert_eq!(evaluate(&ctx, "$r0").unwrap(), 0x55);
        assert_eq!(evaluate(&ctx, "code_state").unwrap(), 0x7000);
        assert_eq!(evaluate(&ctx, "counter").unwrap(), 0x2000);
        assert_eq!(evaluate(&ctx, "&counter").unwrap(), 0x100);
        assert_eq!(evaluate(&ctx, "*counter").unwrap(), 99);
        assert_eq!(evaluate(&ctx, "&counter - 0x10 + 1").unwrap(), 0xf1);
        assert!(matches!(
            evaluate(&ctx, "$pc"),
            Err(InspectError::Expr(ExprError::UnknownRegister(_)))
        ));
        assert!(matches!(evaluate(&ctx, "nothing"), Err(InspectError::Target(_))));
    }
}
