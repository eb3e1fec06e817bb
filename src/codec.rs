//! Textual byte literals in, hex lines out.
//!
//! A literal is `0b`, `0o` or `0x` followed by digits of that base, or bare
//! digits, which are read as hex (so `42` is `0x42`, not forty-two). Only
//! lowercase prefixes are recognised.

use std::fmt::Write;
use std::num::IntErrorKind;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralErrorKind {
    Empty,
    InvalidDigit,
    Overflow,
}

impl std::fmt::Display for LiteralErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LiteralErrorKind::Empty => "no digits",
            LiteralErrorKind::InvalidDigit => "invalid digit",
            LiteralErrorKind::Overflow => "value out of range for a byte",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid byte literal {token:?}: {kind}")]
pub struct ParseError {
    pub token: String,
    pub kind: LiteralErrorKind,
}

/// Renders bytes as two-digit lowercase hex separated by single spaces.
pub fn format_bytes(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i != 0 {
            s.push(' ');
        }
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Parses every whitespace separated literal of `line`. The first bad token
/// fails the whole line; a blank line yields no bytes.
pub fn parse_bytes(line: &str) -> Result<Vec<u8>, ParseError> {
    line.split_whitespace().map(parse_literal).collect()
}

/// Parses a single literal. A prefix with nothing after it is not a prefix:
/// `0b` is the hex byte `0x0b`, as `format_bytes` writes it.
pub fn parse_literal(token: &str) -> Result<u8, ParseError> {
    let prefixed = |prefix: &str| token.strip_prefix(prefix).filter(|v: &&str| !v.is_empty());

    let (digits, radix) = if let Some(v) = prefixed("0b") {
        (v, 2)
    } else if let Some(v) = prefixed("0o") {
        (v, 8)
    } else if let Some(v) = prefixed("0x") {
        (v, 16)
    } else {
        (token, 16)
    };

    let error = |kind| ParseError {
        token: token.to_string(),
        kind,
    };

    // from_str_radix tolerates a leading sign; a literal must not.
    if digits.starts_with('+') || digits.starts_with('-') {
        return Err(error(LiteralErrorKind::InvalidDigit));
    }

    u8::from_str_radix(digits, radix).map_err(|e| {
        error(match e.kind() {
            IntErrorKind::Empty => LiteralErrorKind::Empty,
            IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => LiteralErrorKind::Overflow,
            _ => LiteralErrorKind::InvalidDigit,
        })
    })
}
