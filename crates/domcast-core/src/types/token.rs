//! Tagged wire tokens

use serde::{Deserialize, Serialize};

/// One positional element of a token array.
///
/// On the wire a token is a bare JSON number, string, or array of numbers;
/// the variant is recovered from the JSON type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Token {
    Number(i64),
    Text(String),
    /// Back-reference to earlier positions of the same outer array
    Indices(Vec<usize>),
}

/// Serialized unit for one logical event: `[time, eventType, ...fields]`.
pub type TokenArray = Vec<Token>;

impl Token {
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Token::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Token::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Token::Number(_))
    }
}

impl From<i64> for Token {
    fn from(n: i64) -> Self {
        Token::Number(n)
    }
}

impl From<u64> for Token {
    fn from(n: u64) -> Self {
        Token::Number(n as i64)
    }
}

impl From<u32> for Token {
    fn from(n: u32) -> Self {
        Token::Number(n as i64)
    }
}

impl From<u8> for Token {
    fn from(n: u8) -> Self {
        Token::Number(n as i64)
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Token::Text(s)
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Token::Text(s.to_string())
    }
}
