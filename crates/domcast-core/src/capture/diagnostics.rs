//! In-band diagnostic channel
//!
//! Failures of the host binding are reported to the consumer as `Log` events
//! rather than surfaced to the caller. Each distinct failure is reported at
//! most `repeat_limit` times per page.

use std::collections::HashMap;

use tracing::warn;

use crate::types::{EventType, Token, TokenArray};

/// Component that raised a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCode {
    /// A task failed while running
    RunTask = 1,
    /// A host API call failed
    HostAccess = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Info = 0,
    Warning = 1,
    Error = 2,
    Fatal = 3,
}

/// Rate-limited diagnostic log.
#[derive(Debug)]
pub struct Diagnostics {
    seen: HashMap<(LogCode, String), usize>,
    repeat_limit: usize,
}

impl Diagnostics {
    pub fn new(repeat_limit: usize) -> Self {
        Self {
            seen: HashMap::new(),
            repeat_limit,
        }
    }

    /// Record a diagnostic. Returns the `Log` token array when the entry is
    /// still under its repeat limit.
    pub fn log(
        &mut self,
        time: u64,
        code: LogCode,
        severity: Severity,
        name: &str,
        message: &str,
    ) -> Option<TokenArray> {
        let key = (code, if name.is_empty() { message } else { name }.to_string());
        let count = self.seen.entry(key).or_insert(0);
        if *count >= self.repeat_limit {
            return None;
        }
        *count += 1;

        warn!(code = ?code, severity = ?severity, name, message, "Capture diagnostic");
        Some(vec![
            Token::from(time),
            Token::from(EventType::Log.code()),
            Token::Number(code as i64),
            Token::Number(severity as i64),
            Token::from(name),
            Token::from(message),
        ])
    }
}
