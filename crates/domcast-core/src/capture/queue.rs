//! Outgoing event queue
//!
//! Token arrays wait here until the next payload is built. Node tree arrays
//! go to the playback lane so a consumer can handle them separately from
//! analytics; in lean mode they are dropped instead.

use crate::types::{EventType, TokenArray};

#[derive(Debug, Default)]
pub struct EventQueue {
    analysis: Vec<TokenArray>,
    playback: Vec<TokenArray>,
    lean: bool,
}

impl EventQueue {
    pub fn new(lean: bool) -> Self {
        Self {
            lean,
            ..Self::default()
        }
    }

    pub fn push(&mut self, event: EventType, tokens: TokenArray) {
        if event.is_dom() {
            if !self.lean {
                self.playback.push(tokens);
            }
        } else {
            self.analysis.push(tokens);
        }
    }

    /// Take both lanes, leaving the queue empty.
    pub fn drain(&mut self) -> (Vec<TokenArray>, Vec<TokenArray>) {
        (
            std::mem::take(&mut self.analysis),
            std::mem::take(&mut self.playback),
        )
    }

    pub fn is_lean(&self) -> bool {
        self.lean
    }

    pub fn len(&self) -> usize {
        self.analysis.len() + self.playback.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analysis.is_empty() && self.playback.is_empty()
    }
}
