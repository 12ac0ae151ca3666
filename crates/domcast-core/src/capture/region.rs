//! Named regions and document size
//!
//! An element carrying `data-region="name"` is a region root. The shadow tree
//! propagates the root's id to its descendants; this module keeps the
//! per-region visibility and interaction state that collaborators report and
//! emits it as `Region` arrays:
//!
//! ```text
//! [time, 7, id, interaction, visibility, name]
//! ```

use indexmap::IndexMap;

use super::host::Dimensions;
use crate::types::{EventType, NodeId, Token, TokenArray};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegionVisibility {
    #[default]
    Rendered = 0,
    Visible = 10,
    ScrolledToEnd = 13,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegionInteraction {
    #[default]
    None = 0,
    Clicked = 20,
    Input = 30,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionState {
    pub name: String,
    pub visibility: RegionVisibility,
    pub interaction: RegionInteraction,
    dirty: bool,
}

#[derive(Debug, Default)]
pub struct RegionTracker {
    regions: IndexMap<NodeId, RegionState>,
}

impl RegionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a region root. Renaming a known region marks it changed.
    pub fn track(&mut self, id: NodeId, name: &str) {
        match self.regions.get_mut(&id) {
            Some(state) if state.name == name => {}
            Some(state) => {
                state.name = name.to_string();
                state.dirty = true;
            }
            None => {
                self.regions.insert(
                    id,
                    RegionState {
                        name: name.to_string(),
                        visibility: RegionVisibility::default(),
                        interaction: RegionInteraction::default(),
                        dirty: true,
                    },
                );
            }
        }
    }

    /// Report new state for a tracked region. Unknown ids are ignored.
    pub fn update(
        &mut self,
        id: NodeId,
        visibility: RegionVisibility,
        interaction: RegionInteraction,
    ) -> bool {
        let Some(state) = self.regions.get_mut(&id) else {
            return false;
        };
        if state.visibility != visibility || state.interaction != interaction {
            state.visibility = visibility;
            state.interaction = interaction;
            state.dirty = true;
        }
        true
    }

    pub fn get(&self, id: NodeId) -> Option<&RegionState> {
        self.regions.get(&id)
    }

    /// One array per region changed since the previous call.
    pub fn encode(&mut self, time: u64) -> Vec<TokenArray> {
        self.regions
            .iter_mut()
            .filter(|(_, state)| state.dirty)
            .map(|(id, state)| {
                state.dirty = false;
                vec![
                    Token::from(time),
                    Token::from(EventType::Region.code()),
                    Token::from(id.as_token()),
                    Token::Number(state.interaction as i64),
                    Token::Number(state.visibility as i64),
                    Token::from(state.name.as_str()),
                ]
            })
            .collect()
    }
}

/// Last reported document size.
#[derive(Debug, Default)]
pub struct DocumentTracker {
    last: Option<(i64, i64)>,
}

impl DocumentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `[time, 8, width, height]` when the rounded size changed.
    pub fn encode(&mut self, time: u64, size: Dimensions) -> Option<TokenArray> {
        let current = (size.width.round() as i64, size.height.round() as i64);
        if self.last == Some(current) {
            return None;
        }
        self.last = Some(current);
        Some(vec![
            Token::from(time),
            Token::from(EventType::Document.code()),
            Token::Number(current.0),
            Token::Number(current.1),
        ])
    }
}
