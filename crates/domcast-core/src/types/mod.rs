//! Core types shared by the capture and decode sides
//!
//! ## Identity
//!
//! The host hands out [`HostNode`] handles it owns; the capture side maps each
//! handle to a [`NodeId`] the first time it sees it. Node ids are arena
//! indices into the shadow tree (`id - 1`), start at 1, and are never reused
//! within a page.

mod event;
mod token;

pub use event::EventType;
pub use token::{Token, TokenArray};

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Session-scoped integer handle assigned to a discovered node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Arena slot this id occupies.
    pub fn index(&self) -> usize {
        (self.0 as usize).saturating_sub(1)
    }

    /// Id as it appears in a token stream.
    pub fn as_token(&self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque node reference owned by the host binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostNode(pub u64);

impl fmt::Display for HostNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host:{}", self.0)
    }
}

/// Why a node is being added to or updated in the shadow tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// Initial full-document walk
    Discover,
    /// Node was inserted under a tracked parent
    ChildListAdd,
    /// Node was removed from its parent
    ChildListRemove,
    /// An attribute of the node changed
    Attributes,
    /// Text content of the node changed
    CharacterData,
}

/// Kind of a raw change notification delivered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Children were added and/or removed
    ChildList,
    /// One attribute changed
    Attributes,
    /// Text data changed
    CharacterData,
}

/// One raw change notification, as a mutation observer would report it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// Node the change happened on
    pub target: HostNode,
    /// What kind of change it was
    pub kind: ChangeKind,
    /// Nodes inserted under `target`
    pub added: Vec<HostNode>,
    /// Nodes removed from `target`
    pub removed: Vec<HostNode>,
    /// Changed attribute, for [`ChangeKind::Attributes`]
    pub attribute_name: Option<String>,
}

impl ChangeRecord {
    /// Children were inserted and/or removed under `target`.
    pub fn child_list(target: HostNode, added: Vec<HostNode>, removed: Vec<HostNode>) -> Self {
        Self {
            target,
            kind: ChangeKind::ChildList,
            added,
            removed,
            attribute_name: None,
        }
    }

    /// An attribute of `target` changed.
    pub fn attributes(target: HostNode, name: impl Into<String>) -> Self {
        Self {
            target,
            kind: ChangeKind::Attributes,
            added: Vec::new(),
            removed: Vec::new(),
            attribute_name: Some(name.into()),
        }
    }

    /// Text data of `target` changed.
    pub fn character_data(target: HostNode) -> Self {
        Self {
            target,
            kind: ChangeKind::CharacterData,
            added: Vec::new(),
            removed: Vec::new(),
            attribute_name: None,
        }
    }
}

/// All change records from one host notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationBatch {
    /// Arrival instant in milliseconds on the session clock
    pub time: u64,
    /// Records in delivery order
    pub changes: Vec<ChangeRecord>,
}

impl MutationBatch {
    pub fn new(time: u64, changes: Vec<ChangeRecord>) -> Self {
        Self { time, changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Content payload of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Uppercase tag, or a pseudo tag such as `*T` (text) and `*D` (doctype)
    pub tag: String,
    /// Attributes in document order
    pub attributes: IndexMap<String, String>,
    /// Text or style content
    pub value: Option<String>,
}

impl NodeInfo {
    pub fn element(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self {
            tag: TEXT_TAG.to_string(),
            attributes: IndexMap::new(),
            value: Some(value.into()),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn is_text(&self) -> bool {
        self.tag == TEXT_TAG
    }
}

/// Pseudo tag for text nodes.
pub const TEXT_TAG: &str = "*T";

/// Pseudo tag for the document type node.
pub const DOCTYPE_TAG: &str = "*D";

/// Masking classification, ordered from most to least permissive.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyLevel {
    /// Content is shipped verbatim
    None,
    /// Words that look like personal data are redacted
    #[default]
    Sensitive,
    /// All text content is masked
    Text,
    /// Text is masked and image sources are blanked
    TextImage,
    /// Nothing beyond structure leaves the process
    Exclude,
}
