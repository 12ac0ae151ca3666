//! Shadow tree: the capture side's authoritative mirror of the host tree
//!
//! ## Architecture
//!
//! ```text
//!   HostNode ──► IdentityRegistry ──► NodeId ──► nodes[id - 1]: NodeRecord
//!                                                   │
//!                       add / update / remove ──────┤
//!                                                   ▼
//!                                        pending: IndexSet<NodeId>
//!                                                   │ updates()
//!                                                   ▼
//!                                                Encoder
//! ```
//!
//! Records are never deleted. A removed node keeps its record with
//! `active = false` so late changes that still mention it resolve to the same
//! id.
//!
//! ## Queue order
//!
//! `updates()` yields ids in the order they were first dirtied, with one
//! exception: a node that moves under a new parent because of a child-list
//! insertion is moved to the back of the queue. Emitting the queue in order
//! therefore never attaches a child before its new parent.

use std::collections::HashMap;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::host::{Dimensions, HostError, HostTree};
use super::identity::IdentityRegistry;
use super::privacy::PrivacyClassifier;
use crate::config::MaskRule;
use crate::protocol::hash::hash;
use crate::protocol::selector::{self, SelectorInput, SelectorMode};
use crate::types::{HostNode, NodeId, NodeInfo, PrivacyLevel, Source, TEXT_TAG};

const REGION_ATTRIBUTE: &str = "data-region";

/// Per-node state that is not part of the content payload.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMetadata {
    /// False once the node was removed from the tree
    pub active: bool,
    /// Node starts a named region
    pub region_root: bool,
    pub privacy: PrivacyLevel,
    /// Layout box, when the host reports one
    pub size: Option<Dimensions>,
}

/// Selectors of one node in both modes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selectors {
    pub stable: String,
    pub compact: String,
}

impl Selectors {
    /// Combined hash of both selectors, `stable.compact`.
    pub fn hash(&self) -> String {
        format!("{}.{}", hash(&self.stable), hash(&self.compact))
    }
}

/// One mirrored node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub previous: Option<NodeId>,
    /// Children in sibling order
    pub children: Vec<NodeId>,
    pub data: NodeInfo,
    pub selector: Selectors,
    pub hash: String,
    /// 1-based index among same-tag siblings
    pub position: Option<u32>,
    /// Nearest region root, possibly this node
    pub region: Option<NodeId>,
    pub metadata: NodeMetadata,
}

pub struct ShadowTree {
    identity: IdentityRegistry,
    nodes: Vec<NodeRecord>,
    privacy: PrivacyClassifier,
    default_privacy: PrivacyLevel,
    pending: IndexSet<NodeId>,
    hashes: HashMap<String, NodeId>,
}

impl ShadowTree {
    pub fn new(default_privacy: PrivacyLevel, rules: Vec<MaskRule>) -> Self {
        Self {
            identity: IdentityRegistry::new(),
            nodes: Vec::new(),
            privacy: PrivacyClassifier::new(rules),
            default_privacy,
            pending: IndexSet::new(),
            hashes: HashMap::new(),
        }
    }

    /// Add a node seen for the first time.
    ///
    /// Host lookups happen before anything is modified, so a failing host
    /// call leaves the tree untouched.
    pub fn add(
        &mut self,
        host: &dyn HostTree,
        node: HostNode,
        parent: Option<HostNode>,
        data: NodeInfo,
        source: Source,
    ) -> Result<NodeId, HostError> {
        let previous = self.previous_id(host, node)?;
        let size = self.layout_size(host, node, &data)?;

        let Some(id) = self.identity.get_id(node, true) else {
            return Err(HostError::UnknownNode(node));
        };
        let parent_id = parent.and_then(|p| self.identity.lookup(p));
        let region_root = data.attributes.contains_key(REGION_ATTRIBUTE);

        let record = NodeRecord {
            id,
            parent: parent_id,
            previous,
            children: Vec::new(),
            data,
            selector: Selectors::default(),
            hash: String::new(),
            position: None,
            region: None,
            metadata: NodeMetadata {
                active: true,
                region_root,
                privacy: self.default_privacy,
                size,
            },
        };

        if id.index() < self.nodes.len() {
            self.nodes[id.index()] = record;
        } else {
            self.nodes.push(record);
        }

        if let Some(parent_id) = parent_id {
            self.insert_child(parent_id, id, previous);
        }
        self.region(id);
        self.refresh(node, id);

        self.track(id, source, true, false);
        Ok(id)
    }

    /// Apply a fresh view of an already tracked node.
    pub fn update(
        &mut self,
        host: &dyn HostTree,
        node: HostNode,
        parent: Option<HostNode>,
        data: NodeInfo,
        source: Source,
    ) -> Result<NodeId, HostError> {
        let Some(id) = self.identity.lookup(node) else {
            return self.add(host, node, parent, data, source);
        };
        let previous = self.previous_id(host, node)?;
        let size = self.layout_size(host, node, &data)?;
        let parent_id = parent.and_then(|p| self.identity.lookup(p));

        let Some(record) = self.nodes.get_mut(id.index()) else {
            return Err(HostError::UnknownNode(node));
        };
        let mut changed = !record.metadata.active;
        let mut parent_changed = false;
        record.metadata.active = true;
        record.metadata.size = size;

        let old_parent = record.parent;
        let old_previous = record.previous;

        if parent_id != old_parent {
            changed = true;
            parent_changed = true;
            if let Some(old) = old_parent {
                self.detach_child(old, id);
            }
            match parent_id {
                Some(new_parent) => {
                    if let Some(record) = self.nodes.get_mut(id.index()) {
                        record.parent = Some(new_parent);
                        record.previous = previous;
                    }
                    self.insert_child(new_parent, id, previous);
                }
                None => self.remove(id, source),
            }
        } else if previous != old_previous {
            changed = true;
            if let Some(record) = self.nodes.get_mut(id.index()) {
                record.previous = previous;
            }
            if let Some(parent_id) = parent_id {
                self.detach_child(parent_id, id);
                self.insert_child(parent_id, id, previous);
            }
        }

        if let Some(record) = self.nodes.get_mut(id.index()) {
            if record.data != data {
                changed = true;
                record.metadata.region_root = data.attributes.contains_key(REGION_ATTRIBUTE);
                record.data = data;
            }
        }

        self.region(id);
        self.refresh(node, id);
        self.track(id, source, changed, parent_changed);
        Ok(id)
    }

    /// Mark a node removed. Its record is kept.
    pub fn remove(&mut self, id: NodeId, source: Source) {
        let Some(record) = self.nodes.get_mut(id.index()) else {
            return;
        };
        if !record.metadata.active {
            return;
        }
        record.metadata.active = false;
        let parent = record.parent.take();
        if let Some(parent) = parent {
            self.detach_child(parent, id);
        }
        self.track(id, source, true, false);
    }

    /// Drain the pending queue.
    pub fn updates(&mut self) -> Vec<NodeId> {
        self.pending.drain(..).collect()
    }

    pub fn has_updates(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeRecord> {
        if id.0 == 0 {
            return None;
        }
        self.nodes.get(id.index())
    }

    pub fn get_by_host(&self, node: HostNode) -> Option<&NodeRecord> {
        self.identity.lookup(node).and_then(|id| self.get(id))
    }

    /// Existing id of a host node.
    pub fn id_of(&self, node: HostNode) -> Option<NodeId> {
        self.identity.lookup(node)
    }

    pub fn host_of(&self, id: NodeId) -> Option<HostNode> {
        self.identity.host(id)
    }

    /// All records in id order, removed ones included.
    pub fn records(&self) -> &[NodeRecord] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Pin the privacy level of a host node. Applied the next time the node
    /// is added or updated.
    pub fn set_privacy(&mut self, node: HostNode, level: PrivacyLevel) {
        self.privacy.set_override(node, level);
    }

    fn track(&mut self, id: NodeId, source: Source, changed: bool, parent_changed: bool) {
        let queued = self.pending.contains(&id);
        if queued && parent_changed && source == Source::ChildListAdd {
            self.pending.shift_remove(&id);
            self.pending.insert(id);
        } else if changed && !queued {
            self.pending.insert(id);
        }
    }

    /// Nearest previous host sibling that has an id.
    fn previous_id(
        &self,
        host: &dyn HostTree,
        node: HostNode,
    ) -> Result<Option<NodeId>, HostError> {
        let mut current = host.previous_sibling(node)?;
        while let Some(sibling) = current {
            if let Some(id) = self.identity.lookup(sibling) {
                return Ok(Some(id));
            }
            current = host.previous_sibling(sibling)?;
        }
        Ok(None)
    }

    fn layout_size(
        &self,
        host: &dyn HostTree,
        node: HostNode,
        data: &NodeInfo,
    ) -> Result<Option<Dimensions>, HostError> {
        if data.tag == TEXT_TAG || data.tag.starts_with('*') {
            return Ok(None);
        }
        host.size(node)
    }

    fn insert_child(&mut self, parent: NodeId, child: NodeId, previous: Option<NodeId>) {
        let Some(record) = self.nodes.get_mut(parent.index()) else {
            return;
        };
        let index = previous
            .and_then(|p| record.children.iter().position(|c| *c == p))
            .map(|i| i + 1)
            .unwrap_or(0);
        record.children.insert(index, child);
    }

    fn detach_child(&mut self, parent: NodeId, child: NodeId) {
        if let Some(record) = self.nodes.get_mut(parent.index()) {
            record.children.retain(|c| *c != child);
        }
    }

    fn region(&mut self, id: NodeId) {
        let Some(record) = self.get(id) else {
            return;
        };
        let region = if record.metadata.region_root {
            Some(id)
        } else {
            record.parent.and_then(|p| self.get(p)).and_then(|p| p.region)
        };
        if let Some(record) = self.nodes.get_mut(id.index()) {
            record.region = region;
        }
    }

    /// Recompute position, selectors, hash and privacy of one node.
    fn refresh(&mut self, node: HostNode, id: NodeId) {
        let Some(record) = self.get(id) else {
            return;
        };
        let parent = record.parent.and_then(|p| self.get(p));

        let tag = record.data.tag.as_str();
        let position = if selector::needs_position(tag, &record.data.attributes, parent.is_some()) {
            parent.map(|p| self.sibling_position(p, id, tag))
        } else {
            None
        };

        let build = |mode: SelectorMode, prefix: Option<&str>| {
            selector::build(
                &SelectorInput {
                    tag: &record.data.tag,
                    prefix,
                    attributes: &record.data.attributes,
                    position,
                },
                mode,
            )
        };
        let selectors = Selectors {
            stable: build(SelectorMode::Stable, parent.map(|p| p.selector.stable.as_str())),
            compact: build(SelectorMode::Compact, parent.map(|p| p.selector.compact.as_str())),
        };

        let inherited = parent.map(|p| p.metadata.privacy).unwrap_or(self.default_privacy);
        let privacy = self.privacy.classify(
            node,
            &record.data,
            &[selectors.stable.as_str(), selectors.compact.as_str()],
            parent.map(|p| p.data.tag.as_str()),
            inherited,
        );

        let hash = selectors.hash();
        if !selectors.stable.is_empty() {
            match self.hashes.get(&hash) {
                Some(other) if *other != id => {
                    debug!(%id, other = %other, hash = %hash, "Selector hash collision");
                }
                _ => {}
            }
            self.hashes.insert(hash.clone(), id);
        }

        if let Some(record) = self.nodes.get_mut(id.index()) {
            record.position = position;
            record.selector = selectors;
            record.hash = hash;
            record.metadata.privacy = privacy;
        }
    }

    /// Position after the nearest preceding sibling with the same tag.
    fn sibling_position(&self, parent: &NodeRecord, id: NodeId, tag: &str) -> u32 {
        let Some(index) = parent.children.iter().position(|c| *c == id) else {
            return 1;
        };
        parent.children[..index]
            .iter()
            .rev()
            .filter_map(|c| self.get(*c))
            .find(|sibling| sibling.data.tag == tag)
            .map(|sibling| sibling.position.unwrap_or(0) + 1)
            .unwrap_or(1)
    }
}
