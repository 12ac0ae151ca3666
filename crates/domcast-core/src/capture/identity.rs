//! Node identity registry
//!
//! Maps host handles to session ids in both directions. Ids are handed out
//! from a counter starting at 1 and double as arena indices, so the reverse
//! map is a plain `Vec`.

use std::collections::HashMap;

use crate::types::{HostNode, NodeId};

#[derive(Debug, Default)]
pub struct IdentityRegistry {
    by_host: HashMap<HostNode, NodeId>,
    by_id: Vec<HostNode>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the id of `node`, allocating the next one when `autogenerate`
    /// is set and the node has not been seen before.
    pub fn get_id(&mut self, node: HostNode, autogenerate: bool) -> Option<NodeId> {
        if let Some(id) = self.by_host.get(&node) {
            return Some(*id);
        }
        if !autogenerate {
            return None;
        }
        self.by_id.push(node);
        let id = NodeId(self.by_id.len() as u32);
        self.by_host.insert(node, id);
        Some(id)
    }

    /// Existing id of `node`, never allocating.
    pub fn lookup(&self, node: HostNode) -> Option<NodeId> {
        self.by_host.get(&node).copied()
    }

    pub fn host(&self, id: NodeId) -> Option<HostNode> {
        if id.0 == 0 {
            return None;
        }
        self.by_id.get(id.index()).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
