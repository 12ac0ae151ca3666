//! In-memory host tree
//!
//! `VirtualDocument` is a small document model that implements [`HostTree`]
//! and records a [`ChangeRecord`] for every mutation of a connected node, the
//! way a mutation observer would. Cloning shares the same document.
//!
//! ```ignore
//! let doc = VirtualDocument::new();
//! let html = doc.create_element("HTML");
//! doc.append_child(doc.root(), html);
//! let batch = doc.take_records();
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tokio::time::Instant;

use super::host::{Dimensions, HostError, HostNodeKind, HostTree, SVG_NAMESPACE};
use crate::types::{ChangeRecord, HostNode, MutationBatch};

#[derive(Debug, Clone)]
struct VirtualNode {
    kind: HostNodeKind,
    tag: String,
    namespace: Option<String>,
    attributes: IndexMap<String, String>,
    text: String,
    parent: Option<HostNode>,
    children: Vec<HostNode>,
    size: Option<Dimensions>,
}

impl VirtualNode {
    fn new(kind: HostNodeKind, tag: &str) -> Self {
        Self {
            kind,
            tag: tag.to_string(),
            namespace: None,
            attributes: IndexMap::new(),
            text: String::new(),
            parent: None,
            children: Vec::new(),
            size: None,
        }
    }
}

struct DocumentInner {
    nodes: HashMap<HostNode, VirtualNode>,
    next: u64,
    root: HostNode,
    records: Vec<ChangeRecord>,
    document_size: Dimensions,
    denied: HashSet<HostNode>,
    started: Instant,
}

impl DocumentInner {
    fn new() -> Self {
        let root = HostNode(1);
        let mut nodes = HashMap::new();
        nodes.insert(root, VirtualNode::new(HostNodeKind::Document, "#document"));
        Self {
            nodes,
            next: 2,
            root,
            records: Vec::new(),
            document_size: Dimensions::default(),
            denied: HashSet::new(),
            started: Instant::now(),
        }
    }

    fn create(&mut self, node: VirtualNode) -> HostNode {
        let handle = HostNode(self.next);
        self.next += 1;
        self.nodes.insert(handle, node);
        handle
    }

    fn is_connected(&self, mut node: HostNode) -> bool {
        loop {
            if node == self.root {
                return true;
            }
            match self.nodes.get(&node).and_then(|n| n.parent) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    /// Detach `child` from its current parent, recording the removal.
    fn detach(&mut self, child: HostNode) {
        let Some(parent) = self.nodes.get(&child).and_then(|n| n.parent) else {
            return;
        };
        let connected = self.is_connected(parent);
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|c| *c != child);
        }
        if let Some(c) = self.nodes.get_mut(&child) {
            c.parent = None;
        }
        if connected {
            self.records
                .push(ChangeRecord::child_list(parent, Vec::new(), vec![child]));
        }
    }

    fn insert(&mut self, parent: HostNode, child: HostNode, before: Option<HostNode>) {
        if !self.nodes.contains_key(&parent) || !self.nodes.contains_key(&child) {
            return;
        }
        self.detach(child);
        let Some(p) = self.nodes.get_mut(&parent) else {
            return;
        };
        let index = before
            .and_then(|b| p.children.iter().position(|c| *c == b))
            .unwrap_or(p.children.len());
        p.children.insert(index, child);
        if let Some(c) = self.nodes.get_mut(&child) {
            c.parent = Some(parent);
        }
        if self.is_connected(parent) {
            self.records
                .push(ChangeRecord::child_list(parent, vec![child], Vec::new()));
        }
    }

    fn node(&self, node: HostNode) -> Result<&VirtualNode, HostError> {
        if self.denied.contains(&node) {
            return Err(HostError::AccessDenied(node.to_string()));
        }
        self.nodes.get(&node).ok_or(HostError::UnknownNode(node))
    }

    fn collect_text(&self, node: HostNode, out: &mut String) {
        let Some(n) = self.nodes.get(&node) else {
            return;
        };
        if n.kind == HostNodeKind::Text {
            out.push_str(&n.text);
        }
        for child in &n.children {
            self.collect_text(*child, out);
        }
    }
}

/// Shared in-memory document.
#[derive(Clone)]
pub struct VirtualDocument {
    inner: Arc<RwLock<DocumentInner>>,
}

impl Default for VirtualDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualDocument {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(DocumentInner::new())),
        }
    }

    /// Create a detached HTML element. Tags are stored uppercase.
    pub fn create_element(&self, tag: &str) -> HostNode {
        let node = VirtualNode::new(HostNodeKind::Element, &tag.to_ascii_uppercase());
        self.inner.write().create(node)
    }

    /// Create a detached SVG element. SVG tags keep their case.
    pub fn create_svg_element(&self, tag: &str) -> HostNode {
        let mut node = VirtualNode::new(HostNodeKind::Element, tag);
        node.namespace = Some(SVG_NAMESPACE.to_string());
        self.inner.write().create(node)
    }

    pub fn create_text(&self, text: &str) -> HostNode {
        let mut node = VirtualNode::new(HostNodeKind::Text, "#text");
        node.text = text.to_string();
        self.inner.write().create(node)
    }

    pub fn create_doctype(&self, name: &str, public_id: &str, system_id: &str) -> HostNode {
        let mut node = VirtualNode::new(HostNodeKind::DocumentType, name);
        node.attributes.insert("name".to_string(), name.to_string());
        node.attributes.insert("publicId".to_string(), public_id.to_string());
        node.attributes.insert("systemId".to_string(), system_id.to_string());
        self.inner.write().create(node)
    }

    /// Append `child` as the last child of `parent`, moving it if attached.
    pub fn append_child(&self, parent: HostNode, child: HostNode) {
        self.inner.write().insert(parent, child, None);
    }

    /// Insert `child` before `reference`, or append when `reference` is `None`.
    pub fn insert_before(&self, parent: HostNode, child: HostNode, reference: Option<HostNode>) {
        self.inner.write().insert(parent, child, reference);
    }

    pub fn remove_child(&self, parent: HostNode, child: HostNode) {
        let mut inner = self.inner.write();
        if inner.nodes.get(&child).and_then(|n| n.parent) == Some(parent) {
            inner.detach(child);
        }
    }

    pub fn set_attribute(&self, node: HostNode, name: &str, value: &str) {
        let mut inner = self.inner.write();
        let connected = inner.is_connected(node);
        if let Some(n) = inner.nodes.get_mut(&node) {
            n.attributes.insert(name.to_string(), value.to_string());
            if connected {
                inner.records.push(ChangeRecord::attributes(node, name));
            }
        }
    }

    pub fn remove_attribute(&self, node: HostNode, name: &str) {
        let mut inner = self.inner.write();
        let connected = inner.is_connected(node);
        let removed = inner
            .nodes
            .get_mut(&node)
            .and_then(|n| n.attributes.shift_remove(name))
            .is_some();
        if removed && connected {
            inner.records.push(ChangeRecord::attributes(node, name));
        }
    }

    /// Replace the data of a text node.
    pub fn set_text(&self, node: HostNode, text: &str) {
        let mut inner = self.inner.write();
        let connected = inner.is_connected(node);
        if let Some(n) = inner.nodes.get_mut(&node) {
            if n.kind != HostNodeKind::Text {
                return;
            }
            n.text = text.to_string();
            if connected {
                inner.records.push(ChangeRecord::character_data(node));
            }
        }
    }

    pub fn set_size(&self, node: HostNode, width: f64, height: f64) {
        if let Some(n) = self.inner.write().nodes.get_mut(&node) {
            n.size = Some(Dimensions::new(width, height));
        }
    }

    pub fn set_document_size(&self, width: f64, height: f64) {
        self.inner.write().document_size = Dimensions::new(width, height);
    }

    /// Make every read of `node` fail, like a frame from another origin.
    pub fn deny_access(&self, node: HostNode) {
        self.inner.write().denied.insert(node);
    }

    /// Replace the document with an empty one, as a full page load would.
    pub fn navigate(&self) {
        let mut inner = self.inner.write();
        let started = inner.started;
        let next = inner.next;
        *inner = DocumentInner::new();
        inner.started = started;
        // Handles stay unique across loads
        inner.next = next.max(2);
    }

    /// Drain pending change records, stamped with the time since the
    /// document was created.
    pub fn take_records(&self) -> MutationBatch {
        let elapsed = self.inner.read().started.elapsed().as_millis() as u64;
        self.take_records_at(elapsed)
    }

    /// Drain pending change records with an explicit timestamp.
    pub fn take_records_at(&self, time: u64) -> MutationBatch {
        let changes = std::mem::take(&mut self.inner.write().records);
        MutationBatch::new(time, changes)
    }

    pub fn has_records(&self) -> bool {
        !self.inner.read().records.is_empty()
    }
}

impl HostTree for VirtualDocument {
    fn root(&self) -> HostNode {
        self.inner.read().root
    }

    fn kind(&self, node: HostNode) -> Result<HostNodeKind, HostError> {
        Ok(self.inner.read().node(node)?.kind)
    }

    fn tag(&self, node: HostNode) -> Result<String, HostError> {
        Ok(self.inner.read().node(node)?.tag.clone())
    }

    fn attributes(&self, node: HostNode) -> Result<IndexMap<String, String>, HostError> {
        Ok(self.inner.read().node(node)?.attributes.clone())
    }

    fn text(&self, node: HostNode) -> Result<String, HostError> {
        let inner = self.inner.read();
        let n = inner.node(node)?;
        if n.kind == HostNodeKind::Text {
            return Ok(n.text.clone());
        }
        let mut out = String::new();
        inner.collect_text(node, &mut out);
        Ok(out)
    }

    fn parent(&self, node: HostNode) -> Result<Option<HostNode>, HostError> {
        let inner = self.inner.read();
        inner
            .nodes
            .get(&node)
            .map(|n| n.parent)
            .ok_or(HostError::UnknownNode(node))
    }

    fn previous_sibling(&self, node: HostNode) -> Result<Option<HostNode>, HostError> {
        let inner = self.inner.read();
        let n = inner.nodes.get(&node).ok_or(HostError::UnknownNode(node))?;
        let Some(parent) = n.parent.and_then(|p| inner.nodes.get(&p)) else {
            return Ok(None);
        };
        let index = parent.children.iter().position(|c| *c == node);
        Ok(index
            .filter(|i| *i > 0)
            .map(|i| parent.children[i - 1]))
    }

    fn children(&self, node: HostNode) -> Result<Vec<HostNode>, HostError> {
        Ok(self.inner.read().node(node)?.children.clone())
    }

    fn namespace(&self, node: HostNode) -> Result<Option<String>, HostError> {
        Ok(self.inner.read().node(node)?.namespace.clone())
    }

    fn size(&self, node: HostNode) -> Result<Option<Dimensions>, HostError> {
        Ok(self.inner.read().node(node)?.size)
    }

    fn document_size(&self) -> Result<Dimensions, HostError> {
        Ok(self.inner.read().document_size)
    }
}
