//! Host binding
//!
//! The capture pipeline never owns the live tree. It reads it through
//! [`HostTree`], addressing nodes by opaque [`HostNode`] handles. Any call may
//! fail (a frame from another origin, a node torn down mid-read); failures are
//! reported to the diagnostics channel by the caller and never abort a drain.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::HostNode;

/// Error raised by a host binding call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The handle does not refer to a node the host knows about
    #[error("Unknown node: {0}")]
    UnknownNode(HostNode),

    /// The host refused access to the node
    #[error("Access denied: {0}")]
    AccessDenied(String),
}

/// Kind of a host node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostNodeKind {
    Document,
    DocumentType,
    Element,
    Text,
    Other,
}

/// Width and height of a layout box, in CSS pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: f64,
    pub height: f64,
}

impl Dimensions {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Read access to the live node tree.
pub trait HostTree: Send + Sync {
    /// The document node everything else hangs off.
    fn root(&self) -> HostNode;

    fn kind(&self, node: HostNode) -> Result<HostNodeKind, HostError>;

    /// Node name: uppercase tag for elements, `#text` for text nodes.
    fn tag(&self, node: HostNode) -> Result<String, HostError>;

    /// Attributes in document order. Document type nodes report
    /// `name`, `publicId` and `systemId`.
    fn attributes(&self, node: HostNode) -> Result<IndexMap<String, String>, HostError>;

    /// Text data of a text node, or the concatenated descendant text of an
    /// element.
    fn text(&self, node: HostNode) -> Result<String, HostError>;

    fn parent(&self, node: HostNode) -> Result<Option<HostNode>, HostError>;

    fn previous_sibling(&self, node: HostNode) -> Result<Option<HostNode>, HostError>;

    fn children(&self, node: HostNode) -> Result<Vec<HostNode>, HostError>;

    /// Namespace URI of an element, if it is not plain HTML.
    fn namespace(&self, node: HostNode) -> Result<Option<String>, HostError>;

    /// Layout box, for nodes whose size matters to replay (images, frames).
    fn size(&self, node: HostNode) -> Result<Option<Dimensions>, HostError>;

    /// Scrollable size of the whole document.
    fn document_size(&self) -> Result<Dimensions, HostError>;
}

/// Namespace URI of SVG elements.
pub const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";
