//! Host node extraction
//!
//! Turns one host node into a shadow tree operation: reads its kind, tag,
//! attributes and text, decides whether it is tracked at all, and calls
//! `add`, `update` or `remove` on the tree.

use indexmap::IndexMap;

use super::host::{HostError, HostNodeKind, HostTree, SVG_NAMESPACE};
use super::shadow::ShadowTree;
use crate::types::{HostNode, NodeId, NodeInfo, Source, DOCTYPE_TAG};

const SVG_PREFIX: &str = "svg:";

/// Process one host node for the given source.
///
/// Returns the id the node ended up with, or `None` when the node is not
/// tracked (scripts, text inside `STYLE`, removals of nodes never seen).
pub fn process_node(
    tree: &mut ShadowTree,
    host: &dyn HostTree,
    node: HostNode,
    source: Source,
) -> Result<Option<NodeId>, HostError> {
    if source == Source::ChildListRemove {
        let Some(id) = tree.id_of(node) else {
            return Ok(None);
        };
        tree.remove(id, source);
        return Ok(Some(id));
    }

    let kind = host.kind(node)?;
    let parent = host.parent(node)?;

    match kind {
        HostNodeKind::DocumentType => {
            let data = NodeInfo {
                tag: DOCTYPE_TAG.to_string(),
                attributes: host.attributes(node)?,
                value: None,
            };
            upsert(tree, host, node, None, data, source).map(Some)
        }
        HostNodeKind::Text => {
            let parent_tag = parent
                .and_then(|p| tree.get_by_host(p))
                .map(|record| record.data.tag.clone());

            // Style text lives in the STYLE element's value
            if source != Source::Discover && parent_tag.as_deref() == Some("STYLE") {
                if let Some(style) = parent {
                    return process_node(tree, host, style, Source::CharacterData);
                }
            }

            let tracked = tree.id_of(node).is_some();
            let accepted = match parent_tag.as_deref() {
                Some("STYLE") | Some("NOSCRIPT") => false,
                Some(_) => true,
                None => false,
            };
            if !tracked && !accepted {
                return Ok(None);
            }
            let data = NodeInfo::text(host.text(node)?);
            upsert(tree, host, node, parent, data, source).map(Some)
        }
        HostNodeKind::Element => {
            let mut tag = host.tag(node)?;
            if host.namespace(node)?.as_deref() == Some(SVG_NAMESPACE) {
                tag = format!("{}{}", SVG_PREFIX, tag);
            }

            let (parent, data) = match tag.as_str() {
                "SCRIPT" => return Ok(None),
                "HTML" => (None, element(tag, host.attributes(node)?, None)),
                "NOSCRIPT" => (parent, NodeInfo::element(tag)),
                "STYLE" => {
                    let value = host.text(node)?;
                    (parent, element(tag, host.attributes(node)?, Some(value)))
                }
                _ => (parent, element(tag, host.attributes(node)?, None)),
            };
            upsert(tree, host, node, parent, data, source).map(Some)
        }
        HostNodeKind::Document | HostNodeKind::Other => Ok(None),
    }
}

/// Depth-first, pre-order traversal of a subtree added in one change.
///
/// Subtrees that were detached again before the change was processed are
/// skipped. A host failure on one node skips that node and its descendants
/// and is collected into `errors`; the rest of the subtree is still visited.
pub fn process_subtree(
    tree: &mut ShadowTree,
    host: &dyn HostTree,
    root: HostNode,
    source: Source,
    errors: &mut Vec<HostError>,
) -> Vec<NodeId> {
    let mut processed = Vec::new();
    match host.parent(root) {
        Ok(Some(_)) => {}
        Ok(None) => return processed,
        Err(e) => {
            errors.push(e);
            return processed;
        }
    }

    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        match process_node(tree, host, node, source) {
            Ok(Some(id)) => processed.push(id),
            Ok(None) => {}
            Err(e) => {
                errors.push(e);
                continue;
            }
        }
        match host.children(node) {
            Ok(children) => stack.extend(children.into_iter().rev()),
            Err(e) => errors.push(e),
        }
    }
    processed
}

fn element(tag: String, attributes: IndexMap<String, String>, value: Option<String>) -> NodeInfo {
    NodeInfo {
        tag,
        attributes,
        value,
    }
}

fn upsert(
    tree: &mut ShadowTree,
    host: &dyn HostTree,
    node: HostNode,
    parent: Option<HostNode>,
    data: NodeInfo,
    source: Source,
) -> Result<NodeId, HostError> {
    if tree.id_of(node).is_some() {
        tree.update(host, node, parent, data, source)
    } else {
        tree.add(host, node, parent, data, source)
    }
}
