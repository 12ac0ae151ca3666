//! Decoding of node tree event arrays
//!
//! ## Grammar
//!
//! After back-references are expanded, the fields following `[time, event]`
//! are read left to right:
//!
//! ```text
//! number   after a string (or first)  ──► start a new node, header = [id]
//! number   after a number             ──► next header field: parent, previous
//! string                              ──► field of the current node
//! ```
//!
//! The first field of a node is its tag with an optional `~position`. The rest
//! are classified in order: the last field of a `STYLE` and any field of a
//! text node is the value; `path>` is an ancestor path; `#w.h` is a layout
//! box; `key=value` is an attribute.
//!
//! Selectors are rebuilt with a per-call map of id to selectors, filled in
//! emission order, so children can be prefixed by their parent.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use crate::capture::Selectors;
use crate::protocol::scrub::unmask;
use crate::protocol::selector::{self, SelectorInput, SelectorMode};
use crate::protocol::tokenize::resolve;
use crate::protocol::BOX_PRECISION;
use crate::types::{Token, TEXT_TAG};

/// One decoded node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomData {
    pub id: u32,
    pub parent: Option<u32>,
    pub previous: Option<u32>,
    pub tag: String,
    pub position: Option<u32>,
    pub selector: Selectors,
    pub hash: String,
    pub attributes: IndexMap<String, String>,
    pub value: Option<String>,
    pub width: Option<f64>,
    pub height: Option<f64>,
}

/// Selector state shared by all DOM arrays of one decode call.
#[derive(Debug, Default)]
pub(crate) struct LayoutMap {
    selectors: HashMap<u32, Selectors>,
}

#[derive(Debug, Default)]
struct RawNode {
    header: Vec<i64>,
    fields: Vec<String>,
}

impl LayoutMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the node section of one DOM array (`tokens` is the whole array).
    pub fn decode(&mut self, tokens: &[Token]) -> Vec<DomData> {
        let tokens = resolve(tokens);
        let mut raw: Vec<RawNode> = Vec::new();
        let mut previous_numeric = false;

        for token in tokens.iter().skip(2) {
            match token {
                Token::Number(n) => {
                    match raw.last_mut() {
                        Some(node) if previous_numeric => node.header.push(*n),
                        _ => raw.push(RawNode {
                            header: vec![*n],
                            fields: Vec::new(),
                        }),
                    }
                    previous_numeric = true;
                }
                Token::Text(text) => {
                    match raw.last_mut() {
                        Some(node) => node.fields.push(text.clone()),
                        None => debug!(field = %text, "Field before any node header"),
                    }
                    previous_numeric = false;
                }
                Token::Indices(_) => previous_numeric = false,
            }
        }

        raw.into_iter().filter_map(|node| self.node(node)).collect()
    }

    fn node(&mut self, raw: RawNode) -> Option<DomData> {
        let signed_id = *raw.header.first()?;
        let mangled = signed_id < 0;
        let Ok(id) = u32::try_from(signed_id.unsigned_abs()) else {
            debug!(id = signed_id, "Node id out of range");
            return None;
        };
        let link = |index: usize| raw.header.get(index).and_then(|n| u32::try_from(*n).ok());
        let parent = link(1);
        let previous = link(2);

        let mut fields = raw.fields.into_iter();
        let Some(head) = fields.next() else {
            debug!(id, "Node without tag");
            return None;
        };
        let (tag, position) = split_position(&head);
        let fields: Vec<String> = fields.collect();

        let mut data = DomData {
            id,
            parent,
            previous,
            tag,
            position,
            selector: Selectors::default(),
            hash: String::new(),
            attributes: IndexMap::new(),
            value: None,
            width: None,
            height: None,
        };
        let mut path = None;
        let last = fields.len().saturating_sub(1);

        for (i, field) in fields.into_iter().enumerate() {
            if data.tag == TEXT_TAG {
                data.value = Some(if mangled { unmask(&field) } else { field });
            } else if data.tag == "STYLE" && i == last {
                data.value = Some(field);
            } else if field.ends_with('>') && !field.contains('=') {
                path = Some(field[..field.len() - 1].to_string());
            } else if field.starts_with('#') && !field.contains('=') {
                if let Some((width, height)) = parse_box(&field[1..]) {
                    data.width = Some(width);
                    data.height = Some(height);
                }
            } else if let Some(eq) = field.find('=').filter(|eq| *eq > 0) {
                data.attributes
                    .insert(field[..eq].to_string(), field[eq + 1..].to_string());
            } else {
                debug!(id, field = %field, "Unclassified node field");
            }
        }

        self.select(&mut data, path);
        Some(data)
    }

    /// Rebuild selectors and hash, then remember them for children.
    fn select(&mut self, data: &mut DomData, path: Option<String>) {
        let parent = data.parent.and_then(|p| self.selectors.get(&p));
        let stable_prefix = path
            .as_deref()
            .or_else(|| parent.map(|p| p.stable.as_str()));
        let compact_prefix = parent
            .map(|p| p.compact.as_str())
            .or(path.as_deref());

        let build = |mode: SelectorMode, prefix: Option<&str>| {
            selector::build(
                &SelectorInput {
                    tag: &data.tag,
                    prefix,
                    attributes: &data.attributes,
                    position: data.position,
                },
                mode,
            )
        };
        let selectors = Selectors {
            stable: build(SelectorMode::Stable, stable_prefix),
            compact: build(SelectorMode::Compact, compact_prefix),
        };

        data.hash = selectors.hash();
        data.selector = selectors.clone();
        self.selectors.insert(data.id, selectors);
    }
}

fn split_position(head: &str) -> (String, Option<u32>) {
    if let Some((tag, position)) = head.rsplit_once('~') {
        if let Ok(position) = position.parse::<u32>() {
            return (tag.to_string(), Some(position));
        }
    }
    (head.to_string(), None)
}

fn parse_box(value: &str) -> Option<(f64, f64)> {
    let (width, height) = value.split_once('.')?;
    let width = u64::from_str_radix(width, 36).ok()?;
    let height = u64::from_str_radix(height, 36).ok()?;
    Some((width as f64 / BOX_PRECISION, height as f64 / BOX_PRECISION))
}
