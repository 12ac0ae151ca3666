//! Token encoder for node tree events
//!
//! ## Wire Format
//!
//! One `Discover` or `Mutation` array carries every record that changed since
//! the previous encode, in queue order:
//!
//! ```text
//! [time, event, id, parent, previous, "TAG~pos", "#w.h", "path>", "k=v", ..., value,
//!               id, parent, ...]
//! ```
//!
//! - The numeric header is `id`, then `parent` and `previous` only for active
//!   attached nodes. A text node whose content was mangled has a negative id.
//! - `~pos` is the sibling position, when the node has one.
//! - `#w.h` is the layout box in base 36, scaled by [`BOX_PRECISION`].
//! - `path>` is the parent's stable selector, sent when the parent itself is
//!   not part of the same array so the decoder can still build selectors.
//! - Removed nodes carry only their id and tag.
//!
//! Repeated strings are then compacted into back-references by
//! [`tokenize`](crate::protocol::tokenize::tokenize).

use std::collections::HashSet;

use crate::protocol::hash::to_base36;
use crate::protocol::scrub::scrub;
use crate::protocol::tokenize::tokenize;
use crate::protocol::BOX_PRECISION;
use crate::types::{EventType, NodeId, PrivacyLevel, Token, TokenArray, TEXT_TAG};

use super::shadow::{NodeRecord, ShadowTree};

/// Encode the given records as one DOM event array.
///
/// Returns `None` when none of the ids resolve to a record.
pub fn encode_dom(
    tree: &ShadowTree,
    ids: &[NodeId],
    event: EventType,
    time: u64,
) -> Option<TokenArray> {
    let mut tokens: TokenArray = vec![Token::from(time), Token::from(event.code())];
    let mut emitted: HashSet<NodeId> = HashSet::new();

    for id in ids {
        let Some(record) = tree.get(*id) else {
            continue;
        };
        let parent = record.parent.and_then(|p| tree.get(p));
        encode_record(record, parent, &emitted, &mut tokens);
        emitted.insert(record.id);
    }

    if tokens.len() == 2 {
        return None;
    }
    Some(tokenize(tokens))
}

fn encode_record(
    record: &NodeRecord,
    parent: Option<&NodeRecord>,
    emitted: &HashSet<NodeId>,
    tokens: &mut TokenArray,
) {
    let data = &record.data;
    let privacy = record.metadata.privacy;
    let active = record.metadata.active;
    let is_text = data.tag == TEXT_TAG;
    let mangled = is_text && privacy >= PrivacyLevel::Text;

    let id = record.id.as_token();
    tokens.push(Token::Number(if mangled { -id } else { id }));

    if active {
        if let Some(parent) = record.parent {
            tokens.push(Token::from(parent.as_token()));
            if let Some(previous) = record.previous {
                tokens.push(Token::from(previous.as_token()));
            }
        }
    }

    match record.position {
        Some(position) => tokens.push(Token::Text(format!("{}~{}", data.tag, position))),
        None => tokens.push(Token::from(data.tag.as_str())),
    }

    if !active {
        return;
    }

    if let Some(size) = record.metadata.size {
        let scale = |v: f64| to_base36((v * BOX_PRECISION).round().max(0.0) as u64);
        tokens.push(Token::Text(format!("#{}.{}", scale(size.width), scale(size.height))));
    }

    if !is_text {
        if let Some(parent) = parent.filter(|p| !emitted.contains(&p.id)) {
            let path = &parent.selector.stable;
            if !path.is_empty() && !path.contains('=') {
                tokens.push(Token::Text(format!("{}>", path)));
            }
        }
    }

    let input_type = data.attributes.get("type").map(String::as_str);
    for (key, value) in &data.attributes {
        let value = scrub(value, key, privacy, false, input_type);
        tokens.push(Token::Text(format!("{}={}", key, value)));
    }

    if let Some(value) = &data.value {
        let hint = if is_text { TEXT_TAG } else { data.tag.as_str() };
        tokens.push(Token::Text(scrub(value, hint, privacy, true, input_type)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::extract::process_subtree;
    use crate::capture::host::HostTree;
    use crate::capture::VirtualDocument;
    use crate::types::{HostNode, Source};

    fn discovered(privacy: PrivacyLevel) -> (VirtualDocument, ShadowTree, HostNode) {
        let doc = VirtualDocument::new();
        let html = doc.create_element("HTML");
        let body = doc.create_element("BODY");
        doc.append_child(doc.root(), html);
        doc.append_child(html, body);
        let mut tree = ShadowTree::new(privacy, Vec::new());
        process_subtree(&mut tree, &doc, html, Source::Discover, &mut Vec::new());
        (doc, tree, body)
    }

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().filter_map(Token::as_text).collect()
    }

    #[test]
    fn test_header_and_metadata() {
        let (doc, mut tree, body) = discovered(PrivacyLevel::None);
        let div = doc.create_element("DIV");
        doc.set_attribute(div, "class", "card");
        doc.append_child(body, div);
        process_subtree(&mut tree, &doc, div, Source::ChildListAdd, &mut Vec::new());

        let ids = tree.updates();
        let tokens = encode_dom(&tree, &ids, EventType::Discover, 5).unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Number(5),
                Token::Number(5),
                Token::Number(1),
                Token::from("HTML"),
                Token::Number(2),
                Token::Number(1),
                Token::from("BODY"),
                Token::Number(3),
                Token::Number(2),
                Token::from("DIV~1"),
                Token::from("class=card"),
            ]
        );
    }

    #[test]
    fn test_path_marker_for_unemitted_parent() {
        let (doc, mut tree, body) = discovered(PrivacyLevel::None);
        tree.updates();

        let span = doc.create_element("SPAN");
        doc.append_child(body, span);
        process_subtree(&mut tree, &doc, span, Source::ChildListAdd, &mut Vec::new());
        let ids = tree.updates();
        let tokens = encode_dom(&tree, &ids, EventType::Mutation, 9).unwrap();
        assert!(texts(&tokens).contains(&"HTML>BODY>"));
    }

    #[test]
    fn test_masked_text_is_mangled_with_negative_id() {
        let (doc, mut tree, body) = discovered(PrivacyLevel::Text);
        let p = doc.create_element("P");
        let text = doc.create_text("secret words");
        doc.append_child(body, p);
        doc.append_child(p, text);
        process_subtree(&mut tree, &doc, p, Source::ChildListAdd, &mut Vec::new());

        let ids = tree.updates();
        let tokens = encode_dom(&tree, &ids, EventType::Mutation, 0).unwrap();
        let text_id = tree.id_of(text).unwrap().as_token();
        assert!(tokens.contains(&Token::Number(-text_id)));
        assert!(texts(&tokens).contains(&"c"));
        assert!(!texts(&tokens).iter().any(|t| t.contains("secret")));
    }

    #[test]
    fn test_removed_node_has_no_links() {
        let (doc, mut tree, body) = discovered(PrivacyLevel::None);
        let div = doc.create_element("DIV");
        doc.set_attribute(div, "id", "gone");
        doc.append_child(body, div);
        process_subtree(&mut tree, &doc, div, Source::ChildListAdd, &mut Vec::new());
        tree.updates();

        let id = tree.id_of(div).unwrap();
        tree.remove(id, Source::ChildListRemove);
        let ids = tree.updates();
        let tokens = encode_dom(&tree, &ids, EventType::Mutation, 1).unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Number(1),
                Token::Number(6),
                Token::from(id.as_token()),
                Token::from("DIV~1"),
            ]
        );
    }

    #[test]
    fn test_layout_box() {
        let (doc, mut tree, body) = discovered(PrivacyLevel::None);
        let img = doc.create_element("IMG");
        doc.set_size(img, 1.0, 0.5);
        doc.append_child(body, img);
        process_subtree(&mut tree, &doc, img, Source::ChildListAdd, &mut Vec::new());

        let ids = tree.updates();
        let tokens = encode_dom(&tree, &ids, EventType::Mutation, 0).unwrap();
        // 100 and 50 in base 36
        assert!(texts(&tokens).contains(&"#2s.1e"));
    }

    #[test]
    fn test_nothing_to_encode() {
        let (_doc, tree, _) = discovered(PrivacyLevel::None);
        assert!(encode_dom(&tree, &[], EventType::Mutation, 0).is_none());
        assert!(encode_dom(&tree, &[NodeId(99)], EventType::Mutation, 0).is_none());
    }
}
