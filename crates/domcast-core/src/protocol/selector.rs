//! Hierarchical selectors
//!
//! A selector addresses a node by its path from the root:
//!
//! ```text
//! HTML>BODY>DIV.card.wide:nth-of-type(2)>SPAN
//! ```
//!
//! Two modes are built for every node. [`SelectorMode::Stable`] always keeps
//! the full class list. [`SelectorMode::Compact`] prefers a hand-written `id`
//! and drops class tokens that look generated or state-dependent, which keeps
//! selectors stable across page states at the cost of some precision.

use indexmap::IndexMap;

use crate::types::{DOCTYPE_TAG, TEXT_TAG};

/// Tags that never get a selector.
const UNADDRESSABLE_TAGS: &[&str] = &["STYLE", "TITLE", "LINK", "META", TEXT_TAG, DOCTYPE_TAG];

/// Tags that always carry a sibling position.
const POSITIONED_TAGS: &[&str] = &["DIV", "TR", "P", "LI", "UL", "A", "BUTTON"];

/// Class fragments that indicate transient UI state.
const STATE_CLASS_FRAGMENTS: &[&str] = &[
    "load", "active", "fixed", "visible", "focus", "show", "collaps", "animat",
];

const SVG_PREFIX: &str = "svg:";

/// Which flavour of selector to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectorMode {
    Stable,
    Compact,
}

/// Inputs for one node's selector.
#[derive(Debug, Clone, Copy)]
pub struct SelectorInput<'a> {
    pub tag: &'a str,
    /// Selector of the parent in the same mode, `None` for parentless nodes
    pub prefix: Option<&'a str>,
    pub attributes: &'a IndexMap<String, String>,
    /// 1-based index among same-tag siblings, when one applies
    pub position: Option<u32>,
}

/// Build a selector for `input` in the given mode.
pub fn build(input: &SelectorInput<'_>, mode: SelectorMode) -> String {
    if is_unaddressable(input.tag) {
        return String::new();
    }
    if input.tag == "HTML" {
        return "HTML".to_string();
    }
    let Some(prefix) = input.prefix else {
        return String::new();
    };

    let tag = input.tag.strip_prefix(SVG_PREFIX).unwrap_or(input.tag);
    let suffix = input
        .position
        .map(|n| format!(":nth-of-type({})", n))
        .unwrap_or_default();
    let class = input.attributes.get("class").map(String::as_str);

    match mode {
        SelectorMode::Stable => {
            let classes = join_classes(class, |_| true);
            format!("{}>{}{}{}", prefix, tag, classes, suffix)
        }
        SelectorMode::Compact => {
            if let Some(id) = input.attributes.get("id").filter(|id| is_hand_written(id)) {
                return format!("#{}", id);
            }
            let classes = if tag == "BODY" {
                String::new()
            } else {
                join_classes(class, |c| {
                    is_hand_written(c) && !STATE_CLASS_FRAGMENTS.iter().any(|f| c.contains(f))
                })
            };
            format!("{}>{}{}{}", prefix, tag, classes, suffix)
        }
    }
}

/// Whether a node needs an `:nth-of-type` suffix.
///
/// `HEAD` and `BODY` are unique under `HTML` and never need one. Tags without
/// a selector never carry one either.
pub fn needs_position(tag: &str, attributes: &IndexMap<String, String>, has_parent: bool) -> bool {
    if tag == "HEAD" || tag == "BODY" || is_unaddressable(tag) {
        return false;
    }
    has_parent && (POSITIONED_TAGS.contains(&tag) || !attributes.contains_key("class"))
}

/// Whether a tag is one that never has a selector.
pub fn is_unaddressable(tag: &str) -> bool {
    UNADDRESSABLE_TAGS.contains(&tag)
}

fn is_hand_written(token: &str) -> bool {
    !token.is_empty() && !token.chars().any(|c| c.is_ascii_digit())
}

fn join_classes(class: Option<&str>, keep: impl Fn(&str) -> bool) -> String {
    class
        .map(|value| {
            value
                .split_whitespace()
                .filter(|c| keep(c))
                .map(|c| format!(".{}", c))
                .collect::<String>()
        })
        .unwrap_or_default()
}
