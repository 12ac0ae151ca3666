//! Privacy classification
//!
//! A node starts from the level inherited from its parent. Rules are then
//! applied from broad to specific:
//!
//! 1. An explicit override (per node, or a configured selector rule) wins
//!    outright.
//! 2. Under `Sensitive`, a class naming an address/password/contact field
//!    escalates to `Text`.
//! 3. Form inputs escalate to `Text` when already `Sensitive`, or when
//!    unmasked but an attribute value names a personal-data field.
//! 4. Input types such as `password` and `email` are at least `Text`.
//! 5. `data-mask` / `data-unmask` override rules 2 to 4.
//! 6. Text inside `STYLE` or `TITLE` is markup and is never masked.

use std::collections::HashMap;

use crate::config::MaskRule;
use crate::types::{HostNode, NodeInfo, PrivacyLevel};

const MASK_ATTRIBUTE: &str = "data-mask";
const UNMASK_ATTRIBUTE: &str = "data-unmask";

const SENSITIVE_CLASS_TERMS: &[&str] = &["address", "password", "contact"];

const SENSITIVE_FIELD_TERMS: &[&str] = &[
    "address", "password", "contact", "email", "phone", "ssn", "card", "zip", "postal", "birth",
    "credit",
];

const MASKED_INPUT_TYPES: &[&str] = &["password", "email", "tel", "hidden"];

const FORM_TAGS: &[&str] = &["INPUT", "TEXTAREA", "SELECT"];

const MARKUP_PARENTS: &[&str] = &["STYLE", "TITLE", "svg:style"];

/// Classifies nodes into privacy levels.
#[derive(Debug, Default)]
pub struct PrivacyClassifier {
    overrides: HashMap<HostNode, PrivacyLevel>,
    rules: Vec<MaskRule>,
}

impl PrivacyClassifier {
    pub fn new(rules: Vec<MaskRule>) -> Self {
        Self {
            overrides: HashMap::new(),
            rules,
        }
    }

    /// Pin a node to a level regardless of any other rule.
    pub fn set_override(&mut self, node: HostNode, level: PrivacyLevel) {
        self.overrides.insert(node, level);
    }

    /// Classify a node.
    ///
    /// `selectors` are the node's selectors in every mode, `parent_tag` the
    /// tag of its tracked parent, and `inherited` the parent's level.
    pub fn classify(
        &self,
        node: HostNode,
        info: &NodeInfo,
        selectors: &[&str],
        parent_tag: Option<&str>,
        inherited: PrivacyLevel,
    ) -> PrivacyLevel {
        if let Some(level) = self.overrides.get(&node) {
            return *level;
        }
        let matched = self.rules.iter().find(|rule| {
            selectors
                .iter()
                .any(|s| !s.is_empty() && s.contains(rule.selector.as_str()))
        });
        if let Some(rule) = matched {
            return rule.level;
        }

        if info.is_text() {
            if parent_tag.is_some_and(|tag| MARKUP_PARENTS.contains(&tag)) {
                return PrivacyLevel::None;
            }
            return inherited;
        }

        let attributes = &info.attributes;
        if attributes.contains_key(MASK_ATTRIBUTE) {
            return PrivacyLevel::TextImage;
        }
        if attributes.contains_key(UNMASK_ATTRIBUTE) {
            return PrivacyLevel::None;
        }

        let mut level = inherited;

        if level == PrivacyLevel::Sensitive {
            if let Some(class) = attributes.get("class") {
                if contains_any(class, SENSITIVE_CLASS_TERMS) {
                    level = PrivacyLevel::Text;
                }
            }
        }

        if FORM_TAGS.contains(&info.tag.as_str()) {
            match level {
                PrivacyLevel::Sensitive => level = PrivacyLevel::Text,
                PrivacyLevel::None => {
                    let names_field = attributes
                        .iter()
                        .filter(|(key, _)| key.as_str() != "class" && key.as_str() != "style")
                        .any(|(_, value)| contains_any(value, SENSITIVE_FIELD_TERMS));
                    if names_field {
                        level = PrivacyLevel::Text;
                    }
                }
                _ => {}
            }
        }

        if let Some(kind) = attributes.get("type") {
            if MASKED_INPUT_TYPES.contains(&kind.to_ascii_lowercase().as_str()) {
                level = level.max(PrivacyLevel::Text);
            }
        }

        level
    }
}

fn contains_any(value: &str, terms: &[&str]) -> bool {
    let value = value.to_ascii_lowercase();
    terms.iter().any(|term| value.contains(term))
}
