//! Content scrubbing by privacy level
//!
//! | Level       | text (`*T`)          | value / placeholder   | src, alt, title |
//! |-------------|----------------------|-----------------------|-----------------|
//! | None        | verbatim             | verbatim              | verbatim        |
//! | Sensitive   | redact digit/@ words | redact digit/@ words  | verbatim        |
//! | Text        | mangle               | mask per character    | verbatim        |
//! | TextImage   | mangle               | mask per character    | blank           |
//! | Exclude     | mangle               | fixed mask            | blank           |
//!
//! Mangling replaces trimmed text by its length in base 36 so the decoder can
//! rebuild a placeholder of the same shape with [`unmask`].

use crate::protocol::hash::to_base36;
use crate::types::{PrivacyLevel, TEXT_TAG};

pub const MASK: char = '•';
pub const LETTER: char = '▪';
pub const DIGIT: char = '▫';

/// Fixed replacement for excluded input values.
pub const EXCLUDED_VALUE: &str = "••••";

/// Run length used when rebuilding mangled text.
pub const WORD_LENGTH: usize = 5;

const CURRENCY: &[char] = &['$', '€', '£', '¥', '₹', '¢'];

const DATA_PREFIX: &str = "data-";

/// Scrub one piece of node content.
///
/// `hint` names what the content is: `*T` for text nodes, an attribute name,
/// or the owning tag for element values such as `STYLE`. `input_type` is the
/// `type` attribute of the owning element, if any.
pub fn scrub(
    value: &str,
    hint: &str,
    privacy: PrivacyLevel,
    mangle: bool,
    input_type: Option<&str>,
) -> String {
    if hint == "STYLE" || hint == "TITLE" {
        return value.to_string();
    }
    if hint == "value" && matches!(input_type, Some("checkbox") | Some("radio")) {
        return value.to_string();
    }

    let is_text = hint == TEXT_TAG || hint.starts_with(DATA_PREFIX);
    let is_field = matches!(hint, "value" | "placeholder" | "autocomplete");
    let is_image = matches!(hint, "src" | "srcset" | "title" | "alt");

    match privacy {
        PrivacyLevel::None => value.to_string(),
        PrivacyLevel::Sensitive => {
            if hint == TEXT_TAG || hint == "value" || hint == "placeholder" {
                redact(value)
            } else {
                value.to_string()
            }
        }
        PrivacyLevel::Text | PrivacyLevel::TextImage => {
            if is_text {
                if mangle {
                    mangle_text(value)
                } else {
                    mask(value)
                }
            } else if is_field {
                mask(value)
            } else if is_image && privacy == PrivacyLevel::TextImage {
                String::new()
            } else {
                value.to_string()
            }
        }
        PrivacyLevel::Exclude => {
            if is_text {
                if mangle {
                    mangle_text(value)
                } else {
                    mask(value)
                }
            } else if is_field {
                if value.is_empty() {
                    String::new()
                } else {
                    EXCLUDED_VALUE.to_string()
                }
            } else if is_image {
                String::new()
            } else {
                value.to_string()
            }
        }
    }
}

/// Replace every non-whitespace character with [`MASK`].
pub fn mask(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_whitespace() { c } else { MASK })
        .collect()
}

/// Replace trimmed content with its length in base 36, keeping the
/// surrounding whitespace.
pub fn mangle_text(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return value.to_string();
    }
    let leading = &value[..value.len() - value.trim_start().len()];
    let trailing = &value[value.trim_end().len()..];
    format!(
        "{}{}{}",
        leading,
        to_base36(trimmed.chars().count() as u64),
        trailing
    )
}

/// Longest placeholder `unmask` rebuilds.
pub const MAX_UNMASK_LENGTH: usize = 10_000;

/// Rebuild a dot placeholder of the original length from mangled text.
///
/// Input that is not a mangled length, or whose length exceeds
/// [`MAX_UNMASK_LENGTH`], is returned unchanged.
pub fn unmask(value: &str) -> String {
    let trimmed = value.trim();
    let length = match usize::from_str_radix(trimmed, 36) {
        Ok(length) if length <= MAX_UNMASK_LENGTH => length,
        _ => return value.to_string(),
    };
    let leading = &value[..value.len() - value.trim_start().len()];
    let trailing = &value[value.trim_end().len()..];

    let quotient = length / WORD_LENGTH;
    let remainder = length % WORD_LENGTH;
    let mut out = String::with_capacity(value.len() + length * MASK.len_utf8());
    out.push_str(leading);
    out.extend(std::iter::repeat(MASK).take(remainder));
    for chunk in 0..quotient {
        out.push(if chunk == 0 && remainder == 0 { MASK } else { ' ' });
        out.extend(std::iter::repeat(MASK).take(WORD_LENGTH - 1));
    }
    out.push_str(trailing);
    out
}

/// Redact words that look like personal data: any word with a digit or `@`,
/// unless it carries a currency symbol.
fn redact(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut word = String::new();

    for c in value.chars() {
        if c.is_whitespace() {
            out.push_str(&redact_word(&word));
            word.clear();
            out.push(c);
        } else {
            word.push(c);
        }
    }
    out.push_str(&redact_word(&word));
    out
}

fn redact_word(word: &str) -> String {
    let suspicious = word.chars().any(|c| c.is_ascii_digit() || c == '@');
    if !suspicious || word.chars().any(|c| CURRENCY.contains(&c)) {
        return word.to_string();
    }
    word.chars()
        .map(|c| {
            if c.is_ascii_digit() {
                DIGIT
            } else if c.is_alphabetic() {
                LETTER
            } else {
                c
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_is_verbatim() {
        assert_eq!(scrub("p1ssw0rd", "value", PrivacyLevel::None, false, None), "p1ssw0rd");
    }

    #[test]
    fn test_sensitive_redacts_suspicious_words() {
        let out = scrub(
            "call me at 555-0100 or bob@mail.com for $20",
            TEXT_TAG,
            PrivacyLevel::Sensitive,
            false,
            None,
        );
        assert_eq!(out, "call me at ▫▫▫-▫▫▫▫ or ▪▪▪@▪▪▪▪.▪▪▪ for $20");

        // Attributes other than value/placeholder pass through
        assert_eq!(scrub("id42", "class", PrivacyLevel::Sensitive, false, None), "id42");
    }

    #[test]
    fn test_text_masks_values_per_character() {
        let out = scrub("p1ssw0rd", "value", PrivacyLevel::Text, false, Some("text"));
        assert_eq!(out, "••••••••");
        assert_eq!(out.chars().count(), "p1ssw0rd".len());
    }

    #[test]
    fn test_text_mangles_text_nodes() {
        assert_eq!(scrub("  hello world ", TEXT_TAG, PrivacyLevel::Text, true, None), "  b ");
        assert_eq!(scrub("ab cd", "data-user", PrivacyLevel::Text, false, None), "•• ••");
    }

    #[test]
    fn test_images_blanked_only_from_text_image() {
        assert_eq!(scrub("a.png", "src", PrivacyLevel::Text, false, None), "a.png");
        assert_eq!(scrub("a.png", "src", PrivacyLevel::TextImage, false, None), "");
        assert_eq!(scrub("Logo", "alt", PrivacyLevel::Exclude, false, None), "");
    }

    #[test]
    fn test_exclude_uses_fixed_mask() {
        let out = scrub("secret value", "value", PrivacyLevel::Exclude, false, None);
        assert_eq!(out, EXCLUDED_VALUE);
        assert_eq!(scrub("", "value", PrivacyLevel::Exclude, false, None), "");
    }

    #[test]
    fn test_exempt_content() {
        let css = ".a { color: red }";
        assert_eq!(scrub(css, "STYLE", PrivacyLevel::Exclude, false, None), css);
        assert_eq!(scrub("on", "value", PrivacyLevel::Text, false, Some("checkbox")), "on");
    }

    #[test]
    fn test_unmask_restores_length() {
        for length in [1usize, 4, 5, 6, 10, 23] {
            let original = "x".repeat(length);
            let restored = unmask(&mangle_text(&original));
            assert_eq!(restored.chars().count(), length, "length {length}");
            assert!(restored.starts_with(MASK));
        }
        assert_eq!(unmask(" 5\n"), " •••••\n");
        assert_eq!(unmask("7"), "•• ••••");
    }

    #[test]
    fn test_unmask_passes_through_non_numbers() {
        assert_eq!(unmask("hello world"), "hello world");
        assert_eq!(unmask("   "), "   ");
    }

    #[test]
    fn test_unmask_rejects_oversized_lengths() {
        assert_eq!(unmask("zzzzzzzzzzzz"), "zzzzzzzzzzzz");
        assert_eq!(unmask(&to_base36(MAX_UNMASK_LENGTH as u64 + 1)), "7pt");
        let longest = unmask(&to_base36(MAX_UNMASK_LENGTH as u64));
        assert_eq!(longest.chars().count(), MAX_UNMASK_LENGTH);
    }
}
