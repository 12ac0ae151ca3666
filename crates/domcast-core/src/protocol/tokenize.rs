//! Back-reference compaction for token arrays
//!
//! Within one array, every repeat of a string already emitted is replaced by
//! its index in the compacted output. Consecutive repeats share a single
//! [`Token::Indices`] token:
//!
//! ```text
//! [7, 6, 3, "DIV", "class=a", 4, "DIV", "class=a"]
//!                        ──►  [7, 6, 3, "DIV", "class=a", 4, [3, 4]]
//! ```
//!
//! References are resolved against the complete compacted array, so a
//! reference may only point at positions holding a string.

use std::collections::HashMap;

use tracing::debug;

use crate::types::{Token, TokenArray};

/// Replace repeated strings with back-references.
pub fn tokenize(tokens: TokenArray) -> TokenArray {
    let mut output: TokenArray = Vec::with_capacity(tokens.len());
    let mut lookup: HashMap<String, usize> = HashMap::new();
    let mut extending = false;

    for token in tokens {
        match token {
            Token::Text(text) => match lookup.get(&text) {
                Some(&index) => {
                    if extending {
                        if let Some(Token::Indices(refs)) = output.last_mut() {
                            refs.push(index);
                            continue;
                        }
                    }
                    output.push(Token::Indices(vec![index]));
                    extending = true;
                }
                None => {
                    lookup.insert(text.clone(), output.len());
                    output.push(Token::Text(text));
                    extending = false;
                }
            },
            other => {
                output.push(other);
                extending = false;
            }
        }
    }

    output
}

/// Expand back-references into the strings they point at.
///
/// A reference to a position that is out of range or does not hold a string
/// is dropped. Referencing the same position several times yields the same
/// string each time.
pub fn resolve(tokens: &[Token]) -> TokenArray {
    let mut output = Vec::with_capacity(tokens.len());

    for token in tokens {
        match token {
            Token::Indices(refs) => {
                for &index in refs {
                    match tokens.get(index) {
                        Some(Token::Text(text)) => output.push(Token::Text(text.clone())),
                        _ => debug!(index, "Skipping unresolvable back-reference"),
                    }
                }
            }
            other => output.push(other.clone()),
        }
    }

    output
}
