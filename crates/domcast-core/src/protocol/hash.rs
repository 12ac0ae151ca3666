//! Compact selector hash
//!
//! Two interleaved djb2 accumulators over the UTF-16 code units of the input,
//! combined and rendered in base 36. Arithmetic wraps at 32 bits so the
//! output matches producers running on 32-bit integer semantics.

const SEED: i32 = 5381;
const MIX: i64 = 11579;

/// Hash a selector into a short base-36 key.
pub fn hash(input: &str) -> String {
    let mut h1 = SEED;
    let mut h2 = SEED;

    for (i, unit) in input.encode_utf16().enumerate() {
        let c = i32::from(unit);
        let h = if i % 2 == 0 { &mut h1 } else { &mut h2 };
        *h = h.wrapping_shl(5).wrapping_add(*h) ^ c;
    }

    let combined = (i64::from(h1) + i64::from(h2) * MIX).unsigned_abs();
    to_base36(combined)
}

/// Render an unsigned integer in lowercase base 36.
pub fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1982), "1j2");
    }

    #[test]
    fn test_hash_empty_input() {
        // 5381 + 5381 * 11579
        assert_eq!(hash(""), to_base36(5381 + 5381 * 11579));
    }

    #[test]
    fn test_hash_is_deterministic_and_discriminating() {
        let a = hash("HTML>BODY>DIV.card:nth-of-type(2)");
        assert_eq!(a, hash("HTML>BODY>DIV.card:nth-of-type(2)"));
        assert_ne!(a, hash("HTML>BODY>DIV.card:nth-of-type(3)"));
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_hash_handles_wide_characters() {
        let h = hash("HTML>BODY>DIV.日本語");
        assert!(!h.is_empty());
    }
}
