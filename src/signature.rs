//! Wire signature validation.
//!
//! Method input/output signatures use a fixed type-tag alphabet:
//!
//! | Tag | Type          | Tag | Type            |
//! |-----|---------------|-----|-----------------|
//! | `y` | byte          | `d` | double          |
//! | `b` | boolean       | `s` | string          |
//! | `n` | int16         | `o` | object path     |
//! | `q` | uint16        | `g` | signature       |
//! | `i` | int32         | `h` | handle          |
//! | `u` | uint32        | `v` | variant         |
//! | `x` | int64         | `a` | array prefix    |
//! | `t` | uint64        |     |                 |
//!
//! Containers: `(...)` is a struct with at least one member, `a` must be
//! followed by a complete element type, and `a{KV}` is a dictionary whose
//! key `K` is a basic tag and whose value `V` is one complete type.
//!
//! Validation happens once, at service-definition time, when descriptors are
//! inserted into an [`InterfaceDescriptor`](crate::descriptor::InterfaceDescriptor).

use crate::error::{BuswayError, Result};

/// Maximum container nesting depth accepted by the validator.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Check whether a tag denotes a basic (non-container, non-variant) type.
///
/// Basic tags are the only ones allowed as dictionary keys.
pub fn is_basic_tag(tag: char) -> bool {
    matches!(
        tag,
        'y' | 'b' | 'n' | 'q' | 'i' | 'u' | 'x' | 't' | 'd' | 's' | 'o' | 'g' | 'h'
    )
}

/// Validate a full signature string.
///
/// A signature is a sequence of zero or more complete types; the empty
/// signature is valid and means "no arguments" (or "no return values").
pub fn validate(signature: &str) -> Result<()> {
    let chars: Vec<char> = signature.chars().collect();
    let mut pos = 0;
    while pos < chars.len() {
        pos = parse_single(&chars, pos, signature, 0)?;
    }
    Ok(())
}

/// Number of complete top-level types in a signature.
///
/// Used by the dispatcher to sanity-check reply arity against the declared
/// output signature.
pub fn arity(signature: &str) -> Result<usize> {
    let chars: Vec<char> = signature.chars().collect();
    let mut pos = 0;
    let mut count = 0;
    while pos < chars.len() {
        pos = parse_single(&chars, pos, signature, 0)?;
        count += 1;
    }
    Ok(count)
}

fn invalid(signature: &str, reason: impl Into<String>) -> BuswayError {
    BuswayError::InvalidSignature {
        signature: signature.to_string(),
        reason: reason.into(),
    }
}

/// Parse one complete type starting at `pos`, returning the position after it.
fn parse_single(chars: &[char], pos: usize, sig: &str, depth: usize) -> Result<usize> {
    if depth > MAX_NESTING_DEPTH {
        return Err(invalid(sig, "nesting too deep"));
    }

    match chars.get(pos) {
        None => Err(invalid(sig, "truncated type")),
        Some(&c) if is_basic_tag(c) || c == 'v' => Ok(pos + 1),
        Some('a') => match chars.get(pos + 1) {
            Some('{') => parse_dict_entry(chars, pos + 2, sig, depth + 1),
            Some(_) => parse_single(chars, pos + 1, sig, depth + 1),
            None => Err(invalid(sig, "array prefix without element type")),
        },
        Some('(') => {
            let mut inner = pos + 1;
            if chars.get(inner) == Some(&')') {
                return Err(invalid(sig, "empty struct"));
            }
            loop {
                match chars.get(inner) {
                    Some(')') => return Ok(inner + 1),
                    Some(_) => inner = parse_single(chars, inner, sig, depth + 1)?,
                    None => return Err(invalid(sig, "unterminated struct")),
                }
            }
        }
        Some('{') => Err(invalid(sig, "dict entry outside array")),
        Some(&c) if c == ')' || c == '}' => Err(invalid(sig, format!("unbalanced '{c}'"))),
        Some(&c) => Err(invalid(sig, format!("unknown type tag '{c}'"))),
    }
}

/// Parse the `KV}` tail of a dict entry (the leading `a{` is consumed).
fn parse_dict_entry(chars: &[char], pos: usize, sig: &str, depth: usize) -> Result<usize> {
    let key = chars
        .get(pos)
        .ok_or_else(|| invalid(sig, "unterminated dict entry"))?;
    if !is_basic_tag(*key) {
        return Err(invalid(sig, format!("dict key '{key}' is not a basic type")));
    }

    let after_value = parse_single(chars, pos + 1, sig, depth)?;
    match chars.get(after_value) {
        Some('}') => Ok(after_value + 1),
        Some(_) => Err(invalid(sig, "dict entry must have exactly one value type")),
        None => Err(invalid(sig, "unterminated dict entry")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_basic_signatures() {
        for sig in ["", "i", "s", "ss", "yid", "so", "g", "v", "h"] {
            assert!(validate(sig).is_ok(), "expected {sig:?} to be valid");
        }
    }

    #[test]
    fn test_container_signatures() {
        for sig in ["ai", "aai", "(is)", "(i(ss))", "a(sd)", "a{sv}", "a{is}", "aa{ss}"] {
            assert!(validate(sig).is_ok(), "expected {sig:?} to be valid");
        }
    }

    #[test]
    fn test_invalid_signatures() {
        for sig in ["z", "a", "(i", "()", "}i", "a{vi}", "a{si", "a{sii}", "{si}", "i)"] {
            let err = validate(sig).unwrap_err();
            assert!(
                matches!(err, BuswayError::InvalidSignature { .. }),
                "expected InvalidSignature for {sig:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_nesting_limit() {
        let deep = "a".repeat(MAX_NESTING_DEPTH + 1) + "i";
        assert!(validate(&deep).is_err());

        let ok = "a".repeat(MAX_NESTING_DEPTH) + "i";
        assert!(validate(&ok).is_ok());
    }

    #[test]
    fn test_arity() {
        assert_eq!(arity("").unwrap(), 0);
        assert_eq!(arity("i").unwrap(), 1);
        assert_eq!(arity("ss").unwrap(), 2);
        assert_eq!(arity("a{sv}i(ss)").unwrap(), 3);
        assert!(arity("a").is_err());
    }

    proptest! {
        /// Random strings over the basic alphabet are always valid, and the
        /// arity equals the string length.
        #[test]
        fn prop_basic_runs_validate(sig in "[ybnqiuxtdsogh]{0,24}") {
            prop_assert!(validate(&sig).is_ok());
            prop_assert_eq!(arity(&sig).unwrap(), sig.chars().count());
        }

        /// The validator never panics on arbitrary ASCII input.
        #[test]
        fn prop_validate_total(sig in "[ -~]{0,40}") {
            let _ = validate(&sig);
        }
    }
}
