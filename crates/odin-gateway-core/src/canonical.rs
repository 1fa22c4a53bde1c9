//! Canonical JSON encoding for deterministic content identifiers.
//!
//! The encoding is compact JSON with these rules:
//! - Object keys sorted by their UTF-8 bytes
//! - No insignificant whitespace
//! - Non-ASCII text emitted as raw UTF-8; only `"`, `\` and control
//!   characters are escaped
//! - Integers in plain decimal; floats with a zero fraction inside the
//!   exactly-representable range are written as integers, `-0.0` as `0`,
//!   everything else in the shortest round-trip form without an exponent
//! - NaN and infinities are rejected
//!
//! The same logical value always produces the same bytes, and therefore the
//! same [`Cid`].

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::crypto::Cid;
use crate::error::{CoreError, Result};
use crate::value::{Number, Value};

/// Separator between the fields of a signing message.
pub const SIGNING_SEPARATOR: char = '|';

/// Largest magnitude at which every integer is exactly representable as `f64`.
const MAX_EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

/// Encode a value to its canonical byte form.
pub fn canonicalize(value: &Value) -> Result<Vec<u8>> {
    let mut buf = String::new();
    encode_value(&mut buf, value)?;
    Ok(buf.into_bytes())
}

/// Canonical bytes of any serializable type.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    canonicalize(&Value::from_serialize(value)?)
}

/// Content identifier of raw bytes.
pub fn cid_of(bytes: &[u8]) -> Cid {
    Cid::digest(bytes)
}

/// Content identifier of a value's canonical form.
pub fn cid_of_value(value: &Value) -> Result<Cid> {
    Ok(cid_of(&canonicalize(value)?))
}

/// Content identifier of a serializable type's canonical form.
pub fn cid_of_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Cid> {
    Ok(cid_of(&canonical_bytes(value)?))
}

/// Build the message that is signed for a receipt, bundle or response:
/// `"{cid}|{trace_id}|{timestamp}"`.
///
/// The separator must not appear inside any field, otherwise two different
/// triples could produce the same message.
pub fn signing_message(cid: &Cid, trace_id: &str, timestamp: &str) -> Result<Vec<u8>> {
    reject_separator("trace_id", trace_id)?;
    reject_separator("timestamp", timestamp)?;
    Ok(format!("{cid}{SIGNING_SEPARATOR}{trace_id}{SIGNING_SEPARATOR}{timestamp}").into_bytes())
}

fn reject_separator(field: &'static str, value: &str) -> Result<()> {
    if value.contains(SIGNING_SEPARATOR) {
        return Err(CoreError::InvalidField {
            field,
            reason: format!("must not contain '{SIGNING_SEPARATOR}'"),
        });
    }
    Ok(())
}

/// Recursively encode a value.
fn encode_value(buf: &mut String, value: &Value) -> Result<()> {
    match value {
        Value::Null => buf.push_str("null"),
        Value::Bool(b) => buf.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => encode_number(buf, *n)?,
        Value::String(s) => encode_string(buf, s),
        Value::Array(items) => encode_array(buf, items)?,
        Value::Object(map) => encode_object(buf, map)?,
    }
    Ok(())
}

fn encode_number(buf: &mut String, n: Number) -> Result<()> {
    match n {
        Number::Int(i) => {
            let _ = write!(buf, "{i}");
        }
        Number::UInt(u) => {
            let _ = write!(buf, "{u}");
        }
        Number::Float(f) => {
            if !f.is_finite() {
                return Err(CoreError::EncodingError(format!(
                    "non-finite number cannot be canonicalized: {f}"
                )));
            }
            if f.fract() == 0.0 && f.abs() < MAX_EXACT_FLOAT_INT {
                // Also folds -0.0 into 0
                let _ = write!(buf, "{}", f as i64);
            } else {
                // Display is shortest round-trip and never uses an exponent
                let _ = write!(buf, "{f}");
            }
        }
    }
    Ok(())
}

fn encode_string(buf: &mut String, s: &str) {
    buf.push('"');
    for c in s.chars() {
        match c {
            '"' => buf.push_str("\\\""),
            '\\' => buf.push_str("\\\\"),
            '\u{08}' => buf.push_str("\\b"),
            '\u{0c}' => buf.push_str("\\f"),
            '\n' => buf.push_str("\\n"),
            '\r' => buf.push_str("\\r"),
            '\t' => buf.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(buf, "\\u{:04x}", c as u32);
            }
            c => buf.push(c),
        }
    }
    buf.push('"');
}

fn encode_array(buf: &mut String, items: &[Value]) -> Result<()> {
    buf.push('[');
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            buf.push(',');
        }
        encode_value(buf, item)?;
    }
    buf.push(']');
    Ok(())
}

/// Encode an object with keys in UTF-8 byte order.
///
/// `BTreeMap<String, _>` already iterates in that order.
fn encode_object(buf: &mut String, map: &BTreeMap<String, Value>) -> Result<()> {
    buf.push('{');
    for (i, (key, value)) in map.iter().enumerate() {
        if i > 0 {
            buf.push(',');
        }
        encode_string(buf, key);
        buf.push(':');
        encode_value(buf, value)?;
    }
    buf.push('}');
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn canon(v: serde_json::Value) -> String {
        String::from_utf8(canonicalize(&Value::from(v)).unwrap()).unwrap()
    }

    #[test]
    fn test_keys_sorted_and_compact() {
        assert_eq!(canon(json!({"b": 1, "a": [1, 2, {"d": null, "c": true}]})),
            r#"{"a":[1,2,{"c":true,"d":null}],"b":1}"#);
    }

    #[test]
    fn test_key_order_is_utf8_byte_order() {
        assert_eq!(canon(json!({"é": 1, "z": 2, "Z": 3})), r#"{"Z":3,"z":2,"é":1}"#);
    }

    #[test]
    fn test_string_escaping() {
        assert_eq!(canon(json!("a\"b\\c\nd\u{1}")), r#""a\"b\\c\nd\u0001""#);
        // Non-ASCII stays raw
        assert_eq!(canon(json!("ödin ✓")), "\"ödin ✓\"");
    }

    #[test]
    fn test_number_forms() {
        assert_eq!(canon(json!(1.0)), "1");
        assert_eq!(canon(json!(-0.0)), "0");
        assert_eq!(canon(json!(1.5)), "1.5");
        assert_eq!(canon(json!(0.1)), "0.1");
        assert_eq!(canon(json!(1e-7)), "0.0000001");
        assert_eq!(canon(json!(-42)), "-42");
        assert_eq!(canon(json!(u64::MAX)), "18446744073709551615");
    }

    #[test]
    fn test_integer_and_whole_float_share_bytes() {
        let a = Value::from(7i64);
        let b = Value::from(7.0f64);
        let c = Value::from(7u64);
        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&c).unwrap());
    }

    #[test]
    fn test_non_finite_rejected() {
        for f in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let v = Value::object([("x", Value::from(f))]);
            assert!(matches!(canonicalize(&v), Err(CoreError::EncodingError(_))));
        }
    }

    #[test]
    fn test_cid_of_known_bytes() {
        let cid = cid_of_value(&Value::Object(BTreeMap::new())).unwrap();
        assert_eq!(
            cid.to_string(),
            "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[test]
    fn test_signing_message_format() {
        let cid = cid_of(b"abc");
        let msg = signing_message(&cid, "trace-1", "2025-01-01T00:00:00Z").unwrap();
        assert_eq!(
            String::from_utf8(msg).unwrap(),
            format!("{cid}|trace-1|2025-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_signing_message_rejects_separator() {
        let cid = cid_of(b"abc");
        assert!(signing_message(&cid, "a|b", "ts").is_err());
        assert!(signing_message(&cid, "a", "t|s").is_err());
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            (-1.0e12f64..1.0e12).prop_map(Value::from),
            ".{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map(".{0,8}", inner, 0..6).prop_map(Value::Object),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_canonical_form_is_a_fixed_point(v in arb_value()) {
            let first = canonicalize(&v).unwrap();
            let reparsed: serde_json::Value = serde_json::from_slice(&first).unwrap();
            let second = canonicalize(&Value::from(reparsed)).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_key_order_in_source_text_does_not_matter(
            entries in prop::collection::btree_map("[a-zA-Z0-9_\u{e9}]{0,8}", any::<i64>(), 0..10)
        ) {
            let member = |(k, v): (&String, &i64)| format!("{}:{}", json!(k), v);
            let forward: Vec<String> = entries.iter().map(member).collect();
            let backward: Vec<String> = entries.iter().rev().map(member).collect();
            let expected = format!("{{{}}}", forward.join(",")).into_bytes();

            for text in [
                format!("{{ {} }}", forward.join(", ")),
                format!("{{\n  {}\n}}", backward.join(",\n  ")),
            ] {
                let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
                prop_assert_eq!(canonicalize(&Value::from(parsed)).unwrap(), expected.clone());
            }
        }
    }
}
