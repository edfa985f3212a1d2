//! Deterministic byte representation and keccak-256 digest of a `TraceEntry` (C2).

use crate::types::{ErrorInfo, Outcome, TraceEntry};
use crate::value::{Number, Value};
use ethereum_types::H256;
use std::fmt::Write as _;

/// Compute the Keccak-256 hash of input bytes.
///
/// Lifted unchanged from the teacher's `signing::keccak256` — same
/// `tiny_keccak::{Hasher, Keccak}` one-shot usage.
pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    use tiny_keccak::{Hasher, Keccak};
    let mut output = [0u8; 32];
    let mut hasher = Keccak::v256();
    hasher.update(bytes);
    hasher.finalize(&mut output);
    output
}

/// Produce the canonical textual form of a `TraceEntry`.
///
/// Fields are emitted in exactly the order spec §4.2 mandates:
/// `{id, method, args, result, error, timestamp, duration, parentId}`.
/// Nested objects have keys sorted lexicographically (free, via `BTreeMap`
/// in `crate::value::Value`); arrays preserve position; absent optional
/// fields are omitted entirely rather than emitted as `null`.
pub fn canonical_text(entry: &TraceEntry) -> String {
    let mut out = String::new();
    out.push('{');

    write_field(&mut out, "id", true);
    out.push(':');
    write_quoted(&mut out, &entry.id.to_string());
    out.push(',');

    write_field(&mut out, "method", false);
    out.push(':');
    write_quoted(&mut out, &entry.method);
    out.push(',');

    write_field(&mut out, "args", false);
    out.push(':');
    out.push('[');
    for (i, arg) in entry.args.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_value(&mut out, arg);
    }
    out.push(']');

    match &entry.outcome {
        Outcome::Result(value) => {
            out.push(',');
            write_field(&mut out, "result", false);
            out.push(':');
            write_value(&mut out, value);
        }
        Outcome::Error(err) => {
            out.push(',');
            write_field(&mut out, "error", false);
            out.push(':');
            write_error(&mut out, err);
        }
    }

    out.push(',');
    write_field(&mut out, "timestamp", false);
    out.push(':');
    write!(out, "{}", entry.timestamp).unwrap();

    out.push(',');
    write_field(&mut out, "duration", false);
    out.push(':');
    write!(out, "{}", entry.duration_ms).unwrap();

    if let Some(parent) = entry.parent_id {
        out.push(',');
        write_field(&mut out, "parentId", false);
        out.push(':');
        write_quoted(&mut out, &parent.to_string());
    }

    out.push('}');
    out
}

fn write_field(out: &mut String, name: &str, _first: bool) {
    write_quoted(out, name);
}

fn write_quoted(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                write!(out, "\\u{:04x}", c as u32).unwrap();
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn write_error(out: &mut String, err: &ErrorInfo) {
    out.push('{');
    write_quoted(out, "name");
    out.push(':');
    write_quoted(out, &err.name);
    out.push(',');
    write_quoted(out, "message");
    out.push(':');
    write_quoted(out, &err.message);
    if let Some(stack) = &err.stack {
        out.push(',');
        write_quoted(out, "stack");
        out.push(':');
        write_quoted(out, stack);
    }
    out.push('}');
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(out, n),
        Value::String(s) => write_quoted(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            // BTreeMap iterates in lexicographic key order already.
            out.push('{');
            for (i, (k, v)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_quoted(out, k);
                out.push(':');
                write_value(out, v);
            }
            out.push('}');
        }
    }
}

fn write_number(out: &mut String, n: &Number) {
    match n {
        Number::Int(i) => {
            write!(out, "{i}").unwrap();
        }
        Number::Float(f) => {
            // Shortest round-trippable representation.
            write!(out, "{f}").unwrap();
        }
    }
}

/// `keccak256` digest of a `TraceEntry`'s canonical text, as a 32-byte hash.
pub fn entry_hash(entry: &TraceEntry) -> H256 {
    H256::from(keccak256(canonical_text(entry).as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Outcome;
    use std::collections::BTreeMap;

    fn sample_entry() -> TraceEntry {
        TraceEntry::new(
            "greet",
            vec![Value::String("Ada".into())],
            Outcome::Result(Value::String("hi Ada".into())),
            1_700_000_000_000,
            3,
            None,
        )
    }

    #[test]
    fn canonical_text_round_trips_structurally() {
        let entry = sample_entry();
        let text = canonical_text(&entry);
        assert!(text.starts_with(r#"{"id":""#));
        assert!(text.contains(r#""method":"greet""#));
        assert!(text.contains(r#""args":["Ada"]"#));
        assert!(text.contains(r#""result":"hi Ada""#));
        assert!(!text.contains("parentId"));
    }

    #[test]
    fn canonical_text_is_deterministic_across_repeated_calls() {
        let entry = sample_entry();
        assert_eq!(canonical_text(&entry), canonical_text(&entry));
    }

    #[test]
    fn nested_object_keys_are_sorted_lexicographically() {
        let mut map = BTreeMap::new();
        map.insert("zeta".to_string(), Value::Number(Number::Int(1)));
        map.insert("alpha".to_string(), Value::Number(Number::Int(2)));
        let entry = TraceEntry::new(
            "call",
            vec![Value::Object(map)],
            Outcome::Result(Value::Null),
            0,
            0,
            None,
        );
        let text = canonical_text(&entry);
        let alpha_pos = text.find("alpha").unwrap();
        let zeta_pos = text.find("zeta").unwrap();
        assert!(alpha_pos < zeta_pos);
    }

    #[test]
    fn entry_hash_is_32_bytes_and_stable() {
        let entry = sample_entry();
        let h1 = entry_hash(&entry);
        let h2 = entry_hash(&entry);
        assert_eq!(h1, h2);
        assert_eq!(h1.as_bytes().len(), 32);
    }

    #[test]
    fn tampering_with_a_field_changes_the_hash() {
        let mut entry = sample_entry();
        let original = entry_hash(&entry);
        entry.method = "greetOther".into();
        assert_ne!(original, entry_hash(&entry));
    }
}
