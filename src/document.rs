//! Document decomposition - JSON trees to fragments and back
//!
//! Paths address leaves from the root: object members as `/key`, array
//! elements as `[i]`, so `{"a": {"b": [1]}}` yields one fragment at
//! `/a/b[0]`. Keys escape `~` as `~0`, `/` as `~1` and `[` as `~2`.

use crate::fragment::{is_tombstone, DocumentKey, Fragment, FragmentType};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// Split `document` into one fragment per leaf at `version`.
pub fn decompose(key: &DocumentKey, version: DateTime<Utc>, document: &Value) -> Vec<Fragment> {
    let mut fragments = Vec::new();
    walk(document, String::new(), &mut |path, fragment_type, value| {
        fragments.push(Fragment::new(
            &key.namespace,
            &key.entity,
            &key.id,
            version,
            path,
            fragment_type,
            value,
        ));
    });
    fragments
}

fn walk(value: &Value, path: String, emit: &mut dyn FnMut(String, FragmentType, Option<Vec<u8>>)) {
    match value {
        Value::Object(map) if map.is_empty() => emit(path, FragmentType::EmptyObject, None),
        Value::Object(map) => {
            for (k, v) in map {
                walk(v, format!("{}/{}", path, escape_key(k)), emit);
            }
        }
        Value::Array(items) if items.is_empty() => emit(path, FragmentType::EmptyArray, None),
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                walk(v, format!("{}[{}]", path, i), emit);
            }
        }
        Value::String(s) => emit(path, FragmentType::String, Some(s.as_bytes().to_vec())),
        Value::Number(n) => emit(path, FragmentType::Numeric, Some(n.to_string().into_bytes())),
        Value::Bool(b) => emit(path, FragmentType::Boolean, Some(b.to_string().into_bytes())),
        Value::Null => emit(path, FragmentType::Null, None),
    }
}

/// Rebuild the document held by one snapshot's fragments.
///
/// Returns `None` for an empty or tombstoned snapshot.
pub fn recompose(fragments: &[Fragment]) -> Result<Option<Value>> {
    if fragments.is_empty() || is_tombstone(fragments) {
        return Ok(None);
    }

    // every element of a stored array owns at least one fragment
    let max_len = fragments.len();
    let mut root = Value::Null;
    for fragment in fragments {
        let leaf = leaf_value(fragment)?;
        let segments = parse_path(&fragment.path)?;
        place(&mut root, &segments, leaf, &fragment.path, max_len)?;
    }
    Ok(Some(root))
}

fn leaf_value(fragment: &Fragment) -> Result<Value> {
    let bytes = || {
        fragment.value.as_deref().ok_or_else(|| {
            Error::ContractViolation(format!("{} fragment at `{}` has no value", fragment.fragment_type, fragment.path))
        })
    };
    Ok(match fragment.fragment_type {
        FragmentType::Null => Value::Null,
        FragmentType::EmptyObject => Value::Object(Map::new()),
        FragmentType::EmptyArray => Value::Array(Vec::new()),
        FragmentType::String => {
            let s = std::str::from_utf8(bytes()?).map_err(|e| {
                Error::ContractViolation(format!("string fragment at `{}` is not UTF-8: {}", fragment.path, e))
            })?;
            Value::String(s.to_string())
        }
        FragmentType::Numeric => Value::Number(serde_json::from_slice(bytes()?)?),
        FragmentType::Boolean => Value::Bool(serde_json::from_slice(bytes()?)?),
        FragmentType::Deleted => {
            return Err(Error::ContractViolation(format!(
                "deleted marker at `{}` inside a live document",
                fragment.path
            )))
        }
    })
}

fn place(node: &mut Value, segments: &[Segment], leaf: Value, path: &str, max_len: usize) -> Result<()> {
    let Some((first, rest)) = segments.split_first() else {
        *node = leaf;
        return Ok(());
    };

    match first {
        Segment::Key(key) => {
            if node.is_null() {
                *node = Value::Object(Map::new());
            }
            let Value::Object(map) = node else {
                return Err(conflict(path));
            };
            place(map.entry(key.clone()).or_insert(Value::Null), rest, leaf, path, max_len)
        }
        Segment::Index(index) => {
            if node.is_null() {
                *node = Value::Array(Vec::new());
            }
            let Value::Array(items) = node else {
                return Err(conflict(path));
            };
            if *index >= max_len {
                return Err(Error::ContractViolation(format!(
                    "index {} in `{}` exceeds the {} fragments of the snapshot",
                    index, path, max_len
                )));
            }
            if items.len() <= *index {
                items.resize(index + 1, Value::Null);
            }
            place(&mut items[*index], rest, leaf, path, max_len)
        }
    }
}

fn conflict(path: &str) -> Error {
    Error::ContractViolation(format!("fragment at `{}` conflicts with the document shape", path))
}

fn parse_path(path: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut rest = path;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix('/') {
            let end = tail.find(['/', '[']).unwrap_or(tail.len());
            segments.push(Segment::Key(unescape_key(&tail[..end])?));
            rest = &tail[end..];
        } else if let Some(tail) = rest.strip_prefix('[') {
            let end = tail
                .find(']')
                .ok_or_else(|| Error::ContractViolation(format!("unterminated index in path `{}`", path)))?;
            let index = tail[..end]
                .parse()
                .map_err(|_| Error::ContractViolation(format!("invalid index in path `{}`", path)))?;
            segments.push(Segment::Index(index));
            rest = &tail[end + 1..];
        } else {
            return Err(Error::ContractViolation(format!("malformed path `{}`", path)));
        }
    }
    Ok(segments)
}

fn escape_key(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1").replace('[', "~2")
}

fn unescape_key(key: &str) -> Result<String> {
    let mut out = String::with_capacity(key.len());
    let mut chars = key.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('~'),
            Some('1') => out.push('/'),
            Some('2') => out.push('['),
            _ => return Err(Error::ContractViolation(format!("bad escape in key `{}`", key))),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> DocumentKey {
        DocumentKey::new("ns", "person", "1")
    }

    #[test]
    fn test_decompose_paths_and_types() {
        let doc = json!({"name": "Alice", "age": 30, "tags": ["a", "b"], "address": {"city": "Oslo"}});
        let fragments = decompose(&key(), Utc::now(), &doc);
        let mut pairs: Vec<(String, FragmentType)> =
            fragments.iter().map(|f| (f.path.clone(), f.fragment_type)).collect();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("/address/city".to_string(), FragmentType::String),
                ("/age".to_string(), FragmentType::Numeric),
                ("/name".to_string(), FragmentType::String),
                ("/tags[0]".to_string(), FragmentType::String),
                ("/tags[1]".to_string(), FragmentType::String),
            ]
        );
        assert!(fragments.iter().all(|f| f.offset == 0));
    }

    #[test]
    fn test_recompose_restores_document() {
        let doc = json!({
            "name": "Alice",
            "score": 12.5,
            "active": true,
            "spouse": null,
            "meta": {},
            "aliases": [],
            "matrix": [[1, 2], [3]],
            "odd/key[x]~": {"nested": [{"deep": false}]}
        });
        let fragments = decompose(&key(), Utc::now(), &doc);
        assert_eq!(recompose(&fragments).unwrap(), Some(doc));
    }

    #[test]
    fn test_recompose_scalar_root() {
        let fragments = decompose(&key(), Utc::now(), &json!("just text"));
        assert_eq!(fragments[0].path, "");
        assert_eq!(recompose(&fragments).unwrap(), Some(json!("just text")));
    }

    #[test]
    fn test_recompose_tombstone_and_empty() {
        let marker = Fragment::deleted_marker("ns", "person", "1", Utc::now());
        assert_eq!(recompose(&[marker]).unwrap(), None);
        assert_eq!(recompose(&[]).unwrap(), None);
    }

    #[test]
    fn test_recompose_rejects_conflicting_shapes() {
        let v = Utc::now();
        let fragments = vec![
            Fragment::new("ns", "person", "1", v, "/a", FragmentType::String, Some(b"x".to_vec())),
            Fragment::new("ns", "person", "1", v, "/a/b", FragmentType::String, Some(b"y".to_vec())),
        ];
        assert!(recompose(&fragments).unwrap_err().is_contract_violation());
    }

    #[test]
    fn test_recompose_rejects_index_beyond_snapshot() {
        let v = Utc::now();
        let fragments = vec![Fragment::new(
            "ns",
            "person",
            "1",
            v,
            "/a[4294967295]",
            FragmentType::String,
            Some(b"x".to_vec()),
        )];
        assert!(recompose(&fragments).unwrap_err().is_contract_violation());

        let gap = vec![
            Fragment::new("ns", "person", "1", v, "/a[0]", FragmentType::Numeric, Some(b"1".to_vec())),
            Fragment::new("ns", "person", "1", v, "/a[2]", FragmentType::Numeric, Some(b"3".to_vec())),
        ];
        assert!(recompose(&gap).unwrap_err().is_contract_violation());
    }

    #[test]
    fn test_recompose_accepts_index_order_before_nested_paths() {
        let v = Utc::now();
        // `/a[1]` sorts ahead of `/a[]/x` in storage order
        let fragments = vec![
            Fragment::new("ns", "person", "1", v, "/a[1]", FragmentType::Numeric, Some(b"2".to_vec())),
            Fragment::new("ns", "person", "1", v, "/a[0]/x", FragmentType::Numeric, Some(b"1".to_vec())),
        ];
        assert_eq!(recompose(&fragments).unwrap(), Some(json!({"a": [{"x": 1}, 2]})));
    }

    #[test]
    fn test_escape_roundtrip() {
        for k in ["plain", "a/b", "x~y", "arr[0]", "~1"] {
            assert_eq!(unescape_key(&escape_key(k)).unwrap(), k);
        }
    }
}
