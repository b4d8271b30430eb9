//! Fragment Codec - index-unaware path encoding
//!
//! A document path such as `/items[3]/tags[0]` is stored as the
//! index-unaware path `/items[]/tags[]` plus the index sequence `[3, 0]`.
//! Stored rows are only meaningful when decoded with this exact scheme,
//! so the marker and digit rules here must never change.

use crate::{Error, Result};
use regex::Regex;
use std::sync::OnceLock;

/// Placeholder left behind for every removed array index
pub const INDEX_MARKER: &str = "[]";

fn index_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("static index pattern"))
}

fn slot_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[(\d*)\]").expect("static slot pattern"))
}

fn parse_index(digits: &str, path: &str) -> Result<u32> {
    let index: u32 = digits.parse().map_err(|_| {
        Error::ContractViolation(format!("array index {} in path `{}` is out of range", digits, path))
    })?;
    // "[007]" would not survive decode as written
    if digits.len() > 1 && digits.starts_with('0') {
        return Err(Error::ContractViolation(format!(
            "array index {} in path `{}` has leading zeros",
            digits, path
        )));
    }
    Ok(index)
}

/// Replace every bracketed array index in `path` with [`INDEX_MARKER`],
/// collecting the removed integers left to right.
pub fn encode(path: &str) -> Result<(String, Vec<u32>)> {
    if path.contains(INDEX_MARKER) {
        return Err(Error::ContractViolation(format!(
            "path `{}` contains a bare `{}` marker",
            path, INDEX_MARKER
        )));
    }

    let (unaware, slots) = encode_pattern_with(index_pattern(), path)?;
    Ok((unaware, slots.into_iter().flatten().collect()))
}

/// Like [`encode`], but also accepts bare `[]` slots standing for any
/// index. Each slot is `Some(index)` or `None` for a bare one.
pub fn encode_pattern(path: &str) -> Result<(String, Vec<Option<u32>>)> {
    encode_pattern_with(slot_pattern(), path)
}

fn encode_pattern_with(pattern: &Regex, path: &str) -> Result<(String, Vec<Option<u32>>)> {
    let mut slots = Vec::new();
    let mut unaware = String::with_capacity(path.len());
    let mut last = 0;

    for caps in pattern.captures_iter(path) {
        let (Some(whole), Some(digits)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let slot = match digits.as_str() {
            "" => None,
            digits => Some(parse_index(digits, path)?),
        };
        unaware.push_str(&path[last..whole.start()]);
        unaware.push_str(INDEX_MARKER);
        slots.push(slot);
        last = whole.end();
    }
    unaware.push_str(&path[last..]);

    Ok((unaware, slots))
}

/// Exact inverse of [`encode`].
pub fn decode(index_unaware_path: &str, indices: &[u32]) -> Result<String> {
    let markers = index_unaware_path.matches(INDEX_MARKER).count();
    if markers != indices.len() {
        return Err(Error::EncodingMismatch {
            path: index_unaware_path.to_string(),
            markers,
            indices: indices.len(),
        });
    }

    let mut path = String::with_capacity(index_unaware_path.len() + indices.len() * 3);
    let mut parts = index_unaware_path.split(INDEX_MARKER);
    if let Some(first) = parts.next() {
        path.push_str(first);
    }
    for (part, index) in parts.zip(indices) {
        path.push('[');
        path.push_str(&index.to_string());
        path.push(']');
        path.push_str(part);
    }
    Ok(path)
}

/// Pack indices into a blob whose byte order matches integer-array order.
pub fn indices_to_blob(indices: &[u32]) -> Vec<u8> {
    indices.iter().flat_map(|i| i.to_be_bytes()).collect()
}

/// Unpack a blob written by [`indices_to_blob`].
pub fn blob_to_indices(blob: &[u8]) -> Result<Vec<u32>> {
    if blob.len() % 4 != 0 {
        return Err(Error::ContractViolation(format!(
            "indices blob has length {}, expected a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
