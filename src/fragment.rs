//! Fragment types - the atomic persisted unit of a document
//!
//! A document revision is stored as a set of fragments, one per leaf:
//! - `String`, `Numeric`, `Boolean`: carry the raw leaf bytes
//! - `Null`, `EmptyObject`, `EmptyArray`: structural leaves without a value
//! - `Deleted`: tombstone marker at the empty path

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of fragment types. The numeric code is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FragmentType {
    Null,
    String,
    Numeric,
    Boolean,
    EmptyObject,
    EmptyArray,
    Deleted,
}

impl FragmentType {
    /// Stable type code stored in the `type` column
    pub fn code(&self) -> u8 {
        match self {
            FragmentType::Null => 0,
            FragmentType::String => 1,
            FragmentType::Numeric => 2,
            FragmentType::Boolean => 3,
            FragmentType::EmptyObject => 4,
            FragmentType::EmptyArray => 5,
            FragmentType::Deleted => 6,
        }
    }

    /// Inverse of [`FragmentType::code`]
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(FragmentType::Null),
            1 => Ok(FragmentType::String),
            2 => Ok(FragmentType::Numeric),
            3 => Ok(FragmentType::Boolean),
            4 => Ok(FragmentType::EmptyObject),
            5 => Ok(FragmentType::EmptyArray),
            6 => Ok(FragmentType::Deleted),
            _ => Err(Error::ContractViolation(format!("unknown fragment type code {}", code))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FragmentType::Null => "NULL",
            FragmentType::String => "STRING",
            FragmentType::Numeric => "NUMERIC",
            FragmentType::Boolean => "BOOLEAN",
            FragmentType::EmptyObject => "EMPTY_OBJECT",
            FragmentType::EmptyArray => "EMPTY_ARRAY",
            FragmentType::Deleted => "DELETED",
        }
    }

    pub fn all() -> &'static [FragmentType] {
        &[
            FragmentType::Null,
            FragmentType::String,
            FragmentType::Numeric,
            FragmentType::Boolean,
            FragmentType::EmptyObject,
            FragmentType::EmptyArray,
            FragmentType::Deleted,
        ]
    }
}

impl FromStr for FragmentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "NULL" => Ok(FragmentType::Null),
            "STRING" => Ok(FragmentType::String),
            "NUMERIC" | "NUMBER" => Ok(FragmentType::Numeric),
            "BOOLEAN" | "BOOL" => Ok(FragmentType::Boolean),
            "EMPTY_OBJECT" => Ok(FragmentType::EmptyObject),
            "EMPTY_ARRAY" => Ok(FragmentType::EmptyArray),
            "DELETED" => Ok(FragmentType::Deleted),
            _ => Err(Error::ContractViolation(format!("unknown fragment type: {}", s))),
        }
    }
}

impl fmt::Display for FragmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One path-addressed, typed leaf value of a document at a specific version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub namespace: String,
    pub entity: String,
    pub id: String,
    /// Document revision
    pub version: DateTime<Utc>,
    /// Index-aware path, e.g. `/items[2]/name`
    pub path: String,
    pub fragment_type: FragmentType,
    /// Always 0: large leaf values are never split
    pub offset: u64,
    pub value: Option<Vec<u8>>,
}

impl Fragment {
    pub fn new(
        namespace: impl Into<String>,
        entity: impl Into<String>,
        id: impl Into<String>,
        version: DateTime<Utc>,
        path: impl Into<String>,
        fragment_type: FragmentType,
        value: Option<Vec<u8>>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            entity: entity.into(),
            id: id.into(),
            version,
            path: path.into(),
            fragment_type,
            offset: 0,
            value,
        }
    }

    /// Tombstone fragment written by `mark_deleted`
    pub fn deleted_marker(
        namespace: impl Into<String>,
        entity: impl Into<String>,
        id: impl Into<String>,
        version: DateTime<Utc>,
    ) -> Self {
        Self::new(namespace, entity, id, version, "", FragmentType::Deleted, None)
    }

    pub fn document_key(&self) -> DocumentKey {
        DocumentKey::new(&self.namespace, &self.entity, &self.id)
    }

    pub fn is_deleted_marker(&self) -> bool {
        self.fragment_type == FragmentType::Deleted && self.path.is_empty()
    }

    /// Value bytes as UTF-8, if any
    pub fn value_str(&self) -> Option<&str> {
        self.value.as_deref().and_then(|v| std::str::from_utf8(v).ok())
    }
}

/// A snapshot is tombstoned when it holds exactly one DELETED marker at `""`.
pub fn is_tombstone(fragments: &[Fragment]) -> bool {
    matches!(fragments, [only] if only.is_deleted_marker())
}

/// Identity of a logical document, used to deduplicate supersede-deletes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentKey {
    pub namespace: String,
    pub entity: String,
    pub id: String,
}

impl DocumentKey {
    pub fn new(namespace: impl Into<String>, entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            entity: entity.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}/{}", self.namespace, self.entity, self.id)
    }
}
