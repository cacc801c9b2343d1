//! Video items and their store keys.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::stage::StageName;

/// Maximum key length in bytes.
pub const MAX_KEY_LENGTH: usize = 512;

/// Reasons a string cannot be used as a stage store key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemKeyError {
    #[error("key is empty")]
    Empty,

    #[error("key exceeds {MAX_KEY_LENGTH} bytes")]
    TooLong,

    #[error("key contains a path separator or parent reference: {0}")]
    PathLike(String),

    #[error("key starts with '.': {0}")]
    Hidden(String),

    #[error("key contains control characters")]
    ControlCharacters,
}

/// Store key of a video item.
///
/// The key is derived from the item's origin (extractor + remote id), so the
/// same source always maps to the same key. It is also the join key between
/// the quarantine and normalized stores, and is used verbatim as a local
/// scratch filename, hence the validation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "String", into = "String")]
pub struct ItemKey(String);

impl ItemKey {
    /// Validate and wrap a key.
    pub fn parse(key: impl Into<String>) -> Result<Self, ItemKeyError> {
        let key = key.into();

        if key.is_empty() {
            return Err(ItemKeyError::Empty);
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(ItemKeyError::TooLong);
        }
        if key.contains('/') || key.contains('\\') || key.contains("..") {
            return Err(ItemKeyError::PathLike(key));
        }
        if key.starts_with('.') {
            return Err(ItemKeyError::Hidden(key));
        }
        if key.chars().any(|c| c.is_control()) {
            return Err(ItemKeyError::ControlCharacters);
        }

        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File extension, if the key has one.
    pub fn extension(&self) -> Option<&str> {
        self.0
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty())
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ItemKey {
    type Error = ItemKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ItemKey> for String {
    fn from(key: ItemKey) -> Self {
        key.0
    }
}

impl AsRef<str> for ItemKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A video held by exactly one stage store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VideoItem {
    /// Deterministic, origin-derived identity
    pub key: ItemKey,
    /// URL the item was fetched from (known only at ingest)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// Store currently holding the item
    pub stage: StageName,
    /// Size in bytes
    pub size_bytes: u64,
    /// When the item was placed in its current store
    pub created_at: DateTime<Utc>,
}

impl VideoItem {
    pub fn new(key: ItemKey, stage: StageName, size_bytes: u64) -> Self {
        Self {
            key,
            source_url: None,
            stage,
            size_bytes,
            created_at: Utc::now(),
        }
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}
