//! Read-only access to enrolled reference embeddings
//!
//! The inference core only ever reads references. Enrollment output is
//! handed back to the caller, which owns persistence.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::decision::IdentityEmbedding;
use crate::error::{Result, ShieldError};

/// A stored embedding for one enrolled identity
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceEmbedding {
    pub identity: String,
    pub embedding: IdentityEmbedding,
}

impl ReferenceEmbedding {
    pub fn new(identity: impl Into<String>, embedding: impl Into<IdentityEmbedding>) -> Self {
        Self {
            identity: identity.into(),
            embedding: embedding.into(),
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        self.embedding.as_slice()
    }
}

/// Lookup of references by identity id
pub trait ReferenceStore: Send + Sync {
    /// `ReferenceNotFound` for unknown ids and for empty records
    fn get(&self, identity: &str) -> Result<ReferenceEmbedding>;
}

/// Store backed by a map built up front
#[derive(Debug, Clone, Default)]
pub struct InMemoryReferenceStore {
    entries: HashMap<String, Vec<f32>>,
}

impl InMemoryReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, identity: impl Into<String>, embedding: Vec<f32>) -> Self {
        self.entries.insert(identity.into(), embedding);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<ReferenceEmbedding> for InMemoryReferenceStore {
    fn from_iter<I: IntoIterator<Item = ReferenceEmbedding>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|r| (r.identity, r.embedding.into_vec()))
                .collect(),
        }
    }
}

impl ReferenceStore for InMemoryReferenceStore {
    fn get(&self, identity: &str) -> Result<ReferenceEmbedding> {
        lookup(&self.entries, identity)
    }
}

#[derive(Debug, Deserialize)]
struct StoredRecord {
    #[serde(default)]
    embedding: Vec<f32>,
}

/// Store read once from a JSON document of the form
/// `{ "<identity>": { "embedding": [..] }, .. }`
///
/// Extra fields on a record are ignored.
#[derive(Debug, Clone)]
pub struct JsonReferenceStore {
    entries: HashMap<String, Vec<f32>>,
}

impl JsonReferenceStore {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content).map_err(|e| match e {
            ShieldError::Config(msg) => {
                ShieldError::Config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let records: HashMap<String, StoredRecord> = serde_json::from_str(json)
            .map_err(|e| ShieldError::Config(format!("invalid reference store: {}", e)))?;
        tracing::debug!("Loaded {} reference embeddings", records.len());
        Ok(Self {
            entries: records
                .into_iter()
                .map(|(id, record)| (id, record.embedding))
                .collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ReferenceStore for JsonReferenceStore {
    fn get(&self, identity: &str) -> Result<ReferenceEmbedding> {
        lookup(&self.entries, identity)
    }
}

fn lookup(entries: &HashMap<String, Vec<f32>>, identity: &str) -> Result<ReferenceEmbedding> {
    match entries.get(identity) {
        Some(embedding) if !embedding.is_empty() => {
            Ok(ReferenceEmbedding::new(identity, embedding.clone()))
        }
        _ => Err(ShieldError::ReferenceNotFound(identity.to_string())),
    }
}
