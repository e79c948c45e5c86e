//! Durable snapshot plumbing.
//!
//! Every component owns one or more independent documents. Stores only move
//! opaque JSON bodies; encoding and decoding happen here so every backend
//! sees the same layout.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::PersistenceError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DocumentKind {
    Arms,
    Campaigns,
    Decisions,
    Guardrails,
    Anomalies,
    Drift,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 6] = [
        DocumentKind::Arms,
        DocumentKind::Campaigns,
        DocumentKind::Decisions,
        DocumentKind::Guardrails,
        DocumentKind::Anomalies,
        DocumentKind::Drift,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arms => "arms",
            Self::Campaigns => "campaigns",
            Self::Decisions => "decisions",
            Self::Guardrails => "guardrails",
            Self::Anomalies => "anomalies",
            Self::Drift => "drift",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document-per-component key/value storage.
///
/// `load` returns `Ok(None)` when the document was never written, so a first
/// run starts from defaults.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, kind: DocumentKind) -> Result<Option<String>, PersistenceError>;
    async fn save(&self, kind: DocumentKind, body: &str) -> Result<(), PersistenceError>;
}

/// Set by writers, consumed by the autosave ticker.
#[derive(Debug, Default)]
pub struct DirtyFlag(AtomicBool);

impl DirtyFlag {
    pub fn mark(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clears the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

pub fn encode<T: Serialize>(kind: DocumentKind, value: &T) -> Result<String, PersistenceError> {
    serde_json::to_string(value).map_err(|error| PersistenceError::Serialization {
        document: kind.as_str().to_string(),
        message: error.to_string(),
    })
}

pub fn decode<T: DeserializeOwned>(kind: DocumentKind, body: &str) -> Result<T, PersistenceError> {
    serde_json::from_str(body).map_err(|error| PersistenceError::Serialization {
        document: kind.as_str().to_string(),
        message: error.to_string(),
    })
}
