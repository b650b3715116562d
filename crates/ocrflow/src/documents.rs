//! Resolution of document identifiers to stored files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Read access to the document store. Upload and storage live elsewhere;
/// the pipeline only needs to know whether a document exists and where its
/// file is.
pub trait DocumentLookup: Send + Sync {
    fn exists(&self, document_id: &str) -> bool;

    /// `None` when the document is unknown.
    fn file_path(&self, document_id: &str) -> Option<PathBuf>;
}

/// In-memory document registry.
#[derive(Debug, Default)]
pub struct DocumentIndex {
    documents: RwLock<HashMap<String, PathBuf>>,
}

impl DocumentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a document's file.
    pub fn register(&self, document_id: impl Into<String>, path: impl AsRef<Path>) {
        self.write().insert(document_id.into(), path.as_ref().to_path_buf());
    }

    pub fn remove(&self, document_id: &str) -> Option<PathBuf> {
        self.write().remove(document_id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, PathBuf>> {
        self.documents.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, PathBuf>> {
        self.documents.write().unwrap_or_else(|p| p.into_inner())
    }
}

impl DocumentLookup for DocumentIndex {
    fn exists(&self, document_id: &str) -> bool {
        self.read().contains_key(document_id)
    }

    fn file_path(&self, document_id: &str) -> Option<PathBuf> {
        self.read().get(document_id).cloned()
    }
}

/// Ids from `document_ids` that the lookup does not know, in input order.
pub fn missing_documents(lookup: &dyn DocumentLookup, document_ids: &[String]) -> Vec<String> {
    document_ids
        .iter()
        .filter(|id| !lookup.exists(id))
        .cloned()
        .collect()
}
